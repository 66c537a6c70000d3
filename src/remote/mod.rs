// ABOUTME: Outbound delivery of export batches
// ABOUTME: Exposes the Transmitter seam and its HTTP implementation

pub mod transmitter;

pub use transmitter::{HttpTransmitter, Transmitter, DEFAULT_REQUEST_TIMEOUT};
