// ABOUTME: Transmitter - posts the per-cycle ExportBatch to the remote endpoint
// ABOUTME: One request per cycle; any transport error or non-2xx status is a failure

use anyhow::{Context, Result};
use reqwest::header::AUTHORIZATION;
use reqwest::Client;
use std::future::Future;
use std::time::Duration;

use crate::export::ExportBatch;

/// Default request timeout, matching the replicator's HTTP client.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Delivers a batch to the remote endpoint.
///
/// `Ok(())` means the endpoint accepted the whole batch. There is no partial
/// success and no retry at this layer; a failed cycle is retried by the daemon.
pub trait Transmitter {
    fn send(
        &self,
        endpoint: &str,
        batch: &ExportBatch,
        credential: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// JSON-over-HTTP transmitter.
pub struct HttpTransmitter {
    client: Client,
}

impl HttpTransmitter {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Use a preconfigured client (proxy, TLS or timeout settings).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Transmitter for HttpTransmitter {
    async fn send(&self, endpoint: &str, batch: &ExportBatch, credential: &str) -> Result<()> {
        tracing::info!(
            "Posting {} records from {} collections to {}",
            batch.record_count(),
            batch.collection_count(),
            endpoint
        );

        let response = self
            .client
            .post(endpoint)
            .header(AUTHORIZATION, credential)
            .json(batch)
            .send()
            .await
            .with_context(|| format!("Failed to post export batch to {}", endpoint))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            if status == 401 || status == 403 {
                anyhow::bail!(
                    "Endpoint {} rejected the access token (status {}): {}",
                    endpoint,
                    status,
                    body
                );
            }

            anyhow::bail!(
                "Endpoint {} responded with status {}: {}",
                endpoint,
                status,
                body
            );
        }

        tracing::info!("Posted export batch to {}", endpoint);
        Ok(())
    }
}
