// ABOUTME: Integration tests for HttpTransmitter against a local one-shot HTTP responder
// ABOUTME: Verifies method, headers and JSON body, and that non-2xx statuses fail

use collection_exporter::{ExportBatch, HttpTransmitter, Record, Transmitter};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Request as seen by the responder: request line, lowercased headers, body.
struct CapturedRequest {
    request_line: String,
    headers: Vec<(String, String)>,
    body: String,
}

impl CapturedRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Accept one connection, capture the request and answer with `status`.
async fn one_shot_server(status: &'static str, body: &'static str) -> (String, JoinHandle<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/ingest", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buffer = Vec::new();
        let mut chunk = [0u8; 4096];

        let header_end = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before headers were complete");
            buffer.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
        let mut lines = head.split("\r\n");
        let request_line = lines.next().unwrap().to_string();
        let headers: Vec<(String, String)> = lines
            .filter(|l| !l.is_empty())
            .filter_map(|l| l.split_once(':'))
            .map(|(n, v)| (n.trim().to_ascii_lowercase(), v.trim().to_string()))
            .collect();

        let content_length: usize = headers
            .iter()
            .find(|(n, _)| n == "content-length")
            .map(|(_, v)| v.parse().unwrap())
            .unwrap_or(0);
        while buffer.len() < header_end + content_length {
            let n = socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed before body was complete");
            buffer.extend_from_slice(&chunk[..n]);
        }
        let body_text =
            String::from_utf8_lossy(&buffer[header_end..header_end + content_length]).to_string();

        let response = format!(
            "HTTP/1.1 {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();

        CapturedRequest {
            request_line,
            headers,
            body: body_text,
        }
    });

    (url, handle)
}

/// Transmitter that ignores proxy environment variables so requests reach 127.0.0.1.
fn local_transmitter(timeout: Duration) -> HttpTransmitter {
    let client = reqwest::Client::builder()
        .no_proxy()
        .timeout(timeout)
        .build()
        .unwrap();
    HttpTransmitter::with_client(client)
}

fn sample_batch() -> ExportBatch {
    let mut batch = ExportBatch::new();
    batch.insert(
        "CraftAction",
        vec![
            Record::new(11, serde_json::json!({ "_id": 11, "Value": 2.0 })),
            Record::new(12, serde_json::json!({ "_id": 12, "Value": 3.5 })),
        ],
    );
    batch.insert("PlaceAction", vec![]);
    batch
}

#[tokio::test]
async fn test_send_posts_json_with_authorization() {
    let (url, server) = one_shot_server("200 OK", "").await;
    let transmitter = local_transmitter(Duration::from_secs(10));

    transmitter
        .send(&url, &sample_batch(), "secret-token")
        .await
        .unwrap();

    let request = server.await.unwrap();
    assert!(request.request_line.starts_with("POST /ingest "));
    assert_eq!(request.header("authorization"), Some("secret-token"));
    assert_eq!(request.header("content-type"), Some("application/json"));

    let body: serde_json::Value = serde_json::from_str(&request.body).unwrap();
    assert_eq!(
        body,
        serde_json::json!({
            "CraftAction": [{ "_id": 11, "Value": 2.0 }, { "_id": 12, "Value": 3.5 }],
            "PlaceAction": []
        })
    );
}

#[tokio::test]
async fn test_send_fails_on_server_error() {
    let (url, server) = one_shot_server("500 Internal Server Error", "database locked").await;
    let transmitter = local_transmitter(Duration::from_secs(10));

    let err = transmitter
        .send(&url, &sample_batch(), "secret-token")
        .await
        .unwrap_err();
    server.await.unwrap();

    let message = err.to_string();
    assert!(message.contains("500"));
    assert!(message.contains("database locked"));
}

#[tokio::test]
async fn test_send_fails_on_rejected_token() {
    let (url, server) = one_shot_server("401 Unauthorized", "bad token").await;
    let transmitter = local_transmitter(Duration::from_secs(10));

    let err = transmitter.send(&url, &ExportBatch::new(), "wrong").await.unwrap_err();
    server.await.unwrap();

    assert!(err.to_string().contains("rejected the access token"));
}

#[tokio::test]
async fn test_send_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/ingest", listener.local_addr().unwrap());
    // Accept but never answer
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(socket);
    });

    let transmitter = local_transmitter(Duration::from_millis(200));
    let result = transmitter.send(&url, &ExportBatch::new(), "token").await;
    assert!(result.is_err());
    server.abort();
}
