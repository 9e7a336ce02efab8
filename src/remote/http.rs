use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;

use super::traits::{PutOutcome, RemoteDocument, RemoteStore};
use crate::error::{Result, SyncError};
use crate::model::SyncBlob;

/// Remote sync endpoint over HTTP.
///
/// `GET {url}` returns `{version, blob}`; `PUT {url}` takes
/// `{expectedVersion, blob}` and answers 409 on a version mismatch.
pub struct HttpRemote {
    client: Client,
    url: String,
    auth_token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PutRequest<'a> {
    expected_version: u64,
    blob: &'a SyncBlob,
}

impl HttpRemote {
    pub fn new(url: String, auth_token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Network(format!("Failed to build HTTP client: {}", e)))?;

        tracing::debug!("HTTP remote at {}", url);

        Ok(Self {
            client,
            url,
            auth_token,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// Read a version field, tolerating its absence.
fn version_of(body: &serde_json::Value) -> Option<u64> {
    body.get("version").and_then(serde_json::Value::as_u64)
}

/// Turn a GET body into a document. A body that is not JSON (an HTML error
/// page, a truncated response) keeps its raw text as the blob, which then
/// fails validation like any other malformed blob.
fn decode_document(text: &str) -> RemoteDocument {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(body) => RemoteDocument {
            version: version_of(&body).unwrap_or(0),
            blob: body.get("blob").cloned().unwrap_or(serde_json::Value::Null),
        },
        Err(e) => {
            tracing::warn!("Remote response is not JSON: {}", e);
            RemoteDocument {
                version: 0,
                blob: serde_json::Value::String(text.to_string()),
            }
        }
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn fetch(&self) -> Result<RemoteDocument> {
        let response = self.authorize(self.client.get(&self.url)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(RemoteDocument::unwritten());
        }
        if !response.status().is_success() {
            return Err(SyncError::Network(format!(
                "GET {} returned {}",
                self.url,
                response.status()
            )));
        }

        let text = response.text().await?;
        Ok(decode_document(&text))
    }

    async fn put(&self, expected_version: u64, blob: &SyncBlob) -> Result<PutOutcome> {
        let request = PutRequest {
            expected_version,
            blob,
        };
        let response = self
            .authorize(self.client.put(&self.url))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            let body: serde_json::Value = response.json().await.unwrap_or_default();
            return Ok(PutOutcome::VersionConflict {
                current_version: version_of(&body).unwrap_or(0),
            });
        }
        if !status.is_success() {
            return Err(SyncError::Network(format!(
                "PUT {} returned {}",
                self.url, status
            )));
        }

        let body: serde_json::Value = response.json().await.unwrap_or_default();
        Ok(PutOutcome::Written {
            version: version_of(&body).unwrap_or(expected_version + 1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{RetryPolicy, SyncAdapter};

    #[test]
    fn test_put_request_wire_shape() {
        let blob = SyncBlob::empty();
        let request = PutRequest {
            expected_version: 4,
            blob: &blob,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["expectedVersion"], 4);
        assert_eq!(json["blob"]["version"], 0);
    }

    #[test]
    fn test_decode_document() {
        let doc = decode_document(r#"{"version": 3, "blob": {"notes": {}}}"#);
        assert_eq!(doc.version, 3);
        assert_eq!(doc.blob, serde_json::json!({"notes": {}}));

        let doc = decode_document("<html>oops</html>");
        assert_eq!(doc.version, 0);
        assert_eq!(doc.blob, serde_json::json!("<html>oops</html>"));
    }

    /// Answer one request on a local port with a fixed HTTP response.
    async fn serve_once(response: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{}/blob", addr)
    }

    #[tokio::test]
    async fn test_html_error_page_pulls_as_empty_blob() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\ncontent-type: text/html\r\ncontent-length: 17\r\nconnection: close\r\n\r\n<html>oops</html>",
        )
        .await;
        let remote = HttpRemote::new(url, None, Duration::from_secs(5)).unwrap();
        let adapter = SyncAdapter::new(std::sync::Arc::new(remote), RetryPolicy::none());

        let blob = adapter.pull().await.unwrap();
        assert_eq!(blob, SyncBlob::empty());
    }

    #[test]
    fn test_version_of() {
        assert_eq!(version_of(&serde_json::json!({"version": 9})), Some(9));
        assert_eq!(version_of(&serde_json::json!({"version": "9"})), None);
        assert_eq!(version_of(&serde_json::Value::Null), None);
    }
}
