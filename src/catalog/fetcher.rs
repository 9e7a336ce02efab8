use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

use super::model::{IndexEntry, PaperDocument};
use crate::error::{Result, SyncError};
use crate::model::RepoSource;

/// Where catalog documents come from.
#[async_trait]
pub trait CatalogFetcher: Send + Sync {
    /// The source's index document.
    async fn fetch_index(&self, source: &RepoSource) -> Result<Vec<IndexEntry>>;

    /// The paper document, or `None` if this source does not carry the paper.
    async fn fetch_paper(&self, source: &RepoSource, paper_id: &str)
        -> Result<Option<PaperDocument>>;
}

/// Fetches `{url}/index.json` and `{url}/papers/{paper_id}.json`.
pub struct HttpCatalogFetcher {
    client: Client,
}

impl HttpCatalogFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(SyncError::Network(format!(
                "GET {} returned {}",
                url,
                response.status()
            )));
        }
        let document = response
            .json()
            .await
            .map_err(|e| SyncError::Validation(format!("{}: {}", url, e)))?;
        Ok(Some(document))
    }
}

fn document_url(source: &RepoSource, path: &str) -> String {
    format!("{}/{}", source.url.trim_end_matches('/'), path)
}

#[async_trait]
impl CatalogFetcher for HttpCatalogFetcher {
    async fn fetch_index(&self, source: &RepoSource) -> Result<Vec<IndexEntry>> {
        let url = document_url(source, "index.json");
        self.get_json(&url)
            .await?
            .ok_or_else(|| SyncError::Network(format!("{} not found", url)))
    }

    async fn fetch_paper(
        &self,
        source: &RepoSource,
        paper_id: &str,
    ) -> Result<Option<PaperDocument>> {
        let url = document_url(source, &format!("papers/{}.json", paper_id));
        self.get_json(&url).await
    }
}
