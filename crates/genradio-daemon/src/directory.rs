//! radio-browser.info catalog client.
//!
//! Every query degrades to an empty list: transport, status and decode
//! failures are logged and swallowed here so callers only ever see stations.
use std::time::Duration;

use genradio_proto::config::DirectoryConfig;
use genradio_proto::station::{parse_catalog_json, Station};
use reqwest::Url;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("directory returned HTTP {0}")]
    Status(reqwest::StatusCode),
    #[error("directory response could not be decoded: {0}")]
    Decode(String),
    #[error("invalid directory URL: {0}")]
    Url(String),
}

#[derive(Clone)]
pub struct DirectoryClient {
    client: reqwest::Client,
    base_url: String,
    search_limit: usize,
}

impl DirectoryClient {
    pub fn new(config: &DirectoryConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            search_limit: config.search_limit,
        })
    }

    pub fn top_url(&self, limit: usize) -> Result<Url, DirectoryError> {
        let url = Url::parse_with_params(
            &format!("{}/topvote/{}", self.base_url, limit),
            &[("hidebroken", "true")],
        )
        .map_err(|e| DirectoryError::Url(e.to_string()))?;
        Ok(url)
    }

    pub fn search_url(&self, text: &str, tag: &str) -> Result<Url, DirectoryError> {
        let limit = self.search_limit.to_string();
        let mut params = vec![
            ("limit", limit.as_str()),
            ("hidebroken", "true"),
            ("order", "clickcount"),
            ("reverse", "true"),
            ("is_https", "true"),
        ];
        let text = text.trim();
        let tag = tag.trim();
        if !text.is_empty() {
            params.push(("name", text));
        }
        if !tag.is_empty() {
            params.push(("tag", tag));
        }
        let url = Url::parse_with_params(&format!("{}/search", self.base_url), &params)
            .map_err(|e| DirectoryError::Url(e.to_string()))?;
        Ok(url)
    }

    /// Most-voted stations.
    pub async fn fetch_top(&self, limit: usize) -> Vec<Station> {
        match self.top_url(limit) {
            Ok(url) => self.fetch_or_empty(url).await,
            Err(e) => {
                warn!("directory: {}", e);
                Vec::new()
            }
        }
    }

    /// Stations matching a name and/or tag.  Empty arguments are left out of
    /// the query.
    pub async fn search(&self, text: &str, tag: &str) -> Vec<Station> {
        match self.search_url(text, tag) {
            Ok(url) => self.fetch_or_empty(url).await,
            Err(e) => {
                warn!("directory: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn by_tag(&self, tag: &str) -> Vec<Station> {
        self.search("", tag).await
    }

    async fn fetch_or_empty(&self, url: Url) -> Vec<Station> {
        let shown = url.to_string();
        match self.fetch(url).await {
            Ok(stations) => {
                debug!("directory: {} stations from {}", stations.len(), shown);
                stations
            }
            Err(e) => {
                warn!("directory unavailable ({}): {}", shown, e);
                Vec::new()
            }
        }
    }

    async fn fetch(&self, url: Url) -> Result<Vec<Station>, DirectoryError> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(DirectoryError::Status(response.status()));
        }

        let body = response.bytes().await?;
        parse_catalog_json(&body).map_err(|e| DirectoryError::Decode(e.to_string()))
    }
}
