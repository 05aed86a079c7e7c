// ABOUTME: HTTP client for the AquaTest change-feed web service
// ABOUTME: Implements ChangeFeedClient and TableCatalog over reqwest

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use super::models::{parse_table_list, Page};
use super::{ChangeFeedClient, ChangeType, TableCatalog, Watermark};
use crate::config::ServerConfig;
use crate::error::SyncError;
use crate::utils::redact_url;

const TABLES_ENDPOINT: &str = "table_names";

pub struct HttpChangeFeed {
    client: Client,
    base_url: Url,
    access_key: String,
    batch_size: u32,
    municipality: Option<i64>,
}

impl HttpChangeFeed {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        // Url::join drops the last path segment unless the base ends in '/'
        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .with_context(|| format!("Invalid update server URL '{}'", config.base_url))?;

        Ok(Self {
            client,
            base_url,
            access_key: config.access_key.clone(),
            batch_size: config.batch_size.max(1),
            municipality: config.municipality,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, name: &str) -> Result<Url, SyncError> {
        self.base_url
            .join(name)
            .map_err(|e| SyncError::Transport(format!("invalid end point '{}': {}", name, e)))
    }

    /// Build the request URL for one page of changes.
    pub fn change_url(
        &self,
        change_type: ChangeType,
        table: &str,
        since: Watermark,
        offset: usize,
    ) -> Result<Url, SyncError> {
        let mut url = self.endpoint(change_type.endpoint())?;
        url.query_pairs_mut()
            .append_pair("table", table)
            .append_pair("time", &since.as_seconds().to_string())
            .append_pair("offset", &offset.to_string())
            .append_pair("limit", &self.batch_size.to_string())
            .append_pair("key", &self.access_key)
            .append_pair("domain", &self.municipality.unwrap_or(0).to_string());
        Ok(url)
    }

    pub fn tables_url(&self) -> Result<Url, SyncError> {
        let mut url = self.endpoint(TABLES_ENDPOINT)?;
        url.query_pairs_mut().append_pair("key", &self.access_key);
        Ok(url)
    }

    /// GET `url` and decode the body. An empty body or a bare `null` is `None`.
    async fn get_json(&self, url: Url) -> Result<Option<serde_json::Value>, SyncError> {
        tracing::debug!("GET {}", redact_url(&url));

        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Transport(format!(
                "Update server responded with status {}: {}",
                status,
                body.trim()
            )));
        }

        let body = response.text().await?;
        let trimmed = body.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(None);
        }

        Ok(Some(serde_json::from_str(trimmed)?))
    }
}

#[async_trait]
impl ChangeFeedClient for HttpChangeFeed {
    async fn fetch_page(
        &self,
        change_type: ChangeType,
        table: &str,
        since: Watermark,
        offset: usize,
    ) -> Result<Option<Page>, SyncError> {
        let url = self.change_url(change_type, table, since, offset)?;
        match self.get_json(url).await? {
            Some(body) => Page::from_json(&body).map(Some),
            None => {
                tracing::warn!(
                    "Update server returned no {} page for '{}' at offset {}",
                    change_type,
                    table,
                    offset
                );
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl TableCatalog for HttpChangeFeed {
    async fn list_tables(&self) -> Vec<String> {
        let body = match self.tables_url() {
            Ok(url) => self.get_json(url).await,
            Err(e) => Err(e),
        };

        match body {
            Ok(Some(body)) => match parse_table_list(&body) {
                Ok(tables) => tables,
                Err(e) => {
                    tracing::warn!("Ignoring unreadable table list: {}", e);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!("Failed to download table list: {}", e);
                Vec::new()
            }
        }
    }
}
