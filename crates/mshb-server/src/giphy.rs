//! Thin client for the GIPHY search and trending endpoints.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use mshb_shared::constants::{GIPHY_DEFAULT_LIMIT, GIPHY_MAX_LIMIT};

use crate::error::ServerError;

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(10);

/// Paging and content filter shared by both endpoints.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct Paging {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub rating: Option<String>,
}

impl Paging {
    pub fn clamped_limit(&self) -> u32 {
        self.limit.unwrap_or(GIPHY_DEFAULT_LIMIT).clamp(1, GIPHY_MAX_LIMIT)
    }
}

pub struct GiphyClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GiphyClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, ServerError> {
        let http = reqwest::Client::builder().timeout(UPSTREAM_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub async fn search(&self, query: &str, paging: &Paging) -> Result<Value, ServerError> {
        self.fetch("search", Some(query), paging).await
    }

    pub async fn trending(&self, paging: &Paging) -> Result<Value, ServerError> {
        self.fetch("trending", None, paging).await
    }

    async fn fetch(&self, endpoint: &str, query: Option<&str>, paging: &Paging) -> Result<Value, ServerError> {
        let mut params: Vec<(&str, String)> = vec![
            ("api_key", self.api_key.clone()),
            ("limit", paging.clamped_limit().to_string()),
            ("offset", paging.offset.unwrap_or(0).to_string()),
        ];
        if let Some(q) = query {
            params.push(("q", q.to_string()));
        }
        if let Some(rating) = &paging.rating {
            params.push(("rating", rating.clone()));
        }

        let url = format!("{}/{endpoint}", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;

        let status = response.status();
        if !status.is_success() {
            warn!(endpoint, status = status.as_u16(), "GIPHY request rejected");
            return Err(ServerError::UpstreamStatus(status.as_u16()));
        }

        let body: Value = response.json().await.map_err(reqwest::Error::without_url)?;
        debug!(endpoint, "GIPHY request served");

        // Only the result list and paging go back to the caller.
        Ok(json!({
            "data": body.get("data").cloned().unwrap_or_else(|| json!([])),
            "pagination": body.get("pagination").cloned().unwrap_or(Value::Null),
        }))
    }
}
