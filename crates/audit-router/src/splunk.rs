//! Splunk alert webhooks and the search results API.

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::alert::RawResult;
use crate::config::SplunkConfig;

/// Body Splunk posts when an alert fires. Missing and `null` fields are empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplunkWebhook {
    /// Search id of the job whose results triggered the alert.
    #[serde(deserialize_with = "null_as_default")]
    pub sid: String,
    #[serde(deserialize_with = "null_as_default")]
    pub search_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub app: String,
    #[serde(deserialize_with = "null_as_default")]
    pub owner: String,
    #[serde(deserialize_with = "null_as_default")]
    pub results_link: String,
    #[serde(deserialize_with = "null_as_default")]
    pub result: RawResult,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Response of `GET /services/search/v2/jobs/{sid}/results`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SearchResults {
    pub init_offset: i64,
    pub messages: Vec<Value>,
    pub preview: bool,
    pub results: Vec<RawResult>,
    pub highlighted: Map<String, Value>,
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("request to Splunk failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("error retrieving search results from Splunk: {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid Splunk host {0:?}")]
    InvalidHost(String),
}

/// Fetches the result set of a finished search.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn retrieve_results(&self, sid: &str) -> Result<SearchResults, SearchError>;
}

/// Splunk REST client using bearer token auth.
#[derive(Clone)]
pub struct SplunkClient {
    client: reqwest::Client,
    base: Url,
    token: String,
}

impl std::fmt::Debug for SplunkClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SplunkClient")
            .field("base", &self.base.as_str())
            .finish_non_exhaustive()
    }
}

impl SplunkClient {
    pub fn new(config: &SplunkConfig) -> Result<Self, SearchError> {
        let base = Url::parse(&config.host)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| SearchError::InvalidHost(config.host.clone()))?;

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.allow_insecure)
            .build()?;

        Ok(Self {
            client,
            base,
            token: config.token.clone(),
        })
    }

    fn results_url(&self, sid: &str) -> Result<Url, SearchError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| SearchError::InvalidHost(self.base.to_string()))?
            .pop_if_empty()
            .extend(["services", "search", "v2", "jobs", sid, "results"]);
        url.query_pairs_mut().append_pair("output_mode", "json");
        Ok(url)
    }
}

#[async_trait]
impl SearchClient for SplunkClient {
    #[instrument(skip(self))]
    async fn retrieve_results(&self, sid: &str) -> Result<SearchResults, SearchError> {
        let url = self.results_url(sid)?;
        debug!(url = %url, "Requesting search results; using bearer token authorization");

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let results: SearchResults = response.json().await?;
        info!(sid, count = results.results.len(), "Retrieved alert from Splunk");
        Ok(results)
    }
}
