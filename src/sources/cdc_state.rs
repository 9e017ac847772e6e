use crate::config::Config;
use crate::constants::CASES_BY_STATE_SERIES;
use crate::error::Result;
use crate::sources::fetch_bytes;
use crate::types::{FetchedPayload, RawPayload, SeriesSource};
use std::time::Duration;
use tracing::{info, instrument};

/// Fetches the per-state case-count payload from the authority's map
/// endpoint.
pub struct CasesByStateSource {
    url: String,
    timeout: Duration,
}

impl CasesByStateSource {
    pub fn new(config: &Config) -> Self {
        Self {
            url: config.endpoints.cases_by_state_url.clone(),
            timeout: Duration::from_secs(config.fetch_timeout_seconds),
        }
    }
}

#[async_trait::async_trait]
impl SeriesSource for CasesByStateSource {
    fn series_name(&self) -> &'static str {
        CASES_BY_STATE_SERIES
    }

    #[instrument(skip(self))]
    async fn fetch(&self) -> Result<FetchedPayload> {
        let (bytes, sha256) = fetch_bytes(self.series_name(), &self.url, self.timeout).await?;
        let value: serde_json::Value = serde_json::from_slice(&bytes)?;

        info!(
            "Successfully fetched by-state payload ({} bytes)",
            bytes.len()
        );
        Ok(FetchedPayload {
            series: self.series_name().to_string(),
            payload: RawPayload::Json(value),
            size_bytes: bytes.len(),
            sha256,
        })
    }
}
