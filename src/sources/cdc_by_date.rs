use crate::config::Config;
use crate::constants::{CASES_BY_ONSET_DATE_SERIES, CASES_BY_REPORT_DATE_SERIES};
use crate::error::Result;
use crate::sources::fetch_bytes;
use crate::types::{FetchedPayload, RawPayload, SeriesSource};
use std::time::Duration;
use tracing::{info, instrument};

/// Fetches one of the two by-date chart payloads. The report-date and
/// onset-date series are structurally identical; only the endpoint and the
/// series name differ.
pub struct CasesByDateSource {
    series: &'static str,
    url: String,
    timeout: Duration,
}

impl CasesByDateSource {
    pub fn report_date(config: &Config) -> Self {
        Self {
            series: CASES_BY_REPORT_DATE_SERIES,
            url: config.endpoints.cases_by_report_date_url.clone(),
            timeout: Duration::from_secs(config.fetch_timeout_seconds),
        }
    }

    pub fn onset_date(config: &Config) -> Self {
        Self {
            series: CASES_BY_ONSET_DATE_SERIES,
            url: config.endpoints.cases_by_onset_date_url.clone(),
            timeout: Duration::from_secs(config.fetch_timeout_seconds),
        }
    }
}

#[async_trait::async_trait]
impl SeriesSource for CasesByDateSource {
    fn series_name(&self) -> &'static str {
        self.series
    }

    #[instrument(skip(self), fields(series = %self.series))]
    async fn fetch(&self) -> Result<FetchedPayload> {
        let (bytes, sha256) = fetch_bytes(self.series, &self.url, self.timeout).await?;
        let value: serde_json::Value = serde_json::from_slice(&bytes)?;

        info!("Successfully fetched {} payload ({} bytes)", self.series, bytes.len());
        Ok(FetchedPayload {
            series: self.series.to_string(),
            payload: RawPayload::Json(value),
            size_bytes: bytes.len(),
            sha256,
        })
    }
}
