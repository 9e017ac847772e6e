use crate::config::Config;
use crate::constants::CASES_BY_COUNTY_SERIES;
use crate::error::{PipelineError, Result};
use crate::sources::fetch_bytes;
use crate::types::{FetchedPayload, RawPayload, SeriesSource};
use std::time::Duration;
use tracing::{info, instrument};

/// Fetches the county-level dataset, a delimited text file carrying the full
/// cumulative history for every county on every fetch.
pub struct CountyCasesSource {
    url: String,
    timeout: Duration,
}

impl CountyCasesSource {
    pub fn new(config: &Config) -> Self {
        Self {
            url: config.endpoints.cases_by_county_url.clone(),
            timeout: Duration::from_secs(config.fetch_timeout_seconds),
        }
    }
}

#[async_trait::async_trait]
impl SeriesSource for CountyCasesSource {
    fn series_name(&self) -> &'static str {
        CASES_BY_COUNTY_SERIES
    }

    #[instrument(skip(self))]
    async fn fetch(&self) -> Result<FetchedPayload> {
        let (bytes, sha256) = fetch_bytes(self.series_name(), &self.url, self.timeout).await?;
        let size_bytes = bytes.len();
        let text = String::from_utf8(bytes).map_err(|_| PipelineError::Fetch {
            series: self.series_name().to_string(),
            message: "payload is not valid UTF-8".to_string(),
        })?;

        info!("Successfully fetched county dataset ({size_bytes} bytes)");
        Ok(FetchedPayload {
            series: self.series_name().to_string(),
            payload: RawPayload::Delimited(text),
            size_bytes,
            sha256,
        })
    }
}
