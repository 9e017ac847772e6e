use crate::error::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Raw payload as returned from an upstream endpoint, before normalization.
#[derive(Debug, Clone)]
pub enum RawPayload {
    /// Decoded JSON document (CDC endpoints)
    Json(serde_json::Value),
    /// Delimited text body (NYT county dataset)
    Delimited(String),
}

/// A fetched payload plus the lineage metadata recorded at fetch time.
#[derive(Debug, Clone)]
pub struct FetchedPayload {
    pub series: String,
    pub payload: RawPayload,
    pub size_bytes: usize,
    pub sha256: String,
}

/// One row of the canonical by-state table, keyed by state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateCaseRecord {
    pub state: String,
    pub range: String,
    /// None only when upstream reported the placeholder string "None".
    pub n_cases: Option<f64>,
    pub community_spread: String,
    pub url: String,
}

/// One row of a canonical by-date table (report-date or onset-date series).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateCaseRecord {
    pub date: NaiveDate,
    pub n_cases: i64,
}

/// One row of the canonical county table. Cases and deaths are cumulative
/// per fips over time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountyRecord {
    pub date: NaiveDate,
    pub county: String,
    pub state: String,
    pub fips: String,
    pub cases: i64,
    pub deaths: i64,
}

/// A county row with the derived fields the aggregator computes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedCountyRecord {
    pub date: NaiveDate,
    pub county: String,
    pub state: String,
    pub fips: String,
    pub cases: i64,
    pub deaths: i64,
    /// Prior-date cumulative cases for the same fips; None on the first observation.
    pub cases_lagged: Option<i64>,
    /// max(0, cases - cases_lagged); negative upstream deltas clamp to zero.
    pub new_cases: Option<i64>,
    /// Trailing 7-point mean of new_cases; None until the window holds 7 defined values.
    pub new_cases_rolling: Option<f64>,
    pub population: u64,
    /// new_cases_rolling / population * 100_000
    pub new_cases_per100k: Option<f64>,
}

/// Core trait every upstream data series must implement.
#[async_trait::async_trait]
pub trait SeriesSource: Send + Sync {
    /// Unique series identifier; also the snapshot table prefix.
    fn series_name(&self) -> &'static str;

    /// Retrieve the raw payload from the fixed upstream endpoint.
    async fn fetch(&self) -> Result<FetchedPayload>;
}
