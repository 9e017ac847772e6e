use crate::aggregate::Aggregator;
use crate::config::Config;
use crate::constants::{
    CASES_BY_COUNTY_CURRENT_SERIES, CASES_BY_COUNTY_DERIVED_SERIES, CASES_BY_COUNTY_SERIES,
    CASES_BY_ONSET_DATE_SERIES, CASES_BY_REPORT_DATE_SERIES, CASES_BY_STATE_SERIES,
};
use crate::error::{PipelineError, Result};
use crate::normalize;
use crate::sources::{CasesByDateSource, CasesByStateSource, CountyCasesSource};
use crate::store::{SnapshotKey, SnapshotStore};
use crate::types::{FetchedPayload, RawPayload, SeriesSource};
use chrono::NaiveDate;
use metrics::{counter, histogram};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// The sources one run pulls from. Built from config for real runs;
/// integration tests inject stubs feeding canned payloads.
pub struct PipelineSources {
    pub state: Box<dyn SeriesSource>,
    pub report_date: Box<dyn SeriesSource>,
    pub onset_date: Box<dyn SeriesSource>,
    pub county: Box<dyn SeriesSource>,
}

impl PipelineSources {
    pub fn from_config(config: &Config) -> Self {
        Self {
            state: Box::new(CasesByStateSource::new(config)),
            report_date: Box::new(CasesByDateSource::report_date(config)),
            onset_date: Box::new(CasesByDateSource::onset_date(config)),
            county: Box::new(CountyCasesSource::new(config)),
        }
    }
}

/// Outcome of one series within a run.
#[derive(Debug, Clone, Serialize)]
pub struct SeriesRunResult {
    pub series: String,
    pub rows_written: usize,
    pub warnings: usize,
}

/// Result of one complete pipeline invocation.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub run_date: NaiveDate,
    pub series: Vec<SeriesRunResult>,
    pub total_warnings: usize,
}

impl RunSummary {
    fn new(run_id: Uuid, run_date: NaiveDate, series: Vec<SeriesRunResult>) -> Self {
        let total_warnings = series.iter().map(|s| s.warnings).sum();
        Self {
            run_id,
            run_date,
            series,
            total_warnings,
        }
    }
}

/// Sequences fetch -> normalize -> persist for every series, and the county
/// derivation on top. One invocation is one sequential pass; re-running on
/// the same calendar day re-fetches and overwrites that day's snapshots.
pub struct Pipeline {
    store: Arc<dyn SnapshotStore>,
    sources: PipelineSources,
    aggregator: Aggregator,
}

impl Pipeline {
    /// Build a pipeline with real sources and the population reference table
    /// named by the config.
    pub fn new(config: &Config, store: Arc<dyn SnapshotStore>) -> Result<Self> {
        let aggregator = Aggregator::from_reference_file(&config.population_file)?;
        Ok(Self::with_parts(
            store,
            PipelineSources::from_config(config),
            aggregator,
        ))
    }

    pub fn with_parts(
        store: Arc<dyn SnapshotStore>,
        sources: PipelineSources,
        aggregator: Aggregator,
    ) -> Self {
        Self {
            store,
            sources,
            aggregator,
        }
    }

    /// Run the full pipeline once: all four series, plus county derivation.
    /// The first unrecoverable fetch/normalize failure aborts the whole run.
    #[instrument(skip(self))]
    pub async fn run(&self, run_date: NaiveDate) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        info!(run_id = ?run_id, "Starting pipeline run");
        counter!("covid_pipeline_runs_total").increment(1);
        let t_run = Instant::now();

        let mut series = Vec::new();
        series.push(self.run_state_series(run_date).await?);
        series.push(
            self.run_date_series(&*self.sources.report_date, run_date)
                .await?,
        );
        series.push(
            self.run_date_series(&*self.sources.onset_date, run_date)
                .await?,
        );
        series.extend(self.run_county_series(run_date).await?);

        histogram!("covid_pipeline_duration_seconds").record(t_run.elapsed().as_secs_f64());

        let summary = RunSummary::new(run_id, run_date, series);
        info!(
            run_id = ?run_id,
            "Finished pipeline run: {} series, {} warnings",
            summary.series.len(),
            summary.total_warnings
        );
        Ok(summary)
    }

    /// Fetch, normalize, and persist snapshots only, optionally restricted
    /// to a subset of series names. No county derivation.
    #[instrument(skip(self, series_filter))]
    pub async fn ingest(
        &self,
        run_date: NaiveDate,
        series_filter: Option<&[String]>,
    ) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let selected = |name: &str| {
            series_filter.map_or(true, |filter| filter.iter().any(|s| s == name))
        };

        let mut series = Vec::new();
        if selected(CASES_BY_STATE_SERIES) {
            series.push(self.run_state_series(run_date).await?);
        }
        if selected(CASES_BY_REPORT_DATE_SERIES) {
            series.push(
                self.run_date_series(&*self.sources.report_date, run_date)
                    .await?,
            );
        }
        if selected(CASES_BY_ONSET_DATE_SERIES) {
            series.push(
                self.run_date_series(&*self.sources.onset_date, run_date)
                    .await?,
            );
        }
        if selected(CASES_BY_COUNTY_SERIES) {
            series.push(self.ingest_county_series(run_date).await?.0);
        }

        Ok(RunSummary::new(run_id, run_date, series))
    }

    /// Derive rolling/per-100k tables from a day's already-persisted county
    /// snapshot. Fails with `SnapshotNotFound` when ingestion has not run
    /// for that date.
    #[instrument(skip(self))]
    pub async fn aggregate(&self, run_date: NaiveDate) -> Result<RunSummary> {
        let run_id = Uuid::new_v4();
        let key = SnapshotKey::new(CASES_BY_COUNTY_SERIES, run_date);
        let rows = self.store.read_county_table(&key).await?;
        info!("Loaded {} county rows from snapshot {}", rows.len(), key);

        let series = self.derive_and_persist(&rows, run_date).await?;
        Ok(RunSummary::new(run_id, run_date, series))
    }

    async fn run_state_series(&self, run_date: NaiveDate) -> Result<SeriesRunResult> {
        let series = self.sources.state.series_name();
        println!("📡 Fetching {series}...");
        let t_series = Instant::now();

        let fetched = self.sources.state.fetch().await?;
        let payload = expect_json(&fetched)?;
        let table = normalize::state::normalize(payload)?;

        let key = SnapshotKey::new(series, run_date);
        self.store.write_state_table(&key, &table.records).await?;
        let reread = self.store.read_state_table(&key).await?;
        let mut warnings = table.warnings.len();
        warnings += check_row_counts(&key, table.records.len(), reread.len());

        histogram!("covid_series_duration_seconds", "series" => series)
            .record(t_series.elapsed().as_secs_f64());
        Ok(finish_series(series, reread.len(), warnings))
    }

    async fn run_date_series(
        &self,
        source: &dyn SeriesSource,
        run_date: NaiveDate,
    ) -> Result<SeriesRunResult> {
        let series = source.series_name();
        println!("📡 Fetching {series}...");
        let t_series = Instant::now();

        let fetched = source.fetch().await?;
        let payload = expect_json(&fetched)?;
        let table = normalize::by_date::normalize(series, payload)?;

        let key = SnapshotKey::new(series, run_date);
        self.store.write_date_table(&key, &table.records).await?;
        let reread = self.store.read_date_table(&key).await?;
        let mut warnings = table.warnings.len();
        warnings += check_row_counts(&key, table.records.len(), reread.len());

        histogram!("covid_series_duration_seconds", "series" => series)
            .record(t_series.elapsed().as_secs_f64());
        Ok(finish_series(series, reread.len(), warnings))
    }

    /// Fetch + normalize + persist the county table; returns the result and
    /// the normalized rows so the full run can derive without a re-read.
    async fn ingest_county_series(
        &self,
        run_date: NaiveDate,
    ) -> Result<(SeriesRunResult, Vec<crate::types::CountyRecord>)> {
        let series = self.sources.county.series_name();
        println!("📡 Fetching {series}...");
        let t_series = Instant::now();

        let fetched = self.sources.county.fetch().await?;
        let text = expect_delimited(&fetched)?;
        let table = normalize::county::normalize(text)?;

        let key = SnapshotKey::new(series, run_date);
        self.store.write_county_table(&key, &table.records).await?;
        let reread = self.store.read_county_table(&key).await?;
        let mut warnings = table.warnings.len();
        warnings += check_row_counts(&key, table.records.len(), reread.len());

        histogram!("covid_series_duration_seconds", "series" => series)
            .record(t_series.elapsed().as_secs_f64());
        Ok((finish_series(series, reread.len(), warnings), table.records))
    }

    async fn run_county_series(&self, run_date: NaiveDate) -> Result<Vec<SeriesRunResult>> {
        let (raw_result, records) = self.ingest_county_series(run_date).await?;

        // The rolling window needs multi-date history, so derivation always
        // runs over the full fetched table, not just today's tail.
        let mut results = vec![raw_result];
        results.extend(self.derive_and_persist(&records, run_date).await?);
        Ok(results)
    }

    async fn derive_and_persist(
        &self,
        records: &[crate::types::CountyRecord],
        run_date: NaiveDate,
    ) -> Result<Vec<SeriesRunResult>> {
        println!("🔧 Deriving county statistics...");
        let derived = self.aggregator.derive(records)?;
        let current = self.aggregator.current_view(&derived.records)?;

        let derived_key = SnapshotKey::new(CASES_BY_COUNTY_DERIVED_SERIES, run_date);
        self.store
            .write_derived_county_table(&derived_key, &derived.records)
            .await?;
        let derived_reread = self.store.read_derived_county_table(&derived_key).await?;
        let mut derived_warnings = derived.warnings.len();
        derived_warnings +=
            check_row_counts(&derived_key, derived.records.len(), derived_reread.len());

        let current_key = SnapshotKey::new(CASES_BY_COUNTY_CURRENT_SERIES, run_date);
        self.store
            .write_derived_county_table(&current_key, &current)
            .await?;
        let current_reread = self.store.read_derived_county_table(&current_key).await?;
        let current_warnings = check_row_counts(&current_key, current.len(), current_reread.len());

        Ok(vec![
            finish_series(
                CASES_BY_COUNTY_DERIVED_SERIES,
                derived_reread.len(),
                derived_warnings,
            ),
            finish_series(
                CASES_BY_COUNTY_CURRENT_SERIES,
                current_reread.len(),
                current_warnings,
            ),
        ])
    }
}

fn expect_json(fetched: &FetchedPayload) -> Result<&serde_json::Value> {
    match &fetched.payload {
        RawPayload::Json(value) => Ok(value),
        RawPayload::Delimited(_) => Err(PipelineError::schema(
            &fetched.series,
            "expected a JSON payload, got delimited text",
        )),
    }
}

fn expect_delimited(fetched: &FetchedPayload) -> Result<&str> {
    match &fetched.payload {
        RawPayload::Delimited(text) => Ok(text),
        RawPayload::Json(_) => Err(PipelineError::schema(
            &fetched.series,
            "expected a delimited payload, got JSON",
        )),
    }
}

/// Consistency check between what was written and what reads back. A
/// mismatch is logged, never fatal.
fn check_row_counts(key: &SnapshotKey, written: usize, reread: usize) -> usize {
    if written != reread {
        warn!(
            "row count mismatch for {}: wrote {} rows, read back {}",
            key, written, reread
        );
        1
    } else {
        0
    }
}

fn finish_series(series: &str, rows: usize, warnings: usize) -> SeriesRunResult {
    info!("{} rows persisted for {}", rows, series);
    println!("💾 Persisted {rows} rows for {series}");
    counter!("covid_rows_persisted_total", "series" => series.to_string())
        .increment(rows as u64);
    SeriesRunResult {
        series: series.to_string(),
        rows_written: rows,
        warnings,
    }
}
