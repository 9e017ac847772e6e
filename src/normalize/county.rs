use crate::constants::{CASES_BY_COUNTY_SERIES, NYC_AGGREGATE_COUNTY, NYC_BOROUGH_FIPS};
use crate::error::{PipelineError, Result};
use crate::normalize::NormalizedTable;
use crate::types::CountyRecord;
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashSet;
use tracing::warn;

/// One row of the upstream delimited file, before date parsing and the
/// aggregate-entity expansion.
#[derive(Debug, Deserialize)]
struct RawCountyRow {
    date: String,
    county: String,
    state: String,
    #[serde(default)]
    fips: String,
    cases: i64,
    deaths: i64,
}

/// Normalize the county-level dataset: decode the delimited rows, expand the
/// New York City aggregate into its five borough fips codes, drop rows that
/// carry no fips, and sort by date ascending.
pub fn normalize(text: &str) -> Result<NormalizedTable<CountyRecord>> {
    let mut reader = csv::Reader::from_reader(text.as_bytes());
    let mut records = Vec::new();
    let mut warnings = Vec::new();
    let mut warned_missing_fips: HashSet<(String, String)> = HashSet::new();

    for row in reader.deserialize() {
        let row: RawCountyRow = row?;
        let date = parse_date(&row.date)?;

        if row.county == NYC_AGGREGATE_COUNTY {
            // The aggregate entity maps onto five borough records carrying
            // its counts unchanged; the aggregate itself never surfaces.
            records.extend(expand_nyc_aggregate(&row, date));
            continue;
        }

        if row.fips.is_empty() {
            if warned_missing_fips.insert((row.county.clone(), row.state.clone())) {
                let message = format!(
                    "dropping rows for {}, {} with no fips code",
                    row.county, row.state
                );
                warn!("{}: {message}", CASES_BY_COUNTY_SERIES);
                warnings.push(message);
            }
            continue;
        }

        records.push(CountyRecord {
            date,
            county: row.county,
            state: row.state,
            fips: row.fips,
            cases: row.cases,
            deaths: row.deaths,
        });
    }

    records.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.fips.cmp(&b.fips)));

    Ok(NormalizedTable { records, warnings })
}

/// Pure mapping from the aggregate record to its five borough records.
fn expand_nyc_aggregate(row: &RawCountyRow, date: NaiveDate) -> Vec<CountyRecord> {
    NYC_BOROUGH_FIPS
        .iter()
        .map(|(fips, county)| CountyRecord {
            date,
            county: county.to_string(),
            state: row.state.clone(),
            fips: fips.to_string(),
            cases: row.cases,
            deaths: row.deaths,
        })
        .collect()
}

fn parse_date(text: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|_| {
        PipelineError::schema(CASES_BY_COUNTY_SERIES, format!("unparseable date '{text}'"))
    })
}
