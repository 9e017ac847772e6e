use crate::error::{PipelineError, Result};
use crate::population;
use crate::types::{CountyRecord, DerivedCountyRecord};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, warn};

/// Trailing window length for the rolling mean of new cases.
const ROLLING_WINDOW: usize = 7;

/// The derived county table plus the data-quality warnings observed while
/// computing it.
#[derive(Debug, Clone)]
pub struct DerivedTable {
    pub records: Vec<DerivedCountyRecord>,
    pub warnings: Vec<String>,
}

/// Consolidates the county time series: per-fips deltas, rolling means, and
/// per-100k rates against the population reference table.
pub struct Aggregator {
    population: HashMap<String, u64>,
}

impl Aggregator {
    pub fn new(population: HashMap<String, u64>) -> Self {
        Self { population }
    }

    /// Build an aggregator from the local population reference file.
    pub fn from_reference_file(path: &Path) -> Result<Self> {
        Ok(Self::new(population::load_reference_table(path)?))
    }

    /// Compute the derived fields over the full county history. Rows whose
    /// fips has no population estimate are dropped (they cannot carry a
    /// per-100k rate) and reported as warnings.
    pub fn derive(&self, rows: &[CountyRecord]) -> Result<DerivedTable> {
        let mut by_fips: BTreeMap<&str, Vec<&CountyRecord>> = BTreeMap::new();
        for row in rows {
            by_fips.entry(row.fips.as_str()).or_default().push(row);
        }

        let mut records = Vec::with_capacity(rows.len());
        let mut warnings = Vec::new();

        for (fips, mut series) in by_fips {
            let Some(&population) = self.population.get(fips) else {
                let first = series[0];
                let message = format!(
                    "no population estimate for fips {fips} ({}, {}); dropping {} rows from per-100k output",
                    first.county,
                    first.state,
                    series.len()
                );
                warn!("{message}");
                warnings.push(message);
                continue;
            };

            series.sort_by_key(|r| r.date);

            if series.len() < ROLLING_WINDOW + 1 {
                let message = format!(
                    "fips {fips}: only {} observations; rolling mean stays undefined",
                    series.len()
                );
                debug!("{message}");
                warnings.push(message);
            }

            let mut new_cases_history: Vec<Option<i64>> = Vec::with_capacity(series.len());
            for (i, row) in series.iter().enumerate() {
                // First observation has no prior date to lag against.
                let cases_lagged = (i > 0).then(|| series[i - 1].cases);
                let new_cases = cases_lagged.map(|lagged| (row.cases - lagged).max(0));
                new_cases_history.push(new_cases);

                let new_cases_rolling = trailing_mean(&new_cases_history);
                let new_cases_per100k =
                    new_cases_rolling.map(|rolling| rolling / population as f64 * 100_000.0);

                records.push(DerivedCountyRecord {
                    date: row.date,
                    county: row.county.clone(),
                    state: row.state.clone(),
                    fips: row.fips.clone(),
                    cases: row.cases,
                    deaths: row.deaths,
                    cases_lagged,
                    new_cases,
                    new_cases_rolling,
                    population,
                    new_cases_per100k,
                });
            }
        }

        records.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.fips.cmp(&b.fips)));

        Ok(DerivedTable { records, warnings })
    }

    /// The "current" view: for each fips, the single row at its maximum
    /// recorded date. Two rows sharing a fips's maximum date are a data
    /// defect upstream never defined a resolution for, so they surface as an
    /// error instead of being silently collapsed.
    pub fn current_view(&self, rows: &[DerivedCountyRecord]) -> Result<Vec<DerivedCountyRecord>> {
        let mut max_dates: HashMap<&str, chrono::NaiveDate> = HashMap::new();
        for row in rows {
            max_dates
                .entry(row.fips.as_str())
                .and_modify(|date| {
                    if row.date > *date {
                        *date = row.date;
                    }
                })
                .or_insert(row.date);
        }

        let mut current: HashMap<&str, &DerivedCountyRecord> = HashMap::new();
        for row in rows {
            if row.date != max_dates[row.fips.as_str()] {
                continue;
            }
            if current.insert(row.fips.as_str(), row).is_some() {
                return Err(PipelineError::DataQuality {
                    message: format!(
                        "fips {} has multiple rows for its maximum date {}",
                        row.fips, row.date
                    ),
                });
            }
        }

        let mut records: Vec<DerivedCountyRecord> = current.into_values().cloned().collect();
        records.sort_by(|a, b| a.fips.cmp(&b.fips));
        Ok(records)
    }
}

/// Mean of the trailing window, defined only once the window holds
/// `ROLLING_WINDOW` observed deltas. A window touching the undefined first
/// delta stays undefined, never zero.
fn trailing_mean(history: &[Option<i64>]) -> Option<f64> {
    if history.len() < ROLLING_WINDOW {
        return None;
    }
    let window = &history[history.len() - ROLLING_WINDOW..];
    let mut sum = 0i64;
    for value in window {
        sum += (*value)?;
    }
    Some(sum as f64 / ROLLING_WINDOW as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn county_row(day: u32, fips: &str, cases: i64) -> CountyRecord {
        CountyRecord {
            date: NaiveDate::from_ymd_opt(2020, 3, day).unwrap(),
            county: "King".to_string(),
            state: "Washington".to_string(),
            fips: fips.to_string(),
            cases,
            deaths: 0,
        }
    }

    fn aggregator_with(fips: &str, population: u64) -> Aggregator {
        let mut table = HashMap::new();
        table.insert(fips.to_string(), population);
        Aggregator::new(table)
    }

    #[test]
    fn test_rolling_mean_matches_the_eight_day_example() {
        let cases = [100, 105, 115, 120, 130, 140, 150, 165];
        let rows: Vec<CountyRecord> = cases
            .iter()
            .enumerate()
            .map(|(i, &c)| county_row(1 + i as u32, "53033", c))
            .collect();

        let derived = aggregator_with("53033", 500_000).derive(&rows).unwrap();

        assert_eq!(derived.records.len(), 8);
        // Day 8: deltas [5,10,5,10,10,10,15] -> 65/7
        let day8 = &derived.records[7];
        assert_eq!(day8.new_cases, Some(15));
        let rolling = day8.new_cases_rolling.unwrap();
        assert!((rolling - 65.0 / 7.0).abs() < 1e-9);

        // Day 6 has only 5 observed deltas: missing, not zero
        assert_eq!(derived.records[5].new_cases_rolling, None);
        // Day 7's window still touches the undefined first delta
        assert_eq!(derived.records[6].new_cases_rolling, None);
    }

    #[test]
    fn test_per100k_rate() {
        let cases = [100, 105, 115, 120, 130, 140, 150, 165];
        let rows: Vec<CountyRecord> = cases
            .iter()
            .enumerate()
            .map(|(i, &c)| county_row(1 + i as u32, "53033", c))
            .collect();

        let derived = aggregator_with("53033", 500_000).derive(&rows).unwrap();

        let per100k = derived.records[7].new_cases_per100k.unwrap();
        assert!((per100k - 65.0 / 7.0 / 500_000.0 * 100_000.0).abs() < 1e-9);
        assert!((per100k - 1.857).abs() < 1e-3);
    }

    #[test]
    fn test_first_observation_has_no_lag() {
        let rows = vec![county_row(1, "53033", 10), county_row(2, "53033", 14)];
        let derived = aggregator_with("53033", 100_000).derive(&rows).unwrap();

        assert_eq!(derived.records[0].cases_lagged, None);
        assert_eq!(derived.records[0].new_cases, None);
        assert_eq!(derived.records[1].cases_lagged, Some(10));
        assert_eq!(derived.records[1].new_cases, Some(4));
    }

    #[test]
    fn test_negative_deltas_clamp_to_zero() {
        // Cumulative counts should not decrease, but upstream corrections do
        let rows = vec![county_row(1, "53033", 20), county_row(2, "53033", 15)];
        let derived = aggregator_with("53033", 100_000).derive(&rows).unwrap();

        assert_eq!(derived.records[1].new_cases, Some(0));
    }

    #[test]
    fn test_unknown_fips_rows_are_dropped_with_warning() {
        let rows = vec![county_row(1, "53033", 10), county_row(1, "99999", 5)];
        let derived = aggregator_with("53033", 100_000).derive(&rows).unwrap();

        assert_eq!(derived.records.len(), 1);
        assert_eq!(derived.records[0].fips, "53033");
        assert_eq!(derived.warnings.len(), 1);
        assert!(derived.warnings[0].contains("99999"));
    }

    #[test]
    fn test_current_view_picks_maximum_date_per_fips() {
        let rows = vec![
            county_row(1, "53033", 10),
            county_row(5, "53033", 30),
            county_row(3, "53033", 20),
        ];
        let aggregator = aggregator_with("53033", 100_000);
        let derived = aggregator.derive(&rows).unwrap();

        let current = aggregator.current_view(&derived.records).unwrap();

        assert_eq!(current.len(), 1);
        assert_eq!(current[0].date, NaiveDate::from_ymd_opt(2020, 3, 5).unwrap());
        assert_eq!(current[0].cases, 30);
    }

    #[test]
    fn test_duplicate_maximum_date_is_a_data_quality_error() {
        let aggregator = aggregator_with("53033", 100_000);
        let rows = vec![county_row(1, "53033", 10), county_row(5, "53033", 30)];
        let mut derived = aggregator.derive(&rows).unwrap().records;
        let duplicate = derived.last().unwrap().clone();
        derived.push(duplicate);

        let err = aggregator.current_view(&derived).unwrap_err();
        assert!(matches!(err, PipelineError::DataQuality { .. }));
    }

    #[test]
    fn test_duplicate_on_non_maximum_date_is_tolerated() {
        let aggregator = aggregator_with("53033", 100_000);
        let rows = vec![county_row(1, "53033", 10), county_row(5, "53033", 30)];
        let mut derived = aggregator.derive(&rows).unwrap().records;
        let duplicate = derived.first().unwrap().clone();
        derived.push(duplicate);

        let current = aggregator.current_view(&derived).unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].cases, 30);
    }

    #[test]
    fn test_short_series_warns_about_undefined_rolling_mean() {
        let rows = vec![county_row(1, "53033", 10), county_row(2, "53033", 12)];
        let derived = aggregator_with("53033", 100_000).derive(&rows).unwrap();

        assert!(derived
            .warnings
            .iter()
            .any(|w| w.contains("rolling mean stays undefined")));
        assert!(derived
            .records
            .iter()
            .all(|r| r.new_cases_rolling.is_none()));
    }
}
