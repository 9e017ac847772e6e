//! Series name constants to ensure consistency across the codebase.
//! Snapshot tables are addressed by `{series}{YYYYMMDD}`, so these strings
//! are part of the persisted naming contract.

use once_cell::sync::Lazy;

// CDC series (one per upstream endpoint)
pub const CASES_BY_STATE_SERIES: &str = "cdc_cases_by_state";
pub const CASES_BY_REPORT_DATE_SERIES: &str = "cdc_cases_by_report_date";
pub const CASES_BY_ONSET_DATE_SERIES: &str = "cdc_cases_by_onset_date";

// NYT county series, plus the tables the aggregator materializes from it
pub const CASES_BY_COUNTY_SERIES: &str = "nyt_cases_by_county";
pub const CASES_BY_COUNTY_DERIVED_SERIES: &str = "nyt_cases_by_county_derived";
pub const CASES_BY_COUNTY_CURRENT_SERIES: &str = "nyt_cases_by_county_current";

/// The NYT reports New York City as a single aggregate row with no fips.
/// It expands into these five borough fips codes, each inheriting the
/// aggregate's counts unchanged.
pub static NYC_BOROUGH_FIPS: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    vec![
        ("36005", "Bronx"),
        ("36047", "Kings"),
        ("36061", "New York"),
        ("36081", "Queens"),
        ("36085", "Richmond"),
    ]
});

/// County name the NYT uses for the aggregate entity.
pub const NYC_AGGREGATE_COUNTY: &str = "New York City";

/// Get all ingestible series names (the ones with an upstream endpoint).
pub fn get_supported_series() -> Vec<&'static str> {
    vec![
        CASES_BY_STATE_SERIES,
        CASES_BY_REPORT_DATE_SERIES,
        CASES_BY_ONSET_DATE_SERIES,
        CASES_BY_COUNTY_SERIES,
    ]
}
