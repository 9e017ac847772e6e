use crate::error::Result;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// One row of the population-estimate reference table.
#[derive(Debug, Deserialize)]
struct PopulationRow {
    fips: String,
    population: u64,
}

/// Sentinel county-fips suffix marking state-level aggregate rows in the
/// reference table. Those are not counties and never join against case data.
const STATE_AGGREGATE_SUFFIX: &str = "000";

/// Load the population-estimate reference table, keyed by 5-character fips.
pub fn load_reference_table(path: &Path) -> Result<HashMap<String, u64>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut table = HashMap::new();
    let mut skipped_aggregates = 0usize;

    for row in reader.deserialize() {
        let row: PopulationRow = row?;
        if row.fips.ends_with(STATE_AGGREGATE_SUFFIX) {
            skipped_aggregates += 1;
            continue;
        }
        table.insert(row.fips, row.population);
    }

    info!(
        "Loaded {} population estimates from {} ({} state aggregates excluded)",
        table.len(),
        path.display(),
        skipped_aggregates
    );
    debug!("Population reference table ready");
    Ok(table)
}
