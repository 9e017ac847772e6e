use crate::error::{PipelineError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Pipeline configuration. Constructed once at the entry point and passed
/// into the orchestrator; nothing reads endpoints or paths from ambient
/// process state.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub endpoints: Endpoints,
    /// Local population-estimate reference table (fips,population CSV)
    pub population_file: PathBuf,
    /// Root directory for filesystem snapshot storage
    pub data_dir: PathBuf,
    /// Bound on each upstream fetch
    pub fetch_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub cases_by_state_url: String,
    pub cases_by_report_date_url: String,
    pub cases_by_onset_date_url: String,
    pub cases_by_county_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            cases_by_state_url: "https://www.cdc.gov/coronavirus/2019-ncov/map-cases-us.json"
                .to_string(),
            cases_by_report_date_url:
                "https://www.cdc.gov/coronavirus/2019-ncov/cases-updates/total-cases-onset.json"
                    .to_string(),
            cases_by_onset_date_url:
                "https://www.cdc.gov/coronavirus/2019-ncov/cases-updates/us-cases-epi-chart.json"
                    .to_string(),
            cases_by_county_url:
                "https://raw.githubusercontent.com/nytimes/covid-19-data/master/us-counties.csv"
                    .to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            population_file: PathBuf::from("data/reference/county_population.csv"),
            data_dir: PathBuf::from("data/snapshots"),
            fetch_timeout_seconds: 30,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file. Missing keys fall back to the
    /// historical endpoints and default paths.
    pub fn load(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read config file '{}': {}",
                config_path.display(),
                e
            ))
        })?;

        let config: Config = toml::from_str(&config_content)?;
        Ok(config)
    }

    /// Load from a file when one is given, defaults otherwise.
    pub fn load_or_default(config_path: Option<&Path>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}
