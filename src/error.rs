use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("fetch failed for {series}: {message}")]
    Fetch { series: String, message: String },

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV deserialization failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("schema error in {series}: {message}")]
    Schema { series: String, message: String },

    #[error("no snapshot found for key {key}")]
    SnapshotNotFound { key: String },

    #[error("data quality error: {message}")]
    DataQuality { message: String },
}

impl PipelineError {
    /// Schema error tagged with the series it came from.
    pub fn schema(series: &str, message: impl Into<String>) -> Self {
        PipelineError::Schema {
            series: series.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
