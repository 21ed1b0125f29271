use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("schema error in table '{table}': required column '{column}' is missing")]
    Schema { table: String, column: String },

    #[error("cannot coerce value '{value}' in column '{column}' to {target}")]
    TypeCoercion {
        column: String,
        value: String,
        target: String,
    },

    #[error("required raw table '{table}' is absent or empty")]
    MissingSource { table: String },

    #[error("join key '{column}' is missing from the {side} side of the join")]
    JoinKeyMismatch { side: String, column: String },

    #[error("aggregation spec '{spec}' is invalid: {reason}")]
    AggregationSpec { spec: String, reason: String },

    #[error("CSV read failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
