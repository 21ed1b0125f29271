use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::common::error::Result;

/// Configuration for a complete pipeline execution, loadable from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub extracts: ExtractPaths,
    #[serde(default)]
    pub join_type: JoinType,
    /// Incremental mode tolerates empty raw tables; a run may legitimately
    /// process zero new rows. Off by default: an empty source is fatal.
    #[serde(default)]
    pub incremental: bool,
    #[serde(default = "default_top_customers_limit")]
    pub top_customers_limit: usize,
}

/// File locations of the four source extracts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractPaths {
    pub customers: PathBuf,
    pub products: PathBuf,
    pub order_lines: PathBuf,
    pub order_headers: PathBuf,
}

/// How unmatched dimension keys are handled when joining the fact table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    /// Keep every fact row; unmatched dimension columns become null.
    #[default]
    LeftNulling,
    /// Drop fact rows with no matching dimension row.
    Inner,
}

fn default_top_customers_limit() -> usize {
    10
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config = toml::from_str(&raw)?;
        Ok(config)
    }

    /// Convention-over-configuration constructor: the four extracts live in
    /// one directory under fixed file names.
    pub fn with_extract_dir(dir: &Path) -> Self {
        Self {
            name: "full_pipeline".to_string(),
            extracts: ExtractPaths {
                customers: dir.join("customers.csv"),
                products: dir.join("products.csv"),
                order_lines: dir.join("order_lines.csv"),
                order_headers: dir.join("order_headers.csv"),
            },
            join_type: JoinType::default(),
            incremental: false,
            top_customers_limit: default_top_customers_limit(),
        }
    }
}
