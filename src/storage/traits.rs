use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::common::error::Result;
use crate::domain::Table;

/// One of the three quality tiers of the medallion model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Raw,
    Cleaned,
    Aggregated,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Raw => "raw",
            Tier::Cleaned => "cleaned",
            Tier::Aggregated => "aggregated",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Storage trait for persisting tier tables.
///
/// `write` is an atomic full-table replace: readers observe either the
/// previous published version or the complete new one, never a partial
/// write. Without `overwrite_schema`, replacing a table whose stored schema
/// differs from the incoming one is a schema error.
#[async_trait]
pub trait TierStore: Send + Sync {
    async fn write(&self, tier: Tier, table: Table, overwrite_schema: bool) -> Result<()>;

    /// Snapshot of the last published version. The returned `Arc` stays
    /// valid across later overwrites of the same table.
    async fn read(&self, tier: Tier, table_name: &str) -> Result<Option<Arc<Table>>>;

    async fn table_names(&self, tier: Tier) -> Result<Vec<String>>;
}
