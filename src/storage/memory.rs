use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

use super::traits::{Tier, TierStore};
use crate::common::error::{PipelineError, Result};
use crate::domain::Table;

/// In-memory tier store.
///
/// Tables live behind `Arc` and publishing swaps the pointer under a short
/// write lock, so readers holding a snapshot never observe a half-written
/// overwrite and reads of published tiers take no lock beyond the map guard.
#[derive(Default)]
pub struct InMemoryTierStore {
    tables: RwLock<HashMap<(Tier, String), Arc<Table>>>,
}

impl InMemoryTierStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TierStore for InMemoryTierStore {
    async fn write(&self, tier: Tier, table: Table, overwrite_schema: bool) -> Result<()> {
        let key = (tier, table.name.clone());
        let mut tables = self.tables.write().unwrap();

        if !overwrite_schema {
            if let Some(existing) = tables.get(&key) {
                if existing.schema != table.schema {
                    let column = table
                        .schema
                        .column_names()
                        .find(|c| !existing.schema.contains(c))
                        .unwrap_or("*")
                        .to_string();
                    return Err(PipelineError::Schema {
                        table: table.name,
                        column,
                    });
                }
            }
        }

        debug!("Publishing {} rows to {}/{}", table.len(), tier, table.name);
        tables.insert(key, Arc::new(table));
        Ok(())
    }

    async fn read(&self, tier: Tier, table_name: &str) -> Result<Option<Arc<Table>>> {
        let tables = self.tables.read().unwrap();
        Ok(tables.get(&(tier, table_name.to_string())).cloned())
    }

    async fn table_names(&self, tier: Tier) -> Result<Vec<String>> {
        let tables = self.tables.read().unwrap();
        let mut names: Vec<String> = tables
            .keys()
            .filter(|(t, _)| *t == tier)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }
}
