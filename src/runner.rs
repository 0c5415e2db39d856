//! Fan-out of table runs across table groups.
//!
//! Every incremental table forms its own group; all full-load tables share
//! one group and run one after another. Groups run concurrently up to the
//! configured limit.

use futures::{stream, StreamExt};
use sync_core::{CopyResult, Credentials, LoadMode, TableConfig};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::CopyEngine;

/// Name of the group holding every full-load table.
pub const FULL_LOAD_GROUP: &str = "full_load";

/// Tables run sequentially within one concurrent slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableGroup {
    pub name: String,
    pub tables: Vec<TableConfig>,
}

/// Split `tables` into groups, in order of first appearance.
pub fn plan_groups(tables: &[TableConfig]) -> Vec<TableGroup> {
    group_indices(tables)
        .into_iter()
        .map(|(name, indices)| TableGroup {
            name,
            tables: indices.into_iter().map(|i| tables[i].clone()).collect(),
        })
        .collect()
}

fn group_indices(tables: &[TableConfig]) -> Vec<(String, Vec<usize>)> {
    let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
    let mut full_group: Option<usize> = None;
    for (index, table) in tables.iter().enumerate() {
        match table.load_mode {
            LoadMode::Incremental => groups.push((table.name.clone(), vec![index])),
            LoadMode::Full => match full_group {
                Some(g) => groups[g].1.push(index),
                None => {
                    full_group = Some(groups.len());
                    groups.push((FULL_LOAD_GROUP.to_string(), vec![index]));
                }
            },
        }
    }
    groups
}

/// Runs many tables through one [`CopyEngine`].
#[derive(Debug, Clone)]
pub struct ParallelRunner {
    engine: CopyEngine,
    concurrency: usize,
    cancel: CancellationToken,
}

impl ParallelRunner {
    pub fn new(engine: CopyEngine, concurrency: usize) -> Self {
        Self {
            engine,
            concurrency: concurrency.max(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Cancelling this token fails every unfinished run with `Cancelled`.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Copy `tables`. Results come back in input order.
    pub async fn run(&self, tables: &[TableConfig], credentials: &Credentials) -> Vec<CopyResult> {
        let groups = group_indices(tables);
        info!(
            "Running {} tables in {} groups with concurrency {}",
            tables.len(),
            groups.len(),
            self.concurrency
        );

        let grouped: Vec<Vec<(usize, CopyResult)>> = stream::iter(groups)
            .map(|(name, indices)| async move {
                debug!(group = %name, tables = indices.len(), "Starting table group");
                let mut results = Vec::with_capacity(indices.len());
                for index in indices {
                    let result = self
                        .engine
                        .run_table_until(&tables[index], credentials, &self.cancel)
                        .await;
                    results.push((index, result));
                }
                debug!(group = %name, "Finished table group");
                results
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut results: Vec<(usize, CopyResult)> = grouped.into_iter().flatten().collect();
        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, result)| result).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_core::WatermarkType;

    #[test]
    fn test_full_tables_share_one_group() {
        let tables = vec![
            TableConfig::full("customers"),
            TableConfig::incremental("orders", "order_id", WatermarkType::IntegerSequence),
            TableConfig::full("products"),
            TableConfig::incremental("events", "updated_at", WatermarkType::Timestamp),
        ];
        let groups = plan_groups(&tables);
        let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec![FULL_LOAD_GROUP, "orders", "events"]);
        assert_eq!(groups[0].tables, vec![tables[0].clone(), tables[2].clone()]);
    }

    #[test]
    fn test_no_tables_no_groups() {
        assert!(plan_groups(&[]).is_empty());
    }
}
