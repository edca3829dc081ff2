//! Shard routing: the consumed shard-map interface and the resolver
//! that turns shard-key filters into a shard set.

use std::collections::HashSet;
use std::fmt;

use pulse_common::{PulseError, Result};
use pulse_record::shard_key_hash;
use tracing::debug;

use crate::dispatch::CoordinatorEndpoint;
use crate::logical_plan::{ColumnFilter, Filter, FilterValue};
use crate::planner::QueryOptions;

/// Ownership state of one shard in the cluster map.
#[derive(Debug, Clone)]
pub enum ShardCoordinator {
    /// The shard is owned by this coordinator.
    Assigned(CoordinatorEndpoint),
    /// No coordinator currently owns the shard.
    Unassigned,
}

/// Cluster shard map, maintained elsewhere by the gossip layer.
///
/// Only these two reads are consumed here.
pub trait ShardMap: fmt::Debug + Send + Sync {
    /// Shards a query with `shard_hash` may touch, fanning out to at
    /// most `2^spread` shards.
    fn query_shards(&self, shard_hash: i32, spread: u32) -> Vec<u32>;

    /// Current owner of `shard`.
    fn coord_for_shard(&self, shard: u32) -> ShardCoordinator;
}

/// Dataset identity plus its schema-declared routing columns.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub name: String,
    /// Columns whose equality-filter values produce the shard hash.
    /// Empty means the dataset is not shard-key routed. Columns must be
    /// distinct; the resolver rejects queries against a dataset that
    /// declares one twice.
    pub shard_key_columns: Vec<String>,
}

impl Dataset {
    pub fn new(name: impl Into<String>, shard_key_columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            shard_key_columns,
        }
    }
}

/// Resolve the shards a leaf scan must touch.
///
/// Shard-key routed datasets require one string-equality filter per
/// shard-key column; the filter values hash to the routing key handed
/// to the shard map. Datasets without shard keys fall back to explicit
/// shard overrides from the query options.
pub fn shards_from_filters(
    dataset: &Dataset,
    filters: &[ColumnFilter],
    options: &QueryOptions,
    shard_map: &dyn ShardMap,
) -> Result<Vec<u32>> {
    if !dataset.shard_key_columns.is_empty() {
        // shard_key_hash requires distinct columns; a misdeclared dataset
        // must fail the query, not the process
        let mut seen: HashSet<&str> = HashSet::with_capacity(dataset.shard_key_columns.len());
        for column in &dataset.shard_key_columns {
            if !seen.insert(column.as_str()) {
                return Err(PulseError::BadQuery(format!(
                    "shard key column {column} is declared more than once on dataset {}",
                    dataset.name
                )));
            }
        }
        let mut values: Vec<String> = Vec::with_capacity(dataset.shard_key_columns.len());
        for column in &dataset.shard_key_columns {
            let value = filters
                .iter()
                .find(|f| &f.column == column)
                .ok_or_else(|| {
                    PulseError::BadQuery(format!(
                        "could not find filter for shard key column {column}"
                    ))
                })?;
            match &value.filter {
                Filter::Equals(FilterValue::Str(s)) => values.push(s.clone()),
                other => {
                    return Err(PulseError::BadQuery(format!(
                        "shard key column {column} must be filtered by string equality, got {other:?}"
                    )));
                }
            }
        }
        let hash = shard_key_hash(&dataset.shard_key_columns, &values);
        let shards = shard_map.query_shards(hash, options.shard_key_spread);
        debug!(
            dataset = %dataset.name,
            shard_hash = hash,
            spread = options.shard_key_spread,
            shards = shards.len(),
            "resolved shard set from shard-key filters"
        );
        Ok(shards)
    } else if let Some(overrides) = &options.shard_overrides {
        Ok(overrides.clone())
    } else {
        Err(PulseError::BadQuery(format!(
            "dataset {} has no shard key columns and no shard override was supplied",
            dataset.name
        )))
    }
}
