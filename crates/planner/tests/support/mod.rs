use std::collections::HashMap;

use pulse_planner::{CoordinatorEndpoint, PlanEnvelope, ShardCoordinator, ShardMap};
use tokio::sync::mpsc;

/// Shard map fixture: routing keyed by precomputed shard hashes,
/// coordinators backed by in-process mailboxes.
#[derive(Debug, Default)]
pub struct StaticShardMap {
    pub by_hash: HashMap<i32, Vec<u32>>,
    pub coords: HashMap<u32, CoordinatorEndpoint>,
}

impl StaticShardMap {
    /// Assign `shard` to a fresh coordinator and return its mailbox.
    /// Dropping the receiver simulates the coordinator going away.
    pub fn assign(&mut self, shard: u32) -> mpsc::Receiver<PlanEnvelope> {
        let (tx, rx) = mpsc::channel(16);
        self.coords
            .insert(shard, CoordinatorEndpoint::new(format!("coord-{shard}"), tx));
        rx
    }
}

impl ShardMap for StaticShardMap {
    fn query_shards(&self, shard_hash: i32, _spread: u32) -> Vec<u32> {
        self.by_hash.get(&shard_hash).cloned().unwrap_or_default()
    }

    fn coord_for_shard(&self, shard: u32) -> ShardCoordinator {
        match self.coords.get(&shard) {
            Some(endpoint) => ShardCoordinator::Assigned(endpoint.clone()),
            None => ShardCoordinator::Unassigned,
        }
    }
}
