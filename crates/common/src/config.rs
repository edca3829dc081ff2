use serde::{Deserialize, Serialize};

/// Global engine configuration shared across planner and record layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Byte size of freshly allocated record containers.
    pub container_size_bytes: usize,
    /// Default log2 of the shard fan-out used when query options omit a spread.
    pub default_shard_key_spread: u32,
    /// Soft cap on range vectors produced by one leaf scan.
    pub item_limit: usize,
    /// Outbound dispatch timeout applied by transport wrappers.
    pub dispatch_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            container_size_bytes: 128 * 1024,
            default_shard_key_spread: 1,
            item_limit: 1_000_000,
            dispatch_timeout_ms: 30_000,
        }
    }
}

impl EngineConfig {
    /// Usable record bytes of one container (size minus the 8-byte header).
    pub fn container_record_bytes(&self) -> usize {
        self.container_size_bytes.saturating_sub(8)
    }
}

#[cfg(test)]
mod tests {
    use super::EngineConfig;

    #[test]
    fn default_container_leaves_room_for_header() {
        let cfg = EngineConfig::default();
        assert_eq!(
            cfg.container_record_bytes(),
            cfg.container_size_bytes - 8
        );
    }
}
