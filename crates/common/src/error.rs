use thiserror::Error;

/// Canonical pulse error taxonomy used across crates.
///
/// Classification guidance:
/// - [`PulseError::BadQuery`]: query shape/filter issues discovered during planning
/// - [`PulseError::ShardsUnavailable`]: routing resolved to a shard with no owner
/// - [`PulseError::RecordTooLarge`]: one record cannot fit a single container
/// - [`PulseError::FieldOrderViolation`]: builder called out of field order
/// - [`PulseError::UnsupportedColumnType`]: field type the encoder cannot handle
#[derive(Debug, Error)]
pub enum PulseError {
    /// Query planning/resolution failures.
    ///
    /// Examples:
    /// - shard-key column not constrained by a string equality filter
    /// - dataset has no shard-key columns and no shard override was given
    ///
    /// Surfaced synchronously to the caller; never retried.
    #[error("bad query: {0}")]
    BadQuery(String),

    /// A requested shard currently has no assigned coordinator.
    ///
    /// Callers may retry after a shard-map refresh.
    #[error("shards unavailable: {0}")]
    ShardsUnavailable(String),

    /// A single record exceeds what one container can hold.
    ///
    /// Fatal for the current record; the caller must split it.
    #[error(
        "record too large: {record_bytes} bytes will not fit container of {container_bytes} bytes"
    )]
    RecordTooLarge {
        /// Bytes the in-flight record would need.
        record_bytes: usize,
        /// Usable record bytes of one container.
        container_bytes: usize,
    },

    /// Builder field-order contract broken by the caller.
    ///
    /// Examples:
    /// - `add_long` on a field the schema declares as a string
    /// - `end_map` with no open map
    /// - more fields added than the schema declares
    #[error("field order violation: {0}")]
    FieldOrderViolation(String),

    /// Field type the record encoder has no encoding for.
    #[error("unsupported column type: {0}")]
    UnsupportedColumnType(String),

    /// A variable-width value exceeds its length-prefix limit.
    ///
    /// Strings are capped below 65536 bytes, map keys below 61440 bytes
    /// (the predefined-key tag range), map values below 65536 bytes.
    #[error("{what} too large: {len} bytes exceeds maximum {max} bytes")]
    ValueTooLarge {
        /// Which value class was oversized.
        what: &'static str,
        /// Observed byte length.
        len: usize,
        /// Maximum encodable byte length.
        max: usize,
    },

    /// Valid request for behavior intentionally unimplemented here.
    ///
    /// Example: snapshotting containers out of a non-heap arena.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A stored record or container failed to decode.
    #[error("record decode failed: {0}")]
    Decode(String),
}

/// Standard pulse result alias.
pub type Result<T> = std::result::Result<T, PulseError>;
