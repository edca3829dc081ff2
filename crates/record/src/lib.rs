//! Binary record encoding and shard-key hashing for pulse.
//!
//! Architecture role:
//! - packs typed time-series records into shard-addressable containers
//! - computes the shard-key hash the planner routes queries with
//! - decodes finished records for downstream consumers and tests
//!
//! Key modules:
//! - [`schema`]
//! - [`container`]
//! - [`builder`]
//! - [`hash`]
//! - [`reader`]

pub mod builder;
pub mod container;
pub mod hash;
pub mod reader;
pub mod schema;

pub use builder::RecordBuilder;
pub use container::{ContainerFactory, HeapFactory, RecordContainer};
pub use hash::{
    combine_hash, combine_hash_excluding, combine_hash_including, hash32, shard_key_hash,
    sort_and_compute_hashes,
};
pub use reader::RecordReader;
pub use schema::{ColumnType, RecordSchema};
