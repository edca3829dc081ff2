//! Record layout description.
//!
//! A [`RecordSchema`] fixes, for every record built against it:
//! - the fixed-area slot offset of each field,
//! - where the variable area starts,
//! - where the 4-byte partition hash lives (partition-keyed schemas only),
//! - the interning table for predefined map keys.

use pulse_common::{PulseError, Result};

/// Upper bound on interned map keys; the index must fit in 12 bits.
pub const MAX_PREDEFINED_KEYS: usize = 4096;

/// Map keys must stay below the predefined-key tag range (`0xF000`).
pub const MAX_MAP_KEY_LEN: usize = 0xF000;

/// Length-prefix limit for strings and map values.
pub const MAX_STRING_LEN: usize = 0x1_0000;

/// Field types a record can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// 4-byte signed integer, stored in place.
    Int,
    /// 8-byte signed integer, stored in place.
    Long,
    /// 8-byte IEEE-754 float, stored in place.
    Double,
    /// Length-prefixed UTF-8 bytes in the variable area.
    String,
    /// Sorted key-value map in the variable area.
    Map,
}

impl ColumnType {
    /// Bytes this field occupies in the fixed area.
    ///
    /// Variable fields hold a 4-byte record-relative offset there.
    pub fn fixed_slot_bytes(self) -> usize {
        match self {
            ColumnType::Int | ColumnType::String | ColumnType::Map => 4,
            ColumnType::Long | ColumnType::Double => 8,
        }
    }

    /// Whether the field body lives in the variable area.
    pub fn is_variable(self) -> bool {
        matches!(self, ColumnType::String | ColumnType::Map)
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ColumnType::Int => "int",
            ColumnType::Long => "long",
            ColumnType::Double => "double",
            ColumnType::String => "string",
            ColumnType::Map => "map",
        };
        f.write_str(s)
    }
}

/// Immutable layout description shared by builders and readers.
///
/// Record layout relative to the record start (the 4-byte length word):
///
/// ```text
/// offset 0            : u32 record length L (bytes after this word)
/// offset 4            : fixed area, one slot per field
/// offset hash_offset  : u32 rolling hash (partition-keyed schemas only)
/// offset fixed_end    : variable area (length-prefixed strings, maps)
/// ```
///
/// All multi-byte integers are little-endian. All intra-record references
/// are relative to the record start, so records can be copied between
/// containers without patching.
#[derive(Debug, Clone)]
pub struct RecordSchema {
    column_types: Vec<ColumnType>,
    partition_field_start: Option<usize>,
    predefined_keys: Vec<String>,
    fixed_offsets: Vec<usize>,
    hash_offset: Option<usize>,
    fixed_end: usize,
}

impl RecordSchema {
    /// Build a schema, computing slot offsets and the hash slot.
    ///
    /// Fails when the predefined-key table exceeds 4096 entries, a
    /// predefined key is too long to be distinguishable from a length
    /// prefix, or `partition_field_start` is out of range.
    pub fn new(
        column_types: Vec<ColumnType>,
        partition_field_start: Option<usize>,
        predefined_keys: Vec<String>,
    ) -> Result<Self> {
        if column_types.is_empty() {
            return Err(PulseError::UnsupportedColumnType(
                "schema must declare at least one field".to_string(),
            ));
        }
        if let Some(start) = partition_field_start {
            if start >= column_types.len() {
                return Err(PulseError::FieldOrderViolation(format!(
                    "partition field start {start} out of range for {} fields",
                    column_types.len()
                )));
            }
        }
        if predefined_keys.len() > MAX_PREDEFINED_KEYS {
            return Err(PulseError::ValueTooLarge {
                what: "predefined key table",
                len: predefined_keys.len(),
                max: MAX_PREDEFINED_KEYS,
            });
        }
        for key in &predefined_keys {
            if key.len() >= MAX_MAP_KEY_LEN {
                return Err(PulseError::ValueTooLarge {
                    what: "predefined map key",
                    len: key.len(),
                    max: MAX_MAP_KEY_LEN - 1,
                });
            }
        }

        let mut fixed_offsets = Vec::with_capacity(column_types.len());
        let mut offset = 4usize;
        for ct in &column_types {
            fixed_offsets.push(offset);
            offset += ct.fixed_slot_bytes();
        }
        let hash_offset = partition_field_start.map(|_| {
            let h = offset;
            offset += 4;
            h
        });

        Ok(Self {
            column_types,
            partition_field_start,
            predefined_keys,
            fixed_offsets,
            hash_offset,
            fixed_end: offset,
        })
    }

    /// Schema without partition-key hashing or predefined keys.
    pub fn plain(column_types: Vec<ColumnType>) -> Result<Self> {
        Self::new(column_types, None, Vec::new())
    }

    /// Number of declared fields.
    pub fn num_fields(&self) -> usize {
        self.column_types.len()
    }

    /// Declared type of field `i`.
    pub fn column_type(&self, i: usize) -> ColumnType {
        self.column_types[i]
    }

    /// Fixed-area slot offset of field `i`, relative to the record start.
    pub fn fixed_offset(&self, i: usize) -> usize {
        self.fixed_offsets[i]
    }

    /// Offset where the variable area begins, relative to the record start.
    pub fn fixed_end(&self) -> usize {
        self.fixed_end
    }

    /// Offset of the 4-byte rolling hash, if this schema carries one.
    pub fn hash_offset(&self) -> Option<usize> {
        self.hash_offset
    }

    /// First field that belongs to the partition key, if any.
    ///
    /// String fields at or past this index fold into the rolling hash.
    pub fn partition_field_start(&self) -> Option<usize> {
        self.partition_field_start
    }

    /// Interned index of `key`, if it is predefined.
    pub fn predefined_key_index(&self, key: &[u8]) -> Option<u16> {
        self.predefined_keys
            .iter()
            .position(|k| k.as_bytes() == key)
            .map(|i| i as u16)
    }

    /// Key string for an interned index, if in range.
    pub fn predefined_key(&self, index: u16) -> Option<&str> {
        self.predefined_keys.get(index as usize).map(|s| s.as_str())
    }
}
