//! Schema-driven decoding of finished records.
//!
//! A [`RecordReader`] wraps one record's bytes (starting at its length
//! word, as yielded by [`crate::RecordContainer::records`]) and decodes
//! fields against the schema that built it.

use pulse_common::{PulseError, Result};

use crate::builder::PREDEFINED_KEY_TAG;
use crate::schema::{ColumnType, RecordSchema};

/// Read-side view of one record.
pub struct RecordReader<'a> {
    schema: &'a RecordSchema,
    data: &'a [u8],
}

impl<'a> RecordReader<'a> {
    /// Wrap `data`, which must start at the record's length word.
    pub fn new(schema: &'a RecordSchema, data: &'a [u8]) -> Result<Self> {
        if data.len() < schema.fixed_end() {
            return Err(PulseError::Decode(format!(
                "record of {} bytes shorter than fixed area of {}",
                data.len(),
                schema.fixed_end()
            )));
        }
        Ok(Self { schema, data })
    }

    /// Record length L: bytes after the length word.
    pub fn record_len(&self) -> usize {
        self.get_u32(0) as usize
    }

    /// Decode a 4-byte integer field.
    pub fn get_int(&self, field: usize) -> Result<i32> {
        self.check_field(field, ColumnType::Int)?;
        let at = self.schema.fixed_offset(field);
        Ok(i32::from_le_bytes(self.fixed_bytes(at)?))
    }

    /// Decode an 8-byte integer field.
    pub fn get_long(&self, field: usize) -> Result<i64> {
        self.check_field(field, ColumnType::Long)?;
        let at = self.schema.fixed_offset(field);
        Ok(i64::from_le_bytes(self.fixed_bytes(at)?))
    }

    /// Decode an 8-byte float field.
    pub fn get_double(&self, field: usize) -> Result<f64> {
        self.check_field(field, ColumnType::Double)?;
        let at = self.schema.fixed_offset(field);
        Ok(f64::from_le_bytes(self.fixed_bytes(at)?))
    }

    /// Decode a string field as raw bytes.
    pub fn get_string_bytes(&self, field: usize) -> Result<&'a [u8]> {
        self.check_field(field, ColumnType::String)?;
        let rel = self.get_u32(self.schema.fixed_offset(field)) as usize;
        self.length_prefixed(rel)
    }

    /// Decode a string field as UTF-8.
    pub fn get_string(&self, field: usize) -> Result<&'a str> {
        let bytes = self.get_string_bytes(field)?;
        std::str::from_utf8(bytes)
            .map_err(|e| PulseError::Decode(format!("string field {field} not utf-8: {e}")))
    }

    /// Iterate a map field's key-value pairs in stored order.
    pub fn map_pairs(&self, field: usize) -> Result<MapPairs<'a>> {
        self.check_field(field, ColumnType::Map)?;
        let rel = self.get_u32(self.schema.fixed_offset(field)) as usize;
        if rel + 4 > self.data.len() {
            return Err(PulseError::Decode(format!(
                "map field {field} offset {rel} out of record bounds"
            )));
        }
        let map_len = self.get_u32(rel) as usize;
        let start = rel + 4;
        if start + map_len > self.data.len() {
            return Err(PulseError::Decode(format!(
                "map field {field} of {map_len} bytes out of record bounds"
            )));
        }
        Ok(MapPairs {
            schema: self.schema,
            data: self.data,
            offset: start,
            end: start + map_len,
        })
    }

    /// The rolling hash stored at the schema's hash slot, if any.
    pub fn record_hash(&self) -> Option<i32> {
        self.schema
            .hash_offset()
            .map(|at| self.get_u32(at) as i32)
    }

    fn check_field(&self, field: usize, expected: ColumnType) -> Result<()> {
        if field >= self.schema.num_fields() {
            return Err(PulseError::Decode(format!(
                "field {field} out of range ({} declared)",
                self.schema.num_fields()
            )));
        }
        let actual = self.schema.column_type(field);
        if actual != expected {
            return Err(PulseError::Decode(format!(
                "field {field} is {actual}, not {expected}"
            )));
        }
        Ok(())
    }

    fn fixed_bytes<const N: usize>(&self, at: usize) -> Result<[u8; N]> {
        self.data
            .get(at..at + N)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| {
                PulseError::Decode(format!("fixed slot at {at} out of record bounds"))
            })
    }

    fn length_prefixed(&self, at: usize) -> Result<&'a [u8]> {
        let len_bytes = self.data.get(at..at + 2).ok_or_else(|| {
            PulseError::Decode(format!("length prefix at {at} out of record bounds"))
        })?;
        let len = u16::from_le_bytes(len_bytes.try_into().expect("u16 bytes")) as usize;
        self.data.get(at + 2..at + 2 + len).ok_or_else(|| {
            PulseError::Decode(format!("value of {len} bytes at {at} out of record bounds"))
        })
    }

    fn get_u32(&self, at: usize) -> u32 {
        u32::from_le_bytes(self.data[at..at + 4].try_into().expect("u32 bytes"))
    }
}

/// Iterator over one map field's pairs.
///
/// Predefined-key tags are resolved through the schema; keys come back
/// as strings, values as raw bytes.
pub struct MapPairs<'a> {
    schema: &'a RecordSchema,
    data: &'a [u8],
    offset: usize,
    end: usize,
}

impl<'a> Iterator for MapPairs<'a> {
    type Item = Result<(&'a str, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.end {
            return None;
        }
        Some(self.next_pair())
    }
}

impl<'a> MapPairs<'a> {
    fn next_pair(&mut self) -> Result<(&'a str, &'a [u8])> {
        let word = self.take_u16()?;
        let key = if word & 0xF000 == PREDEFINED_KEY_TAG {
            let index = word & 0x0FFF;
            self.schema.predefined_key(index).ok_or_else(|| {
                PulseError::Decode(format!("predefined key index {index} unknown to schema"))
            })?
        } else {
            let bytes = self.take_bytes(word as usize)?;
            std::str::from_utf8(bytes)
                .map_err(|e| PulseError::Decode(format!("map key not utf-8: {e}")))?
        };
        let value_len = self.take_u16()? as usize;
        let value = self.take_bytes(value_len)?;
        Ok((key, value))
    }

    fn take_u16(&mut self) -> Result<u16> {
        if self.offset + 2 > self.end {
            return Err(PulseError::Decode(
                "map entry truncated at length word".to_string(),
            ));
        }
        let v = u16::from_le_bytes(
            self.data[self.offset..self.offset + 2]
                .try_into()
                .expect("u16 bytes"),
        );
        self.offset += 2;
        Ok(v)
    }

    fn take_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.offset + len > self.end {
            return Err(PulseError::Decode(format!(
                "map entry of {len} bytes truncated"
            )));
        }
        let b = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(b)
    }
}
