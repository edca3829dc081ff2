//! Arena-backed append-only record encoder.
//!
//! A [`RecordBuilder`] packs typed fields into fixed-size containers,
//! maintaining a rolling content hash over partition-key fields. One
//! builder instance is owned by exactly one producer; the `&mut self`
//! API enforces that. Run one builder per ingest thread rather than
//! sharing one behind a lock.
//!
//! Failure semantics: a size-limit failure (`ValueTooLarge`,
//! `RecordTooLarge`) abandons the in-flight record and rolls the write
//! cursor back, so the next `start_new_record` reuses the space. The
//! container header is untouched until `end_record`, so abandoned bytes
//! are never visible to readers.

use pulse_common::metrics::global_metrics;
use pulse_common::{PulseError, Result};
use tracing::debug;

use crate::container::{ContainerFactory, RecordContainer, CONTAINER_HEADER_LEN, MIN_CONTAINER_BYTES};
use crate::hash::{combine_hash, hash32, HASH_SEED};
use crate::schema::{ColumnType, RecordSchema, MAX_MAP_KEY_LEN, MAX_STRING_LEN};

/// Tag prefix marking an interned map key; the low 12 bits carry the index.
pub const PREDEFINED_KEY_TAG: u16 = 0xF000;

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// Append-only encoder of binary records into owned containers.
///
/// State machine per record: `start_new_record`, then one `add_*` call
/// per schema field in declaration order (`start_map`/`add_map_key_value`/
/// `end_map` or `add_sorted_pairs_as_map` for map fields), then
/// `end_record`. Field-order mistakes surface as
/// [`PulseError::FieldOrderViolation`].
pub struct RecordBuilder {
    schema: RecordSchema,
    factory: Box<dyn ContainerFactory>,
    container_size: usize,
    containers: Vec<RecordContainer>,
    cur_record_offset: usize,
    cur_rec_end_offset: usize,
    field_no: usize,
    map_offset: Option<usize>,
    rec_hash: i32,
    in_record: bool,
}

impl std::fmt::Debug for RecordBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordBuilder")
            .field("containers", &self.containers.len())
            .field("container_size", &self.container_size)
            .field("in_record", &self.in_record)
            .field("field_no", &self.field_no)
            .finish()
    }
}

impl RecordBuilder {
    /// Create a builder allocating `container_size`-byte containers from
    /// `factory`. Containers are allocated lazily on the first record.
    pub fn new(
        schema: RecordSchema,
        factory: Box<dyn ContainerFactory>,
        container_size: usize,
    ) -> Result<Self> {
        if container_size < MIN_CONTAINER_BYTES {
            return Err(PulseError::Unsupported(format!(
                "container size {container_size} below minimum {MIN_CONTAINER_BYTES}"
            )));
        }
        if CONTAINER_HEADER_LEN + schema.fixed_end() > container_size {
            return Err(PulseError::RecordTooLarge {
                record_bytes: schema.fixed_end(),
                container_bytes: container_size - CONTAINER_HEADER_LEN,
            });
        }
        Ok(Self {
            schema,
            factory,
            container_size,
            containers: Vec::new(),
            cur_record_offset: CONTAINER_HEADER_LEN,
            cur_rec_end_offset: CONTAINER_HEADER_LEN,
            field_no: 0,
            map_offset: None,
            rec_hash: HASH_SEED,
            in_record: false,
        })
    }

    /// The schema records are encoded against.
    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    /// Begin a new record: reserves the length word, the fixed area, and
    /// the hash slot, and resets the rolling hash to its seed.
    pub fn start_new_record(&mut self) -> Result<()> {
        if self.in_record {
            return Err(PulseError::FieldOrderViolation(
                "previous record not ended".to_string(),
            ));
        }
        let head = self.schema.fixed_end();
        if self.containers.is_empty() {
            self.push_container();
            self.cur_rec_end_offset = CONTAINER_HEADER_LEN;
        } else if align4(self.cur_rec_end_offset + head) > self.container_size {
            // nothing written yet for this record, so no migration needed
            self.push_container();
            self.cur_rec_end_offset = CONTAINER_HEADER_LEN;
        }
        self.cur_record_offset = self.cur_rec_end_offset;
        self.cur_rec_end_offset = self.cur_record_offset + head;
        // the reserved region may hold bytes of an abandoned record
        let at = self.cur_record_offset;
        self.cur_mut().put_slice_zeroed(at, head);
        self.field_no = 0;
        self.map_offset = None;
        self.rec_hash = HASH_SEED;
        self.in_record = true;
        Ok(())
    }

    /// Write a 4-byte integer field in place.
    pub fn add_int(&mut self, v: i32) -> Result<()> {
        self.check_field(ColumnType::Int, "add_int")?;
        let at = self.cur_record_offset + self.schema.fixed_offset(self.field_no);
        self.cur_mut().put_i32(at, v);
        self.field_no += 1;
        Ok(())
    }

    /// Write an 8-byte integer field in place.
    pub fn add_long(&mut self, v: i64) -> Result<()> {
        self.check_field(ColumnType::Long, "add_long")?;
        let at = self.cur_record_offset + self.schema.fixed_offset(self.field_no);
        self.cur_mut().put_i64(at, v);
        self.field_no += 1;
        Ok(())
    }

    /// Write an 8-byte float field in place.
    pub fn add_double(&mut self, v: f64) -> Result<()> {
        self.check_field(ColumnType::Double, "add_double")?;
        let at = self.cur_record_offset + self.schema.fixed_offset(self.field_no);
        self.cur_mut().put_f64(at, v);
        self.field_no += 1;
        Ok(())
    }

    /// Append a length-prefixed UTF-8 string to the variable area and
    /// point the field's fixed slot at it.
    ///
    /// Partition-key string fields fold into the rolling hash.
    pub fn add_string(&mut self, bytes: &[u8]) -> Result<()> {
        self.check_field(ColumnType::String, "add_string")?;
        if bytes.len() >= MAX_STRING_LEN {
            self.abandon();
            return Err(PulseError::ValueTooLarge {
                what: "string field",
                len: bytes.len(),
                max: MAX_STRING_LEN - 1,
            });
        }
        self.require_bytes(2 + bytes.len())?;
        let rel = self.cur_rec_end_offset - self.cur_record_offset;
        let slot = self.cur_record_offset + self.schema.fixed_offset(self.field_no);
        let at = self.cur_rec_end_offset;
        let c = self.cur_mut();
        c.put_u32(slot, rel as u32);
        c.put_u16(at, bytes.len() as u16);
        c.put_slice(at + 2, bytes);
        self.cur_rec_end_offset += 2 + bytes.len();
        if self
            .schema
            .partition_field_start()
            .is_some_and(|start| self.field_no >= start)
        {
            self.rec_hash = combine_hash(self.rec_hash, hash32(bytes));
        }
        self.field_no += 1;
        Ok(())
    }

    /// Open a map field: reserves the 4-byte map-length word and points
    /// the field's fixed slot at it.
    pub fn start_map(&mut self) -> Result<()> {
        self.check_field(ColumnType::Map, "start_map")?;
        self.require_bytes(4)?;
        let rel = self.cur_rec_end_offset - self.cur_record_offset;
        let slot = self.cur_record_offset + self.schema.fixed_offset(self.field_no);
        let at = self.cur_rec_end_offset;
        let c = self.cur_mut();
        c.put_u32(slot, rel as u32);
        c.put_u32(at, 0);
        self.map_offset = Some(rel);
        self.cur_rec_end_offset += 4;
        Ok(())
    }

    /// Append one key-value pair to the open map, in call order.
    ///
    /// Predefined keys are interned as a 2-byte tag; other keys are
    /// length-prefixed. The map-length word is kept current so the map
    /// is parseable at any point between pairs.
    pub fn add_map_key_value(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let Some(map_rel) = self.map_offset else {
            return Err(PulseError::FieldOrderViolation(
                "add_map_key_value with no open map".to_string(),
            ));
        };
        if key.len() >= MAX_MAP_KEY_LEN {
            self.abandon();
            return Err(PulseError::ValueTooLarge {
                what: "map key",
                len: key.len(),
                max: MAX_MAP_KEY_LEN - 1,
            });
        }
        if value.len() >= MAX_STRING_LEN {
            self.abandon();
            return Err(PulseError::ValueTooLarge {
                what: "map value",
                len: value.len(),
                max: MAX_STRING_LEN - 1,
            });
        }
        let interned = self.schema.predefined_key_index(key);
        let key_len = match interned {
            Some(_) => 2,
            None => 2 + key.len(),
        };
        self.require_bytes(key_len + 2 + value.len())?;
        let mut at = self.cur_rec_end_offset;
        match interned {
            Some(idx) => {
                self.cur_mut().put_u16(at, PREDEFINED_KEY_TAG | idx);
                at += 2;
            }
            None => {
                let c = self.cur_mut();
                c.put_u16(at, key.len() as u16);
                c.put_slice(at + 2, key);
                at += 2 + key.len();
            }
        }
        let c = self.cur_mut();
        c.put_u16(at, value.len() as u16);
        c.put_slice(at + 2, value);
        self.cur_rec_end_offset = at + 2 + value.len();

        let map_word = self.cur_record_offset + map_rel;
        let map_len = self.cur_rec_end_offset - (map_word + 4);
        self.cur_mut().put_u32(map_word, map_len as u32);
        Ok(())
    }

    /// Close the open map and advance to the next field.
    pub fn end_map(&mut self) -> Result<()> {
        if self.map_offset.is_none() {
            return Err(PulseError::FieldOrderViolation(
                "end_map with no open map".to_string(),
            ));
        }
        self.map_offset = None;
        self.field_no += 1;
        Ok(())
    }

    /// Encode a pre-sorted pair list as the current map field, folding
    /// the caller-computed pair hashes into the rolling hash.
    ///
    /// `pairs` must already be sorted by key bytes and `hashes` must be
    /// index-aligned with it (see
    /// [`crate::hash::sort_and_compute_hashes`]); unsorted input
    /// produces a map readers will reject.
    pub fn add_sorted_pairs_as_map(
        &mut self,
        pairs: &[(String, String)],
        hashes: &[i32],
    ) -> Result<()> {
        debug_assert_eq!(pairs.len(), hashes.len());
        debug_assert!(
            pairs
                .windows(2)
                .all(|w| w[0].0.as_bytes() < w[1].0.as_bytes()),
            "map pairs must be pre-sorted with unique keys"
        );
        self.start_map()?;
        for (i, (k, v)) in pairs.iter().enumerate() {
            self.add_map_key_value(k.as_bytes(), v.as_bytes())?;
            self.rec_hash = combine_hash(self.rec_hash, hashes[i]);
        }
        self.end_map()
    }

    /// Finalize the record: write the rolling hash, zero-pad to 4-byte
    /// alignment, write the record length word, and publish the new
    /// container length. Returns the record's container offset.
    pub fn end_record(&mut self, write_hash: bool) -> Result<usize> {
        if !self.in_record {
            return Err(PulseError::FieldOrderViolation(
                "end_record with no record started".to_string(),
            ));
        }
        if self.map_offset.is_some() {
            return Err(PulseError::FieldOrderViolation(
                "end_record with a map still open".to_string(),
            ));
        }
        if self.field_no != self.schema.num_fields() {
            return Err(PulseError::FieldOrderViolation(format!(
                "record incomplete: {} of {} fields added",
                self.field_no,
                self.schema.num_fields()
            )));
        }
        if write_hash {
            if let Some(hash_off) = self.schema.hash_offset() {
                let at = self.cur_record_offset + hash_off;
                let h = self.rec_hash;
                self.cur_mut().put_i32(at, h);
            }
        }
        let end = align4(self.cur_rec_end_offset);
        let pad = end - self.cur_rec_end_offset;
        if pad > 0 {
            let at = self.cur_rec_end_offset;
            self.cur_mut().put_slice_zeroed(at, pad);
        }
        let len = end - self.cur_record_offset - 4;
        let start = self.cur_record_offset;
        let c = self.cur_mut();
        c.put_u32(start, len as u32);
        c.set_len_bytes(end);
        self.cur_rec_end_offset = end;
        self.in_record = false;
        global_metrics().inc_records_finished();
        Ok(start)
    }

    /// All containers owned by this builder, oldest first.
    pub fn all_containers(&self) -> &[RecordContainer] {
        &self.containers
    }

    /// The container currently being written, if any.
    pub fn current_container(&self) -> Option<&RecordContainer> {
        self.containers.last()
    }

    /// Snapshot the built containers as byte buffers: full containers
    /// through their whole region, the current one trimmed to its
    /// written length. With `reset`, ownership transfers out and the
    /// builder starts over with no containers.
    ///
    /// Only heap arenas support this; off-heap containers need an
    /// explicit release path on the consumer side.
    pub fn optimal_container_bytes(&mut self, reset: bool) -> Result<Vec<Vec<u8>>> {
        if !self.factory.is_heap() {
            return Err(PulseError::Unsupported(
                "container snapshot requires a heap arena".to_string(),
            ));
        }
        if self.in_record {
            return Err(PulseError::FieldOrderViolation(
                "snapshot with a record in flight".to_string(),
            ));
        }
        let mut out = Vec::with_capacity(self.containers.len());
        for (i, c) in self.containers.iter().enumerate() {
            if i + 1 == self.containers.len() {
                if !c.is_empty() {
                    out.push(c.trimmed_array().to_vec());
                }
            } else {
                out.push(c.array().to_vec());
            }
        }
        if reset {
            self.containers.clear();
            self.cur_record_offset = CONTAINER_HEADER_LEN;
            self.cur_rec_end_offset = CONTAINER_HEADER_LEN;
        }
        Ok(out)
    }

    fn check_field(&self, expected: ColumnType, op: &str) -> Result<()> {
        if !self.in_record {
            return Err(PulseError::FieldOrderViolation(format!(
                "{op} with no record started"
            )));
        }
        if self.map_offset.is_some() {
            return Err(PulseError::FieldOrderViolation(format!(
                "{op} with a map still open"
            )));
        }
        if self.field_no >= self.schema.num_fields() {
            return Err(PulseError::FieldOrderViolation(format!(
                "{op} past the last field ({} declared)",
                self.schema.num_fields()
            )));
        }
        let actual = self.schema.column_type(self.field_no);
        if actual != expected {
            return Err(PulseError::FieldOrderViolation(format!(
                "{op} on field {} of type {actual}",
                self.field_no
            )));
        }
        Ok(())
    }

    /// Ensure `more` bytes fit after the cursor, plus alignment slack.
    ///
    /// On overflow the partial record migrates to the start of a fresh
    /// container; the old container keeps its completed records. A
    /// record that cannot fit one container at all is abandoned with
    /// `RecordTooLarge`.
    fn require_bytes(&mut self, more: usize) -> Result<()> {
        if align4(self.cur_rec_end_offset + more) <= self.container_size {
            return Ok(());
        }
        let rec_bytes = self.cur_rec_end_offset - self.cur_record_offset;
        if align4(CONTAINER_HEADER_LEN + rec_bytes + more) > self.container_size {
            self.abandon();
            return Err(PulseError::RecordTooLarge {
                record_bytes: rec_bytes + more,
                container_bytes: self.container_size - CONTAINER_HEADER_LEN,
            });
        }
        let partial = self
            .cur()
            .slice(self.cur_record_offset..self.cur_rec_end_offset)
            .to_vec();
        self.push_container();
        self.cur_mut().put_slice(CONTAINER_HEADER_LEN, &partial);
        self.cur_record_offset = CONTAINER_HEADER_LEN;
        self.cur_rec_end_offset = CONTAINER_HEADER_LEN + rec_bytes;
        Ok(())
    }

    fn abandon(&mut self) {
        self.cur_rec_end_offset = self.cur_record_offset;
        self.map_offset = None;
        self.field_no = 0;
        self.in_record = false;
    }

    fn push_container(&mut self) {
        debug!(
            container = self.containers.len(),
            size = self.container_size,
            "allocating record container"
        );
        self.containers.push(self.factory.allocate(self.container_size));
        global_metrics().inc_containers_allocated();
    }

    fn cur(&self) -> &RecordContainer {
        self.containers.last().expect("active container")
    }

    fn cur_mut(&mut self) -> &mut RecordContainer {
        self.containers.last_mut().expect("active container")
    }
}
