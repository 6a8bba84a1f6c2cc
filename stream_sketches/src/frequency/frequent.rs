//! Frequent items - heavy hitters with deterministic error bounds
//!
//! Misra-Gries lineage: the sketch keeps approximate counts for the heavy
//! items of a stream in a bounded hash map. When the map is full it either
//! doubles (up to the configured maximum) or purges the lower half of the
//! counts by subtracting a sampled median, folding the subtracted weight
//! into a global `offset`.
//!
//! Two scalars bound the error of every answer:
//! - `offset` accumulates the medians removed by purges,
//! - `merge_error` accumulates the maximum error inherited from merges.
//!
//! For any item, the true count lies in `[lower_bound, upper_bound]`.
//!
//! # Examples
//!
//! ```
//! use stream_sketches::frequency::{ErrorType, FrequentItemsSketch};
//!
//! let mut sketch = FrequentItemsSketch::new(64).unwrap();
//! for _ in 0..1000 {
//!     sketch.update("common".to_string()).unwrap();
//! }
//! sketch.update("rare".to_string()).unwrap();
//!
//! let rows = sketch.get_frequent_items(ErrorType::NoFalsePositives);
//! assert_eq!(rows[0].item, "common");
//! assert_eq!(sketch.estimate(&"common".to_string()), 1000);
//! ```

use crate::codec::{Family, Preamble, Reader, FLAG_EMPTY, SER_VER};
use crate::common::{validation, ItemSerde, Result, SketchError};
use crate::frequency::reverse_purge_map::{ReversePurgeHashMap, LG_MIN_MAP_SIZE};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::hash::Hash;

/// Largest purge sample drawn from the map
const MAX_SAMPLE_SIZE: usize = 256;

/// Smallest lg of the maximum map size; smaller requests are raised to
/// this so a purge always has a free slot to work with
const LG_MIN_MAX_MAP_SIZE: u8 = 3;

const EMPTY_PREAMBLE_LONGS: u8 = 1;
const FULL_PREAMBLE_LONGS: u8 = 5;

/// Error mode for [`FrequentItemsSketch::get_frequent_items`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    /// All returned items are truly frequent (filters on lower bounds)
    NoFalsePositives,
    /// All truly frequent items are returned (filters on upper bounds)
    NoFalseNegatives,
}

/// One entry of a frequent-items answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row<T> {
    /// The tracked item
    pub item: T,
    /// Estimated count (stored count plus offset)
    pub estimate: i64,
    /// Guaranteed minimum of the true count
    pub lower_bound: i64,
    /// Guaranteed maximum of the true count
    pub upper_bound: i64,
}

/// Frequent-items sketch over a reverse-purge hash map
#[derive(Debug, Clone)]
pub struct FrequentItemsSketch<T> {
    lg_max_map_size: u8,
    cur_map_cap: usize,
    offset: i64,
    merge_error: i64,
    stream_length: u64,
    sample_size: usize,
    map: ReversePurgeHashMap<T>,
    rng: SmallRng,
}

impl<T: Hash + Eq + Clone> FrequentItemsSketch<T> {
    /// Creates a sketch that tracks up to about `0.75 * max_map_size`
    /// items
    ///
    /// # Arguments
    /// * `max_map_size` - Largest physical hash-map length the sketch may
    ///   grow to; a power of two, at least 4 (values below 8 are raised to
    ///   8). Accuracy: the worst-case count error after N updates is about
    ///   `3.5 * N / max_map_size`.
    ///
    /// # Errors
    /// Returns `SketchError::InvalidParameter` if `max_map_size` is not a
    /// power of two or is below 4
    pub fn new(max_map_size: usize) -> Result<Self> {
        Self::with_rng(max_map_size, SmallRng::from_os_rng())
    }

    /// Creates a sketch with a seeded purge sampler, for reproducible runs
    pub fn with_seed(max_map_size: usize, seed: u64) -> Result<Self> {
        Self::with_rng(max_map_size, SmallRng::seed_from_u64(seed))
    }

    fn with_rng(max_map_size: usize, rng: SmallRng) -> Result<Self> {
        validation::validate_max_map_size(max_map_size)?;
        let lg_max_map_size = (max_map_size.trailing_zeros() as u8).max(LG_MIN_MAX_MAP_SIZE);
        let map = ReversePurgeHashMap::new(LG_MIN_MAP_SIZE)?;
        let cur_map_cap = map.capacity();
        let max_map_cap = Self::map_cap(lg_max_map_size);
        Ok(FrequentItemsSketch {
            lg_max_map_size,
            cur_map_cap,
            offset: 0,
            merge_error: 0,
            stream_length: 0,
            sample_size: MAX_SAMPLE_SIZE.min(max_map_cap),
            map,
            rng,
        })
    }

    fn map_cap(lg_length: u8) -> usize {
        let len = 1usize << lg_length;
        len - len / 4
    }

    /// Largest number of items the sketch can hold before purging
    pub fn maximum_map_capacity(&self) -> usize {
        Self::map_cap(self.lg_max_map_size)
    }

    /// Number of (item, count) pairs currently tracked
    pub fn num_active_items(&self) -> usize {
        self.map.num_active()
    }

    /// Total weight of all updates seen
    pub fn stream_length(&self) -> u64 {
        self.stream_length
    }

    /// True when no item is tracked
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// An upper bound on the error of any estimate: `offset + merge_error`
    pub fn maximum_error(&self) -> i64 {
        self.offset + self.merge_error
    }

    /// Updates the sketch with a single occurrence of `item`
    ///
    /// # Errors
    /// Returns `SketchError::InvalidState` if a purge fails to make room
    /// (an internal invariant violation)
    pub fn update(&mut self, item: T) -> Result<()> {
        self.update_by(item, 1)
    }

    /// Updates the sketch with `count` occurrences of `item`
    ///
    /// A zero count is a defined no-op.
    ///
    /// # Errors
    /// Returns `SketchError::InvalidParameter` for a negative count and
    /// `SketchError::InvalidState` if a purge fails to make room
    pub fn update_by(&mut self, item: T, count: i64) -> Result<()> {
        if count < 0 {
            return Err(SketchError::InvalidParameter {
                param: "count".to_string(),
                value: count.to_string(),
                constraint: "must not be negative".to_string(),
            });
        }
        if count == 0 {
            return Ok(());
        }
        self.stream_length += count as u64;
        self.map.adjust(item, count);

        let num_active = self.map.num_active();
        if self.map.lg_length() < self.lg_max_map_size && num_active >= self.cur_map_cap {
            // below the target size: grow instead of purging
            self.map.resize(self.map.lg_length() + 1)?;
            self.cur_map_cap = self.map.capacity();
        } else if num_active + 1 > self.cur_map_cap {
            self.offset += self.map.purge(self.sample_size, &mut self.rng);
            if self.map.num_active() > self.maximum_map_capacity() {
                return Err(SketchError::InvalidState {
                    reason: "purge did not reduce the number of active items".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Estimated count of `item`: the stored count plus the offset, or 0
    /// when the item is not tracked
    pub fn estimate(&self, item: &T) -> i64 {
        let stored = self.map.get(item);
        if stored > 0 {
            stored + self.offset
        } else {
            0
        }
    }

    /// Guaranteed upper bound on the true count of `item`
    pub fn upper_bound(&self, item: &T) -> i64 {
        self.map.get(item) + self.offset + self.merge_error
    }

    /// Guaranteed lower bound on the true count of `item`
    pub fn lower_bound(&self, item: &T) -> i64 {
        (self.map.get(item) - self.merge_error).max(0)
    }

    /// Returns the frequent items, sorted by estimate descending
    ///
    /// The threshold is [`Self::maximum_error`]: under
    /// `NoFalseNegatives` every item whose upper bound reaches it is
    /// returned, under `NoFalsePositives` only items whose lower bound
    /// reaches it.
    pub fn get_frequent_items(&self, error_type: ErrorType) -> Vec<Row<T>> {
        self.get_frequent_items_with_threshold(self.maximum_error(), error_type)
    }

    /// Returns the frequent items above an explicit threshold
    ///
    /// Thresholds below [`Self::maximum_error`] are raised to it, since no
    /// bound can distinguish counts inside the error band.
    pub fn get_frequent_items_with_threshold(
        &self,
        threshold: i64,
        error_type: ErrorType,
    ) -> Vec<Row<T>> {
        let threshold = threshold.max(self.maximum_error());
        let mut rows = Vec::new();
        for (item, stored) in self.map.iter() {
            let estimate = stored + self.offset;
            let lower_bound = (stored - self.merge_error).max(0);
            let upper_bound = stored + self.offset + self.merge_error;
            let keep = match error_type {
                ErrorType::NoFalseNegatives => upper_bound >= threshold,
                ErrorType::NoFalsePositives => lower_bound >= threshold,
            };
            if keep {
                rows.push(Row {
                    item: item.clone(),
                    estimate,
                    lower_bound,
                    upper_bound,
                });
            }
        }
        rows.sort_by(|a, b| b.estimate.cmp(&a.estimate));
        rows
    }

    /// Merges another sketch into this one
    ///
    /// The other sketch's maximum error is inherited into `merge_error`,
    /// widening the bounds of every subsequent answer.
    ///
    /// # Errors
    /// Returns `SketchError::InvalidState` if a purge fails to make room
    pub fn merge(&mut self, other: &Self) -> Result<()> {
        if other.is_empty() {
            return Ok(());
        }
        let stream_length = self.stream_length + other.stream_length;
        self.merge_error += other.maximum_error();
        for (item, count) in other.map.iter() {
            self.update_by(item.clone(), count)?;
        }
        // the updates above already added the other counts; the stream
        // length is the simple sum of both streams
        self.stream_length = stream_length;
        Ok(())
    }

    /// Returns the sketch to its freshly constructed state
    pub fn reset(&mut self) {
        // the minimum lg is a valid argument
        if let Ok(map) = ReversePurgeHashMap::new(LG_MIN_MAP_SIZE) {
            self.map = map;
        }
        self.cur_map_cap = self.map.capacity();
        self.offset = 0;
        self.merge_error = 0;
        self.stream_length = 0;
    }

    /// Serializes the sketch with the given item encoding
    ///
    /// An empty sketch is exactly 8 bytes. A populated sketch writes a
    /// 40-byte preamble, the active counts, then the encoded items.
    pub fn to_bytes<S: ItemSerde<T>>(&self, serde: &S) -> Vec<u8> {
        let empty = self.is_empty();
        let mut out = Vec::with_capacity(if empty { 8 } else { 64 });
        Preamble {
            pre_longs: if empty {
                EMPTY_PREAMBLE_LONGS
            } else {
                FULL_PREAMBLE_LONGS
            },
            ser_ver: SER_VER,
            family: Family::Frequency.id(),
            byte3: self.lg_max_map_size,
            byte4: self.map.lg_length(),
            flags: if empty { FLAG_EMPTY } else { 0 },
            type_byte: serde.type_id(),
            byte7: 0,
        }
        .write(&mut out);
        if empty {
            return out;
        }

        let entries: Vec<(&T, i64)> = self.map.iter().collect();
        out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
        out.extend_from_slice(&[0u8; 4]); // reserved
        out.extend_from_slice(&self.stream_length.to_le_bytes());
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.merge_error.to_le_bytes());
        for (_, count) in &entries {
            out.extend_from_slice(&count.to_le_bytes());
        }
        for (item, _) in &entries {
            serde.serialize_item(item, &mut out);
        }
        out
    }

    /// Serializes the sketch into a caller-provided buffer
    ///
    /// # Errors
    /// Returns `SketchError::SerializationError` when `out` is too small
    /// for the required serialization; on success returns the number of
    /// bytes written
    pub fn serialize_into<S: ItemSerde<T>>(&self, serde: &S, out: &mut [u8]) -> Result<usize> {
        let bytes = self.to_bytes(serde);
        if out.len() < bytes.len() {
            return Err(SketchError::SerializationError(format!(
                "output buffer too small: need {} bytes, got {}",
                bytes.len(),
                out.len()
            )));
        }
        out[..bytes.len()].copy_from_slice(&bytes);
        Ok(bytes.len())
    }

    /// Deserializes a sketch written by [`FrequentItemsSketch::to_bytes`]
    ///
    /// # Errors
    /// Returns `SketchError::DeserializationError` on any structural
    /// mismatch: bad preamble length, version, family, an EMPTY flag
    /// disagreeing with the preamble length, or a type byte disagreeing
    /// with `serde`
    pub fn from_bytes<S: ItemSerde<T>>(bytes: &[u8], serde: &S) -> Result<Self> {
        validation::validate_byte_size(bytes.len())?;
        let pre = Preamble::read(bytes)?;
        if pre.pre_longs != EMPTY_PREAMBLE_LONGS && pre.pre_longs != FULL_PREAMBLE_LONGS {
            return Err(SketchError::DeserializationError(format!(
                "Preamble length must be {} or {}, got {}",
                EMPTY_PREAMBLE_LONGS, FULL_PREAMBLE_LONGS, pre.pre_longs
            )));
        }
        pre.check_family(Family::Frequency)?;
        pre.check_empty_flag(EMPTY_PREAMBLE_LONGS)?;
        if pre.type_byte != serde.type_id() {
            return Err(SketchError::DeserializationError(format!(
                "Item type byte mismatch: got {}, expected {}",
                pre.type_byte,
                serde.type_id()
            )));
        }
        let lg_max = pre.byte3;
        let lg_cur = pre.byte4;
        if !(LG_MIN_MAP_SIZE..=26).contains(&lg_max) || lg_cur < LG_MIN_MAP_SIZE || lg_cur > lg_max
        {
            return Err(SketchError::DeserializationError(format!(
                "Invalid map sizes: lgMax {}, lgCur {}",
                lg_max, lg_cur
            )));
        }

        let mut sketch = Self::with_rng(1usize << lg_max, SmallRng::from_os_rng())?;
        if lg_cur > sketch.map.lg_length() {
            sketch.map.resize(lg_cur)?;
            sketch.cur_map_cap = sketch.map.capacity();
        }

        if pre.is_empty() {
            if bytes.len() != 8 {
                return Err(SketchError::DeserializationError(
                    "Empty sketch must be exactly 8 bytes".to_string(),
                ));
            }
            return Ok(sketch);
        }

        let mut reader = Reader::with_offset(bytes, 8);
        let num_active = reader.read_u32()? as usize;
        reader.read_u32()?; // reserved
        let stream_length = reader.read_u64()?;
        let offset = reader.read_i64()?;
        let merge_error = reader.read_i64()?;
        if offset < 0 || merge_error < 0 {
            return Err(SketchError::DeserializationError(format!(
                "Negative error bounds: offset {}, mergeError {}",
                offset, merge_error
            )));
        }
        if num_active > sketch.cur_map_cap {
            return Err(SketchError::DeserializationError(format!(
                "{} active items exceed the capacity {} of a map of lg size {}",
                num_active, sketch.cur_map_cap, lg_cur
            )));
        }

        if reader.remaining() < num_active * 8 {
            return Err(SketchError::DeserializationError(format!(
                "Truncated input: {} counts need {} bytes, {} remain",
                num_active,
                num_active * 8,
                reader.remaining()
            )));
        }
        let mut counts = Vec::with_capacity(num_active);
        for _ in 0..num_active {
            let count = reader.read_i64()?;
            if count <= 0 {
                return Err(SketchError::DeserializationError(format!(
                    "Active item count must be positive, got {}",
                    count
                )));
            }
            counts.push(count);
        }
        for count in counts {
            let item = serde.deserialize_item(&mut reader)?;
            sketch.map.adjust(item, count);
        }
        if sketch.map.num_active() != num_active {
            return Err(SketchError::DeserializationError(
                "Duplicate items in serialized sketch".to_string(),
            ));
        }
        sketch.stream_length = stream_length;
        sketch.offset = offset;
        sketch.merge_error = merge_error;
        Ok(sketch)
    }
}

impl<T: Hash + Eq + Clone> PartialEq for FrequentItemsSketch<T> {
    fn eq(&self, other: &Self) -> bool {
        if self.lg_max_map_size != other.lg_max_map_size
            || self.offset != other.offset
            || self.merge_error != other.merge_error
            || self.stream_length != other.stream_length
            || self.map.num_active() != other.map.num_active()
        {
            return false;
        }
        self.map
            .iter()
            .all(|(item, count)| other.map.get(item) == count)
    }
}
