//! Compact-levels quantiles sketch
//!
//! The sketch stores a contiguous `combined_buffer`: a base buffer of up
//! to `2k` unsorted values followed by level slots of exactly `k` sorted
//! values each. Bit `l` of `bit_pattern` marks level `l` occupied, and the
//! pattern always equals `n / 2k` - filling the base buffer carries a one
//! into the levels exactly like binary addition. A carry halves the sorted
//! run by keeping a random even/odd selection, so every level item stands
//! for `2^level` stream items.
//!
//! Accuracy is controlled by `k` (a power of two): the normalized rank
//! error is about `1.65 / k`.
//!
//! # Examples
//!
//! ```
//! use stream_sketches::quantiles::QuantilesSketch;
//!
//! let mut sketch = QuantilesSketch::new(128).unwrap();
//! for i in 0..10_000 {
//!     sketch.update(i as f64);
//! }
//! let median = sketch.quantile(0.5);
//! assert!((median - 5_000.0).abs() < 500.0);
//! ```

use crate::codec::{Family, Preamble, Reader, FLAG_EMPTY, SER_VER};
use crate::common::{validation, Mergeable, Result, Sketch, SketchError};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Smallest base-buffer allocation
const MIN_BASE_BUFFER_ALLOC: usize = 4;

const EMPTY_PREAMBLE_LONGS: u8 = 1;
const FULL_PREAMBLE_LONGS: u8 = 2;

/// Compact-levels sketch answering rank and quantile queries
#[derive(Debug, Clone)]
pub struct QuantilesSketch {
    /// Accuracy parameter; a power of two in [2, 32768]
    k: usize,
    /// Total number of values ever inserted
    n: u64,
    /// Base buffer followed by the level slots
    combined_buffer: Vec<f64>,
    /// Number of unsorted values currently in the base buffer
    base_buffer_count: usize,
    /// Bit `l` set iff level `l` is occupied; always equals `n / 2k`
    bit_pattern: u64,
    min_value: f64,
    max_value: f64,
    rng: SmallRng,
}

impl QuantilesSketch {
    /// Default accuracy parameter
    pub const DEFAULT_K: usize = 128;

    /// Creates a new sketch
    ///
    /// # Arguments
    /// * `k` - Accuracy parameter, a power of two in [2, 32768]
    ///
    /// # Errors
    /// Returns `SketchError::InvalidParameter` if `k` is out of range
    pub fn new(k: usize) -> Result<Self> {
        Self::with_rng(k, SmallRng::from_os_rng())
    }

    /// Creates a sketch with seeded compaction randomness, for
    /// reproducible runs
    pub fn with_seed(k: usize, seed: u64) -> Result<Self> {
        Self::with_rng(k, SmallRng::seed_from_u64(seed))
    }

    fn with_rng(k: usize, rng: SmallRng) -> Result<Self> {
        validation::validate_quantiles_k(k)?;
        Ok(QuantilesSketch {
            k,
            n: 0,
            combined_buffer: vec![0.0; MIN_BASE_BUFFER_ALLOC.min(2 * k)],
            base_buffer_count: 0,
            bit_pattern: 0,
            min_value: f64::INFINITY,
            max_value: f64::NEG_INFINITY,
            rng,
        })
    }

    /// Returns the accuracy parameter
    pub fn k(&self) -> usize {
        self.k
    }

    /// Returns the number of values inserted
    pub fn n(&self) -> u64 {
        self.n
    }

    /// True when no value has been inserted
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Smallest value seen, or infinity when empty
    pub fn min_value(&self) -> f64 {
        self.min_value
    }

    /// Largest value seen, or negative infinity when empty
    pub fn max_value(&self) -> f64 {
        self.max_value
    }

    /// Number of values physically retained by the sketch
    pub fn num_retained(&self) -> usize {
        self.base_buffer_count + self.k * self.bit_pattern.count_ones() as usize
    }

    /// Approximate normalized rank error of this sketch
    pub fn normalized_rank_error(&self) -> f64 {
        1.65 / self.k as f64
    }

    /// Occupied-level mask; equals `n / 2k`
    pub fn bit_pattern(&self) -> u64 {
        self.bit_pattern
    }

    /// Inserts a value; non-finite values are ignored
    pub fn update(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.min_value = self.min_value.min(value);
        self.max_value = self.max_value.max(value);

        if self.base_buffer_count + 1 > self.combined_buffer.len() {
            self.grow_base_buffer();
        }
        self.combined_buffer[self.base_buffer_count] = value;
        self.base_buffer_count += 1;
        self.n += 1;
        if self.base_buffer_count == 2 * self.k {
            self.process_full_base_buffer();
        }
    }

    /// Returns the sketch to its freshly constructed state
    pub fn reset(&mut self) {
        self.n = 0;
        self.combined_buffer = vec![0.0; MIN_BASE_BUFFER_ALLOC.min(2 * self.k)];
        self.base_buffer_count = 0;
        self.bit_pattern = 0;
        self.min_value = f64::INFINITY;
        self.max_value = f64::NEG_INFINITY;
    }

    fn grow_base_buffer(&mut self) {
        let k2 = 2 * self.k;
        let old = self.combined_buffer.len();
        debug_assert!(old < k2);
        let new_size = 1.max(k2.min(2 * old));
        self.combined_buffer.resize(new_size, 0.0);
    }

    fn num_levels_needed(k: usize, n: u64) -> usize {
        let v = n / (2 * k as u64);
        if v == 0 {
            0
        } else {
            (64 - v.leading_zeros()) as usize
        }
    }

    fn maybe_grow_levels(&mut self, new_n: u64) {
        let levels = Self::num_levels_needed(self.k, new_n);
        if levels == 0 {
            return;
        }
        let space_needed = (2 + levels) * self.k;
        if space_needed > self.combined_buffer.len() {
            self.combined_buffer.resize(space_needed, 0.0);
        }
    }

    fn lowest_zero_bit_starting_at(bits: u64, starting: usize) -> usize {
        starting + (bits >> starting).trailing_ones() as usize
    }

    fn process_full_base_buffer(&mut self) {
        let k2 = 2 * self.k;
        debug_assert_eq!(self.base_buffer_count, k2);
        self.maybe_grow_levels(self.n);
        self.combined_buffer[..k2].sort_by(f64::total_cmp);
        self.in_place_propagate_carry(0, None);
        self.base_buffer_count = 0;
        debug_assert_eq!(self.bit_pattern, self.n / k2 as u64);
    }

    /// Carries a sorted `2k` run (the base buffer, or `src_k_buf` already
    /// halved to `k` items) into the levels, merging occupied levels
    /// upward until the first free slot
    fn in_place_propagate_carry(&mut self, starting_level: usize, src_k_buf: Option<&[f64]>) {
        let k = self.k;
        let ending_level = Self::lowest_zero_bit_starting_at(self.bit_pattern, starting_level);
        let end_pos = (2 + ending_level) * k;

        match src_k_buf {
            // update version: halve the sorted base buffer into the free slot
            None => {
                let offset = usize::from(self.rng.random::<bool>());
                for c in 0..k {
                    self.combined_buffer[end_pos + c] = self.combined_buffer[2 * c + offset];
                }
            }
            // merge version: the halved run arrives ready to place
            Some(src) => {
                debug_assert_eq!(src.len(), k);
                self.combined_buffer[end_pos..end_pos + k].copy_from_slice(src);
            }
        }

        if ending_level > starting_level {
            let mut scratch = vec![0.0; 2 * k];
            for lvl in starting_level..ending_level {
                let a = (2 + lvl) * k;
                let b = end_pos;
                let (mut i, mut j) = (0usize, 0usize);
                for slot in scratch.iter_mut() {
                    *slot = if i < k
                        && (j >= k || self.combined_buffer[a + i] <= self.combined_buffer[b + j])
                    {
                        i += 1;
                        self.combined_buffer[a + i - 1]
                    } else {
                        j += 1;
                        self.combined_buffer[b + j - 1]
                    };
                }
                let offset = usize::from(self.rng.random::<bool>());
                for c in 0..k {
                    self.combined_buffer[end_pos + c] = scratch[2 * c + offset];
                }
            }
        }
        // binary addition: bits starting..ending flip to zero, bit ending sets
        self.bit_pattern += 1u64 << starting_level;
    }

    /// Merges another sketch into this one
    ///
    /// The source `k` must be greater than or equal to this sketch's `k`;
    /// a larger source is down-sampled (the ratio of two powers of two is
    /// itself a power of two). Merging into a larger-k target would
    /// pretend accuracy the data cannot support; use [`QuantilesUnion`]
    /// to combine arbitrary sketches.
    ///
    /// # Errors
    /// Returns `SketchError::IncompatibleSketches` when `other.k < self.k`
    pub fn merge(&mut self, other: &Self) -> Result<()> {
        if other.is_empty() {
            return Ok(());
        }
        if other.k < self.k {
            return Err(SketchError::IncompatibleSketches {
                reason: format!(
                    "source k {} is smaller than target k {}; use QuantilesUnion",
                    other.k, self.k
                ),
            });
        }
        if other.k == self.k {
            self.merge_same_k(other);
        } else {
            self.downsampling_merge(other);
        }
        Ok(())
    }

    fn merge_same_k(&mut self, other: &Self) {
        debug_assert_eq!(self.k, other.k);
        let k = self.k;
        let n_final = self.n + other.n;

        // source base buffer goes through the ordinary update path
        for i in 0..other.base_buffer_count {
            self.update(other.combined_buffer[i]);
        }
        self.maybe_grow_levels(n_final);

        let mut src_bits = other.bit_pattern;
        let mut lvl = 0usize;
        while src_bits != 0 {
            if src_bits & 1 == 1 {
                let pos = (2 + lvl) * k;
                self.in_place_propagate_carry(lvl, Some(&other.combined_buffer[pos..pos + k]));
            }
            src_bits >>= 1;
            lvl += 1;
        }
        self.n = n_final;
        self.min_value = self.min_value.min(other.min_value);
        self.max_value = self.max_value.max(other.max_value);
    }

    fn downsampling_merge(&mut self, other: &Self) {
        let src_k = other.k;
        let tgt_k = self.k;
        debug_assert!(src_k > tgt_k);
        let down_factor = src_k / tgt_k;
        let lg_down_factor = down_factor.trailing_zeros() as usize;
        let n_final = self.n + other.n;

        for i in 0..other.base_buffer_count {
            self.update(other.combined_buffer[i]);
        }
        self.maybe_grow_levels(n_final);

        let mut down_buf = vec![0.0; tgt_k];
        let mut src_bits = other.bit_pattern;
        let mut lvl = 0usize;
        while src_bits != 0 {
            if src_bits & 1 == 1 {
                let pos = (2 + lvl) * src_k;
                let offset = self.rng.random_range(0..down_factor);
                for (c, slot) in down_buf.iter_mut().enumerate() {
                    *slot = other.combined_buffer[pos + c * down_factor + offset];
                }
                self.in_place_propagate_carry(lvl + lg_down_factor, Some(&down_buf));
            }
            src_bits >>= 1;
            lvl += 1;
        }
        self.n = n_final;
        self.min_value = self.min_value.min(other.min_value);
        self.max_value = self.max_value.max(other.max_value);
    }

    /// Estimated normalized rank of `value`: the fraction of the stream
    /// strictly below it
    pub fn rank(&self, value: f64) -> f64 {
        if self.n == 0 {
            return 0.0;
        }
        let mut count = 0u64;
        for i in 0..self.base_buffer_count {
            if self.combined_buffer[i] < value {
                count += 1;
            }
        }
        let mut bits = self.bit_pattern;
        let mut lvl = 0usize;
        while bits != 0 {
            if bits & 1 == 1 {
                let pos = (2 + lvl) * self.k;
                let level = &self.combined_buffer[pos..pos + self.k];
                count += (level.partition_point(|&x| x < value) as u64) << lvl;
            }
            bits >>= 1;
            lvl += 1;
        }
        count as f64 / self.n as f64
    }

    /// Estimated value at normalized rank `fraction`
    ///
    /// Returns NaN when the sketch is empty or `fraction` is outside
    /// `[0, 1]`.
    pub fn quantile(&self, fraction: f64) -> f64 {
        if self.n == 0 || !(0.0..=1.0).contains(&fraction) || fraction.is_nan() {
            return f64::NAN;
        }
        if fraction == 0.0 {
            return self.min_value;
        }
        if fraction == 1.0 {
            return self.max_value;
        }

        let mut items = self.weighted_items();
        items.sort_by(|a, b| a.0.total_cmp(&b.0));

        let target = (fraction * self.n as f64) as u64;
        let mut cumulative = 0u64;
        for (value, weight) in items {
            cumulative += weight;
            if cumulative >= target {
                return value;
            }
        }
        self.max_value
    }

    fn weighted_items(&self) -> Vec<(f64, u64)> {
        let mut items = Vec::with_capacity(self.num_retained());
        for i in 0..self.base_buffer_count {
            items.push((self.combined_buffer[i], 1u64));
        }
        let mut bits = self.bit_pattern;
        let mut lvl = 0usize;
        while bits != 0 {
            if bits & 1 == 1 {
                let pos = (2 + lvl) * self.k;
                for c in 0..self.k {
                    items.push((self.combined_buffer[pos + c], 1u64 << lvl));
                }
            }
            bits >>= 1;
            lvl += 1;
        }
        items
    }

    fn validate_split_points(split_points: &[f64]) -> Result<()> {
        for pair in split_points.windows(2) {
            if !(pair[0] < pair[1]) {
                return Err(SketchError::InvalidParameter {
                    param: "split_points".to_string(),
                    value: format!("{:?}", pair),
                    constraint: "must be unique and sorted ascending".to_string(),
                });
            }
        }
        if split_points.iter().any(|s| !s.is_finite()) {
            return Err(SketchError::InvalidParameter {
                param: "split_points".to_string(),
                value: "non-finite".to_string(),
                constraint: "must be finite".to_string(),
            });
        }
        Ok(())
    }

    /// Probability mass between consecutive split points
    ///
    /// Interval `i` is inclusive of `split_points[i-1]` and exclusive of
    /// `split_points[i]`; the result has one more entry than
    /// `split_points` and sums to 1 for a non-empty sketch.
    ///
    /// # Errors
    /// Returns `SketchError::InvalidParameter` when the split points are
    /// unsorted, duplicated, or non-finite
    pub fn pmf(&self, split_points: &[f64]) -> Result<Vec<f64>> {
        Self::validate_split_points(split_points)?;
        if self.n == 0 {
            return Ok(vec![0.0; split_points.len() + 1]);
        }
        let mut buckets = vec![0u64; split_points.len() + 1];
        for (value, weight) in self.weighted_items() {
            let b = split_points.partition_point(|&s| s <= value);
            buckets[b] += weight;
        }
        Ok(buckets
            .iter()
            .map(|&c| c as f64 / self.n as f64)
            .collect())
    }

    /// Cumulative distribution at each split point (plus the total mass,
    /// always 1, as the final entry)
    ///
    /// # Errors
    /// Returns `SketchError::InvalidParameter` when the split points are
    /// unsorted, duplicated, or non-finite
    pub fn cdf(&self, split_points: &[f64]) -> Result<Vec<f64>> {
        let pmf = self.pmf(split_points)?;
        let mut cumulative = 0.0;
        Ok(pmf
            .iter()
            .map(|mass| {
                cumulative += mass;
                cumulative
            })
            .collect())
    }

    /// Serializes the sketch
    ///
    /// An empty sketch is the 8-byte preamble alone. A populated sketch
    /// appends `n`, the extrema, the base buffer in insertion order, and
    /// each occupied level bottom-up; the level structure is recomputed
    /// from `n` on read.
    pub fn to_bytes(&self) -> Vec<u8> {
        let empty = self.is_empty();
        let mut out = Vec::with_capacity(if empty { 8 } else { 32 + 8 * self.num_retained() });
        Preamble {
            pre_longs: if empty {
                EMPTY_PREAMBLE_LONGS
            } else {
                FULL_PREAMBLE_LONGS
            },
            ser_ver: SER_VER,
            family: Family::Quantiles.id(),
            byte3: (self.k & 0xFF) as u8,
            byte4: (self.k >> 8) as u8,
            flags: if empty { FLAG_EMPTY } else { 0 },
            type_byte: 0,
            byte7: 0,
        }
        .write(&mut out);
        if empty {
            return out;
        }
        out.extend_from_slice(&self.n.to_le_bytes());
        out.extend_from_slice(&self.min_value.to_le_bytes());
        out.extend_from_slice(&self.max_value.to_le_bytes());
        for i in 0..self.base_buffer_count {
            out.extend_from_slice(&self.combined_buffer[i].to_le_bytes());
        }
        let mut bits = self.bit_pattern;
        let mut lvl = 0usize;
        while bits != 0 {
            if bits & 1 == 1 {
                let pos = (2 + lvl) * self.k;
                for c in 0..self.k {
                    out.extend_from_slice(&self.combined_buffer[pos + c].to_le_bytes());
                }
            }
            bits >>= 1;
            lvl += 1;
        }
        out
    }

    /// Deserializes a sketch written by [`QuantilesSketch::to_bytes`]
    ///
    /// # Errors
    /// Returns `SketchError::DeserializationError` on any structural
    /// mismatch
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        validation::validate_byte_size(bytes.len())?;
        let pre = Preamble::read(bytes)?;
        if pre.pre_longs != EMPTY_PREAMBLE_LONGS && pre.pre_longs != FULL_PREAMBLE_LONGS {
            return Err(SketchError::DeserializationError(format!(
                "Preamble length must be {} or {}, got {}",
                EMPTY_PREAMBLE_LONGS, FULL_PREAMBLE_LONGS, pre.pre_longs
            )));
        }
        pre.check_family(Family::Quantiles)?;
        pre.check_empty_flag(EMPTY_PREAMBLE_LONGS)?;
        let k = pre.byte3 as usize | ((pre.byte4 as usize) << 8);
        validation::validate_quantiles_k(k).map_err(|_| {
            SketchError::DeserializationError(format!("Invalid k {}", k))
        })?;

        let mut sketch = QuantilesSketch::new(k)?;
        if pre.is_empty() {
            if bytes.len() != 8 {
                return Err(SketchError::DeserializationError(
                    "Empty sketch must be exactly 8 bytes".to_string(),
                ));
            }
            return Ok(sketch);
        }

        let mut reader = Reader::with_offset(bytes, 8);
        let n = reader.read_u64()?;
        if n == 0 {
            return Err(SketchError::DeserializationError(
                "EMPTY flag clear but n is 0".to_string(),
            ));
        }
        let min_value = reader.read_f64()?;
        let max_value = reader.read_f64()?;

        let k2 = 2 * k as u64;
        let base_buffer_count = (n % k2) as usize;
        let bit_pattern = n / k2;
        let num_levels = Self::num_levels_needed(k, n);
        let retained = base_buffer_count + k * bit_pattern.count_ones() as usize;
        if reader.remaining() != retained * 8 {
            return Err(SketchError::DeserializationError(format!(
                "Expected {} retained values ({} bytes), {} bytes remain",
                retained,
                retained * 8,
                reader.remaining()
            )));
        }

        let alloc = if num_levels > 0 {
            (2 + num_levels) * k
        } else {
            (2 * k).min(MIN_BASE_BUFFER_ALLOC.max(base_buffer_count.next_power_of_two()))
        };
        sketch.combined_buffer = vec![0.0; alloc];
        for i in 0..base_buffer_count {
            sketch.combined_buffer[i] = reader.read_f64()?;
        }
        let mut bits = bit_pattern;
        let mut lvl = 0usize;
        while bits != 0 {
            if bits & 1 == 1 {
                let pos = (2 + lvl) * k;
                for c in 0..k {
                    sketch.combined_buffer[pos + c] = reader.read_f64()?;
                }
            }
            bits >>= 1;
            lvl += 1;
        }
        sketch.n = n;
        sketch.base_buffer_count = base_buffer_count;
        sketch.bit_pattern = bit_pattern;
        sketch.min_value = min_value;
        sketch.max_value = max_value;
        Ok(sketch)
    }
}

impl PartialEq for QuantilesSketch {
    /// Structural equality over the retained state; the compaction RNG is
    /// not part of the comparison
    fn eq(&self, other: &Self) -> bool {
        if self.k != other.k
            || self.n != other.n
            || self.bit_pattern != other.bit_pattern
            || self.base_buffer_count != other.base_buffer_count
        {
            return false;
        }
        if self.n > 0
            && (self.min_value.to_bits() != other.min_value.to_bits()
                || self.max_value.to_bits() != other.max_value.to_bits())
        {
            return false;
        }
        if self.combined_buffer[..self.base_buffer_count]
            != other.combined_buffer[..other.base_buffer_count]
        {
            return false;
        }
        let mut bits = self.bit_pattern;
        let mut lvl = 0usize;
        while bits != 0 {
            if bits & 1 == 1 {
                let pos = (2 + lvl) * self.k;
                if self.combined_buffer[pos..pos + self.k]
                    != other.combined_buffer[pos..pos + self.k]
                {
                    return false;
                }
            }
            bits >>= 1;
            lvl += 1;
        }
        true
    }
}

impl Sketch for QuantilesSketch {
    type Item = f64;

    fn update(&mut self, item: &Self::Item) {
        QuantilesSketch::update(self, *item);
    }

    fn estimate(&self) -> f64 {
        self.quantile(0.5)
    }

    fn is_empty(&self) -> bool {
        QuantilesSketch::is_empty(self)
    }

    fn serialize(&self) -> Vec<u8> {
        self.to_bytes()
    }

    fn deserialize(bytes: &[u8]) -> Result<Self> {
        Self::from_bytes(bytes)
    }
}

impl Mergeable for QuantilesSketch {
    fn merge(&mut self, other: &Self) -> Result<()> {
        QuantilesSketch::merge(self, other)
    }
}

/// Union of quantiles sketches of possibly different `k`
///
/// A thin state container: an optional inner sketch plus the merge
/// policy. The inner sketch adopts the smallest `k` seen (never above
/// `max_k`), and [`QuantilesUnion::result`] hands out a deep copy so no
/// internal handle leaks.
#[derive(Debug, Clone)]
pub struct QuantilesUnion {
    max_k: usize,
    gadget: Option<QuantilesSketch>,
}

impl QuantilesUnion {
    /// Creates an empty union
    ///
    /// # Errors
    /// Returns `SketchError::InvalidParameter` if `max_k` is not a valid
    /// accuracy parameter
    pub fn new(max_k: usize) -> Result<Self> {
        validation::validate_quantiles_k(max_k)?;
        Ok(QuantilesUnion {
            max_k,
            gadget: None,
        })
    }

    /// Returns the configured maximum accuracy parameter
    pub fn max_k(&self) -> usize {
        self.max_k
    }

    /// True when the union holds no data
    pub fn is_empty(&self) -> bool {
        self.gadget.as_ref().map_or(true, QuantilesSketch::is_empty)
    }

    /// Feeds a single value into the union
    ///
    /// # Errors
    /// Propagates construction errors from the first use
    pub fn update(&mut self, value: f64) -> Result<()> {
        if self.gadget.is_none() {
            self.gadget = Some(QuantilesSketch::new(self.max_k)?);
        }
        if let Some(gadget) = self.gadget.as_mut() {
            gadget.update(value);
        }
        Ok(())
    }

    /// Merges a sketch into the union
    ///
    /// Dispatch over the (absent / empty / valid) states of the inner
    /// sketch and the input: an absent inner sketch adopts a copy of the
    /// input (down-sampled to `max_k` when finer); a finer input merges
    /// directly; a coarser input forces the inner sketch to be rebuilt at
    /// the coarser `k` first, since accuracy can only be kept at the
    /// coarsest participating resolution.
    ///
    /// # Errors
    /// Propagates construction and merge errors
    pub fn update_sketch(&mut self, other: &QuantilesSketch) -> Result<()> {
        match self.gadget.take() {
            None => {
                self.gadget = Some(Self::copy_or_downsample(other, self.max_k)?);
            }
            Some(mut gadget) => {
                if other.is_empty() {
                    self.gadget = Some(gadget);
                } else if other.k() >= gadget.k() {
                    gadget.merge(other)?;
                    self.gadget = Some(gadget);
                } else {
                    let mut rebuilt = QuantilesSketch::new(other.k())?;
                    rebuilt.merge(&gadget)?;
                    rebuilt.merge(other)?;
                    self.gadget = Some(rebuilt);
                }
            }
        }
        Ok(())
    }

    fn copy_or_downsample(other: &QuantilesSketch, max_k: usize) -> Result<QuantilesSketch> {
        if other.k() <= max_k {
            return Ok(other.clone());
        }
        let mut down = QuantilesSketch::new(max_k)?;
        down.merge(other)?;
        Ok(down)
    }

    /// Returns a deep copy of the union's state as a sketch
    ///
    /// # Errors
    /// Propagates construction errors when the union is still unused
    pub fn result(&self) -> Result<QuantilesSketch> {
        match &self.gadget {
            Some(gadget) => Ok(gadget.clone()),
            None => QuantilesSketch::new(self.max_k),
        }
    }

    /// Discards all state
    pub fn reset(&mut self) {
        self.gadget = None;
    }
}
