//! Relative-error quantiles sketch
//!
//! A stack of compactors indexed by height: each holds a sorted buffer of
//! items weighted `2^height`. A full compactor sorts a section-sized slice
//! at its inaccurate end, keeps a coin-chosen half of it, and promotes the
//! survivors one level up. High-rank-accuracy mode compacts away the
//! lowest items so the error tightens toward rank 1; low-rank-accuracy
//! mode is the mirror image.
//!
//! Queries run over a lazily built auxiliary table: the globally sorted
//! retained items with their cumulative normalized ranks.
//!
//! # Examples
//!
//! ```
//! use stream_sketches::quantiles::{ReqMode, ReqSketch};
//!
//! let mut sketch = ReqSketch::new(12, ReqMode::HighRankAccuracy).unwrap();
//! for i in 1..=10_000 {
//!     sketch.update(i as f64);
//! }
//! // the maximum is exact
//! assert_eq!(sketch.quantile(1.0), 10_000.0);
//! let p99 = sketch.quantile(0.99);
//! assert!(p99 >= 9_500.0);
//! ```

use crate::codec::{Family, Preamble, Reader, FLAG_EMPTY, FLAG_HRA, SER_VER};
use crate::common::{validation, Mergeable, Result, Sketch, SketchError};
use crate::quantiles::buffer::SortedBuffer;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Initial number of sections in a fresh compactor
const INIT_NUM_SECTIONS: usize = 3;

/// Smallest section size a compactor may decay to
const MIN_SECTION_SIZE: usize = 4;

const EMPTY_PREAMBLE_LONGS: u8 = 1;
const FULL_PREAMBLE_LONGS: u8 = 2;

/// Operating mode of the relative-error sketch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReqMode {
    /// Compact away low items; error tightens toward rank 1
    HighRankAccuracy,
    /// Compact away high items; error tightens toward rank 0
    LowRankAccuracy,
}

fn nearest_even(value: f64) -> usize {
    ((value / 2.0).round() as usize) * 2
}

/// One level of the compactor stack
#[derive(Debug, Clone)]
struct ReqCompactor {
    lg_weight: u8,
    hra: bool,
    buf: SortedBuffer,
    coin: bool,
    state: u64,
    section_size: usize,
    section_size_flt: f64,
    num_sections: usize,
}

impl ReqCompactor {
    fn new(lg_weight: u8, hra: bool, section_size: usize) -> Self {
        let num_sections = INIT_NUM_SECTIONS;
        let nom_cap = 2 * num_sections * section_size;
        ReqCompactor {
            lg_weight,
            hra,
            buf: SortedBuffer::new(2 * nom_cap, nom_cap, hra),
            coin: false,
            state: 0,
            section_size,
            section_size_flt: section_size as f64,
            num_sections,
        }
    }

    fn nom_capacity(&self) -> usize {
        2 * self.num_sections * self.section_size
    }

    /// Halves a section-sized slice at the inaccurate end and returns the
    /// promoted survivors
    fn compact(&mut self, rng: &mut SmallRng) -> SortedBuffer {
        let secs_to_compact =
            (self.state.trailing_ones() as usize + 1).min(self.num_sections);
        let buf_len = self.buf.len();
        let mut non_compact =
            self.nom_capacity() / 2 + (self.num_sections - secs_to_compact) * self.section_size;
        // the compacted region must hold an even number of items
        if (buf_len - non_compact) % 2 == 1 {
            non_compact += 1;
        }
        let (low, high) = if self.hra {
            (0, buf_len - non_compact)
        } else {
            (non_compact, buf_len)
        };
        debug_assert!(high - low >= 2);

        // odd compaction numbers reuse the flipped previous coin, even
        // ones flip fresh
        if self.state & 1 == 1 {
            self.coin = !self.coin;
        } else {
            self.coin = rng.random();
        }

        let promote = self.buf.evens_or_odds(low, high, self.coin);
        self.buf.trim_length(buf_len - (high - low));
        self.state += 1;
        self.ensure_enough_sections();
        promote
    }

    /// Ages the compactor: once it has compacted often enough, halve the
    /// section size by sqrt(2) (floor 4, kept even) and double the number
    /// of sections
    fn ensure_enough_sections(&mut self) -> bool {
        if self.num_sections < 64
            && self.state >= (1u64 << (self.num_sections - 1))
            && self.section_size > MIN_SECTION_SIZE
        {
            let candidate = nearest_even(self.section_size_flt / std::f64::consts::SQRT_2);
            if candidate >= MIN_SECTION_SIZE {
                self.section_size_flt /= std::f64::consts::SQRT_2;
                self.section_size = candidate;
                self.num_sections <<= 1;
                self.buf.ensure_capacity(2 * self.nom_capacity());
                return true;
            }
        }
        false
    }

    fn merge(&mut self, other: &ReqCompactor) {
        debug_assert_eq!(self.lg_weight, other.lg_weight);
        self.state |= other.state;
        while self.ensure_enough_sections() {}
        let mut other_buf = other.buf.clone();
        self.buf.merge_sort_in(&mut other_buf);
    }
}

/// Auxiliary rank table: the retained items in global sorted order with
/// their cumulative normalized ranks
#[derive(Debug, Clone)]
struct ReqAuxiliary {
    items: Vec<f64>,
    norm_ranks: Vec<f64>,
}

impl ReqAuxiliary {
    /// Merges every compactor buffer, carrying each buffer's weight
    /// through the merge, then prefix-sums the weights into normalized
    /// ranks
    fn from_compactors(compactors: &mut [ReqCompactor], total_n: u64) -> Self {
        let mut merged: Vec<(f64, u64)> = Vec::new();
        for c in compactors.iter_mut() {
            c.buf.sort();
            let weight = 1u64 << c.lg_weight;
            let incoming = c.buf.active();
            let mut fresh = Vec::with_capacity(merged.len() + incoming.len());
            let (mut i, mut j) = (0usize, 0usize);
            while i < merged.len() || j < incoming.len() {
                if i < merged.len() && (j >= incoming.len() || merged[i].0 <= incoming[j]) {
                    fresh.push(merged[i]);
                    i += 1;
                } else {
                    fresh.push((incoming[j], weight));
                    j += 1;
                }
            }
            merged = fresh;
        }

        let mut items = Vec::with_capacity(merged.len());
        let mut norm_ranks = Vec::with_capacity(merged.len());
        let mut cumulative = 0u64;
        for (item, weight) in merged {
            cumulative += weight;
            items.push(item);
            norm_ranks.push(cumulative as f64 / total_n as f64);
        }
        ReqAuxiliary { items, norm_ranks }
    }

    /// The item whose cumulative rank first reaches `norm_rank`
    fn quantile(&self, norm_rank: f64, lt_eq: bool) -> f64 {
        if self.items.is_empty() {
            return f64::NAN;
        }
        let idx = if lt_eq {
            self.norm_ranks.partition_point(|&r| r < norm_rank)
        } else {
            self.norm_ranks.partition_point(|&r| r <= norm_rank)
        };
        if idx >= self.items.len() {
            return self.items[self.items.len() - 1];
        }
        self.items[idx]
    }

    #[cfg(test)]
    fn norm_ranks(&self) -> &[f64] {
        &self.norm_ranks
    }

    #[cfg(test)]
    fn items(&self) -> &[f64] {
        &self.items
    }
}

/// Relative-error quantiles sketch
#[derive(Debug, Clone)]
pub struct ReqSketch {
    /// Accuracy parameter; even, in [4, 1024]
    k: usize,
    hra: bool,
    /// Inclusive comparison criterion for rank and quantile queries
    lt_eq: bool,
    total_n: u64,
    ret_items: usize,
    max_nom_size: usize,
    min_value: f64,
    max_value: f64,
    compactors: Vec<ReqCompactor>,
    aux: Option<ReqAuxiliary>,
    rng: SmallRng,
}

impl ReqSketch {
    /// Creates a new sketch
    ///
    /// # Arguments
    /// * `k` - Accuracy parameter, even, in [4, 1024]; larger is more
    ///   accurate
    /// * `mode` - Which end of the rank domain gets the tight error
    ///
    /// # Errors
    /// Returns `SketchError::InvalidParameter` if `k` is out of range
    pub fn new(k: usize, mode: ReqMode) -> Result<Self> {
        Self::with_rng(k, mode, SmallRng::from_os_rng())
    }

    /// Creates a sketch with seeded compaction coin flips, for
    /// reproducible runs
    pub fn with_seed(k: usize, mode: ReqMode, seed: u64) -> Result<Self> {
        Self::with_rng(k, mode, SmallRng::seed_from_u64(seed))
    }

    fn with_rng(k: usize, mode: ReqMode, rng: SmallRng) -> Result<Self> {
        validation::validate_req_k(k)?;
        let hra = mode == ReqMode::HighRankAccuracy;
        let compactors = vec![ReqCompactor::new(0, hra, k)];
        let max_nom_size = compactors[0].nom_capacity();
        Ok(ReqSketch {
            k,
            hra,
            lt_eq: true,
            total_n: 0,
            ret_items: 0,
            max_nom_size,
            min_value: f64::INFINITY,
            max_value: f64::NEG_INFINITY,
            compactors,
            aux: None,
            rng,
        })
    }

    /// Returns the accuracy parameter
    pub fn k(&self) -> usize {
        self.k
    }

    /// Returns the operating mode
    pub fn mode(&self) -> ReqMode {
        if self.hra {
            ReqMode::HighRankAccuracy
        } else {
            ReqMode::LowRankAccuracy
        }
    }

    /// Returns the number of values inserted
    pub fn n(&self) -> u64 {
        self.total_n
    }

    /// True when no value has been inserted
    pub fn is_empty(&self) -> bool {
        self.total_n == 0
    }

    /// Number of values physically retained
    pub fn num_retained(&self) -> usize {
        self.ret_items
    }

    /// Number of compactor levels
    pub fn num_levels(&self) -> usize {
        self.compactors.len()
    }

    /// Smallest value seen, or infinity when empty
    pub fn min_value(&self) -> f64 {
        self.min_value
    }

    /// Largest value seen, or negative infinity when empty
    pub fn max_value(&self) -> f64 {
        self.max_value
    }

    /// Selects whether rank and quantile comparisons include equal items
    /// (the default) or are strict
    pub fn set_inclusive_criterion(&mut self, inclusive: bool) {
        self.lt_eq = inclusive;
    }

    /// Inserts a value; non-finite values are ignored
    pub fn update(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.min_value = self.min_value.min(value);
        self.max_value = self.max_value.max(value);
        self.compactors[0].buf.append(value);
        self.ret_items += 1;
        self.total_n += 1;
        if self.ret_items >= self.max_nom_size {
            self.compactors[0].buf.sort();
            self.compress();
        }
        self.aux = None;
    }

    fn compress(&mut self) {
        let mut h = 0;
        while h < self.compactors.len() {
            if self.compactors[h].buf.len() >= self.compactors[h].nom_capacity() {
                if h + 1 >= self.compactors.len() {
                    self.grow();
                }
                let mut promoted = self.compactors[h].compact(&mut self.rng);
                self.compactors[h + 1].buf.merge_sort_in(&mut promoted);
            }
            h += 1;
        }
        self.ret_items = self.compute_ret_items();
        self.max_nom_size = self.compute_max_nom_size();
        self.aux = None;
    }

    fn grow(&mut self) {
        let lg_weight = self.compactors.len() as u8;
        self.compactors
            .push(ReqCompactor::new(lg_weight, self.hra, self.k));
        self.max_nom_size = self.compute_max_nom_size();
    }

    fn compute_ret_items(&self) -> usize {
        self.compactors.iter().map(|c| c.buf.len()).sum()
    }

    fn compute_max_nom_size(&self) -> usize {
        self.compactors.iter().map(ReqCompactor::nom_capacity).sum()
    }

    /// Returns the sketch to its freshly constructed state
    pub fn reset(&mut self) {
        self.compactors = vec![ReqCompactor::new(0, self.hra, self.k)];
        self.max_nom_size = self.compactors[0].nom_capacity();
        self.ret_items = 0;
        self.total_n = 0;
        self.min_value = f64::INFINITY;
        self.max_value = f64::NEG_INFINITY;
        self.aux = None;
    }

    /// Merges another sketch into this one
    ///
    /// # Errors
    /// Returns `SketchError::IncompatibleSketches` when the operating
    /// modes differ
    pub fn merge(&mut self, other: &Self) -> Result<()> {
        if other.is_empty() {
            return Ok(());
        }
        if self.hra != other.hra {
            return Err(SketchError::IncompatibleSketches {
                reason: "cannot merge sketches with different rank-accuracy modes".to_string(),
            });
        }
        self.total_n += other.total_n;
        self.min_value = self.min_value.min(other.min_value);
        self.max_value = self.max_value.max(other.max_value);
        while self.compactors.len() < other.compactors.len() {
            self.grow();
        }
        for (i, oc) in other.compactors.iter().enumerate() {
            self.compactors[i].merge(oc);
        }
        self.ret_items = self.compute_ret_items();
        self.max_nom_size = self.compute_max_nom_size();
        if self.ret_items >= self.max_nom_size {
            self.compress();
        }
        self.aux = None;
        Ok(())
    }

    /// Estimated normalized rank of `value`
    ///
    /// With the inclusive criterion this is the fraction of the stream at
    /// or below `value`; with the strict criterion, strictly below.
    pub fn rank(&mut self, value: f64) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let lt_eq = self.lt_eq;
        let mut count = 0u64;
        for c in &mut self.compactors {
            count += (c.buf.count_with_criterion(value, lt_eq) as u64) << c.lg_weight;
        }
        count as f64 / self.total_n as f64
    }

    /// Estimated value at normalized rank `norm_rank`
    ///
    /// Returns NaN when the sketch is empty or `norm_rank` is outside
    /// `[0, 1]`. Rank 0 returns the exact minimum and rank 1 the exact
    /// maximum.
    pub fn quantile(&mut self, norm_rank: f64) -> f64 {
        if self.is_empty() || !(0.0..=1.0).contains(&norm_rank) || norm_rank.is_nan() {
            return f64::NAN;
        }
        if norm_rank == 0.0 {
            return self.min_value;
        }
        if norm_rank == 1.0 {
            return self.max_value;
        }
        let lt_eq = self.lt_eq;
        if let Some(aux) = &self.aux {
            return aux.quantile(norm_rank, lt_eq);
        }
        let aux = ReqAuxiliary::from_compactors(&mut self.compactors, self.total_n);
        let quantile = aux.quantile(norm_rank, lt_eq);
        self.aux = Some(aux);
        quantile
    }

    /// Serializes the sketch
    ///
    /// Sorts the compactor buffers first; the serialized items of each
    /// level are in ascending order.
    pub fn to_bytes(&mut self) -> Vec<u8> {
        let empty = self.is_empty();
        let mut out = Vec::with_capacity(if empty { 8 } else { 40 + 8 * self.ret_items });
        let mut flags = 0u8;
        if empty {
            flags |= FLAG_EMPTY;
        }
        if self.hra {
            flags |= FLAG_HRA;
        }
        Preamble {
            pre_longs: if empty {
                EMPTY_PREAMBLE_LONGS
            } else {
                FULL_PREAMBLE_LONGS
            },
            ser_ver: SER_VER,
            family: Family::RelativeError.id(),
            byte3: (self.k & 0xFF) as u8,
            byte4: (self.k >> 8) as u8,
            flags,
            type_byte: 0,
            byte7: 0,
        }
        .write(&mut out);
        if empty {
            return out;
        }
        out.extend_from_slice(&self.total_n.to_le_bytes());
        out.extend_from_slice(&self.min_value.to_le_bytes());
        out.extend_from_slice(&self.max_value.to_le_bytes());
        out.extend_from_slice(&(self.compactors.len() as u32).to_le_bytes());
        for c in &mut self.compactors {
            c.buf.sort();
            out.push(c.lg_weight);
            out.push(c.num_sections as u8);
            out.extend_from_slice(&(c.section_size as u16).to_le_bytes());
            out.extend_from_slice(&(c.state as u32).to_le_bytes());
            out.extend_from_slice(&(c.buf.len() as u32).to_le_bytes());
            for &item in c.buf.active() {
                out.extend_from_slice(&item.to_le_bytes());
            }
        }
        out
    }

    /// Deserializes a sketch written by [`ReqSketch::to_bytes`]
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
        pre.check_family(Family::RelativeError)?;
        pre.check_empty_flag(EMPTY_PREAMBLE_LONGS)?;
        let k = pre.byte3 as usize | ((pre.byte4 as usize) << 8);
        validation::validate_req_k(k)
            .map_err(|_| SketchError::DeserializationError(format!("Invalid k {}", k)))?;
        let mode = if pre.flags & FLAG_HRA != 0 {
            ReqMode::HighRankAccuracy
        } else {
            ReqMode::LowRankAccuracy
        };

        let mut sketch = ReqSketch::new(k, mode)?;
        if pre.is_empty() {
            if bytes.len() != 8 {
                return Err(SketchError::DeserializationError(
                    "Empty sketch must be exactly 8 bytes".to_string(),
                ));
            }
            return Ok(sketch);
        }

        let mut reader = Reader::with_offset(bytes, 8);
        let total_n = reader.read_u64()?;
        if total_n == 0 {
            return Err(SketchError::DeserializationError(
                "EMPTY flag clear but n is 0".to_string(),
            ));
        }
        let min_value = reader.read_f64()?;
        let max_value = reader.read_f64()?;
        let num_compactors = reader.read_u32()? as usize;
        if num_compactors == 0 || num_compactors > 64 {
            return Err(SketchError::DeserializationError(format!(
                "Implausible compactor count {}",
                num_compactors
            )));
        }

        let hra = mode == ReqMode::HighRankAccuracy;
        let mut compactors = Vec::with_capacity(num_compactors);
        for height in 0..num_compactors {
            let lg_weight = reader.read_u8()?;
            if lg_weight as usize != height {
                return Err(SketchError::DeserializationError(format!(
                    "Compactor {} carries lg weight {}",
                    height, lg_weight
                )));
            }
            let num_sections = reader.read_u8()? as usize;
            let section_size = reader.read_u16()? as usize;
            if num_sections == 0 || section_size < MIN_SECTION_SIZE || section_size % 2 != 0 {
                return Err(SketchError::DeserializationError(format!(
                    "Invalid compactor shape: {} sections of size {}",
                    num_sections, section_size
                )));
            }
            let state = reader.read_u32()? as u64;
            let count = reader.read_u32()? as usize;
            if reader.remaining() < count.saturating_mul(8) {
                return Err(SketchError::DeserializationError(format!(
                    "Truncated input: compactor {} declares {} items, {} bytes remain",
                    height,
                    count,
                    reader.remaining()
                )));
            }

            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(reader.read_f64()?);
            }
            if items.windows(2).any(|pair| pair[0] > pair[1]) {
                return Err(SketchError::DeserializationError(format!(
                    "Compactor {} items are not sorted",
                    height
                )));
            }

            let mut compactor = ReqCompactor::new(lg_weight, hra, section_size);
            compactor.num_sections = num_sections;
            compactor.section_size_flt = section_size as f64;
            compactor.state = state;
            let nom_cap = compactor.nom_capacity();
            let mut buf = SortedBuffer::wrap_sorted(items, hra);
            buf.ensure_capacity(2 * nom_cap);
            compactor.buf = buf;
            compactors.push(compactor);
        }

        sketch.compactors = compactors;
        sketch.total_n = total_n;
        sketch.min_value = min_value;
        sketch.max_value = max_value;
        sketch.ret_items = sketch.compute_ret_items();
        sketch.max_nom_size = sketch.compute_max_nom_size();
        Ok(sketch)
    }
}

impl Sketch for ReqSketch {
    type Item = f64;

    fn update(&mut self, item: &Self::Item) {
        ReqSketch::update(self, *item);
    }

    fn estimate(&self) -> f64 {
        let mut sketch = self.clone();
        sketch.quantile(0.5)
    }

    fn is_empty(&self) -> bool {
        ReqSketch::is_empty(self)
    }

    fn serialize(&self) -> Vec<u8> {
        let mut sketch = self.clone();
        sketch.to_bytes()
    }

    fn deserialize(bytes: &[u8]) -> Result<Self> {
        Self::from_bytes(bytes)
    }
}

impl Mergeable for ReqSketch {
    fn merge(&mut self, other: &Self) -> Result<()> {
        ReqSketch::merge(self, other)
    }
}
