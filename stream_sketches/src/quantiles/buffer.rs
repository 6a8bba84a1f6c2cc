//! Growable sorted buffer with a configurable orientation
//!
//! The buffer keeps its active items either at the bottom of the backing
//! array (the usual layout) or at the top (`space_at_bottom`), which lets
//! a high-rank-accuracy compactor trim its lowest items by simply
//! shortening the active region. All public offsets are relative to the
//! active region, so callers never see the orientation.

use crate::common::{Result, SketchError};

/// Growable array of f64 values with lazy sorting and merge support
#[derive(Debug, Clone)]
pub struct SortedBuffer {
    arr: Vec<f64>,
    count: usize,
    delta: usize,
    sorted: bool,
    space_at_bottom: bool,
}

impl SortedBuffer {
    /// Creates an empty buffer
    ///
    /// # Arguments
    /// * `capacity` - Initial backing length
    /// * `delta` - Extra headroom added on each growth
    /// * `space_at_bottom` - Keep active items at the top of the array
    pub fn new(capacity: usize, delta: usize, space_at_bottom: bool) -> Self {
        SortedBuffer {
            arr: vec![0.0; capacity],
            count: 0,
            delta,
            sorted: true,
            space_at_bottom,
        }
    }

    /// Wraps an already sorted vector as a full buffer
    pub fn wrap_sorted(items: Vec<f64>, space_at_bottom: bool) -> Self {
        SortedBuffer {
            count: items.len(),
            arr: items,
            delta: 0,
            sorted: true,
            space_at_bottom,
        }
    }

    /// Number of active items
    pub fn len(&self) -> usize {
        self.count
    }

    /// True when no item is held
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Backing array length
    pub fn capacity(&self) -> usize {
        self.arr.len()
    }

    /// True when the active region is known to be non-decreasing
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    /// True when active items live at the top of the backing array
    pub fn space_at_bottom(&self) -> bool {
        self.space_at_bottom
    }

    fn active_start(&self) -> usize {
        if self.space_at_bottom {
            self.arr.len() - self.count
        } else {
            0
        }
    }

    /// The active items, in storage order
    pub fn active(&self) -> &[f64] {
        let start = self.active_start();
        &self.arr[start..start + self.count]
    }

    /// The item at `offset` within the active region
    ///
    /// # Panics
    /// Panics if `offset >= len()`.
    pub fn get(&self, offset: usize) -> f64 {
        self.active()[offset]
    }

    /// Appends an item, growing by `delta` when full
    ///
    /// Clears the sorted flag unless the buffer was empty.
    pub fn append(&mut self, item: f64) {
        self.ensure_space(1);
        if self.count > 0 {
            self.sorted = false;
        }
        if self.space_at_bottom {
            let index = self.arr.len() - self.count - 1;
            self.arr[index] = item;
        } else {
            self.arr[self.count] = item;
        }
        self.count += 1;
    }

    fn ensure_space(&mut self, space: usize) {
        if self.count + space > self.arr.len() {
            self.ensure_capacity(self.count + space + self.delta);
        }
    }

    /// Grows the backing array to at least `new_capacity`, preserving the
    /// active region in its orientation; never shrinks
    pub fn ensure_capacity(&mut self, new_capacity: usize) {
        if new_capacity <= self.arr.len() {
            return;
        }
        let mut fresh = vec![0.0; new_capacity];
        let start = self.active_start();
        if self.space_at_bottom {
            fresh[new_capacity - self.count..].copy_from_slice(&self.arr[start..start + self.count]);
        } else {
            fresh[..self.count].copy_from_slice(&self.arr[..self.count]);
        }
        self.arr = fresh;
    }

    /// Sorts the active region in place; no-op when already sorted
    pub fn sort(&mut self) {
        if self.sorted {
            return;
        }
        let start = self.active_start();
        let count = self.count;
        self.arr[start..start + count].sort_by(f64::total_cmp);
        self.sorted = true;
    }

    /// Merges another buffer's items into this one, keeping both sorted
    /// orders; the result is sorted
    ///
    /// Either side is sorted lazily first. The scan runs from the top for
    /// a bottom-anchored buffer and from the bottom for a top-anchored
    /// one, writing the larger (resp. smaller) element first, and is
    /// stable with respect to equal keys from the same source.
    pub fn merge_sort_in(&mut self, other: &mut SortedBuffer) {
        self.sort();
        other.sort();
        self.ensure_capacity(self.count + other.count);
        let tot_len = self.count + other.count;
        let arr_in = other.active();
        let capacity = self.arr.len();

        if self.space_at_bottom {
            // scan up, fill from the bottom of the target region
            let mut i = capacity - self.count;
            let mut j = 0usize;
            for k in capacity - tot_len..capacity {
                if i < capacity && j < arr_in.len() {
                    self.arr[k] = if self.arr[i] <= arr_in[j] {
                        i += 1;
                        self.arr[i - 1]
                    } else {
                        j += 1;
                        arr_in[j - 1]
                    };
                } else if i < capacity {
                    self.arr[k] = self.arr[i];
                    i += 1;
                } else if j < arr_in.len() {
                    self.arr[k] = arr_in[j];
                    j += 1;
                } else {
                    break;
                }
            }
        } else {
            // scan down, fill from the top
            let mut i = self.count as isize - 1;
            let mut j = arr_in.len() as isize - 1;
            for k in (0..tot_len).rev() {
                if i >= 0 && j >= 0 {
                    self.arr[k] = if self.arr[i as usize] >= arr_in[j as usize] {
                        i -= 1;
                        self.arr[(i + 1) as usize]
                    } else {
                        j -= 1;
                        arr_in[(j + 1) as usize]
                    };
                } else if i >= 0 {
                    self.arr[k] = self.arr[i as usize];
                    i -= 1;
                } else if j >= 0 {
                    self.arr[k] = arr_in[j as usize];
                    j -= 1;
                } else {
                    break;
                }
            }
        }
        self.count = tot_len;
        self.sorted = true;
    }

    /// Counts the active items below `value`
    ///
    /// With `lt_eq` the comparison is `<=`, otherwise strictly `<`. Sorts
    /// lazily, then binary-searches.
    pub fn count_with_criterion(&mut self, value: f64, lt_eq: bool) -> usize {
        self.sort();
        let active = self.active();
        if lt_eq {
            active.partition_point(|&x| x <= value)
        } else {
            active.partition_point(|&x| x < value)
        }
    }

    /// Returns a new sorted buffer holding every other item of the active
    /// range `[start, end)` (offsets relative to the active region)
    ///
    /// # Errors
    /// Returns `SketchError::InvalidParameter` when the range length is
    /// odd
    pub fn get_evens_or_odds(&mut self, start: usize, end: usize, odds: bool) -> Result<SortedBuffer> {
        if (end - start) % 2 != 0 {
            return Err(SketchError::InvalidParameter {
                param: "end - start".to_string(),
                value: (end - start).to_string(),
                constraint: "must be even".to_string(),
            });
        }
        Ok(self.evens_or_odds(start, end, odds))
    }

    /// As [`Self::get_evens_or_odds`] for ranges already known to be even
    pub(crate) fn evens_or_odds(&mut self, start: usize, end: usize, odds: bool) -> SortedBuffer {
        debug_assert_eq!((end - start) % 2, 0);
        self.sort();
        let active = self.active();
        let range = end - start;
        let odd = usize::from(odds);
        let mut out = Vec::with_capacity(range / 2);
        let mut i = start + odd;
        while out.len() < range / 2 {
            out.push(active[i]);
            i += 2;
        }
        SortedBuffer::wrap_sorted(out, self.space_at_bottom)
    }

    /// Shrinks the backing array to the active count; never grows
    pub fn trim_capacity(&mut self) {
        if self.arr.len() > self.count {
            let start = self.active_start();
            self.arr = self.arr[start..start + self.count].to_vec();
        }
    }

    /// Shortens the active region to `new_length`; never grows
    ///
    /// For a top-anchored buffer this drops the lowest items, otherwise
    /// the highest.
    pub fn trim_length(&mut self, new_length: usize) {
        if new_length < self.count {
            self.count = new_length;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_append_and_growth() {
        let mut buf = SortedBuffer::new(2, 2, false);
        for i in 0..7 {
            buf.append(i as f64);
        }
        assert_eq!(buf.len(), 7);
        assert!(buf.capacity() >= 7);
        assert_eq!(buf.active(), &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_append_keeps_sorted_flag_on_first_item() {
        let mut buf = SortedBuffer::new(4, 0, false);
        assert!(buf.is_sorted());
        buf.append(3.0);
        assert!(buf.is_sorted());
        buf.append(1.0);
        assert!(!buf.is_sorted());
    }

    #[test]
    fn test_space_at_bottom_orientation() {
        let mut buf = SortedBuffer::new(8, 0, true);
        buf.append(3.0);
        buf.append(1.0);
        buf.append(2.0);
        assert_eq!(buf.len(), 3);
        // appended items fill downward from the top
        assert_eq!(buf.active(), &[2.0, 1.0, 3.0]);
        buf.sort();
        assert_eq!(buf.active(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_count_with_criterion() {
        let mut buf = SortedBuffer::new(8, 0, false);
        buf.append(3.0);
        buf.append(1.0);
        buf.append(2.0);

        assert_eq!(buf.count_with_criterion(2.0, true), 2);
        assert_eq!(buf.count_with_criterion(2.0, false), 1);
        assert_eq!(buf.count_with_criterion(0.5, true), 0);
        assert_eq!(buf.count_with_criterion(9.0, false), 3);
    }

    #[test]
    fn test_merge_sort_in_both_orientations() {
        for sab in [false, true] {
            let mut a = SortedBuffer::new(4, 4, sab);
            for v in [1.0, 5.0, 3.0] {
                a.append(v);
            }
            let mut b = SortedBuffer::new(4, 4, sab);
            for v in [4.0, 2.0, 6.0] {
                b.append(v);
            }
            a.merge_sort_in(&mut b);
            assert_eq!(a.len(), 6);
            assert!(a.is_sorted());
            assert_eq!(a.active(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        }
    }

    #[test]
    fn test_evens_and_odds() {
        let mut buf = SortedBuffer::new(8, 0, false);
        for v in [4.0, 1.0, 3.0, 2.0] {
            buf.append(v);
        }
        let evens = buf.get_evens_or_odds(0, 4, false).unwrap();
        assert_eq!(evens.active(), &[1.0, 3.0]);
        let odds = buf.get_evens_or_odds(0, 4, true).unwrap();
        assert_eq!(odds.active(), &[2.0, 4.0]);
    }

    #[test]
    fn test_evens_or_odds_rejects_odd_range() {
        let mut buf = SortedBuffer::new(8, 0, false);
        for v in [1.0, 2.0, 3.0] {
            buf.append(v);
        }
        assert!(buf.get_evens_or_odds(0, 3, false).is_err());
    }

    #[test]
    fn test_trim_length_drops_correct_end() {
        let mut top = SortedBuffer::new(8, 0, false);
        for v in [1.0, 2.0, 3.0, 4.0] {
            top.append(v);
        }
        top.sort();
        top.trim_length(2);
        assert_eq!(top.active(), &[1.0, 2.0]);

        let mut bottom = SortedBuffer::new(8, 0, true);
        for v in [1.0, 2.0, 3.0, 4.0] {
            bottom.append(v);
        }
        bottom.sort();
        bottom.trim_length(2);
        // top-anchored: the lowest items are dropped
        assert_eq!(bottom.active(), &[3.0, 4.0]);
    }

    #[test]
    fn test_trim_capacity() {
        let mut buf = SortedBuffer::new(16, 0, true);
        buf.append(2.0);
        buf.append(1.0);
        buf.trim_capacity();
        assert_eq!(buf.capacity(), 2);
        buf.sort();
        assert_eq!(buf.active(), &[1.0, 2.0]);
    }

    proptest! {
        // merged output is the sorted multiset union of both inputs
        #[test]
        fn prop_merge_sort_in_is_multiset_union(
            xs in proptest::collection::vec(-1e6f64..1e6, 0..50),
            ys in proptest::collection::vec(-1e6f64..1e6, 0..50),
            sab in proptest::bool::ANY
        ) {
            let mut a = SortedBuffer::new(8, 8, sab);
            for &x in &xs { a.append(x); }
            let mut b = SortedBuffer::new(8, 8, sab);
            for &y in &ys { b.append(y); }

            a.merge_sort_in(&mut b);

            let mut expected: Vec<f64> = xs.iter().chain(ys.iter()).copied().collect();
            expected.sort_by(f64::total_cmp);
            prop_assert_eq!(a.active(), expected.as_slice());
        }
    }
}
