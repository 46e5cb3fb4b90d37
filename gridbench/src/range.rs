use std::fmt;

use serde::{Deserialize, Serialize};

/// Half-open interval `[start, end)` of key indices.
///
/// Ranges are how the key space is split between workers and between the
/// stressor threads of one worker. They are immutable values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    start: i64,
    end: i64,
}

impl Range {
    /// # Panics
    ///
    /// Panics if `start > end`.
    pub fn new(start: i64, end: i64) -> Self {
        assert!(start <= end, "range start {start} is after its end {end}");
        Self { start, end }
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    pub fn size(&self) -> i64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, key: i64) -> bool {
        key >= self.start && key < self.end
    }

    /// Returns a copy translated by `delta`.
    pub fn shift(&self, delta: i64) -> Self {
        Self {
            start: self.start + delta,
            end: self.end + delta,
        }
    }

    /// Computes part `part_idx` of `[0, num_keys)` split into `num_parts`
    /// contiguous parts.
    ///
    /// Part sizes differ by at most one; the `num_keys % num_parts` leftover
    /// keys go to the lowest-indexed parts.
    ///
    /// # Panics
    ///
    /// Panics if `num_parts` is zero.
    pub fn divide_range(num_keys: i64, num_parts: usize, part_idx: usize) -> Self {
        assert!(num_parts > 0, "cannot divide a range into zero parts");
        let parts = num_parts as i64;
        let idx = part_idx as i64;
        let base = num_keys / parts + 1;
        let modulo = num_keys % parts;
        if idx < modulo {
            let start = idx * base;
            Self::new(start, start + base)
        } else {
            let start = base * modulo + (idx - modulo) * (base - 1);
            Self::new(start, start + base - 1)
        }
    }

    /// Repartitions an ordered list of ranges into `num_parts` ordered lists.
    ///
    /// Bucket `i` receives exactly `divide_range(total, num_parts, i).size()`
    /// keys, taken in order from the input. Input ranges are split where a
    /// bucket boundary falls inside them and never reordered. An empty input
    /// behaves like a single empty range, giving every part no ranges at all.
    pub fn balance(ranges: &[Range], num_parts: usize) -> Vec<Vec<Range>> {
        let total: i64 = ranges.iter().map(Range::size).sum();
        let mut remaining = ranges.iter().copied().filter(|r| !r.is_empty());
        let mut current = remaining.next();

        let mut balanced = Vec::with_capacity(num_parts);
        for part in 0..num_parts {
            let mut quota = Self::divide_range(total, num_parts, part).size();
            let mut bucket = Vec::new();
            while quota > 0 {
                let Some(range) = current else {
                    break;
                };
                if range.size() <= quota {
                    quota -= range.size();
                    bucket.push(range);
                    current = remaining.next();
                } else {
                    let split = range.start + quota;
                    bucket.push(Range::new(range.start, split));
                    current = Some(Range::new(split, range.end));
                    quota = 0;
                }
            }
            balanced.push(bucket);
        }
        balanced
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}
