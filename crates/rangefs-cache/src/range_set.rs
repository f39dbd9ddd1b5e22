//! An ordered, disjoint set of byte ranges for a single object: the record
//! of which bytes are locally valid.

use serde::{Deserialize, Serialize};

use rangefs_models::Range;

use crate::range_algebra::first_non_overlap;

/// Ranges sorted by offset, each separated from its neighbors by at least
/// one byte of gap (I1 in the design doc). `add` coalesces touching or
/// overlapping ranges into a single run so the cost of `first_missing`
/// scales with unique extents, not with the number of fetches that built
/// them up.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RangeSet {
    ranges: Vec<Range>,
}

impl RangeSet {
    pub fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    /// Insert `new`, merging it with every existing range whose closed
    /// neighborhood touches or overlaps it.
    ///
    /// Merges on touching (zero-gap) neighbors only, not on a one-byte
    /// gap: a real gap of even one unfetched byte must stay missing (I2),
    /// so it is never folded into the union. A linear scan over the
    /// (typically few) stored extents keeps that merge logic obviously
    /// correct.
    pub fn add(&mut self, new: Range) {
        let touches = |a: Range, b: Range| -> bool { a.offset <= b.end() && b.offset <= a.end() };

        let mut merge_start = self.ranges.len();
        let mut merge_end = self.ranges.len();
        let mut merged = new;
        for (i, existing) in self.ranges.iter().enumerate() {
            if touches(*existing, new) {
                if merge_start == self.ranges.len() {
                    merge_start = i;
                }
                merge_end = i + 1;
                merged = crate::range_algebra::union(merged, *existing);
            } else if existing.offset > new.end() {
                break;
            }
        }

        if merge_start == self.ranges.len() {
            // No overlap/touch; insert in sorted position.
            let pos = self.ranges.partition_point(|r| r.offset < new.offset);
            self.ranges.insert(pos, new);
        } else {
            self.ranges.splice(merge_start..merge_end, std::iter::once(merged));
        }
    }

    /// The leftmost sub-range of `query` not yet covered, or `None` if
    /// `query` is fully contained in the union of stored ranges.
    pub fn first_missing(&self, query: Range) -> Option<Range> {
        let mut remainder = query;
        for stored in &self.ranges {
            if stored.offset > remainder.end() {
                break;
            }
            match first_non_overlap(remainder, *stored) {
                Some(r) => remainder = r,
                None => return None,
            }
        }
        Some(remainder)
    }
}
