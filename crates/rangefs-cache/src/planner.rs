//! Turns an arbitrary read request into a minimal, ordered list of
//! block-aligned sub-ranges that must be fetched from the backend.

use rangefs_models::Range;

use crate::range_set::RangeSet;

/// Internal liveness guard: a well-formed query can never require more than
/// this many planning iterations. Exceeding it means `RangeSet` returned an
/// inconsistent `first_missing` result.
const MAX_PLAN_ITERATIONS: usize = 100;

/// Plan the fetches needed to satisfy `[offset, offset+length)` against
/// `file_size`, given what `cached` already has. Every emitted range is
/// aligned to `block_size` on its low end and has length `block_size`,
/// except the final range of the file which is clamped to `file_size`.
pub fn plan_fetch(
    cached: &RangeSet,
    mut offset: u64,
    length: u64,
    file_size: u64,
    block_size: u64,
) -> Vec<Range> {
    assert!(block_size > 0, "block_size must be nonzero");

    let mut plan = Vec::new();
    let query_end = offset.saturating_add(length).min(file_size);
    if offset >= query_end {
        return plan;
    }

    for _ in 0..MAX_PLAN_ITERATIONS {
        let query = match Range::new(offset, query_end - offset) {
            Some(q) => q,
            None => break,
        };

        let missing = match cached.first_missing(query) {
            Some(m) => m,
            None => break,
        };

        let mut start = (missing.offset / block_size) * block_size;
        while start < missing.end() {
            let block_end = (start + block_size).min(file_size);
            if let Some(block) = Range::new(start, block_end - start) {
                plan.push(block);
            }
            start += block_size;
        }

        let last_emitted_end = plan.last().map(|r| r.end()).unwrap_or(offset);
        if last_emitted_end <= offset {
            // No progress was made; avoid looping forever on a malformed
            // missing-range result.
            break;
        }
        offset = last_emitted_end;
        if offset >= query_end {
            break;
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn s3_block_aligned_plan_from_empty_cache() {
        let file_size = (2.5 * MIB as f64) as u64;
        let offset = 500 * 1024;
        let cached = RangeSet::new();
        // A read reaching to end-of-file from the middle of block 0 still
        // needs every block the file has, clamped to `file_size` on the
        // last one.
        let plan = plan_fetch(&cached, offset, file_size - offset, file_size, MIB);
        assert_eq!(
            plan,
            vec![
                Range::new(0, MIB).unwrap(),
                Range::new(MIB, MIB).unwrap(),
                Range::new(2 * MIB, MIB / 2).unwrap(),
            ]
        );
    }

    #[test]
    fn s4_partial_cache_plan_skips_cached_block() {
        let file_size = (2.5 * MIB as f64) as u64;
        let offset = 500 * 1024;
        let mut cached = RangeSet::new();
        cached.add(Range::new(MIB, MIB).unwrap());
        let plan = plan_fetch(&cached, offset, file_size - offset, file_size, MIB);
        assert_eq!(plan, vec![Range::new(0, MIB).unwrap(), Range::new(2 * MIB, MIB / 2).unwrap()]);
    }

    #[test]
    fn fully_cached_read_plans_nothing() {
        let mut cached = RangeSet::new();
        cached.add(Range::new(0, 100).unwrap());
        assert!(plan_fetch(&cached, 10, 50, 1000, MIB).is_empty());
    }

    #[test]
    fn plan_never_crosses_file_size() {
        let cached = RangeSet::new();
        let plan = plan_fetch(&cached, 0, 10 * MIB, MIB + 100, MIB);
        assert_eq!(plan.last().unwrap().end(), MIB + 100);
        for block in &plan {
            assert!(block.end() <= MIB + 100);
        }
    }

    #[test]
    fn read_past_eof_plans_nothing() {
        let cached = RangeSet::new();
        assert!(plan_fetch(&cached, 1000, 100, 1000, MIB).is_empty());
    }

    #[test]
    fn no_emitted_block_fully_contained_in_cached() {
        let mut cached = RangeSet::new();
        cached.add(Range::new(0, MIB).unwrap());
        let plan = plan_fetch(&cached, 0, 2 * MIB, 3 * MIB, MIB);
        for block in &plan {
            assert!(cached.first_missing(*block).is_some());
        }
    }
}
