//! Pure arithmetic on half-open byte intervals. No I/O, no locking; every
//! function here is a total function over `Range` (or `Option<Range>` where
//! the result may be empty).

use rangefs_models::Range;

/// The overlap of `a` and `b`, or `None` if they don't overlap.
pub fn intersect(a: Range, b: Range) -> Option<Range> {
    let start = a.offset.max(b.offset);
    let end = a.end().min(b.end());
    if end <= start {
        None
    } else {
        Range::new(start, end - start)
    }
}

/// The smallest range enclosing both `a` and `b`. Only meaningful when the
/// caller already knows the two touch or overlap; callers that don't hold
/// that invariant should not call this directly.
pub fn union(a: Range, b: Range) -> Range {
    let start = a.offset.min(b.offset);
    let end = a.end().max(b.end());
    Range::new(start, end - start).expect("union of two non-empty ranges is non-empty")
}

/// The leftmost sub-range of `a` not covered by `b`, or `None` if `b` fully
/// covers `a`.
pub fn first_non_overlap(a: Range, b: Range) -> Option<Range> {
    let overlap = match intersect(a, b) {
        Some(o) => o,
        None => return Some(a),
    };

    if overlap.offset == a.offset {
        let start = overlap.end();
        if start >= a.end() {
            None
        } else {
            Range::new(start, a.end() - start)
        }
    } else {
        Range::new(a.offset, overlap.offset - a.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(offset: u64, length: u64) -> Range {
        Range::new(offset, length).unwrap()
    }

    #[test]
    fn intersect_disjoint() {
        assert_eq!(intersect(r(0, 10), r(20, 10)), None);
    }

    #[test]
    fn intersect_overlapping() {
        assert_eq!(intersect(r(0, 10), r(5, 10)), Some(r(5, 5)));
    }

    #[test]
    fn intersect_touching_is_empty() {
        // [0,10) and [10,20) share no bytes.
        assert_eq!(intersect(r(0, 10), r(10, 10)), None);
    }

    #[test]
    fn union_basic() {
        assert_eq!(union(r(0, 10), r(5, 10)), r(0, 15));
    }

    #[test]
    fn first_non_overlap_no_intersection() {
        assert_eq!(first_non_overlap(r(0, 10), r(20, 10)), Some(r(0, 10)));
    }

    #[test]
    fn first_non_overlap_covers_start() {
        // stored [10,30), querying [10,31) -> missing [30,31)
        assert_eq!(first_non_overlap(r(10, 21), r(10, 20)), Some(r(30, 1)));
    }

    #[test]
    fn first_non_overlap_covers_end() {
        assert_eq!(first_non_overlap(r(9, 21), r(10, 20)), Some(r(9, 1)));
    }

    #[test]
    fn first_non_overlap_fully_covered() {
        assert_eq!(first_non_overlap(r(11, 8), r(10, 20)), None);
    }
}
