use crate::error::{Error, Result};

/// Page cap of the block API's bulk header lookup.
pub const DEFAULT_BATCH_SIZE: u64 = 1000;

/// Splits `(start, end]` into ascending batch upper bounds, `batch_size` apart,
/// ending at `end`.
///
/// Each bound is walked backward from `end` and collected while it is still
/// above `start`, so `start == end` yields no batches. The remote lookup for a
/// bound returns everything at or below it, so the first batch may reach below
/// `start`; the merger filters those records out.
pub fn plan(start: u64, end: u64, batch_size: u64) -> Result<Vec<u64>> {
    if batch_size == 0 {
        return Err(Error::msg("batch size must be greater than zero"));
    }
    if end < start {
        return Err(Error::msg(format!(
            "invalid checkpoint range: end height {end} is below start height {start}"
        )));
    }

    let mut bounds = Vec::with_capacity(((end - start) / batch_size + 1) as usize);
    let mut cur = end;
    while cur > start {
        bounds.push(cur);
        match cur.checked_sub(batch_size) {
            Some(next) => cur = next,
            None => break,
        }
    }
    bounds.reverse();
    Ok(bounds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_bounds_are_empty() {
        assert!(plan(0, 0, 1000).expect("plan").is_empty());
        assert!(plan(4500, 4500, 1000).expect("plan").is_empty());
    }

    #[test]
    fn walks_back_from_end() {
        assert_eq!(plan(0, 2120, 1000).expect("plan"), vec![120, 1120, 2120]);
        assert_eq!(plan(100, 1100, 1000).expect("plan"), vec![1100]);
        assert_eq!(plan(99, 1100, 1000).expect("plan"), vec![100, 1100]);
        assert_eq!(plan(0, 3, 1).expect("plan"), vec![1, 2, 3]);
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(plan(0, 10, 0).is_err());
        assert!(plan(10, 9, 1000).is_err());
    }

    #[test]
    fn small_ranges_hold_batch_properties() {
        for batch in 1..=7u64 {
            for start in 0..=20u64 {
                for end in start..=40u64 {
                    let bounds = plan(start, end, batch).expect("plan");
                    if start == end {
                        assert!(bounds.is_empty());
                        continue;
                    }
                    assert_eq!(*bounds.last().unwrap(), end);
                    assert!(bounds.windows(2).all(|w| w[1] - w[0] == batch));

                    // First bound is the lowest point above start reachable from end.
                    let first = bounds[0];
                    assert!(first > start);
                    assert!(first.checked_sub(batch).is_none_or(|below| below <= start));
                    assert_eq!((end - first) % batch, 0);
                }
            }
        }
    }

    #[test]
    fn does_not_underflow_near_zero() {
        assert_eq!(plan(0, 5, 1000).expect("plan"), vec![5]);
        assert_eq!(plan(0, 1000, 1000).expect("plan"), vec![1000]);
    }
}
