use std::ops::Range;

/// Rows to read in the next batch: the base size, or whatever is left.
pub fn batch_size(base: usize, total_rows: usize, loaded: usize) -> usize {
    base.max(1).min(total_rows.saturating_sub(loaded))
}

/// Batches covering `0..total_rows`, as row offsets.
pub fn plan_batches(base: usize, total_rows: usize) -> impl Iterator<Item = Range<usize>> {
    let mut loaded = 0usize;
    std::iter::from_fn(move || {
        let size = batch_size(base, total_rows, loaded);
        if size == 0 {
            return None;
        }
        let range = loaded..loaded + size;
        loaded += size;
        Some(range)
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn last_batch_is_the_remainder() {
        assert_eq!(batch_size(10_000, 25_000, 20_000), 5_000);
        assert_eq!(batch_size(10_000, 25_000, 25_000), 0);
        assert_eq!(batch_size(0, 3, 0), 1);
    }

    #[test]
    fn plan_covers_every_row_once() {
        let plan: Vec<_> = plan_batches(4, 10).collect();
        assert_eq!(plan, vec![0..4, 4..8, 8..10]);
        assert_eq!(plan_batches(4, 0).count(), 0);
    }
}
