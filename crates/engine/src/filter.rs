//! Search-time result filtering

/// What a filter is asked about: a caller id, or the extra-info record stored
/// with a vector (used when searching with `use_extra_info_filter`).
#[derive(Debug, Clone, Copy)]
pub enum FilterTarget<'a> {
    Id(i64),
    ExtraInfo(&'a [u8]),
}

/// Decides which stored vectors may appear in search results.
///
/// Invalid vectors are still traversed during graph search; they are only kept
/// out of the result set.
pub trait Filter: Send + Sync {
    fn check_valid(&self, target: FilterTarget<'_>) -> bool;

    /// Estimated fraction of valid vectors, in [0, 1].
    ///
    /// Low ratios make the engine fall back to exhaustive scanning.
    fn valid_ratio(&self) -> f32 {
        1.0
    }
}

impl<F> Filter for F
where
    F: Fn(i64) -> bool + Send + Sync,
{
    fn check_valid(&self, target: FilterTarget<'_>) -> bool {
        match target {
            FilterTarget::Id(id) => self(id),
            FilterTarget::ExtraInfo(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_filter() {
        let even = |id: i64| id % 2 == 0;
        assert!(even.check_valid(FilterTarget::Id(4)));
        assert!(!even.check_valid(FilterTarget::Id(5)));
        assert!(even.check_valid(FilterTarget::ExtraInfo(&[1, 2])));
        assert_eq!(even.valid_ratio(), 1.0);
    }
}
