//! Bridging caller predicates into the engine filter
//!
//! Caller predicates follow the exclusion-bitmap convention: `test` returns true
//! for items that were filtered out upstream. The engine's filter reports items
//! that remain valid, so [`FilterBridge`] negates the predicate unless the
//! request sets `reverse_filter`.

use vecbridge_engine::{Filter, FilterTarget};

/// Caller-side predicate, asked either about an id or an extra-info record
pub trait FilterPredicate: Send + Sync {
    fn test(&self, target: FilterTarget<'_>) -> bool;
}

/// Id predicates never match extra-info records
impl<F> FilterPredicate for F
where
    F: Fn(i64) -> bool + Send + Sync,
{
    fn test(&self, target: FilterTarget<'_>) -> bool {
        match target {
            FilterTarget::Id(id) => self(id),
            FilterTarget::ExtraInfo(_) => false,
        }
    }
}

/// Sorted set of excluded ids
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionSet {
    ids: Vec<i64>,
}

impl ExclusionSet {
    pub fn new(ids: impl IntoIterator<Item = i64>) -> Self {
        let mut ids: Vec<i64> = ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        Self { ids }
    }

    pub fn contains(&self, id: i64) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.ids.iter().copied()
    }
}

impl FromIterator<i64> for ExclusionSet {
    fn from_iter<I: IntoIterator<Item = i64>>(iter: I) -> Self {
        ExclusionSet::new(iter)
    }
}

impl FilterPredicate for ExclusionSet {
    fn test(&self, target: FilterTarget<'_>) -> bool {
        match target {
            FilterTarget::Id(id) => self.contains(id),
            FilterTarget::ExtraInfo(_) => false,
        }
    }
}

/// Engine filter wrapping a caller predicate
pub struct FilterBridge<'a> {
    predicate: &'a dyn FilterPredicate,
    reverse: bool,
    valid_ratio: f32,
}

impl<'a> FilterBridge<'a> {
    pub fn new(predicate: &'a dyn FilterPredicate, reverse: bool, valid_ratio: f32) -> Self {
        Self {
            predicate,
            reverse,
            valid_ratio,
        }
    }
}

impl Filter for FilterBridge<'_> {
    fn check_valid(&self, target: FilterTarget<'_>) -> bool {
        self.predicate.test(target) == self.reverse
    }

    /// Advisory only; out-of-range hints are clamped
    fn valid_ratio(&self) -> f32 {
        if self.valid_ratio.is_nan() {
            return 1.0;
        }
        self.valid_ratio.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_negates_predicate() {
        let excluded = ExclusionSet::new([3, 1, 3]);
        assert_eq!(excluded.len(), 2);

        let bridge = FilterBridge::new(&excluded, false, 1.0);
        assert!(!bridge.check_valid(FilterTarget::Id(3)));
        assert!(bridge.check_valid(FilterTarget::Id(2)));

        let reversed = FilterBridge::new(&excluded, true, 1.0);
        assert!(reversed.check_valid(FilterTarget::Id(3)));
        assert!(!reversed.check_valid(FilterTarget::Id(2)));
    }

    #[test]
    fn test_closure_predicate_and_extra_info() {
        let even = |id: i64| id % 2 == 0;
        let bridge = FilterBridge::new(&even, false, 0.5);
        assert!(bridge.check_valid(FilterTarget::Id(1)));
        assert!(!bridge.check_valid(FilterTarget::Id(4)));
        // closures never exclude by extra info
        assert!(bridge.check_valid(FilterTarget::ExtraInfo(&[1, 2])));
        assert_eq!(bridge.valid_ratio(), 0.5);
    }

    struct ByFirstByte(u8);

    impl FilterPredicate for ByFirstByte {
        fn test(&self, target: FilterTarget<'_>) -> bool {
            match target {
                FilterTarget::ExtraInfo(key) => key.first() == Some(&self.0),
                FilterTarget::Id(_) => false,
            }
        }
    }

    #[test]
    fn test_extra_info_predicate() {
        let predicate = ByFirstByte(9);
        let bridge = FilterBridge::new(&predicate, false, 1.0);
        assert!(!bridge.check_valid(FilterTarget::ExtraInfo(&[9, 0])));
        assert!(bridge.check_valid(FilterTarget::ExtraInfo(&[8, 0])));
    }

    #[test]
    fn test_valid_ratio_clamped() {
        let none = ExclusionSet::default();
        assert_eq!(FilterBridge::new(&none, false, 3.0).valid_ratio(), 1.0);
        assert_eq!(FilterBridge::new(&none, false, -1.0).valid_ratio(), 0.0);
        assert_eq!(FilterBridge::new(&none, false, f32::NAN).valid_ratio(), 1.0);
    }
}
