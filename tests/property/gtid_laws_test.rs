// tests/property/gtid_laws_test.rs

//! Property-based tests for GTID set algebra

use groupwarden::core::gtid::GtidSet;
use proptest::prelude::*;
use uuid::Uuid;

/// Sets over a small pool of sources so that generated sets overlap.
pub fn gtid_set() -> impl Strategy<Value = GtidSet> {
    prop::collection::vec((0u128..3, 1u64..200, 0u64..20), 0..8).prop_map(|intervals| {
        let mut set = GtidSet::new();
        for (source, start, len) in intervals {
            set.add_interval(Uuid::from_u128(0xa0 + source), start, start + len);
        }
        set
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_display_parse_is_identity(set in gtid_set()) {
        let parsed: GtidSet = set.to_string().parse().unwrap();
        prop_assert_eq!(parsed, set);
    }

    #[test]
    fn test_union_is_commutative_and_covers_both(a in gtid_set(), b in gtid_set()) {
        let union = a.union(&b);
        prop_assert_eq!(&union, &b.union(&a));
        prop_assert!(a.is_subset(&union));
        prop_assert!(b.is_subset(&union));
        prop_assert!(union.count() <= a.count() + b.count());
    }

    #[test]
    fn test_difference_laws(a in gtid_set(), b in gtid_set()) {
        let diff = a.difference(&b);
        prop_assert!(diff.is_subset(&a));
        prop_assert!(diff.difference(&a).is_empty());
        prop_assert_eq!(diff.union(&b), a.union(&b));
        prop_assert!(a.difference(&a).is_empty());
        // Nothing in the difference is in `b`.
        for source in diff.sources() {
            for interval in diff.intervals(source) {
                prop_assert!(!b.contains(source, interval.start));
                prop_assert!(!b.contains(source, interval.end));
            }
        }
    }

    #[test]
    fn test_subset_matches_difference(a in gtid_set(), b in gtid_set()) {
        prop_assert_eq!(a.is_subset(&b), a.difference(&b).is_empty());
        prop_assert_eq!(a.is_superset(&b), b.is_subset(&a));
    }

    #[test]
    fn test_intervals_stay_normalised(set in gtid_set()) {
        for source in set.sources() {
            let intervals = set.intervals(source);
            prop_assert!(!intervals.is_empty());
            for pair in intervals.windows(2) {
                // Sorted, disjoint and not adjacent.
                prop_assert!(pair[0].end + 1 < pair[1].start);
            }
        }
    }
}
