//! Property-based tests for permission filtering of the location hierarchy.
//!
//! The filter is the privacy boundary: whatever it returns is all a contact
//! can ever learn. These tests pin down that it fails closed and that
//! granting a broader level never reveals more.

use proptest::prelude::*;
use whereish_core::location::{
    filter_by_level, filter_hierarchy, Hierarchy, HierarchyLevel, PLANET_EARTH,
};

/// Strategy for hierarchies with any subset of levels present.
fn hierarchy_strategy() -> impl Strategy<Value = Hierarchy> {
    prop::collection::vec(prop::option::of("[A-Za-z ]{1,20}"), 9).prop_map(|values| {
        HierarchyLevel::ALL
            .into_iter()
            .zip(values)
            .filter_map(|(level, value)| value.map(|v| (level, v)))
            .collect()
    })
}

fn level_strategy() -> impl Strategy<Value = HierarchyLevel> {
    prop::sample::select(HierarchyLevel::ALL.to_vec())
}

/// Strategy for strings that are not level keys.
fn unknown_permission_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z_ -]{0,16}".prop_filter("must not be a level key", |s| {
        HierarchyLevel::parse(s).is_none()
    })
}

#[test]
fn every_level_key_is_recognized() {
    let full: Hierarchy = HierarchyLevel::ALL
        .into_iter()
        .map(|level| (level, format!("{level} value")))
        .collect();

    for (index, level) in HierarchyLevel::ALL.into_iter().enumerate() {
        let visible = filter_hierarchy(&full, Some(level.as_str()));
        assert_eq!(visible.len(), HierarchyLevel::ALL.len() - index, "{level}");
    }
}

#[test]
fn planet_permission_on_full_hierarchy_shows_only_planet() {
    let full: Hierarchy = HierarchyLevel::ALL
        .into_iter()
        .map(|level| (level, level.as_str().to_uppercase()))
        .collect();
    let visible = filter_hierarchy(&full, Some("planet"));
    assert_eq!(visible.len(), 1);
    assert_eq!(visible.get(HierarchyLevel::Planet), Some("PLANET"));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Property: an unrecognized or missing grant reveals exactly the planet.
    #[test]
    fn unknown_permission_fails_closed(
        hierarchy in hierarchy_strategy(),
        permission in prop::option::of(unknown_permission_strategy()),
    ) {
        let visible = filter_hierarchy(&hierarchy, permission.as_deref());
        prop_assert_eq!(visible, Hierarchy::planet_only());
    }

    /// Property: the planet level is present in every filtered result.
    #[test]
    fn planet_always_present(
        hierarchy in hierarchy_strategy(),
        level in prop::option::of(level_strategy()),
    ) {
        let visible = filter_by_level(&hierarchy, level);
        prop_assert!(visible.contains(HierarchyLevel::Planet));
        if !hierarchy.contains(HierarchyLevel::Planet) {
            prop_assert_eq!(visible.get(HierarchyLevel::Planet), Some(PLANET_EARTH));
        }
    }

    /// Property: nothing more specific than the grant is ever revealed.
    #[test]
    fn never_reveals_more_specific_levels(
        hierarchy in hierarchy_strategy(),
        level in level_strategy(),
    ) {
        let visible = filter_by_level(&hierarchy, Some(level));
        for (shown, _) in visible.iter() {
            prop_assert!(shown >= level, "{} revealed under {}", shown, level);
        }
    }

    /// Property: every present level at or above the grant is revealed with
    /// its original value.
    #[test]
    fn reveals_every_permitted_level(
        hierarchy in hierarchy_strategy(),
        level in level_strategy(),
    ) {
        let visible = filter_by_level(&hierarchy, Some(level));
        for (present, value) in hierarchy.iter().filter(|(l, _)| *l >= level) {
            prop_assert_eq!(visible.get(present), Some(value));
        }
    }

    /// Property: a broader grant reveals a subset of what a narrower one does.
    #[test]
    fn broader_grant_reveals_subset(
        hierarchy in hierarchy_strategy(),
        a in level_strategy(),
        b in level_strategy(),
    ) {
        let (narrow, broad) = if a <= b { (a, b) } else { (b, a) };
        let narrow_view = filter_by_level(&hierarchy, Some(narrow));
        let broad_view = filter_by_level(&hierarchy, Some(broad));
        prop_assert!(broad_view.is_subset_of(&narrow_view));
    }

    /// Property: filtering is idempotent.
    #[test]
    fn filtering_twice_changes_nothing(
        hierarchy in hierarchy_strategy(),
        level in level_strategy(),
    ) {
        let once = filter_by_level(&hierarchy, Some(level));
        let twice = filter_by_level(&once, Some(level));
        prop_assert_eq!(once, twice);
    }
}
