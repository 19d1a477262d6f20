//! Geographic hierarchy and permission filtering.
//!
//! Levels form a total order from most to least specific. Granting a level
//! reveals that level and every less specific one, never a subset chosen
//! level by level.
//!
//! | Index | Level          |
//! |-------|----------------|
//! | 0     | `address`      |
//! | 1     | `street`       |
//! | 2     | `neighborhood` |
//! | 3     | `city`         |
//! | 4     | `county`       |
//! | 5     | `state`        |
//! | 6     | `country`      |
//! | 7     | `continent`    |
//! | 8     | `planet`       |

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Label shown at the universal floor level.
pub const PLANET_EARTH: &str = "Planet Earth";

/// A geographic specificity tier.
///
/// Ordering follows specificity: `Address < Street < ... < Planet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HierarchyLevel {
    /// Street address.
    Address,
    /// Street name.
    Street,
    /// Neighborhood.
    Neighborhood,
    /// City.
    City,
    /// County.
    County,
    /// State or province.
    State,
    /// Country.
    Country,
    /// Continent.
    Continent,
    /// Always visible to every accepted contact.
    Planet,
}

impl HierarchyLevel {
    /// All levels, most specific first.
    pub const ALL: [Self; 9] = [
        Self::Address,
        Self::Street,
        Self::Neighborhood,
        Self::City,
        Self::County,
        Self::State,
        Self::Country,
        Self::Continent,
        Self::Planet,
    ];

    /// Converts to the wire key.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Address => "address",
            Self::Street => "street",
            Self::Neighborhood => "neighborhood",
            Self::City => "city",
            Self::County => "county",
            Self::State => "state",
            Self::Country => "country",
            Self::Continent => "continent",
            Self::Planet => "planet",
        }
    }

    /// Parses a wire key. Unknown keys are `None`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|level| level.as_str() == s)
    }
}

impl std::fmt::Display for HierarchyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A location described at several levels of specificity.
///
/// Serialized as a JSON object keyed by level, e.g.
/// `{"city":"Springfield","planet":"Planet Earth"}`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hierarchy(BTreeMap<HierarchyLevel, String>);

impl Hierarchy {
    /// Creates an empty hierarchy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The minimal view every accepted contact may see.
    #[must_use]
    pub fn planet_only() -> Self {
        Self::new().with(HierarchyLevel::Planet, PLANET_EARTH)
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, level: HierarchyLevel, value: impl Into<String>) -> Self {
        self.insert(level, value);
        self
    }

    /// Sets the value at `level`.
    pub fn insert(&mut self, level: HierarchyLevel, value: impl Into<String>) {
        self.0.insert(level, value.into());
    }

    /// Returns the value at `level`.
    #[must_use]
    pub fn get(&self, level: HierarchyLevel) -> Option<&str> {
        self.0.get(&level).map(String::as_str)
    }

    /// Returns whether `level` is present.
    #[must_use]
    pub fn contains(&self, level: HierarchyLevel) -> bool {
        self.0.contains_key(&level)
    }

    /// Number of levels present.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether no level is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over present levels, most specific first.
    pub fn iter(&self) -> impl Iterator<Item = (HierarchyLevel, &str)> {
        self.0.iter().map(|(level, value)| (*level, value.as_str()))
    }

    /// Returns whether every level of `self` is present in `other` with the
    /// same value.
    #[must_use]
    pub fn is_subset_of(&self, other: &Self) -> bool {
        self.iter().all(|(level, value)| other.get(level) == Some(value))
    }
}

impl FromIterator<(HierarchyLevel, String)> for Hierarchy {
    fn from_iter<I: IntoIterator<Item = (HierarchyLevel, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Computes the part of `hierarchy` a contact with `permission` may see.
///
/// Fails closed: a missing or unrecognized permission yields only
/// `{planet: "Planet Earth"}`. The planet level is always present.
///
/// # Example
///
/// ```
/// use whereish_core::location::{filter_hierarchy, Hierarchy, HierarchyLevel};
///
/// let full = Hierarchy::new()
///     .with(HierarchyLevel::Address, "1 Main St")
///     .with(HierarchyLevel::City, "Springfield")
///     .with(HierarchyLevel::Planet, "Planet Earth");
///
/// let visible = filter_hierarchy(&full, Some("city"));
/// assert!(visible.contains(HierarchyLevel::City));
/// assert!(!visible.contains(HierarchyLevel::Address));
///
/// assert_eq!(filter_hierarchy(&full, Some("bogus")), Hierarchy::planet_only());
/// ```
#[must_use]
pub fn filter_hierarchy(hierarchy: &Hierarchy, permission: Option<&str>) -> Hierarchy {
    filter_by_level(hierarchy, permission.and_then(HierarchyLevel::parse))
}

/// Typed form of [`filter_hierarchy`].
#[must_use]
pub fn filter_by_level(hierarchy: &Hierarchy, permission: Option<HierarchyLevel>) -> Hierarchy {
    let Some(permission) = permission else {
        return Hierarchy::planet_only();
    };

    let mut visible: Hierarchy = hierarchy
        .iter()
        .filter(|(level, _)| *level >= permission)
        .map(|(level, value)| (level, value.to_string()))
        .collect();

    if !visible.contains(HierarchyLevel::Planet) {
        visible.insert(HierarchyLevel::Planet, PLANET_EARTH);
    }
    visible
}
