//! Location sharing for Whereish.
//!
//! Each accepted contact receives the user's location filtered to the level
//! the user granted them, encrypted so that only that contact can read it.
//!
//! # Privacy Guarantees
//!
//! - Filtering fails closed: unknown or missing grants reveal only the planet
//! - Named-location labels are disclosed only where the visibility rule allows
//! - The directory only ever sees [`EncryptedBlob`](crate::crypto::EncryptedBlob)s
//! - One contact's bad key or blob never affects another contact
//!
//! # Example Usage
//!
//! ```
//! use whereish_core::location::{filter_hierarchy, Hierarchy, HierarchyLevel};
//!
//! let here = Hierarchy::new()
//!     .with(HierarchyLevel::Street, "Main St")
//!     .with(HierarchyLevel::City, "Springfield")
//!     .with(HierarchyLevel::Country, "USA")
//!     .with(HierarchyLevel::Planet, "Planet Earth");
//!
//! // A contact granted "country" sees only the country and the planet.
//! let visible = filter_hierarchy(&here, Some("country"));
//! assert_eq!(visible.len(), 2);
//! ```

pub mod distributor;
mod error;
pub mod hierarchy;
pub mod types;

pub use distributor::{
    build_batch, decrypt_contact_locations, payload_for, DirectoryClient, LocationDistributor,
};
pub use error::{LocationError, Result};
pub use hierarchy::{filter_by_level, filter_hierarchy, Hierarchy, HierarchyLevel, PLANET_EARTH};
pub use types::{
    Contact, ContactBlob, ContactEnvelope, ContactLocation, LocationPayload, LocationStatus,
    NamedLocation, PublishOutcome, PublishReport, SkipReason, VisibilityMode, VisibilityRule,
};
