//! Implementation registry, audience policy and catalog manifests
//!
//! Maps implementation keys to descriptors, chooses the default variant for a
//! tenant's audience, and parses catalog manifests for bulk import.

pub mod audience;
pub mod implementations;
pub mod manifest;

pub use audience::{AudiencePolicy, ConfiguredAudiencePolicy};
pub use implementations::{ImplementationDescriptor, ImplementationRegistry};
pub use manifest::{CatalogManifest, ManifestModule};
