//! Pipeline profile registry
//!
//! Profiles are YAML files under `<config>/profiles/` with their prompt
//! bodies in a parallel tree under `<config>/prompts/`. A profile's id is
//! the stable filename stem of its definition, never its display name:
//! lookups by id must succeed immediately after `create_profile` and after
//! `reload`.

mod error;
mod registry;
mod types;

pub use error::ProfileError;
pub use registry::ProfileRegistry;
pub use types::{
    NotificationConfig, NotificationSpec, Profile, ProfileSpec, RoutingConfig, Stage, StageSpec,
};
