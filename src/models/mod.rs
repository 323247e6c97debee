//! Data models for the portalizer launcher.
//!
//! This module contains the core value types shared by every component:
//! - [`Mapping`]: one source↔destination redirection pair plus its kind
//! - [`SessionSettings`]: typed view of the launcher's INI `Settings` section
//! - [`WatchGranularity`] / [`WildcardRetention`]: behavior policies parsed
//!   from the launcher profile
//!
//! # Architecture Note
//!
//! The models are designed to be:
//! - **Immutable for the session**: mapping tables are built once from the
//!   profile and never mutated afterwards
//! - **Cheap to share**: everything is `Clone` and passed by reference from
//!   the [`SessionContext`](crate::session::SessionContext)

pub mod mapping;
pub mod settings;

pub use mapping::{Mapping, MappingKind, RedirectMode};
pub use settings::{SessionSettings, WatchGranularity, WildcardRetention, WindowState};
