// Portalizer - reversible file and registry redirection for one app run
//
// This is the library crate containing the redirection engines, the
// instance coordinator and the lifecycle orchestrator. The binary crate
// (main.rs) wires them to the OS-backed capability implementations.

pub mod config;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod platform;
pub mod services;
pub mod session;

// Re-export commonly used types for convenience
pub use config::LauncherConfig;
pub use models::{Mapping, MappingKind, SessionSettings};
pub use orchestrator::{Orchestrator, RunOutcome};
pub use session::SessionContext;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
