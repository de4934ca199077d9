//! Workspace umbrella crate.
//!
//! Host applications can depend on `audioshelf-workspace` and enable the
//! `desktop-shims` feature to get the core service wired to the desktop
//! bridge implementations, without naming each workspace crate.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
