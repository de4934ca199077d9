//! # Core Runtime
//!
//! Shared infrastructure for the audioshelf crates:
//! - Logging and tracing setup ([`logging`])
//! - Bridge wiring and tuning values ([`config`])
//! - The broadcast event bus ([`events`])
//!
//! Every other core crate depends on this one for its event types and
//! configuration, so it stays free of domain logic.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{CoreConfig, CoreConfigBuilder};
pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus, EventStream};
