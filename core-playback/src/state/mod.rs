//! # Playback State
//!
//! - [`PlaybackStateStore`]: one durable position record per book
//! - [`AutoSaveTimer`]: periodic broadcast telling listeners to persist
//! - [`PlaybackSession`]: reads the player position and saves it, on demand
//!   and on every auto-save signal

pub mod autosave;
pub mod session;
pub mod store;

pub use autosave::{AutoSaveSignal, AutoSaveSubscription, AutoSaveTimer, DEFAULT_AUTOSAVE_INTERVAL};
pub use session::PlaybackSession;
pub use store::PlaybackStateStore;
