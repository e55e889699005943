//! Alert detection
//!
//! Compares the current health snapshot with the one persisted by the
//! previous run and turns reportable status transitions into tagged
//! [`AlertEvent`]s.

pub mod detector;
pub mod event;
pub mod watcher;

pub use detector::detect;
pub use event::{render_message, AlertEvent};
pub use watcher::{HealthWatcher, WatchError};
