//! Health record model
//!
//! Normalizes raw backend health entries into typed records, derives their
//! notification tags and applies the configured blacklists.

pub mod blacklist;
pub mod record;
pub mod tags;

pub use blacklist::{Blacklist, BlacklistError, WILDCARD};
pub use record::{HealthRecord, HealthStatus, RecordError, Snapshot};
pub use tags::{derive_tags, load_system_tags, parse_tag_list, TagError, TagResolver};
