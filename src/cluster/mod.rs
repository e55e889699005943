pub mod coordinator;

pub use coordinator::{fingerprint, CoordinatorError, RunCoordinator, RunLease};
