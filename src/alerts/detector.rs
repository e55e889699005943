//! Alert-change detection
//!
//! Compares the current snapshot against the prior one and returns the checks
//! whose status moved to a different category since the previous run.

use fxhash::FxHashSet;

use crate::health::{HealthRecord, HealthStatus, Snapshot};

/// Identity set of the records in a given status
fn status_set(records: &[HealthRecord], status: HealthStatus) -> FxHashSet<&HealthRecord> {
    records.iter().filter(|r| r.status() == status).collect()
}

/// Detect the records that should be notified on.
///
/// With no prior snapshot (first run) only warning and critical checks are
/// reported. Otherwise a check is reported when:
/// - it is unknown (always, regardless of history)
/// - it is passing and was critical or warning
/// - it is warning and was not warning
/// - it is critical and was not critical
///
/// Results are the current records, in current snapshot order.
pub fn detect(current: &Snapshot, prior: &Snapshot) -> Vec<HealthRecord> {
    if prior.is_empty() {
        return current
            .iter()
            .filter(|r| matches!(r.status(), HealthStatus::Warning | HealthStatus::Critical))
            .cloned()
            .collect();
    }

    let records = current.records();
    let current_passing = status_set(records, HealthStatus::Passing);
    let current_warning = status_set(records, HealthStatus::Warning);
    let current_critical = status_set(records, HealthStatus::Critical);
    let current_unknown = status_set(records, HealthStatus::Unknown);

    let prior_warning = status_set(prior.records(), HealthStatus::Warning);
    let prior_critical = status_set(prior.records(), HealthStatus::Critical);

    let mut alerting: FxHashSet<&HealthRecord> = FxHashSet::default();
    alerting.extend(current_unknown.iter().copied());
    // Recovered
    alerting.extend(current_passing.intersection(&prior_critical).copied());
    alerting.extend(current_passing.intersection(&prior_warning).copied());
    // Newly degraded, or down from critical
    alerting.extend(current_warning.difference(&prior_warning).copied());
    alerting.extend(current_warning.intersection(&prior_critical).copied());
    // Newly critical
    alerting.extend(current_critical.difference(&prior_critical).copied());

    records
        .iter()
        .filter(|r| alerting.contains(r))
        .cloned()
        .collect()
}
