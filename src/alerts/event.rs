use std::collections::BTreeSet;

use crate::health::{HealthRecord, HealthStatus};

/// A health record judged reportable, with its rendered message
#[derive(Debug, Clone)]
pub struct AlertEvent {
    record: HealthRecord,
    message: String,
}

impl AlertEvent {
    pub fn new(record: HealthRecord) -> Self {
        let message = render_message(&record);
        Self { record, message }
    }

    pub fn record(&self) -> &HealthRecord {
        &self.record
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> HealthStatus {
        self.record.status()
    }

    /// Tags used for channel and destination matching
    pub fn tags(&self) -> &BTreeSet<String> {
        self.record.tags()
    }
}

/// Render the human-readable notification text for a record
pub fn render_message(record: &HealthRecord) -> String {
    if record.is_service_check() {
        let name = if record.service_name().is_empty() {
            record.service_id()
        } else {
            record.service_name()
        };
        format!(
            "Service {}: is in a {} state on {}. Output from check: {}",
            name,
            record.status(),
            record.node(),
            record.output()
        )
    } else {
        format!(
            "System Check {}: is in a {} state on {}. Output from check: {}",
            record.check_id(),
            record.status(),
            record.node(),
            record.output()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::redis_check;

    #[test]
    fn test_service_message() {
        let record = redis_check(HealthStatus::Critical).with_output("Connection refused");
        assert_eq!(
            render_message(&record),
            "Service redis: is in a critical state on foobar. Output from check: Connection refused"
        );

        let by_id = HealthRecord::new("foobar", "service:web", "web", HealthStatus::Warning)
            .with_service("web-1", "");
        assert!(render_message(&by_id).starts_with("Service web-1: is in a warning state"));
    }

    #[test]
    fn test_system_check_message() {
        let record = HealthRecord::new("foobar", "serfHealth", "Serf Health Status", HealthStatus::Passing);
        let event = AlertEvent::new(record);
        assert_eq!(
            event.message(),
            "System Check serfHealth: is in a passing state on foobar. Output from check: "
        );
        assert_eq!(event.status(), HealthStatus::Passing);
    }
}
