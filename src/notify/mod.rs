//! Notification routing and channel dispatch
//!
//! Alerts are routed to channels by tag: a channel is used for an alert when
//! the alert carries the channel name as a tag, and each destination (room,
//! team, database, ...) whose key is also one of the alert's tags receives one
//! delivery. Deliveries run as independent tasks; a failing channel is logged
//! and never affects the others.

pub mod chat;
pub mod config;
pub mod email;
pub mod influxdb;
pub mod jsonlog;
pub mod mailgun;
pub mod pagerduty;
pub mod router;
pub mod statuspage;

pub use router::{dispatch, DeliveryOutcome, Dispatched, NotificationRouter, RouteError};

use std::fmt;

use async_trait::async_trait;

use crate::alerts::AlertEvent;

/// Supported notification channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    Hipchat,
    Slack,
    Mailgun,
    Email,
    PagerDuty,
    InfluxDb,
    StatusPage,
    JsonLog,
}

impl Channel {
    pub const ALL: [Channel; 8] = [
        Channel::Hipchat,
        Channel::Slack,
        Channel::Mailgun,
        Channel::Email,
        Channel::PagerDuty,
        Channel::InfluxDb,
        Channel::StatusPage,
        Channel::JsonLog,
    ];

    /// Name used as enabling tag and configuration key suffix
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Hipchat => "hipchat",
            Channel::Slack => "slack",
            Channel::Mailgun => "mailgun",
            Channel::Email => "email",
            Channel::PagerDuty => "pagerduty",
            Channel::InfluxDb => "influxdb",
            Channel::StatusPage => "statuspage",
            Channel::JsonLog => "jsonlog",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_lowercase();
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }

    /// Configuration field holding the tag -> destination map
    pub fn destination_field(&self) -> &'static str {
        match self {
            Channel::Hipchat | Channel::Slack => "rooms",
            Channel::Mailgun | Channel::Email | Channel::PagerDuty => "teams",
            Channel::InfluxDb => "databases",
            Channel::StatusPage => "pages",
            Channel::JsonLog => "files",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a successful delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// HTTP status code returned by the channel endpoint
    Http(u16),
    /// SMTP reply code
    Smtp(String),
    /// Line appended to a local file
    Appended,
}

/// A notification channel with its loaded configuration
#[async_trait]
pub trait Dispatcher: Send + Sync {
    fn channel(&self) -> Channel;

    /// Lower-cased destination keys matched against alert tags
    fn destinations(&self) -> Vec<String>;

    /// Deliver one alert to one destination
    async fn deliver(
        &self,
        event: &AlertEvent,
        destination: &str,
    ) -> Result<DeliveryStatus, NotifyError>;

    /// Release per-run resources once every delivery has finished
    async fn close(&self) {}
}

/// Subject line for mail-style channels
pub(crate) fn alert_subject(event: &AlertEvent) -> String {
    format!(
        "[{}] {} on {}",
        event.status(),
        event.record().name(),
        event.record().node()
    )
}

/// Map an HTTP response to a delivery result
pub(crate) fn http_status(response: reqwest::Response) -> Result<DeliveryStatus, NotifyError> {
    let status = response.status();
    if status.is_success() {
        Ok(DeliveryStatus::Http(status.as_u16()))
    } else {
        Err(NotifyError::Status(status.as_u16()))
    }
}

/// Notification errors
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Endpoint returned status {0}")]
    Status(u16),

    #[error("Endpoint rejected the message: {0}")]
    Rejected(String),

    #[error("Email error: {0}")]
    Email(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No such destination: {0}")]
    UnknownDestination(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names() {
        for channel in Channel::ALL {
            assert_eq!(Channel::from_name(channel.as_str()), Some(channel));
        }
        assert_eq!(Channel::from_name("PagerDuty"), Some(Channel::PagerDuty));
        assert_eq!(Channel::from_name("carrier-pigeon"), None);
    }
}
