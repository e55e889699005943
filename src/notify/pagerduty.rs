use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::config::{destination_keys, Target};
use super::{http_status, Channel, DeliveryStatus, Dispatcher, NotifyError};
use crate::alerts::AlertEvent;
use crate::health::HealthStatus;

fn events_url() -> String {
    "https://events.pagerduty.com/generic/2010-04-15/create_event.json".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct PagerDutyConfig {
    #[serde(default = "events_url")]
    pub url: String,
    /// Tag -> service integration key
    pub teams: BTreeMap<String, Target>,
}

/// Event sent to the integration endpoint
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct PagerDutyEvent<'a> {
    pub service_key: &'a str,
    pub event_type: &'static str,
    pub description: &'a str,
    pub incident_key: String,
}

impl<'a> PagerDutyEvent<'a> {
    /// Passing resolves the incident for the check; every other status triggers it
    pub fn new(event: &'a AlertEvent, service_key: &'a str) -> Self {
        let event_type = match event.status() {
            HealthStatus::Passing => "resolve",
            _ => "trigger",
        };
        Self {
            service_key,
            event_type,
            description: event.message(),
            incident_key: format!("{}/{}", event.record().node(), event.record().check_id()),
        }
    }
}

pub struct PagerDutyDispatcher {
    config: PagerDutyConfig,
    http_client: reqwest::Client,
}

impl PagerDutyDispatcher {
    pub fn new(config: PagerDutyConfig, http_client: reqwest::Client) -> Self {
        Self {
            config,
            http_client,
        }
    }
}

#[async_trait]
impl Dispatcher for PagerDutyDispatcher {
    fn channel(&self) -> Channel {
        Channel::PagerDuty
    }

    fn destinations(&self) -> Vec<String> {
        destination_keys(&self.config.teams)
    }

    async fn deliver(
        &self,
        event: &AlertEvent,
        destination: &str,
    ) -> Result<DeliveryStatus, NotifyError> {
        let service_key = self
            .config
            .teams
            .get(destination)
            .ok_or_else(|| NotifyError::UnknownDestination(destination.to_string()))?;

        let body = PagerDutyEvent::new(event, service_key.as_ref());
        let response = self
            .http_client
            .post(&self.config.url)
            .json(&body)
            .send()
            .await?;

        http_status(response)
    }
}
