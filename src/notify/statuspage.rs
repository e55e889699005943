//! Status-page incidents (Cachet-compatible API)

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::config::{destination_keys, Target};
use super::{http_status, Channel, DeliveryStatus, Dispatcher, NotifyError};
use crate::alerts::AlertEvent;
use crate::health::HealthStatus;

const TOKEN_HEADER: &str = "X-Cachet-Token";

#[derive(Debug, Clone, Deserialize)]
pub struct StatusPageConfig {
    /// API base, e.g. `https://status.example.com/api/v1`
    pub url: String,
    pub api_token: String,
    /// Tag -> page label
    pub pages: BTreeMap<String, Target>,
}

pub fn incident_status(status: HealthStatus) -> u8 {
    match status {
        HealthStatus::Passing => 4,
        HealthStatus::Warning => 2,
        HealthStatus::Critical | HealthStatus::Unknown => 1,
    }
}

pub fn component_status(status: HealthStatus) -> u8 {
    match status {
        HealthStatus::Passing => 1,
        HealthStatus::Warning => 2,
        HealthStatus::Unknown => 3,
        HealthStatus::Critical => 4,
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Component {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct ComponentList {
    #[serde(default)]
    data: Vec<Component>,
}

#[derive(Debug, Serialize)]
struct Incident<'a> {
    name: String,
    message: &'a str,
    status: u8,
    visible: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    component_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    component_status: Option<u8>,
}

/// The single component whose name is one of the alert's tags
pub fn match_component<'a>(components: &'a [Component], event: &AlertEvent) -> Option<&'a Component> {
    let mut matches = components
        .iter()
        .filter(|c| event.tags().contains(&c.name.to_lowercase()));
    match (matches.next(), matches.next()) {
        (Some(component), None) => Some(component),
        _ => None,
    }
}

pub struct StatusPageDispatcher {
    config: StatusPageConfig,
    http_client: reqwest::Client,
}

impl StatusPageDispatcher {
    pub fn new(config: StatusPageConfig, http_client: reqwest::Client) -> Self {
        Self {
            config,
            http_client,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.url.trim_end_matches('/'), path)
    }

    async fn components(&self) -> Result<Vec<Component>, NotifyError> {
        let response = self
            .http_client
            .get(self.endpoint("components"))
            .header(TOKEN_HEADER, &self.config.api_token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(NotifyError::Status(response.status().as_u16()));
        }

        let list: ComponentList = response.json().await?;
        Ok(list.data)
    }
}

#[async_trait]
impl Dispatcher for StatusPageDispatcher {
    fn channel(&self) -> Channel {
        Channel::StatusPage
    }

    fn destinations(&self) -> Vec<String> {
        destination_keys(&self.config.pages)
    }

    async fn deliver(
        &self,
        event: &AlertEvent,
        destination: &str,
    ) -> Result<DeliveryStatus, NotifyError> {
        if !self.config.pages.contains_key(destination) {
            return Err(NotifyError::UnknownDestination(destination.to_string()));
        }

        let components = self.components().await?;
        let component = match_component(&components, event);
        if component.is_none() {
            tracing::debug!(
                node = %event.record().node(),
                check = %event.record().check_id(),
                "No unique status page component for alert"
            );
        }

        let status = event.status();
        let incident = Incident {
            name: format!("{} on {}", event.record().name(), event.record().node()),
            message: event.message(),
            status: incident_status(status),
            visible: 1,
            component_id: component.map(|c| c.id),
            component_status: component.map(|_| component_status(status)),
        };

        let response = self
            .http_client
            .post(self.endpoint("incidents"))
            .header(TOKEN_HEADER, &self.config.api_token)
            .json(&incident)
            .send()
            .await?;

        http_status(response)
    }
}
