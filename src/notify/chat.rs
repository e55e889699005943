//! Chat-room channels: Hipchat and Slack

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;

use super::config::{destination_keys, Target};
use super::{http_status, Channel, DeliveryStatus, Dispatcher, NotifyError};
use crate::alerts::AlertEvent;
use crate::health::HealthStatus;

const SENDER: &str = "Consul";
const HIPCHAT_URL: &str = "https://api.hipchat.com/v1/rooms/message";
const SLACK_URL: &str = "https://slack.com/api/chat.postMessage";

/// How a status is presented in a chat room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCue {
    pub label: &'static str,
    pub hipchat_color: &'static str,
    pub slack_color: &'static str,
    pub notify: bool,
}

impl StatusCue {
    pub fn for_status(status: HealthStatus) -> Self {
        match status {
            HealthStatus::Passing => Self {
                label: "Resolved",
                hipchat_color: "green",
                slack_color: "good",
                notify: false,
            },
            HealthStatus::Warning => Self {
                label: "Alert",
                hipchat_color: "yellow",
                slack_color: "warning",
                notify: true,
            },
            HealthStatus::Critical => Self {
                label: "Alert",
                hipchat_color: "red",
                slack_color: "danger",
                notify: true,
            },
            HealthStatus::Unknown => Self {
                label: "Alert",
                hipchat_color: "gray",
                slack_color: "#9e9e9e",
                notify: true,
            },
        }
    }
}

fn hipchat_url() -> String {
    HIPCHAT_URL.to_string()
}

fn slack_url() -> String {
    SLACK_URL.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct HipchatConfig {
    pub api_token: String,
    #[serde(default = "hipchat_url")]
    pub url: String,
    /// Tag -> room id
    pub rooms: BTreeMap<String, Target>,
}

pub struct HipchatDispatcher {
    config: HipchatConfig,
    http_client: reqwest::Client,
}

impl HipchatDispatcher {
    pub fn new(config: HipchatConfig, http_client: reqwest::Client) -> Self {
        Self {
            config,
            http_client,
        }
    }
}

#[async_trait]
impl Dispatcher for HipchatDispatcher {
    fn channel(&self) -> Channel {
        Channel::Hipchat
    }

    fn destinations(&self) -> Vec<String> {
        destination_keys(&self.config.rooms)
    }

    async fn deliver(
        &self,
        event: &AlertEvent,
        destination: &str,
    ) -> Result<DeliveryStatus, NotifyError> {
        let room = self
            .config
            .rooms
            .get(destination)
            .ok_or_else(|| NotifyError::UnknownDestination(destination.to_string()))?;
        let cue = StatusCue::for_status(event.status());

        let response = self
            .http_client
            .post(&self.config.url)
            .query(&[
                ("room_id", room.as_ref()),
                ("from", SENDER),
                ("message", event.message()),
                ("notify", if cue.notify { "1" } else { "0" }),
                ("color", cue.hipchat_color),
                ("auth_token", self.config.api_token.as_str()),
            ])
            .send()
            .await?;

        http_status(response)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlackConfig {
    pub api_token: String,
    #[serde(default = "slack_url")]
    pub url: String,
    /// Tag -> Slack channel
    pub rooms: BTreeMap<String, Target>,
}

#[derive(Debug, Deserialize)]
struct SlackReply {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

pub struct SlackDispatcher {
    config: SlackConfig,
    http_client: reqwest::Client,
}

impl SlackDispatcher {
    pub fn new(config: SlackConfig, http_client: reqwest::Client) -> Self {
        Self {
            config,
            http_client,
        }
    }
}

#[async_trait]
impl Dispatcher for SlackDispatcher {
    fn channel(&self) -> Channel {
        Channel::Slack
    }

    fn destinations(&self) -> Vec<String> {
        destination_keys(&self.config.rooms)
    }

    async fn deliver(
        &self,
        event: &AlertEvent,
        destination: &str,
    ) -> Result<DeliveryStatus, NotifyError> {
        let room = self
            .config
            .rooms
            .get(destination)
            .ok_or_else(|| NotifyError::UnknownDestination(destination.to_string()))?;
        let cue = StatusCue::for_status(event.status());

        let attachments = serde_json::json!([{
            "color": cue.slack_color,
            "fallback": event.message(),
            "text": event.message(),
        }])
        .to_string();

        let response = self
            .http_client
            .post(&self.config.url)
            .form(&[
                ("channel", room.as_ref()),
                ("username", SENDER),
                ("token", self.config.api_token.as_str()),
                ("text", cue.label),
                ("attachments", attachments.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }

        // Slack answers 200 for rejected messages too
        let reply: SlackReply = response.json().await?;
        if reply.ok {
            Ok(DeliveryStatus::Http(status.as_u16()))
        } else {
            Err(NotifyError::Rejected(
                reply.error.unwrap_or_else(|| "unspecified".to_string()),
            ))
        }
    }
}
