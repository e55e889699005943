use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;

use super::config::{destination_keys, Recipients};
use super::{alert_subject, http_status, Channel, DeliveryStatus, Dispatcher, NotifyError};
use crate::alerts::AlertEvent;

fn mailgun_url() -> String {
    "https://api.mailgun.net/v3".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailgunConfig {
    pub api_token: String,
    pub mailgun_domain: String,
    pub from: String,
    #[serde(default = "mailgun_url")]
    pub url: String,
    /// Tag -> recipient addresses
    pub teams: BTreeMap<String, Recipients>,
}

/// Mail delivery through the Mailgun messages API
pub struct MailgunDispatcher {
    config: MailgunConfig,
    http_client: reqwest::Client,
}

impl MailgunDispatcher {
    pub fn new(config: MailgunConfig, http_client: reqwest::Client) -> Self {
        Self {
            config,
            http_client,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}/messages",
            self.config.url.trim_end_matches('/'),
            self.config.mailgun_domain
        )
    }
}

#[async_trait]
impl Dispatcher for MailgunDispatcher {
    fn channel(&self) -> Channel {
        Channel::Mailgun
    }

    fn destinations(&self) -> Vec<String> {
        destination_keys(&self.config.teams)
    }

    async fn deliver(
        &self,
        event: &AlertEvent,
        destination: &str,
    ) -> Result<DeliveryStatus, NotifyError> {
        let recipients = self
            .config
            .teams
            .get(destination)
            .ok_or_else(|| NotifyError::UnknownDestination(destination.to_string()))?;

        let subject = alert_subject(event);
        let mut form: Vec<(&str, &str)> = vec![
            ("from", self.config.from.as_str()),
            ("subject", subject.as_str()),
            ("text", event.message()),
        ];
        form.extend(recipients.0.iter().map(|to| ("to", to.as_str())));

        let response = self
            .http_client
            .post(self.endpoint())
            .basic_auth("api", Some(&self.config.api_token))
            .form(&form)
            .send()
            .await?;

        http_status(response)
    }
}
