//! Plain SMTP delivery
//!
//! All deliveries of one run share a single SMTP session. It is opened on the
//! first delivery, reused by every later one, and closed with QUIT when the
//! dispatcher is closed.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::AsyncSmtpConnection;
use lettre::transport::smtp::extension::ClientId;
use lettre::Message;
use serde::Deserialize;
use tokio::sync::Mutex;

use super::config::{destination_keys, Recipients};
use super::{alert_subject, Channel, DeliveryStatus, Dispatcher, NotifyError};
use crate::alerts::AlertEvent;

const SMTP_PORT: u16 = 25;

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    /// Mail server as `host` or `host:port`
    pub mail_domain_address: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub from: String,
    /// Tag -> recipient addresses
    pub teams: BTreeMap<String, Recipients>,
}

pub struct EmailDispatcher {
    config: EmailConfig,
    from: Mailbox,
    host: String,
    port: u16,
    timeout: Duration,
    credentials: Option<Credentials>,
    session: Mutex<Option<AsyncSmtpConnection>>,
}

fn smtp_error(e: lettre::transport::smtp::Error) -> NotifyError {
    NotifyError::Email(e.to_string())
}

impl EmailDispatcher {
    pub fn new(config: EmailConfig, timeout: Duration) -> Result<Self, NotifyError> {
        let from = config
            .from
            .parse::<Mailbox>()
            .map_err(|e| NotifyError::Email(format!("Invalid sender {}: {}", config.from, e)))?;
        let (host, port) = split_host_port(&config.mail_domain_address)?;
        let host = host.to_string();

        let credentials = match (&config.username, &config.password) {
            (Some(username), Some(password)) if !username.is_empty() => {
                Some(Credentials::new(username.clone(), password.clone()))
            }
            _ => None,
        };

        Ok(Self {
            from,
            host,
            port,
            timeout,
            credentials,
            config,
            session: Mutex::new(None),
        })
    }

    async fn connect(&self) -> Result<AsyncSmtpConnection, NotifyError> {
        let mut connection = AsyncSmtpConnection::connect_tokio1(
            (self.host.as_str(), self.port),
            Some(self.timeout),
            &ClientId::default(),
            None,
            None,
        )
        .await
        .map_err(smtp_error)?;

        if let Some(credentials) = &self.credentials {
            connection
                .auth(&[Mechanism::Plain, Mechanism::Login], credentials)
                .await
                .map_err(smtp_error)?;
        }

        tracing::debug!(host = %self.host, port = self.port, "Opened SMTP session");
        Ok(connection)
    }

    fn build_message(&self, event: &AlertEvent, recipients: &Recipients) -> Result<Message, NotifyError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(alert_subject(event))
            .header(ContentType::TEXT_PLAIN);

        for address in &recipients.0 {
            let mailbox = address
                .parse::<Mailbox>()
                .map_err(|e| NotifyError::Email(format!("Invalid recipient {}: {}", address, e)))?;
            builder = builder.to(mailbox);
        }

        builder
            .body(event.message().to_string())
            .map_err(|e| NotifyError::Email(e.to_string()))
    }
}

fn split_host_port(address: &str) -> Result<(&str, u16), NotifyError> {
    match address.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .map_err(|_| NotifyError::Email(format!("Invalid mail server port in {}", address)))?;
            Ok((host, port))
        }
        None => Ok((address, SMTP_PORT)),
    }
}

#[async_trait]
impl Dispatcher for EmailDispatcher {
    fn channel(&self) -> Channel {
        Channel::Email
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
        let message = self.build_message(event, recipients)?;

        let mut session = self.session.lock().await;
        if session.as_ref().map_or(true, AsyncSmtpConnection::has_broken) {
            *session = Some(self.connect().await?);
        }
        let connection = session
            .as_mut()
            .ok_or_else(|| NotifyError::Email("SMTP session unavailable".to_string()))?;

        let response = connection
            .send(message.envelope(), &message.formatted())
            .await
            .map_err(smtp_error)?;

        Ok(DeliveryStatus::Smtp(response.code().to_string()))
    }

    async fn close(&self) {
        let Some(mut connection) = self.session.lock().await.take() else {
            return;
        };
        match connection.quit().await {
            Ok(_) => tracing::debug!(host = %self.host, "Closed SMTP session"),
            Err(e) => tracing::warn!(host = %self.host, error = %e, "Failed to close SMTP session"),
        }
    }
}
