use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;

use super::chat::{HipchatDispatcher, SlackDispatcher};
use super::config::{parse_channel_config, ConfigError};
use super::email::EmailDispatcher;
use super::influxdb::InfluxDbDispatcher;
use super::jsonlog::JsonLogDispatcher;
use super::mailgun::MailgunDispatcher;
use super::pagerduty::PagerDutyDispatcher;
use super::statuspage::StatusPageDispatcher;
use super::{Channel, DeliveryStatus, Dispatcher, NotifyError};
use crate::alerts::AlertEvent;
use crate::backend::{get_json, Backend, BackendError};
use crate::config::{AlertingConfig, KvKeys};

/// Result of one (alert, channel, destination) delivery
#[derive(Debug)]
pub struct DeliveryOutcome {
    pub channel: Channel,
    pub destination: String,
    pub node: String,
    pub check_id: String,
    pub result: Result<DeliveryStatus, NotifyError>,
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Handle to the deliveries started by one routing pass
#[derive(Default)]
pub struct Dispatched {
    handles: Vec<JoinHandle<DeliveryOutcome>>,
    dispatchers: Vec<Arc<dyn Dispatcher>>,
}

impl std::fmt::Debug for Dispatched {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatched")
            .field("deliveries", &self.handles.len())
            .field("channels", &self.dispatchers.len())
            .finish()
    }
}

impl Dispatched {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every delivery to finish, then close each channel once
    pub async fn join(self) -> Vec<DeliveryOutcome> {
        let outcomes = join_all(self.handles)
            .await
            .into_iter()
            .filter_map(|joined| match joined {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    tracing::error!(error = %e, "Delivery task failed");
                    None
                }
            })
            .collect();

        for dispatcher in &self.dispatchers {
            dispatcher.close().await;
        }
        outcomes
    }
}

/// Loads enabled channels and fans alerts out to them
pub struct NotificationRouter {
    backend: Arc<dyn Backend>,
    keys: KvKeys,
    http_client: reqwest::Client,
    notify_timeout: Duration,
}

impl NotificationRouter {
    pub fn new(backend: Arc<dyn Backend>, config: &AlertingConfig) -> Result<Self, RouteError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.notify_timeout)
            .build()
            .map_err(|e| RouteError::Client(e.to_string()))?;

        Ok(Self {
            backend,
            keys: config.keys.clone(),
            http_client,
            notify_timeout: config.notify_timeout,
        })
    }

    /// Start delivery of `alerts` through every enabled channel they are
    /// tagged for.
    ///
    /// Channel configuration is loaded once per call. A missing enabled list
    /// or a missing configuration for a needed channel fails the whole call
    /// before anything is sent.
    pub async fn route(&self, alerts: Vec<AlertEvent>) -> Result<Dispatched, RouteError> {
        if alerts.is_empty() {
            return Ok(Dispatched::default());
        }

        let enabled = self.enabled_channels().await?;
        let channels = select_channels(&enabled, &alert_tags(&alerts));
        if channels.is_empty() {
            tracing::info!(alerts = alerts.len(), "No enabled channel matches the alert tags");
            return Ok(Dispatched::default());
        }

        let mut dispatchers = Vec::with_capacity(channels.len());
        for channel in channels {
            dispatchers.push(self.load_dispatcher(channel).await?);
        }

        Ok(dispatch(alerts, &dispatchers))
    }

    async fn enabled_channels(&self) -> Result<BTreeSet<String>, RouteError> {
        let key = &self.keys.enabled_channels;
        let names: Vec<String> = get_json(&*self.backend, key)
            .await?
            .ok_or_else(|| RouteError::MissingEnabledList(key.clone()))?;
        Ok(names.into_iter().map(|n| n.to_lowercase()).collect())
    }

    pub async fn load_dispatcher(&self, channel: Channel) -> Result<Arc<dyn Dispatcher>, RouteError> {
        let key = self.keys.channel(channel.as_str());
        let raw: serde_json::Value = get_json(&*self.backend, &key)
            .await?
            .ok_or_else(|| RouteError::MissingChannelConfig {
                channel,
                key: key.clone(),
            })?;

        tracing::debug!(channel = %channel, "Loaded channel configuration");
        build_dispatcher(channel, raw, &self.http_client, self.notify_timeout)
    }
}

fn build_dispatcher(
    channel: Channel,
    raw: serde_json::Value,
    http_client: &reqwest::Client,
    notify_timeout: Duration,
) -> Result<Arc<dyn Dispatcher>, RouteError> {
    let http_client = http_client.clone();
    let dispatcher: Arc<dyn Dispatcher> = match channel {
        Channel::Hipchat => Arc::new(HipchatDispatcher::new(
            parse_channel_config(channel, raw)?,
            http_client,
        )),
        Channel::Slack => Arc::new(SlackDispatcher::new(
            parse_channel_config(channel, raw)?,
            http_client,
        )),
        Channel::Mailgun => Arc::new(MailgunDispatcher::new(
            parse_channel_config(channel, raw)?,
            http_client,
        )),
        Channel::Email => Arc::new(
            EmailDispatcher::new(parse_channel_config(channel, raw)?, notify_timeout).map_err(
                |e| ConfigError::Invalid {
                    channel,
                    reason: e.to_string(),
                },
            )?,
        ),
        Channel::PagerDuty => Arc::new(PagerDutyDispatcher::new(
            parse_channel_config(channel, raw)?,
            http_client,
        )),
        Channel::InfluxDb => Arc::new(InfluxDbDispatcher::new(
            parse_channel_config(channel, raw)?,
            http_client,
        )),
        Channel::StatusPage => Arc::new(StatusPageDispatcher::new(
            parse_channel_config(channel, raw)?,
            http_client,
        )),
        Channel::JsonLog => Arc::new(JsonLogDispatcher::new(parse_channel_config(channel, raw)?)),
    };
    Ok(dispatcher)
}

/// Union of the tags of all alerts
pub fn alert_tags(alerts: &[AlertEvent]) -> BTreeSet<String> {
    alerts
        .iter()
        .flat_map(|a| a.tags().iter().cloned())
        .collect()
}

/// Enabled channels named by at least one alert tag
pub fn select_channels(enabled: &BTreeSet<String>, tags: &BTreeSet<String>) -> Vec<Channel> {
    let mut channels = Vec::new();
    for name in enabled.intersection(tags) {
        match Channel::from_name(name) {
            Some(channel) => channels.push(channel),
            None => tracing::warn!(channel = %name, "Ignoring unknown notification channel"),
        }
    }
    channels
}

/// Destinations of `dispatcher` that `event` should be delivered to
pub fn matched_destinations(event: &AlertEvent, dispatcher: &dyn Dispatcher) -> Vec<String> {
    let tags = event.tags();
    if !tags.contains(dispatcher.channel().as_str()) {
        return Vec::new();
    }
    dispatcher
        .destinations()
        .into_iter()
        .filter(|destination| tags.contains(destination))
        .collect()
}

/// Spawn one delivery task per (alert, channel, destination)
pub fn dispatch(alerts: Vec<AlertEvent>, dispatchers: &[Arc<dyn Dispatcher>]) -> Dispatched {
    let mut handles = Vec::new();

    for event in alerts.into_iter().map(Arc::new) {
        for dispatcher in dispatchers {
            for destination in matched_destinations(&event, dispatcher.as_ref()) {
                let event = Arc::clone(&event);
                let dispatcher = Arc::clone(dispatcher);
                handles.push(tokio::spawn(async move {
                    deliver_one(dispatcher, event, destination).await
                }));
            }
        }
    }

    tracing::info!(deliveries = handles.len(), "Dispatched notifications");
    Dispatched {
        handles,
        dispatchers: dispatchers.to_vec(),
    }
}

async fn deliver_one(
    dispatcher: Arc<dyn Dispatcher>,
    event: Arc<AlertEvent>,
    destination: String,
) -> DeliveryOutcome {
    let channel = dispatcher.channel();
    let record = event.record();
    let result = dispatcher.deliver(&event, &destination).await;

    match &result {
        Ok(status) => tracing::info!(
            channel = %channel,
            destination = %destination,
            node = %record.node(),
            check = %record.check_id(),
            status = ?status,
            "Notification delivered"
        ),
        Err(e) => tracing::error!(
            channel = %channel,
            destination = %destination,
            node = %record.node(),
            check = %record.check_id(),
            error = %e,
            "Notification failed"
        ),
    }

    DeliveryOutcome {
        channel,
        destination,
        node: record.node().to_string(),
        check_id: record.check_id().to_string(),
        result,
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("No enabled channel list at {0}")]
    MissingEnabledList(String),

    #[error("No configuration for enabled channel {channel} at {key}")]
    MissingChannelConfig { channel: Channel, key: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to create HTTP client: {0}")]
    Client(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::health::HealthStatus;
    use crate::notify::jsonlog::LogEntry;
    use crate::test_support::{spawn_server, tagged_event};
    use async_trait::async_trait;
    use axum::{http::StatusCode, routing::post, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Dispatcher that records calls and fails for one destination
    struct FakeDispatcher {
        channel: Channel,
        destinations: Vec<String>,
        failing: Option<String>,
        calls: AtomicUsize,
        closes: AtomicUsize,
    }

    impl FakeDispatcher {
        fn new(channel: Channel, destinations: &[&str]) -> Self {
            Self {
                channel,
                destinations: destinations.iter().map(|d| d.to_string()).collect(),
                failing: None,
                calls: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Dispatcher for FakeDispatcher {
        fn channel(&self) -> Channel {
            self.channel
        }

        fn destinations(&self) -> Vec<String> {
            self.destinations.clone()
        }

        async fn deliver(
            &self,
            _event: &AlertEvent,
            destination: &str,
        ) -> Result<DeliveryStatus, NotifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.as_deref() == Some(destination) {
                Err(NotifyError::Status(500))
            } else {
                Ok(DeliveryStatus::Http(200))
            }
        }

        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_select_channels() {
        let enabled: BTreeSet<String> = ["hipchat", "slack", "carrier-pigeon"]
            .into_iter()
            .map(String::from)
            .collect();
        let tags: BTreeSet<String> = ["hipchat", "carrier-pigeon", "devops"]
            .into_iter()
            .map(String::from)
            .collect();

        assert_eq!(select_channels(&enabled, &tags), vec![Channel::Hipchat]);
    }

    #[test]
    fn test_matched_destinations_requires_channel_tag() {
        let dispatcher = FakeDispatcher::new(Channel::Slack, &["devops", "dba"]);

        let tagged = tagged_event(HealthStatus::Critical, &["slack", "devops"]);
        assert_eq!(matched_destinations(&tagged, &dispatcher), vec!["devops"]);

        let untagged = tagged_event(HealthStatus::Critical, &["devops", "dba"]);
        assert!(matched_destinations(&untagged, &dispatcher).is_empty());
    }

    #[tokio::test]
    async fn test_join_closes_each_channel_once() {
        let dispatcher = Arc::new(FakeDispatcher::new(Channel::Email, &["devops", "dba"]));
        let dispatchers: Vec<Arc<dyn Dispatcher>> = vec![dispatcher.clone()];
        let alerts = vec![tagged_event(HealthStatus::Critical, &["email", "devops", "dba"])];

        let dispatched = dispatch(alerts, &dispatchers);
        assert_eq!(dispatched.len(), 2);
        assert_eq!(dispatcher.closes.load(Ordering::SeqCst), 0);

        let outcomes = dispatched.join().await;
        assert_eq!(outcomes.len(), 2);
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_channel_is_isolated() {
        let mut failing = FakeDispatcher::new(Channel::Hipchat, &["devops"]);
        failing.failing = Some("devops".to_string());
        let failing = Arc::new(failing);
        let healthy = Arc::new(FakeDispatcher::new(Channel::PagerDuty, &["devops"]));

        let dispatchers: Vec<Arc<dyn Dispatcher>> = vec![failing.clone(), healthy.clone()];
        let alerts = vec![tagged_event(
            HealthStatus::Critical,
            &["hipchat", "pagerduty", "devops"],
        )];

        let outcomes = dispatch(alerts, &dispatchers).join().await;
        assert_eq!(outcomes.len(), 2);
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(healthy.calls.load(Ordering::SeqCst), 1);

        let pagerduty = outcomes
            .iter()
            .find(|o| o.channel == Channel::PagerDuty)
            .unwrap();
        assert!(pagerduty.is_success());
        let hipchat = outcomes.iter().find(|o| o.channel == Channel::Hipchat).unwrap();
        assert!(matches!(hipchat.result, Err(NotifyError::Status(500))));
    }

    fn router(backend: &Arc<InMemoryBackend>) -> NotificationRouter {
        let backend: Arc<dyn Backend> = backend.clone();
        NotificationRouter::new(backend, &AlertingConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_route_with_case_folded_destinations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.log");

        let pagerduty = Router::new().route(
            "/create_event.json",
            post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let addr = spawn_server(pagerduty).await;

        let backend = Arc::new(InMemoryBackend::new());
        backend.put_json("alerting/notify/plugins", &vec!["JsonLog", "pagerduty", "slack"]);
        backend.put_json(
            "alerting/notify/jsonlog",
            &serde_json::json!({"Files": {"DevOps": path}}),
        );
        backend.put_json(
            "alerting/notify/pagerduty",
            &serde_json::json!({
                "url": format!("http://{}/create_event.json", addr),
                "teams": {"devops": "svc-key"}
            }),
        );

        let alerts = vec![
            tagged_event(HealthStatus::Critical, &["jsonlog", "pagerduty", "devops"]),
            tagged_event(HealthStatus::Warning, &["jsonlog", "dba"]),
        ];

        let dispatched = router(&backend).route(alerts).await.unwrap();
        assert_eq!(dispatched.len(), 2);

        let outcomes = dispatched.join().await;
        let jsonlog = outcomes.iter().find(|o| o.channel == Channel::JsonLog).unwrap();
        assert_eq!(jsonlog.result.as_ref().unwrap(), &DeliveryStatus::Appended);
        let pagerduty = outcomes
            .iter()
            .find(|o| o.channel == Channel::PagerDuty)
            .unwrap();
        assert!(!pagerduty.is_success());

        let contents = std::fs::read_to_string(&path).unwrap();
        let entry: LogEntry = serde_json::from_str(contents.trim_end()).unwrap();
        assert_eq!(entry.status, HealthStatus::Critical);
    }

    #[tokio::test]
    async fn test_missing_configuration_is_fatal() {
        let backend = Arc::new(InMemoryBackend::new());
        let alerts = || vec![tagged_event(HealthStatus::Critical, &["slack", "devops"])];

        let missing_list = router(&backend).route(alerts()).await;
        assert!(matches!(missing_list, Err(RouteError::MissingEnabledList(_))));

        backend.put_json("alerting/notify/plugins", &vec!["slack"]);
        let missing_channel = router(&backend).route(alerts()).await;
        assert!(matches!(
            missing_channel,
            Err(RouteError::MissingChannelConfig { channel: Channel::Slack, .. })
        ));

        backend.put_json("alerting/notify/slack", &serde_json::json!({"rooms": {}}));
        let invalid = router(&backend).route(alerts()).await;
        assert!(matches!(invalid, Err(RouteError::Config(_))));
    }

    #[tokio::test]
    async fn test_no_alerts_reads_nothing() {
        let backend = Arc::new(InMemoryBackend::new());
        let dispatched = router(&backend).route(Vec::new()).await.unwrap();
        assert!(dispatched.is_empty());
    }
}
