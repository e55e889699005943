use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Session TTL bounds accepted by Consul
pub const MIN_LOCK_TTL: Duration = Duration::from_secs(10);
pub const MAX_LOCK_TTL: Duration = Duration::from_secs(86_400);

/// Logical backend keys read and written during a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvKeys {
    pub blacklist_nodes: String,
    pub blacklist_services: String,
    pub blacklist_checks: String,
    /// Tags applied to checks that are not bound to a service
    pub health_check_tags: String,
    /// JSON list of enabled channel names
    pub enabled_channels: String,
    /// Prefix for per-channel configuration (`<prefix>/<channel>`)
    pub notify_prefix: String,
    /// Persisted snapshot from the previous run
    pub prior: String,
    /// Prefix for run-coordination locks (`<prefix>/<fingerprint>`)
    pub lock_prefix: String,
}

impl KvKeys {
    pub fn channel(&self, name: &str) -> String {
        format!("{}/{}", self.notify_prefix, name)
    }

    pub fn lock(&self, fingerprint: &str) -> String {
        format!("{}/{}", self.lock_prefix, fingerprint)
    }
}

impl Default for KvKeys {
    fn default() -> Self {
        Self {
            blacklist_nodes: "alerting/blacklist/nodes".to_string(),
            blacklist_services: "alerting/blacklist/services".to_string(),
            blacklist_checks: "alerting/blacklist/checks".to_string(),
            health_check_tags: "alerting/healthchecktags".to_string(),
            enabled_channels: "alerting/notify/plugins".to_string(),
            notify_prefix: "alerting/notify".to_string(),
            prior: "alerting/prior".to_string(),
            lock_prefix: "alerting/hashes".to_string(),
        }
    }
}

/// Alerting configuration
#[derive(Debug, Clone)]
pub struct AlertingConfig {
    /// Consul HTTP address (host:port or full URL)
    pub consul_addr: String,
    /// Optional ACL token sent with every backend request
    pub consul_token: Option<String>,
    /// Timeout for a single backend request
    pub backend_timeout: Duration,
    /// Timeout for a single outbound notification
    pub notify_timeout: Duration,
    /// TTL of the run-coordination session
    pub lock_ttl: Duration,
    /// Run periodically at this interval instead of once
    pub interval: Option<Duration>,
    pub keys: KvKeys,
}

impl AlertingConfig {
    /// Create a config from environment variables
    /// CHECKWATCH_CONSUL_ADDR=127.0.0.1:8500
    /// CHECKWATCH_CONSUL_TOKEN=<acl token>
    /// CHECKWATCH_BACKEND_TIMEOUT_SECS=5
    /// CHECKWATCH_NOTIFY_TIMEOUT_SECS=10
    /// CHECKWATCH_LOCK_TTL_SECS=10
    /// CHECKWATCH_INTERVAL_SECS=30
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let consul_addr =
            std::env::var("CHECKWATCH_CONSUL_ADDR").unwrap_or(defaults.consul_addr);
        let consul_token = std::env::var("CHECKWATCH_CONSUL_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());

        Self {
            consul_addr,
            consul_token,
            backend_timeout: secs_from_env("CHECKWATCH_BACKEND_TIMEOUT_SECS")
                .unwrap_or(defaults.backend_timeout),
            notify_timeout: secs_from_env("CHECKWATCH_NOTIFY_TIMEOUT_SECS")
                .unwrap_or(defaults.notify_timeout),
            lock_ttl: clamp_lock_ttl(
                secs_from_env("CHECKWATCH_LOCK_TTL_SECS").unwrap_or(defaults.lock_ttl),
            ),
            interval: secs_from_env("CHECKWATCH_INTERVAL_SECS"),
            keys: defaults.keys,
        }
    }

    /// Base URL for the Consul HTTP API
    pub fn consul_url(&self) -> String {
        let addr = self.consul_addr.trim_end_matches('/');
        if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.to_string()
        } else {
            format!("http://{}", addr)
        }
    }
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            consul_addr: "127.0.0.1:8500".to_string(),
            consul_token: None,
            backend_timeout: Duration::from_secs(5),
            notify_timeout: Duration::from_secs(10),
            lock_ttl: Duration::from_secs(10),
            interval: None,
            keys: KvKeys::default(),
        }
    }
}

/// Keep the run-lock TTL within what Consul accepts for a session
pub fn clamp_lock_ttl(ttl: Duration) -> Duration {
    let clamped = ttl.clamp(MIN_LOCK_TTL, MAX_LOCK_TTL);
    if clamped != ttl {
        tracing::warn!(
            requested_secs = ttl.as_secs(),
            lock_ttl_secs = clamped.as_secs(),
            "Lock TTL out of range, clamping"
        );
    }
    clamped
}

fn secs_from_env(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_keys() {
        let keys = KvKeys::default();
        assert_eq!(keys.channel("slack"), "alerting/notify/slack");
        assert_eq!(keys.lock("abc123"), "alerting/hashes/abc123");
        assert_eq!(keys.prior, "alerting/prior");
    }

    #[test]
    fn test_consul_url() {
        let mut config = AlertingConfig::default();
        assert_eq!(config.consul_url(), "http://127.0.0.1:8500");

        config.consul_addr = "https://consul.internal:8501/".to_string();
        assert_eq!(config.consul_url(), "https://consul.internal:8501");
    }

    #[test]
    fn test_lock_ttl_clamped_to_session_bounds() {
        assert_eq!(clamp_lock_ttl(Duration::from_secs(3)), MIN_LOCK_TTL);
        assert_eq!(clamp_lock_ttl(Duration::from_secs(10)), Duration::from_secs(10));
        assert_eq!(clamp_lock_ttl(Duration::from_secs(45)), Duration::from_secs(45));
        assert_eq!(clamp_lock_ttl(Duration::from_secs(90_000)), MAX_LOCK_TTL);
    }
}
