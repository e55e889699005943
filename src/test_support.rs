//! Shared fixtures for unit tests

use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;

use crate::alerts::AlertEvent;
use crate::health::{HealthRecord, HealthStatus};

/// Serve `router` on an ephemeral local port
pub async fn spawn_server(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// The redis service check used throughout the tests
pub fn redis_check(status: HealthStatus) -> HealthRecord {
    HealthRecord::new("foobar", "service:redis", "Service 'redis' check", status)
        .with_service("redis", "redis")
}

/// A raw health entry as the backend reports it
pub fn raw_entry(node: &str, check_id: &str, service: &str, status: &str) -> serde_json::Value {
    serde_json::json!({
        "Node": node,
        "CheckID": check_id,
        "Name": format!("{} check", check_id),
        "Status": status,
        "Notes": "",
        "Output": "",
        "ServiceID": service,
        "ServiceName": service,
    })
}

/// The redis check as an alert carrying `tags`
pub fn tagged_event(status: HealthStatus, tags: &[&str]) -> AlertEvent {
    let mut record = redis_check(status).with_output("PONG");
    record.attach_tags(tags.iter().map(|t| t.to_string()).collect());
    AlertEvent::new(record)
}
