use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use super::{Backend, BackendError};
use crate::config::AlertingConfig;

/// Client for the Consul HTTP API
#[derive(Debug, Clone)]
pub struct ConsulClient {
    http_client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionCreated {
    #[serde(rename = "ID")]
    id: String,
}

impl ConsulClient {
    pub fn new(config: &AlertingConfig) -> Result<Self, BackendError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.backend_timeout)
            .build()
            .map_err(|e| BackendError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: config.consul_url(),
            token: config.consul_token.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut request = self
            .http_client
            .request(method, format!("{}{}", self.base_url, path));
        if let Some(token) = &self.token {
            request = request.header("X-Consul-Token", token);
        }
        request
    }

    async fn send(&self, request: RequestBuilder, path: &str) -> Result<Response, BackendError> {
        request
            .send()
            .await
            .map_err(|e| BackendError::Network(format!("{}: {}", path, e)))
    }

    fn check_status(response: &Response, path: &str) -> Result<(), BackendError> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(BackendError::Status {
                path: path.to_string(),
                status: response.status().as_u16(),
            })
        }
    }

    async fn json<T: serde::de::DeserializeOwned>(
        response: Response,
        path: &str,
    ) -> Result<T, BackendError> {
        response
            .json()
            .await
            .map_err(|e| BackendError::Deserialization(format!("{}: {}", path, e)))
    }
}

#[async_trait]
impl Backend for ConsulClient {
    async fn health_state(&self) -> Result<serde_json::Value, BackendError> {
        let path = "/v1/health/state/any";
        let response = self.send(self.request(Method::GET, path), path).await?;
        Self::check_status(&response, path)?;
        Self::json(response, path).await
    }

    async fn node_catalog(&self, node: &str) -> Result<Option<serde_json::Value>, BackendError> {
        let path = format!("/v1/catalog/node/{}", node);
        let response = self.send(self.request(Method::GET, &path), &path).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::check_status(&response, &path)?;

        let catalog: serde_json::Value = Self::json(response, &path).await?;
        Ok(if catalog.is_null() { None } else { Some(catalog) })
    }

    async fn kv_get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let path = format!("/v1/kv/{}", key);
        let request = self.request(Method::GET, &path).query(&[("raw", "")]);
        let response = self.send(request, &path).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::check_status(&response, &path)?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| BackendError::Network(format!("{}: {}", path, e)))?;
        Ok(Some(bytes.to_vec()))
    }

    async fn kv_put(&self, key: &str, value: &[u8]) -> Result<(), BackendError> {
        let path = format!("/v1/kv/{}", key);
        let request = self.request(Method::PUT, &path).body(value.to_vec());
        let response = self.send(request, &path).await?;
        Self::check_status(&response, &path)
    }

    async fn create_session(&self, ttl: Duration) -> Result<String, BackendError> {
        let path = "/v1/session/create";
        let body = serde_json::json!({
            "TTL": format!("{}s", ttl.as_secs().max(1)),
            "LockDelay": "0s",
            "Behavior": "delete",
        });

        let response = self
            .send(self.request(Method::PUT, path).json(&body), path)
            .await?;
        Self::check_status(&response, path)?;

        let created: SessionCreated = Self::json(response, path).await?;
        Ok(created.id)
    }

    async fn destroy_session(&self, session: &str) -> Result<(), BackendError> {
        let path = format!("/v1/session/destroy/{}", session);
        let response = self.send(self.request(Method::PUT, &path), &path).await?;
        Self::check_status(&response, &path)
    }

    async fn acquire_lock(&self, key: &str, session: &str) -> Result<bool, BackendError> {
        let path = format!("/v1/kv/{}", key);
        let request = self
            .request(Method::PUT, &path)
            .query(&[("acquire", session)]);

        let response = self.send(request, &path).await?;
        Self::check_status(&response, &path)?;
        Self::json(response, &path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn_server;
    use axum::{
        body::Bytes,
        extract::{Path, Query, State},
        http::StatusCode as AxumStatus,
        response::IntoResponse,
        routing::{get, put},
        Json, Router,
    };
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    type Store = Arc<Mutex<HashMap<String, Vec<u8>>>>;

    async fn kv_read(Path(key): Path<String>, State(store): State<Store>) -> impl IntoResponse {
        match store.lock().get(&key) {
            Some(value) => (AxumStatus::OK, value.clone()).into_response(),
            None => AxumStatus::NOT_FOUND.into_response(),
        }
    }

    async fn kv_write(
        Path(key): Path<String>,
        Query(params): Query<HashMap<String, String>>,
        State(store): State<Store>,
        body: Bytes,
    ) -> Json<bool> {
        let mut store = store.lock();
        if let Some(session) = params.get("acquire") {
            let holder = format!("lock:{}", key);
            let owner = store.get(&holder).cloned();
            return match owner {
                Some(owner) if owner != session.as_bytes() => Json(false),
                _ => {
                    store.insert(holder, session.as_bytes().to_vec());
                    Json(true)
                }
            };
        }
        store.insert(key, body.to_vec());
        Json(true)
    }

    async fn mock_consul() -> (ConsulClient, Store) {
        let store: Store = Arc::new(Mutex::new(HashMap::new()));
        let router = Router::new()
            .route(
                "/v1/health/state/any",
                get(|| async {
                    Json(serde_json::json!([
                        {"Node": "foobar", "CheckID": "serfHealth", "Status": "passing"}
                    ]))
                }),
            )
            .route(
                "/v1/catalog/node/:node",
                get(|Path(node): Path<String>| async move {
                    if node == "foobar" {
                        Json(serde_json::json!({"Services": {"redis": {"Tags": ["v1"]}}}))
                    } else {
                        Json(serde_json::Value::Null)
                    }
                }),
            )
            .route(
                "/v1/session/create",
                put(|| async { Json(serde_json::json!({"ID": "adf4238a"})) }),
            )
            .route("/v1/kv/*key", get(kv_read).put(kv_write))
            .with_state(Arc::clone(&store));

        let addr = spawn_server(router).await;
        let config = AlertingConfig {
            consul_addr: addr.to_string(),
            ..AlertingConfig::default()
        };
        (ConsulClient::new(&config).unwrap(), store)
    }

    #[tokio::test]
    async fn test_kv_round_trip() {
        let (client, _) = mock_consul().await;

        assert!(client.kv_get("alerting/prior").await.unwrap().is_none());

        client.kv_put("alerting/prior", b"[]").await.unwrap();
        let value = client.kv_get("alerting/prior").await.unwrap();
        assert_eq!(value.as_deref(), Some(&b"[]"[..]));
    }

    #[tokio::test]
    async fn test_health_and_catalog() {
        let (client, _) = mock_consul().await;

        let health = client.health_state().await.unwrap();
        assert_eq!(health.as_array().map(|a| a.len()), Some(1));

        let catalog = client.node_catalog("foobar").await.unwrap();
        assert!(catalog.is_some());
        assert!(client.node_catalog("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_session_and_lock() {
        let (client, store) = mock_consul().await;

        let session = client.create_session(Duration::from_secs(10)).await.unwrap();
        assert_eq!(session, "adf4238a");

        assert!(client.acquire_lock("alerting/hashes/abc", &session).await.unwrap());
        assert!(!client.acquire_lock("alerting/hashes/abc", "other").await.unwrap());
        assert!(store.lock().contains_key("lock:alerting/hashes/abc"));
    }
}
