//! etcd v2 keys API client.
//!
//! Only the two calls the orchestrator needs are implemented:
//!
//! - `PUT {base}/v2/keys/{key}` with form body `value=<v>`
//! - `GET {base}/v2/keys/{key}`, answered with `{"node":{"value":"<v>"}}`

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{OrchestratorError, Result};
use crate::store::{KeyValueStore, StoreConnector};

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct KeysResponse {
    node: KeysNode,
}

#[derive(Debug, Deserialize)]
struct KeysNode {
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    dir: bool,
}

/// HTTP client for one etcd member.
#[derive(Debug, Clone)]
pub struct EtcdClient {
    client: Client,
    base_url: String,
}

impl EtcdClient {
    /// Creates a client for the member at `base_url`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into();

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Returns the member's base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn key_url(&self, key: &str) -> String {
        format!("{}/v2/keys/{}", self.base_url, key.trim_start_matches('/'))
    }
}

#[async_trait]
impl KeyValueStore for EtcdClient {
    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let url = self.key_url(key);
        debug!(url = %url, "PUT key");

        let response = self
            .client
            .put(&url)
            .form(&[("value", value)])
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(OrchestratorError::store(format!(
                "PUT {} returned {}: {}",
                key, status, body
            )))
        }
    }

    async fn get(&self, key: &str) -> Result<String> {
        let url = self.key_url(key);
        debug!(url = %url, "GET key");

        let response = self.client.get(&url).send().await?;
        let status = response.status();

        match status {
            StatusCode::NOT_FOUND => Err(OrchestratorError::key_not_found(key)),
            s if s.is_success() => {
                let body = response.text().await?;
                parse_value(key, &body)
            }
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(OrchestratorError::store(format!(
                    "GET {} returned {}: {}",
                    key, status, body
                )))
            }
        }
    }
}

/// Extracts `node.value` from a keys API response body.
fn parse_value(key: &str, body: &str) -> Result<String> {
    let response: KeysResponse = serde_json::from_str(body)
        .map_err(|e| OrchestratorError::store(format!("bad response for {}: {}", key, e)))?;

    if response.node.dir {
        return Err(OrchestratorError::store(format!("{} is a directory", key)));
    }

    response
        .node
        .value
        .ok_or_else(|| OrchestratorError::store(format!("{} has no value", key)))
}

/// Connector producing [`EtcdClient`]s.
#[derive(Debug, Clone)]
pub struct EtcdConnector {
    timeout: Duration,
}

impl EtcdConnector {
    /// Creates a connector whose clients use `timeout` per request.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for EtcdConnector {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

impl StoreConnector for EtcdConnector {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn KeyValueStore>> {
        Ok(Arc::new(EtcdClient::new(endpoint, self.timeout)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_url() {
        let client = EtcdClient::new("http://10.0.0.1:2379/", DEFAULT_REQUEST_TIMEOUT).unwrap();
        assert_eq!(client.base_url(), "http://10.0.0.1:2379");
        assert_eq!(
            client.key_url("overlay/network/config"),
            "http://10.0.0.1:2379/v2/keys/overlay/network/config"
        );
        assert_eq!(
            client.key_url("/overlay/network/config"),
            "http://10.0.0.1:2379/v2/keys/overlay/network/config"
        );
    }

    #[test]
    fn test_parse_value() {
        let body = r#"{"action":"get","node":{"key":"/a","value":"hello","modifiedIndex":7,"createdIndex":7}}"#;
        assert_eq!(parse_value("a", body).unwrap(), "hello");

        let dir = r#"{"action":"get","node":{"key":"/a","dir":true,"nodes":[]}}"#;
        assert!(matches!(parse_value("a", dir), Err(OrchestratorError::Store(_))));

        assert!(matches!(
            parse_value("a", "not json"),
            Err(OrchestratorError::Store(_))
        ));
    }

    #[test]
    fn test_connector_builds_client() {
        let connector = EtcdConnector::default();
        assert!(connector.connect("http://10.0.0.1:2379").is_ok());
    }
}
