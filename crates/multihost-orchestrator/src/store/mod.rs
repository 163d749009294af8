//! Key/value store clients.
//!
//! The coordination store is reached through [`KeyValueStore`]. Clients are
//! created lazily through a [`StoreConnector`], so a cluster can bind its
//! client to the first node only once that node exists.

mod etcd;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;

pub use etcd::{EtcdClient, EtcdConnector};

/// A flat string key/value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Writes `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Reads the value under `key`.
    ///
    /// Fails with [`OrchestratorError::KeyNotFound`](crate::error::OrchestratorError::KeyNotFound)
    /// when the key does not exist.
    async fn get(&self, key: &str) -> Result<String>;
}

/// Creates store clients for a client endpoint such as `http://10.0.0.1:2379`.
pub trait StoreConnector: Send + Sync {
    /// Returns a client bound to `endpoint`.
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn KeyValueStore>>;
}
