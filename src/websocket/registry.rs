//! Keyed client registry.
//!
//! One [`WebSocketClient`] per logical endpoint key. The registry is a plain
//! value owned by the application and passed to whoever needs clients, so
//! tests can build isolated registries.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::auth::TokenSource;
use crate::websocket::client::WebSocketClient;
use crate::websocket::config::WebSocketConfig;
use crate::websocket::error::WsResult;

/// Map of endpoint key to shared client.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<String, WebSocketClient>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the client for `key`, creating it from `config` and `token`
    /// on first use. A newly created client connects immediately when
    /// `config.auto_connect` is set. For an existing key the arguments are
    /// ignored and the same instance is returned.
    ///
    /// # Errors
    ///
    /// Whatever [`WebSocketClient::new`] returns for a new key.
    pub fn get_instance(
        &self,
        key: &str,
        config: WebSocketConfig,
        token: TokenSource,
    ) -> WsResult<WebSocketClient> {
        let mut clients = self.clients();
        if let Some(client) = clients.get(key) {
            return Ok(client.clone());
        }

        let auto_connect = config.auto_connect;
        let client = WebSocketClient::new(config, token)?;
        clients.insert(key.to_string(), client.clone());
        drop(clients);

        tracing::info!("Created client '{}'", key);
        if auto_connect {
            client.connect();
        }
        Ok(client)
    }

    /// Existing client for `key`, without creating one
    pub fn get(&self, key: &str) -> Option<WebSocketClient> {
        self.clients().get(key).cloned()
    }

    /// Destroy and forget the client for `key`. The next `get_instance`
    /// for the key builds fresh state. Returns whether a client existed.
    pub fn destroy_instance(&self, key: &str) -> bool {
        let removed = self.clients().remove(key);
        match removed {
            Some(client) => {
                client.destroy();
                tracing::info!("Destroyed client '{}'", key);
                true
            }
            None => false,
        }
    }

    /// Destroy every client.
    pub fn destroy_all(&self) {
        let drained: Vec<(String, WebSocketClient)> = self.clients().drain().collect();
        for (key, client) in drained {
            client.destroy();
            tracing::info!("Destroyed client '{}'", key);
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.clients().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.clients().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients().is_empty()
    }

    fn clients(&self) -> MutexGuard<'_, HashMap<String, WebSocketClient>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::types::ConnectionState;

    fn idle_config() -> WebSocketConfig {
        WebSocketConfig {
            base_url: "ws://127.0.0.1:9".to_string(),
            auto_connect: false,
            ..WebSocketConfig::default()
        }
    }

    #[tokio::test]
    async fn test_same_key_same_instance() {
        let registry = ClientRegistry::new();
        let a = registry
            .get_instance("feed", idle_config(), TokenSource::Anonymous)
            .unwrap();
        let b = registry
            .get_instance("feed", idle_config(), TokenSource::Anonymous)
            .unwrap();
        let c = registry
            .get_instance("orders", idle_config(), TokenSource::Anonymous)
            .unwrap();

        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert_eq!(registry.len(), 2);
        assert_eq!(a.status(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_destroy_instance_builds_fresh_state() {
        let registry = ClientRegistry::new();
        let first = registry
            .get_instance("feed", idle_config(), TokenSource::Anonymous)
            .unwrap();
        first.send("queued", serde_json::json!(1));

        assert!(registry.destroy_instance("feed"));
        assert!(!registry.destroy_instance("feed"));
        assert!(first.is_destroyed());
        assert!(!registry.contains("feed"));

        let second = registry
            .get_instance("feed", idle_config(), TokenSource::Anonymous)
            .unwrap();
        assert!(!second.ptr_eq(&first));
        assert!(!second.is_destroyed());
        assert_eq!(second.queued_messages(), 0);
    }

    #[tokio::test]
    async fn test_auto_connect() {
        let registry = ClientRegistry::new();
        let config = WebSocketConfig {
            auto_connect: true,
            ..idle_config()
        };
        let client = registry
            .get_instance("feed", config, TokenSource::Anonymous)
            .unwrap();
        assert_ne!(client.status(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn test_registries_are_isolated() {
        let one = ClientRegistry::new();
        let two = ClientRegistry::new();
        one.get_instance("feed", idle_config(), TokenSource::Anonymous)
            .unwrap();
        assert!(one.contains("feed"));
        assert!(!two.contains("feed"));

        one.destroy_all();
        assert!(one.is_empty());
    }
}
