//! Connection registry
//!
//! Hands out one shared [`Connection`] per connection key. Connections are
//! created lazily through the registry's factory and live until removed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use contracts::{ConnectionConfig, Transport};
use tracing::{debug, info};

use crate::connection::Connection;
use crate::error::Result;

type Factory<T> = dyn Fn(i32, &ConnectionConfig) -> Result<T> + Send + Sync;

/// Connections keyed by an application-chosen integer
pub struct ConnectionRegistry<T: Transport> {
    connections: Mutex<HashMap<i32, Arc<Connection<T>>>>,
    factory: Box<Factory<T>>,
}

impl<T: Transport> ConnectionRegistry<T> {
    /// `factory` builds the transport for a connection that does not exist yet
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(i32, &ConnectionConfig) -> Result<T> + Send + Sync + 'static,
    {
        Self {
            connections: Mutex::new(HashMap::new()),
            factory: Box::new(factory),
        }
    }

    fn connections(&self) -> MutexGuard<'_, HashMap<i32, Arc<Connection<T>>>> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Existing connection for `key`, or a new one built from `config`
    ///
    /// A later call with the same key returns the first connection; its
    /// configuration is not replaced.
    pub fn get_or_create(
        &self,
        key: i32,
        config: ConnectionConfig,
    ) -> Result<Arc<Connection<T>>> {
        let mut connections = self.connections();
        if let Some(existing) = connections.get(&key) {
            return Ok(Arc::clone(existing));
        }

        let transport = (self.factory)(key, &config)?;
        let connection = Arc::new(Connection::new(transport, config));
        connections.insert(key, Arc::clone(&connection));
        info!(key, "connection created");
        Ok(connection)
    }

    pub fn get(&self, key: i32) -> Option<Arc<Connection<T>>> {
        self.connections().get(&key).cloned()
    }

    /// Remove and stop a connection
    pub fn remove(&self, key: i32) -> Option<Arc<Connection<T>>> {
        let removed = self.connections().remove(&key);
        if let Some(connection) = &removed {
            connection.stop();
            debug!(key, "connection removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.connections().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections().is_empty()
    }

    pub fn keys(&self) -> Vec<i32> {
        let mut keys: Vec<i32> = self.connections().keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Stop every poll loop and wait for it to exit
    pub fn stop_all(&self) {
        let connections: Vec<_> = self.connections().values().cloned().collect();
        for connection in &connections {
            connection.stop();
        }
        for connection in &connections {
            connection.join();
        }
    }
}

impl<T: Transport> std::fmt::Debug for ConnectionRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use contracts::TransportStatus;

    use super::*;
    use crate::error::ConnectionError;
    use crate::mock::MockTransport;

    fn registry() -> ConnectionRegistry<MockTransport> {
        ConnectionRegistry::new(|_, _| Ok(MockTransport::scripted()))
    }

    #[test]
    fn test_same_key_shares_connection() {
        let registry = registry();
        let first = registry.get_or_create(0, ConnectionConfig::default()).unwrap();
        let second = registry.get_or_create(0, ConnectionConfig::default()).unwrap();
        let other = registry.get_or_create(3, ConnectionConfig::default()).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(registry.keys(), vec![0, 3]);
    }

    #[test]
    fn test_remove() {
        let registry = registry();
        registry.get_or_create(1, ConnectionConfig::default()).unwrap();

        assert!(registry.remove(1).is_some());
        assert!(registry.remove(1).is_none());
        assert!(registry.is_empty());
        assert!(registry.get(1).is_none());
    }

    #[test]
    fn test_factory_failure_not_cached() {
        let registry: ConnectionRegistry<MockTransport> = ConnectionRegistry::new(|key, _| {
            if key < 0 {
                Err(ConnectionError::transport("open", TransportStatus::InvalidArgument))
            } else {
                Ok(MockTransport::scripted())
            }
        });

        assert!(registry.get_or_create(-1, ConnectionConfig::default()).is_err());
        assert_eq!(registry.len(), 0);
        assert!(registry.get_or_create(2, ConnectionConfig::default()).is_ok());
    }

    #[test]
    fn test_stop_all() {
        let registry = registry();
        let connection = registry.get_or_create(0, ConnectionConfig::default()).unwrap();
        connection.start().unwrap();
        assert!(connection.is_running());

        registry.stop_all();
        assert!(!connection.is_running());
    }
}
