use std::collections::HashMap;
use std::sync::Arc;

use scope_protocol::CommandChannel;

use crate::error::ConsistencyError;

/// Connected interfaces, keyed by device location.
///
/// At most one channel exists per location. The registry is an ordinary
/// value owned by its [`crate::InterfaceManager`]; independent registries can
/// coexist.
pub struct Registry<C: CommandChannel> {
    interfaces: HashMap<String, Arc<C>>,
}

impl<C: CommandChannel> Registry<C> {
    pub fn new() -> Registry<C> {
        Registry {
            interfaces: HashMap::new(),
        }
    }

    /// Adds a channel for `key`.
    ///
    /// Fails if `key` is empty or already registered; the registry is left unchanged.
    pub fn register(&mut self, key: &str, channel: Arc<C>) -> Result<Arc<C>, ConsistencyError> {
        if key.trim().is_empty() {
            return Err(ConsistencyError::MissingKey);
        }
        if self.interfaces.contains_key(key) {
            return Err(ConsistencyError::Duplicate(key.to_owned()));
        }
        self.interfaces.insert(key.to_owned(), channel.clone());
        Ok(channel)
    }

    pub fn remove(&mut self, key: &str) -> Option<Arc<C>> {
        self.interfaces.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<Arc<C>> {
        self.interfaces.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.interfaces.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.interfaces.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<C>)> {
        self.interfaces.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }
}

impl<C: CommandChannel> Default for Registry<C> {
    fn default() -> Self {
        Registry::new()
    }
}
