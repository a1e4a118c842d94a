use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{ConsistencyError, LifecycleError};
use crate::registry::Registry;
use crate::scanner::DeviceScanner;
use scope_protocol::CommandChannel;

/// Called with `true` after a device was registered and with `false` right before it is destroyed.
pub type ConnectCallback<C> = Box<dyn FnMut(&Arc<C>, bool) + Send>;

/// Changes observed by one [`InterfaceManager::poll_device`] call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollReport {
    pub arrived: Vec<String>,
    pub removed: Vec<String>,
}

impl PollReport {
    pub fn is_empty(&self) -> bool {
        self.arrived.is_empty() && self.removed.is_empty()
    }
}

/// Creates and retires channels as devices come and go.
///
/// One manager exists per transport kind; it owns the [`Registry`] of
/// channels it created.
pub struct InterfaceManager<S: DeviceScanner> {
    scanner: S,
    registry: Registry<S::Channel>,
    subscribers: Vec<ConnectCallback<S::Channel>>,
}

impl<S: DeviceScanner> InterfaceManager<S> {
    pub fn new(scanner: S) -> InterfaceManager<S> {
        InterfaceManager {
            scanner,
            registry: Registry::new(),
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, callback: impl FnMut(&Arc<S::Channel>, bool) + Send + 'static) {
        self.subscribers.push(Box::new(callback));
    }

    pub fn registry(&self) -> &Registry<S::Channel> {
        &self.registry
    }

    pub fn scanner_mut(&mut self) -> &mut S {
        &mut self.scanner
    }

    /// Scans once, registering new devices and retiring vanished ones.
    ///
    /// A device that fails to open is skipped and retried on the next poll.
    pub fn poll_device(&mut self) -> Result<PollReport, LifecycleError> {
        let present: HashSet<String> = self.scanner.scan()?.into_iter().collect();
        let mut report = PollReport::default();

        let vanished: Vec<String> = self
            .registry
            .keys()
            .filter(|key| !present.contains(*key))
            .map(str::to_owned)
            .collect();
        for key in vanished {
            if self.device_removed(&key).is_some() {
                report.removed.push(key);
            }
        }

        let mut arrivals: Vec<&String> = present
            .iter()
            .filter(|location| !self.registry.contains(location))
            .collect();
        arrivals.sort();
        let arrivals: Vec<String> = arrivals.into_iter().cloned().collect();
        for location in arrivals {
            match self.device_arrived(&location) {
                Ok(_) => report.arrived.push(location),
                Err(LifecycleError::Channel(e)) => {
                    log::warn!("Could not open device at {}: {}", location, e)
                }
                Err(e) => log::error!("Rejected device at {:?}: {}", location, e),
            }
        }
        Ok(report)
    }

    /// Opens and registers the device at `location`, then notifies subscribers.
    ///
    /// A location that is already registered is a consistency failure.
    pub fn device_arrived(&mut self, location: &str) -> Result<Arc<S::Channel>, LifecycleError> {
        if location.trim().is_empty() {
            return Err(ConsistencyError::MissingKey.into());
        }
        if self.registry.contains(location) {
            log::error!("Device at {} arrived twice without being removed", location);
            return Err(ConsistencyError::Duplicate(location.to_owned()).into());
        }
        let channel = self.scanner.open(location)?;
        let channel = match self.registry.register(location, channel.clone()) {
            Ok(channel) => channel,
            Err(e) => {
                channel.destroy();
                return Err(e.into());
            }
        };
        log::info!("Connected {} ({})", location, channel.serial());
        for subscriber in &mut self.subscribers {
            subscriber(&channel, true);
        }
        Ok(channel)
    }

    /// Unregisters the device at `key`, notifies subscribers and destroys the channel.
    pub fn device_removed(&mut self, key: &str) -> Option<Arc<S::Channel>> {
        let channel = self.registry.remove(key)?;
        log::info!("Disconnected {} ({})", key, channel.serial());
        for subscriber in &mut self.subscribers {
            subscriber(&channel, false);
        }
        channel.destroy();
        Some(channel)
    }

    /// Retires every registered device.
    pub fn shutdown(&mut self) {
        let keys: Vec<String> = self.registry.keys().map(str::to_owned).collect();
        for key in keys {
            self.device_removed(&key);
        }
    }
}

impl<S: DeviceScanner> Drop for InterfaceManager<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
