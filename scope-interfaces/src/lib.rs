//! # Scope Interfaces
//!
//! Tracks which scopes are connected and owns one [`CommandChannel`] per
//! device location.
//!
//! A transport provides a [`DeviceScanner`] that lists device locations and
//! opens channels. The [`InterfaceManager`] diffs successive scans against
//! its [`Registry`], creating channels for new devices and destroying those
//! of vanished ones, and notifies subscribers about both.
//!
//! ```ignore
//! use scope_interfaces::InterfaceManager;
//! use scope_usb::UsbScanner;
//!
//! let mut manager = InterfaceManager::new(UsbScanner::default());
//! manager.subscribe(|channel, connected| {
//!     println!("{} connected: {}", channel.serial(), connected);
//! });
//! manager.poll_device()?;
//! ```
//!
//! [`CommandChannel`]: scope_protocol::CommandChannel
pub mod error;
mod manager;
mod registry;
mod scanner;

pub use error::{ConsistencyError, LifecycleError};
pub use manager::{ConnectCallback, InterfaceManager, PollReport};
pub use registry::Registry;
pub use scanner::DeviceScanner;
