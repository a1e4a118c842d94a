//! `nusb` backend and USB hot-plug scanning.
use std::sync::Arc;
use std::time::Duration;

use nusb::DeviceInfo;
use nusb::transfer::{self, RequestBuffer};
use scope_interfaces::DeviceScanner;
use scope_protocol::error::{ChannelError, Result};
use tokio::runtime::{Builder, Runtime};

use crate::transport::{TransferError, UsbTransport};
use crate::{DEFAULT_PRODUCT_ID, DEFAULT_VENDOR_ID, UsbChannel, UsbConfig};

/// A claimed scope interface.
///
/// Transfers are driven on a private current-thread runtime so that every
/// call can be bounded by a timeout.
pub struct NusbTransport {
    interface: nusb::Interface,
    runtime: Runtime,
}

impl NusbTransport {
    pub fn open(info: &DeviceInfo, interface_number: u8) -> Result<NusbTransport> {
        log::debug!(
            "Opening USB device {:04x}:{:04x} on bus {} addr {}",
            info.vendor_id(),
            info.product_id(),
            info.bus_number(),
            info.device_address()
        );
        let device = info
            .open()
            .map_err(|e| ChannelError::LinkDown(format!("USB open: {}", e)))?;
        let interface = device
            .detach_and_claim_interface(interface_number)
            .map_err(|e| {
                ChannelError::LinkDown(format!("claim interface {}: {}", interface_number, e))
            })?;
        log::debug!("Interface {} claimed", interface_number);
        let runtime = Builder::new_current_thread().enable_time().build()?;
        Ok(NusbTransport { interface, runtime })
    }
}

fn map_transfer_error(err: transfer::TransferError) -> TransferError {
    match err {
        transfer::TransferError::Disconnected => TransferError::Disconnected,
        transfer::TransferError::Stall => TransferError::Stall,
        other => TransferError::Failed(other.to_string()),
    }
}

impl UsbTransport for NusbTransport {
    fn bulk_out(
        &self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> std::result::Result<usize, TransferError> {
        let completion = self
            .runtime
            .block_on(tokio::time::timeout(
                timeout,
                self.interface.bulk_out(endpoint, data.to_vec()),
            ))
            .map_err(|_| TransferError::Timeout(timeout))?;
        let response = completion.into_result().map_err(map_transfer_error)?;
        Ok(response.actual_length())
    }

    fn bulk_in(
        &self,
        endpoint: u8,
        length: usize,
        timeout: Duration,
    ) -> std::result::Result<Vec<u8>, TransferError> {
        let completion = self
            .runtime
            .block_on(tokio::time::timeout(
                timeout,
                self.interface.bulk_in(endpoint, RequestBuffer::new(length)),
            ))
            .map_err(|_| TransferError::Timeout(timeout))?;
        completion.into_result().map_err(map_transfer_error)
    }
}

/// Location key of a USB device, `usb:<bus>/<address>`.
pub fn location(info: &DeviceInfo) -> String {
    format!("usb:{:03}/{:03}", info.bus_number(), info.device_address())
}

/// Finds scopes by vendor and product id.
#[derive(Debug, Clone)]
pub struct UsbScanner {
    pub vendor_id: u16,
    pub product_id: u16,
    pub interface_number: u8,
    pub config: UsbConfig,
}

impl Default for UsbScanner {
    fn default() -> Self {
        Self {
            vendor_id: DEFAULT_VENDOR_ID,
            product_id: DEFAULT_PRODUCT_ID,
            interface_number: 0,
            config: UsbConfig::default(),
        }
    }
}

impl UsbScanner {
    fn matching(&self) -> Result<impl Iterator<Item = DeviceInfo>> {
        let (vendor_id, product_id) = (self.vendor_id, self.product_id);
        Ok(nusb::list_devices()?
            .filter(move |d| d.vendor_id() == vendor_id && d.product_id() == product_id))
    }
}

impl DeviceScanner for UsbScanner {
    type Channel = UsbChannel<NusbTransport>;

    fn scan(&mut self) -> Result<Vec<String>> {
        Ok(self
            .matching()?
            .filter(|d| {
                let usable = d.serial_number().is_some_and(|s| !s.trim().is_empty());
                if !usable {
                    log::warn!("Ignoring scope at {} without serial number", location(d));
                }
                usable
            })
            .map(|d| location(&d))
            .collect())
    }

    fn open(&mut self, location_key: &str) -> Result<Arc<Self::Channel>> {
        let info = self
            .matching()?
            .find(|d| location(d) == location_key)
            .ok_or_else(|| ChannelError::LinkDown(format!("{} is gone", location_key)))?;
        let serial = info.serial_number().unwrap_or_default().to_owned();
        let transport = NusbTransport::open(&info, self.interface_number)?;
        log::info!("Opened scope {} at {}", serial, location_key);
        Ok(Arc::new(UsbChannel::new(
            transport,
            serial,
            self.config.clone(),
        )))
    }
}
