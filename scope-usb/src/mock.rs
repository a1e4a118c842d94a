//! In-memory transport for tests.
//!
//! Always compiled, hidden from public docs.
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::transport::{TransferError, UsbTransport};

#[derive(Default)]
struct MockState {
    /// Queued responses per IN endpoint.
    responses: Mutex<HashMap<u8, VecDeque<Vec<u8>>>>,
    /// Recorded OUT transfers: (endpoint, data).
    written: Mutex<Vec<(u8, Vec<u8>)>>,
    /// If non-zero, OUT transfers report this many bytes instead of the full length.
    short_write: AtomicUsize,
    disconnected: AtomicBool,
    /// Delay applied to every transfer.
    latency_ms: AtomicUsize,
}

/// Cloneable handle to a shared mock device; clones observe the same state.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl MockTransport {
    pub fn new() -> MockTransport {
        MockTransport::default()
    }

    /// Queues a response for the next read on `endpoint`.
    pub fn push_response(&self, endpoint: u8, data: Vec<u8>) {
        self.state
            .responses
            .lock()
            .unwrap()
            .entry(endpoint)
            .or_default()
            .push_back(data);
    }

    pub fn queued(&self, endpoint: u8) -> usize {
        self.state
            .responses
            .lock()
            .unwrap()
            .get(&endpoint)
            .map_or(0, VecDeque::len)
    }

    /// All OUT transfers so far, in order.
    pub fn written(&self) -> Vec<(u8, Vec<u8>)> {
        self.state.written.lock().unwrap().clone()
    }

    pub fn set_short_write(&self, bytes: usize) {
        self.state.short_write.store(bytes, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.state
            .latency_ms
            .store(latency.as_millis() as usize, Ordering::SeqCst);
    }

    /// Simulates unplugging the device.
    pub fn unplug(&self) {
        self.state.disconnected.store(true, Ordering::SeqCst);
    }

    fn delay(&self) -> Result<(), TransferError> {
        let latency = self.state.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            std::thread::sleep(Duration::from_millis(latency as u64));
        }
        if self.state.disconnected.load(Ordering::SeqCst) {
            return Err(TransferError::Disconnected);
        }
        Ok(())
    }
}

impl UsbTransport for MockTransport {
    fn bulk_out(
        &self,
        endpoint: u8,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, TransferError> {
        self.delay()?;
        self.state
            .written
            .lock()
            .unwrap()
            .push((endpoint, data.to_vec()));
        match self.state.short_write.load(Ordering::SeqCst) {
            0 => Ok(data.len()),
            short => Ok(short.min(data.len())),
        }
    }

    /// Pops the next queued response, truncated to `length`. An empty queue
    /// behaves like a zero length read.
    fn bulk_in(
        &self,
        endpoint: u8,
        length: usize,
        _timeout: Duration,
    ) -> Result<Vec<u8>, TransferError> {
        self.delay()?;
        let mut responses = self.state.responses.lock().unwrap();
        let mut data = responses
            .get_mut(&endpoint)
            .and_then(VecDeque::pop_front)
            .unwrap_or_default();
        data.truncate(length);
        Ok(data)
    }
}
