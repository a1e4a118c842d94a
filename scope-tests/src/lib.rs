//! Fixtures shared by the integration tests.
//!
//! [`MockScope`] behaves like the firmware of a scope: it interprets
//! command headers, keeps register contents per controller, answers reads
//! through probe responses and produces an endless sequence of numbered
//! acquisition bursts.
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use scope_protocol::error::{ChannelError, ProtocolError, Result};
use scope_protocol::header::{self, DecodedHeader};
use scope_protocol::protocol::PROBE_READ_LEN;
use scope_protocol::{CommandChannel, Controller, Operation, TransferMode};
use scope_server::{Builder, LengthField, ServerError, StopHandle};

/// Size of a burst header produced by [`MockScope`].
pub const BURST_SIZE: usize = 64;

/// Framer matching the bursts of [`MockScope`].
pub const BURST_FRAMER: LengthField = LengthField {
    offset: 4,
    width: 2,
};

#[derive(Default)]
struct State {
    memory: HashMap<(Controller, u32), u8>,
    /// Register pointers of the I2C controllers.
    pointers: HashMap<Controller, u32>,
    probe: VecDeque<Vec<u8>>,
    /// Open chunked AWG transaction: start address and collected bytes.
    awg: Option<(u32, Vec<u8>)>,
    awg_transactions: Vec<(u32, Vec<u8>)>,
    packets: Vec<Vec<u8>>,
    next_burst: u32,
    pending_payload: Option<(u32, usize)>,
    bursts_left: Option<usize>,
}

pub struct MockScope {
    serial: String,
    state: Mutex<State>,
    alive: AtomicBool,
}

impl MockScope {
    pub fn new(serial: &str) -> MockScope {
        MockScope {
            serial: serial.to_owned(),
            state: Mutex::new(State::default()),
            alive: AtomicBool::new(true),
        }
    }

    /// After `bursts` bursts, the data endpoint runs dry.
    pub fn with_burst_limit(self, bursts: usize) -> MockScope {
        self.state.lock().unwrap().bursts_left = Some(bursts);
        self
    }

    pub fn register(&self, controller: Controller, address: u32, length: usize) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        (0..length as u32)
            .map(|i| {
                state
                    .memory
                    .get(&(controller, address + i))
                    .copied()
                    .unwrap_or(0)
            })
            .collect()
    }

    /// Completed chunked AWG writes.
    pub fn awg_transactions(&self) -> Vec<(u32, Vec<u8>)> {
        self.state.lock().unwrap().awg_transactions.clone()
    }

    /// Every packet received on the command endpoint.
    pub fn packets(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().packets.clone()
    }

    fn check_alive(&self) -> Result<()> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ChannelError::LinkDown("mock scope destroyed".into()))
        }
    }

    fn execute(state: &mut State, header: DecodedHeader, payload: &[u8]) {
        let controller = header.controller;
        match header.operation {
            Operation::Write if controller.needs_pointer_write() && payload.is_empty() => {
                state
                    .pointers
                    .insert(controller, header.address.unwrap_or(0));
            }
            Operation::Write => store(state, controller, header.address.unwrap_or(0), payload),
            Operation::Read => {
                let address = header
                    .address
                    .or_else(|| state.pointers.get(&controller).copied())
                    .unwrap_or(0);
                let mut probe = vec![0xA5; controller.read_header_len()];
                probe.extend((0..header.length).map(|i| {
                    state
                        .memory
                        .get(&(controller, address + i))
                        .copied()
                        .unwrap_or(0)
                }));
                probe.resize(PROBE_READ_LEN, 0);
                state.probe.push_back(probe);
            }
            Operation::WriteBegin => state.awg = Some((header.address.unwrap_or(0), Vec::new())),
            Operation::WriteBody => {
                if let Some((_, data)) = &mut state.awg {
                    data.extend_from_slice(payload);
                }
            }
            Operation::WriteEnd => {
                if let Some((address, data)) = state.awg.take() {
                    store(state, controller, address, &data);
                    state.awg_transactions.push((address, data));
                }
            }
        }
    }
}

fn store(state: &mut State, controller: Controller, address: u32, data: &[u8]) {
    for (i, byte) in data.iter().enumerate() {
        state.memory.insert((controller, address + i as u32), *byte);
    }
}

/// Burst header: sequence number (u32 LE), payload length (u16 LE), then
/// the low byte of the sequence number as filler.
fn burst_header(seq: u32, payload_len: usize, size: usize) -> Vec<u8> {
    let mut header = vec![seq as u8; size];
    header[..4].copy_from_slice(&seq.to_le_bytes());
    header[4..6].copy_from_slice(&(payload_len as u16).to_le_bytes());
    header
}

impl CommandChannel for MockScope {
    fn write_control(&self, message: &[u8], _mode: TransferMode) -> Result<()> {
        self.check_alive()?;
        let (header, payload) = header::decode(message)?;
        let mut state = self.state.lock().unwrap();
        state.packets.push(message.to_vec());
        MockScope::execute(&mut state, header, payload);
        Ok(())
    }

    fn write_control_bulk(&self, data: &[u8], mode: TransferMode) -> Result<()> {
        self.write_control(data, mode)
    }

    fn read_control(&self, length: usize) -> Result<Vec<u8>> {
        self.check_alive()?;
        let mut probe = self
            .state
            .lock()
            .unwrap()
            .probe
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::TimedOut, "no probe response"))?;
        probe.truncate(length);
        Ok(probe)
    }

    fn get_data(&self, number_of_bytes: usize) -> Result<Option<Vec<u8>>> {
        self.check_alive()?;
        let mut state = self.state.lock().unwrap();
        if let Some((seq, len)) = state.pending_payload.take() {
            if len != number_of_bytes {
                return Err(ProtocolError::ShortTransfer {
                    expected: number_of_bytes,
                    actual: len,
                }
                .into());
            }
            return Ok(Some(vec![seq as u8; len]));
        }
        if number_of_bytes < 6 {
            return Err(ProtocolError::InvalidLength(number_of_bytes).into());
        }
        match &mut state.bursts_left {
            Some(0) => return Ok(None),
            Some(left) => *left -= 1,
            None => {}
        }
        let seq = state.next_burst;
        state.next_burst += 1;
        let payload_len = (seq as usize % 4) * 150;
        if payload_len > 0 {
            state.pending_payload = Some((seq, payload_len));
        }
        Ok(Some(burst_header(seq, payload_len, number_of_bytes)))
    }

    fn flush_data_pipe(&self) -> Result<()> {
        self.check_alive()?;
        self.state.lock().unwrap().pending_payload = None;
        Ok(())
    }

    fn serial(&self) -> &str {
        &self.serial
    }

    fn destroy(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

/// Checks that `package` is one complete burst of [`MockScope`] and returns
/// its sequence number.
pub fn verify_package(package: &[u8]) -> u32 {
    assert!(package.len() >= BURST_SIZE, "truncated package");
    let seq = u32::from_le_bytes(package[..4].try_into().unwrap());
    let payload_len = u16::from_le_bytes([package[4], package[5]]) as usize;
    assert_eq!(package.len(), BURST_SIZE + payload_len, "package {}", seq);
    assert!(
        package[6..].iter().all(|&b| b == seq as u8),
        "package {} mixes bursts",
        seq
    );
    seq
}

/// A relay server running on a loopback port.
pub struct Relay {
    pub addr: SocketAddr,
    stop: StopHandle,
    handle: Option<JoinHandle<std::result::Result<(), ServerError>>>,
}

impl Relay {
    pub fn start<C: CommandChannel + 'static>(hardware: Arc<C>, builder: Builder) -> Relay {
        let server = builder.build(hardware);
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let stop = server.stop_handle();
        let handle = thread::spawn(move || server.serve(listener));
        Relay {
            addr,
            stop,
            handle: Some(handle),
        }
    }

    /// Whether `serve` returned on its own.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Stops the server and returns the result of `serve`.
    pub fn stop(mut self) -> std::result::Result<(), ServerError> {
        self.stop.stop();
        self.handle.take().unwrap().join().unwrap()
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.stop.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Polls `condition` until it holds or `timeout` elapsed.
pub fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}
