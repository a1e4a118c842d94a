use std::{
    io::{ErrorKind, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use scope_protocol::{
    CommandChannel, TransferMode,
    discovery::{SERVICE_NAME, ServiceRecord},
    wire::{Command, DEFAULT_MAX_FRAME_SIZE, FrameBuffer, WireMessage, serial_reply},
};

use crate::{
    announce::{Announcement, Announcer},
    error::ServerError,
    framer::{BurstFramer, HeaderOnly},
    pump::DataPump,
};

/// How often a blocked accept or read checks for stop requests.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Pause between acquisition reads while a READ_HBW waits for data.
const DATA_RETRY_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct Config {
    /// Largest declared message length accepted from a client.
    pub max_frame_size: usize,
    /// Timeout for writes on the control and data connections.
    pub write_timeout: Duration,
    /// Close sessions without traffic for this long.
    pub idle_timeout: Option<Duration>,
    /// How long a READ_HBW waits for acquisition data before the session
    /// is closed. `None` waits until the server stops.
    pub data_wait: Option<Duration>,
    pub announce_interval: Duration,
    /// Bytes requested from the hardware for each burst header.
    pub burst_size: usize,
    pub service_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            write_timeout: Duration::from_secs(5),
            idle_timeout: None,
            data_wait: Some(Duration::from_secs(10)),
            announce_interval: Duration::from_secs(2),
            burst_size: 64,
            service_name: SERVICE_NAME.to_owned(),
        }
    }
}

/// Relays one scope to one client at a time.
pub struct Server<C: CommandChannel> {
    hardware: Arc<C>,
    config: Config,
    framer: Arc<dyn BurstFramer>,
    announcer: Option<Arc<dyn Announcer>>,
    stop: Arc<AtomicBool>,
}

/// Builder to create a [Server] instance and modify configuration options
///
/// # Example
///
/// ```ignore
/// use scope_server::{Builder, LengthField, UdpAnnouncer};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let server = Builder::new()
///     .burst_size(64)
///     .framer(LengthField { offset: 4, width: 4 })
///     .announcer(Arc::new(UdpAnnouncer::broadcast()?))
///     .build(hardware);
/// ```
pub struct Builder {
    config: Config,
    framer: Arc<dyn BurstFramer>,
    announcer: Option<Arc<dyn Announcer>>,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            config: Config::default(),
            framer: Arc::new(HeaderOnly),
            announcer: None,
        }
    }
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Set the highest message length that this server is expected to receive.
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set the TCP write timeout
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    pub fn data_wait(mut self, wait: Option<Duration>) -> Self {
        self.config.data_wait = wait;
        self
    }

    pub fn announce_interval(mut self, interval: Duration) -> Self {
        self.config.announce_interval = interval;
        self
    }

    pub fn burst_size(mut self, size: usize) -> Self {
        self.config.burst_size = size;
        self
    }

    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.config.service_name = name.into();
        self
    }

    /// Set how the data pump finds the payload length of a burst.
    pub fn framer(mut self, framer: impl BurstFramer + 'static) -> Self {
        self.framer = Arc::new(framer);
        self
    }

    /// Announce the server while it waits for a client.
    pub fn announcer(mut self, announcer: Arc<dyn Announcer>) -> Self {
        self.announcer = Some(announcer);
        self
    }

    /// Build and return the server
    pub fn build<C: CommandChannel + 'static>(self, hardware: Arc<C>) -> Server<C> {
        let mut server = Server::new(hardware, self.config);
        server.framer = self.framer;
        server.announcer = self.announcer;
        server
    }
}

/// Requests a running [`Server`] to return from [`Server::serve`].
#[derive(Clone, Debug)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Whether the session continues after a message.
#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// State of one accepted control connection.
struct Session {
    tcp: TcpStream,
    peer: SocketAddr,
    pump: Option<DataPump>,
}

impl<C: CommandChannel + 'static> Server<C> {
    pub fn new(hardware: Arc<C>, config: Config) -> Server<C> {
        Server {
            hardware,
            config,
            framer: Arc::new(HeaderOnly),
            announcer: None,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.stop.clone())
    }

    pub fn listen(&self, addr: impl ToSocketAddrs) -> Result<(), ServerError> {
        self.serve(TcpListener::bind(addr)?)
    }

    /// Serves clients on `listener` until stopped or the hardware is gone.
    pub fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        listener.set_nonblocking(true)?;
        let port = listener.local_addr()?.port();
        log::info!(
            "Server listening on port {} for scope {}",
            port,
            self.hardware.serial()
        );

        while self.running() {
            let announcement = self.announcer.clone().map(|announcer| {
                let record = ServiceRecord::announce(
                    &self.config.service_name,
                    port,
                    self.hardware.serial(),
                );
                Announcement::start(announcer, record, self.config.announce_interval)
            });
            let accepted = self.accept(&listener)?;
            drop(announcement);

            let Some((tcp, peer)) = accepted else {
                break;
            };
            log::info!("New client connection from {}", peer);
            match self.handle_client(tcp, peer) {
                Ok(()) => log::info!("Client {} disconnected", peer),
                Err(e) => log::error!("Session with {} reset: {}", peer, e),
            }
        }
        if !self.hardware.is_alive() {
            log::warn!("Scope {} is gone, server stops", self.hardware.serial());
        }
        Ok(())
    }

    fn running(&self) -> bool {
        !self.stop.load(Ordering::SeqCst) && self.hardware.is_alive()
    }

    fn accept(
        &self,
        listener: &TcpListener,
    ) -> Result<Option<(TcpStream, SocketAddr)>, ServerError> {
        while self.running() {
            match listener.accept() {
                Ok(accepted) => return Ok(Some(accepted)),
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
                Err(e) => log::error!("Connection error: {}", e),
            }
        }
        Ok(None)
    }

    fn handle_client(&self, tcp: TcpStream, peer: SocketAddr) -> Result<(), ServerError> {
        tcp.set_nonblocking(false)?;
        tcp.set_nodelay(true)?;
        tcp.set_read_timeout(Some(POLL_INTERVAL))?;
        tcp.set_write_timeout(Some(self.config.write_timeout))?;

        let mut session = Session {
            tcp,
            peer,
            pump: None,
        };
        let result = self.run_session(&mut session);
        let pump_result = session.pump.take().map_or(Ok(()), DataPump::stop);
        // A failed data pump shuts the control connection down, so its error
        // is the reason the session ended.
        pump_result.and(result)
    }

    fn run_session(&self, session: &mut Session) -> Result<(), ServerError> {
        let mut frames = FrameBuffer::new(self.config.max_frame_size);
        let mut buf = vec![0u8; 4096];
        let mut last_traffic = Instant::now();

        while self.running() {
            let received = match session.tcp.read(&mut buf) {
                Ok(0) => {
                    log::debug!("Client {} closed the connection", session.peer);
                    return Ok(());
                }
                Ok(n) => n,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    if self
                        .config
                        .idle_timeout
                        .is_some_and(|idle| last_traffic.elapsed() > idle)
                    {
                        log::error!("Client read timeout, closing connection");
                        return Ok(());
                    }
                    continue;
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset
                    ) =>
                {
                    log::debug!("Client {} reset the connection", session.peer);
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };
            last_traffic = Instant::now();
            log::trace!("Received {} bytes from {}", received, session.peer);
            frames.extend(&buf[..received]);
            while let Some(message) = frames.next_message()? {
                if self.process_message(message, session)? == Flow::Close {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Process each message, forwarding it to the hardware.
    fn process_message(
        &self,
        message: WireMessage,
        session: &mut Session,
    ) -> Result<Flow, ServerError> {
        let tcp = &mut session.tcp;
        match message.command {
            Command::Send => {
                log::trace!("SEND {:02x?}", &message.data[..]);
                self.hardware
                    .write_control_bulk(&message.data, TransferMode::Blocking)?;
            }
            Command::Read => {
                let length = message.u8_arg()? as usize;
                let response = self.hardware.read_control(length)?;
                log::trace!("READ {} -> {:02x?}", length, &response[..]);
                tcp.write_all(&response)?;
            }
            Command::ReadHbw => {
                let length = message.u16_arg()? as usize;
                let Some(data) = self.wait_for_data(length)? else {
                    log::warn!("No acquisition data for READ_HBW, closing session");
                    return Ok(Flow::Close);
                };
                log::trace!("READ_HBW {} bytes", data.len());
                tcp.write_all(&data)?;
            }
            Command::Serial => {
                log::debug!("Received SERIAL message");
                tcp.write_all(&serial_reply(self.hardware.serial()))?;
            }
            Command::Flush => {
                log::debug!("Received FLUSH message");
                self.hardware.flush_data_pipe()?;
            }
            Command::Disconnect => {
                log::debug!("Received DISCONNECT message");
                tcp.flush()?;
                return Ok(Flow::Close);
            }
            Command::StartDataLink => {
                let port = message.u16_arg()?;
                if let Some(previous) = session.pump.take() {
                    log::info!("Replacing the running data link");
                    previous.stop()?;
                }
                let target = SocketAddr::new(session.peer.ip(), port);
                session.pump = Some(DataPump::start(
                    self.hardware.clone(),
                    self.framer.clone(),
                    target,
                    self.config.burst_size,
                    self.config.write_timeout,
                    session.tcp.try_clone()?,
                )?);
            }
        }
        Ok(Flow::Continue)
    }

    /// Reads `length` bytes of acquisition data, retrying while the hardware
    /// has none yet.
    ///
    /// Returns `None` once the server stops or `data_wait` elapsed.
    fn wait_for_data(&self, length: usize) -> Result<Option<Vec<u8>>, ServerError> {
        if length == 0 {
            return Ok(Some(Vec::new()));
        }
        let started = Instant::now();
        loop {
            if let Some(data) = self.hardware.get_data(length)? {
                return Ok(Some(data));
            }
            let expired = self
                .config
                .data_wait
                .is_some_and(|wait| started.elapsed() >= wait);
            if expired || !self.running() {
                return Ok(None);
            }
            thread::sleep(DATA_RETRY_INTERVAL);
        }
    }
}
