use std::io::BufReader;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use bytes::Bytes;
use scope_protocol::datalink::read_package;
use scope_protocol::error::{ChannelError, Result};

use crate::TcpChannel;

/// Largest package accepted by default, well above any burst the scope produces.
const DEFAULT_MAX_PACKAGE: usize = 16 * 1024 * 1024;

/// Receiving end of a data link.
///
/// The relay connects back to a port chosen by the client and streams
/// length prefixed acquisition packages, independent of the control
/// connection.
pub struct DataLink {
    stream: BufReader<TcpStream>,
    peer: SocketAddr,
    max_package: usize,
}

impl DataLink {
    /// Opens a listener on an ephemeral port, asks the relay behind `channel`
    /// to connect to it and waits for the connection.
    pub fn request(channel: &TcpChannel) -> Result<DataLink> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        let port = listener.local_addr()?.port();
        log::debug!("Waiting for data link on port {}", port);
        channel.request_data_link(port)?;
        DataLink::accept(&listener)
    }

    /// Accepts a data link on a listener owned by the caller.
    pub fn accept(listener: &TcpListener) -> Result<DataLink> {
        let (stream, peer) = listener.accept()?;
        stream.set_nodelay(true)?;
        log::info!("Data link from {}", peer);
        Ok(DataLink {
            stream: BufReader::new(stream),
            peer,
            max_package: DEFAULT_MAX_PACKAGE,
        })
    }

    pub fn with_max_package(mut self, max_package: usize) -> DataLink {
        self.max_package = max_package;
        self
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        Ok(self.stream.get_ref().set_read_timeout(timeout)?)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Blocks until the next complete package arrived.
    ///
    /// The returned bytes are the burst header followed by its payload.
    pub fn next_package(&mut self) -> Result<Bytes> {
        let package =
            read_package(&mut self.stream, self.max_package).map_err(ChannelError::from_socket)?;
        log::trace!("Data link package of {} bytes", package.len());
        Ok(Bytes::from(package))
    }
}
