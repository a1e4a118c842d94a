//! # Scope Client
//!
//! Controls a scope attached to a remote relay server as if it was
//! connected locally.
//!
//! ## Overview
//!
//! [`TcpChannel`] implements [`CommandChannel`] by wrapping every logical
//! operation in a [`WireMessage`] on a single control connection. Register
//! reads and writes therefore produce exactly the same USB packets on the
//! relay side as they would on a local USB channel.
//!
//! - `SEND` and `FLUSH` are fire-and-forget
//! - `READ`, `READ_HBW` and `SERIAL` wait for their reply
//!
//! Acquisition data is best streamed over a separate data link, see
//! [`DataLink`]. Relays announce themselves on the local network, and
//! [`NetworkScanner`] turns those announcements into channels.
//!
//! ## Basic Usage
//!
//! ```ignore
//! use scope_client::TcpChannel;
//! use scope_protocol::{CommandChannel, Controller};
//!
//! let channel = TcpChannel::connect("192.168.1.20:25000")?;
//! println!("Connected to {}", channel.serial());
//!
//! let version = channel.get_controller_register(Controller::Pic, 0x00, 4)?;
//! channel.set_controller_register(Controller::Fpga, 0x05, &[1, 2, 3])?;
//! ```
use std::{
    io::{self, BufReader, BufWriter, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
    sync::{Mutex, MutexGuard, PoisonError},
};

use scope_protocol::{
    CommandChannel, TransferMode,
    error::{ChannelError, ProtocolError, Result},
    protocol::MAX_COMMAND_PACKET,
    wire::{Command, DEFAULT_MAX_FRAME_SIZE, SERIAL_LEN, WireMessage, parse_serial},
};

mod datalink;
mod discovery;

pub use datalink::DataLink;
pub use discovery::{NetworkScanner, ScannerConfig};

struct Connection {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl Connection {
    fn send(&mut self, message: &WireMessage) -> io::Result<()> {
        log::trace!("Sending {:?} ({} bytes)", message.command, message.data.len());
        message.write_to(&mut self.writer)?;
        self.writer.flush()
    }

    fn receive(&mut self, length: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0; length];
        self.reader.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// Command channel tunnelled through a relay server.
///
/// Requests are serialized by an internal lock; a reply is always read
/// completely before the next request is sent. Once the connection broke,
/// every call fails with [`ChannelError::LinkDown`] without touching the
/// socket.
pub struct TcpChannel {
    connection: Mutex<Option<Connection>>,
    serial: String,
    peer: SocketAddr,
    /// Largest message the relay accepts.
    max_frame_size: usize,
}

impl TcpChannel {
    /// Connects to a relay server and fetches the serial number of its scope.
    pub fn connect(addr: impl ToSocketAddrs) -> Result<TcpChannel> {
        let stream = TcpStream::connect(addr).map_err(ChannelError::from_socket)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        let mut connection = Connection {
            reader: BufReader::new(stream.try_clone()?),
            writer: BufWriter::new(stream),
        };
        connection
            .send(&WireMessage::new(Command::Serial, []))
            .map_err(ChannelError::from_socket)?;
        let serial = read_serial(&mut connection).map_err(ChannelError::from_socket)?;
        log::info!("Connected to scope {} via {}", serial, peer);
        Ok(TcpChannel {
            connection: Mutex::new(Some(connection)),
            serial,
            peer,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        })
    }

    /// Sets the largest message the relay was configured to accept.
    /// Larger bulk writes fail locally instead of resetting the session.
    pub fn with_max_frame_size(mut self, size: usize) -> TcpChannel {
        self.max_frame_size = size;
        self
    }

    /// Address of the relay server.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Asks the relay to connect back to `port` on this host and stream
    /// acquisition data there.
    pub fn request_data_link(&self, port: u16) -> Result<()> {
        self.transact(&WireMessage::start_data_link(port), 0)
            .map(drop)
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Sends `message` and reads a reply of exactly `reply_len` bytes.
    fn transact(&self, message: &WireMessage, reply_len: usize) -> Result<Vec<u8>> {
        let mut guard = self.lock();
        let connection = guard
            .as_mut()
            .ok_or_else(|| ChannelError::LinkDown("connection closed".into()))?;
        let result = connection.send(message).and_then(|()| {
            if reply_len == 0 {
                Ok(Vec::new())
            } else {
                connection.receive(reply_len)
            }
        });
        result.map_err(|e| {
            let err = ChannelError::from_socket(e);
            if err.is_link_down() {
                log::warn!("Relay {} closed the connection: {}", self.peer, err);
                *guard = None;
            }
            err
        })
    }
}

fn read_serial(connection: &mut Connection) -> io::Result<String> {
    let reply = connection.receive(SERIAL_LEN)?;
    Ok(parse_serial(&reply))
}

impl CommandChannel for TcpChannel {
    fn write_control(&self, message: &[u8], mode: TransferMode) -> Result<()> {
        if message.len() > MAX_COMMAND_PACKET {
            return Err(ProtocolError::FrameTooLarge {
                max: MAX_COMMAND_PACKET,
                got: message.len(),
            }
            .into());
        }
        self.write_control_bulk(message, mode)
    }

    // The relay decides how the bytes reach the hardware, so the transfer
    // mode has no meaning on this side.
    fn write_control_bulk(&self, data: &[u8], _mode: TransferMode) -> Result<()> {
        let message = WireMessage::new(Command::Send, data);
        if message.encoded_len() > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                max: self.max_frame_size,
                got: message.encoded_len(),
            }
            .into());
        }
        self.transact(&message, 0).map(drop)
    }

    fn read_control(&self, length: usize) -> Result<Vec<u8>> {
        let len8 = u8::try_from(length).map_err(|_| ProtocolError::InvalidLength(length))?;
        self.transact(&WireMessage::read(len8), length)
    }

    fn get_data(&self, number_of_bytes: usize) -> Result<Option<Vec<u8>>> {
        let len16 = u16::try_from(number_of_bytes)
            .map_err(|_| ProtocolError::InvalidLength(number_of_bytes))?;
        if len16 == 0 {
            return Ok(None);
        }
        self.transact(&WireMessage::read_hbw(len16), number_of_bytes)
            .map(Some)
    }

    fn flush_data_pipe(&self) -> Result<()> {
        self.transact(&WireMessage::new(Command::Flush, []), 0)
            .map(drop)
    }

    fn serial(&self) -> &str {
        &self.serial
    }

    fn destroy(&self) {
        let Some(mut connection) = self.lock().take() else {
            return;
        };
        if let Err(e) = connection.send(&WireMessage::new(Command::Disconnect, [])) {
            log::debug!("DISCONNECT to {} failed: {}", self.peer, e);
        }
        let _ = connection.writer.get_ref().shutdown(Shutdown::Both);
        log::debug!("Closed connection to {}", self.peer);
    }

    fn is_alive(&self) -> bool {
        self.lock().is_some()
    }
}

impl Drop for TcpChannel {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod test {
    use std::net::TcpListener;
    use std::thread;

    use scope_protocol::wire::{FrameBuffer, serial_reply};

    use super::*;

    /// Accepts one client, answers SERIAL and hands every further message to `respond`.
    fn fake_relay(
        respond: impl Fn(&WireMessage, &mut TcpStream) + Send + 'static,
    ) -> (SocketAddr, thread::JoinHandle<Vec<WireMessage>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut frames = FrameBuffer::default();
            let mut received = Vec::new();
            let mut buf = [0u8; 256];
            loop {
                let n = stream.read(&mut buf).unwrap_or(0);
                if n == 0 {
                    return received;
                }
                frames.extend(&buf[..n]);
                while let Some(message) = frames.next_message().unwrap() {
                    if message.command == Command::Serial {
                        stream.write_all(&serial_reply("SN1234")).unwrap();
                    } else {
                        respond(&message, &mut stream);
                    }
                    received.push(message);
                }
            }
        });
        (addr, handle)
    }

    #[test]
    fn connect_fetches_serial() {
        let (addr, handle) = fake_relay(|_, _| {});
        let channel = TcpChannel::connect(addr).unwrap();
        assert_eq!(channel.serial(), "SN1234");
        drop(channel);
        let received = handle.join().unwrap();
        assert_eq!(received.last().unwrap().command, Command::Disconnect);
    }

    #[test]
    fn read_control_reads_exact_reply() {
        let (addr, _handle) = fake_relay(|message, stream| {
            if message.command == Command::Read {
                let len = message.data[0];
                stream.write_all(&(0..len).collect::<Vec<u8>>()).unwrap();
            }
        });
        let channel = TcpChannel::connect(addr).unwrap();
        assert_eq!(
            channel.read_control(12).unwrap(),
            (0..12).collect::<Vec<u8>>()
        );
    }

    #[test]
    fn send_and_flush_are_fire_and_forget() {
        let (addr, handle) = fake_relay(|_, _| {});
        let channel = TcpChannel::connect(addr).unwrap();
        channel
            .write_control(&[0xC0, 2, 0x10, 1, 0xAA], TransferMode::Detached)
            .unwrap();
        channel.flush_data_pipe().unwrap();
        channel.destroy();
        let received = handle.join().unwrap();
        assert_eq!(
            received[1],
            WireMessage::new(Command::Send, [0xC0, 2, 0x10, 1, 0xAA])
        );
        assert_eq!(received[2].command, Command::Flush);
        assert_eq!(received[3].command, Command::Disconnect);
    }

    #[test]
    fn closed_connection_is_link_down() {
        let (addr, _handle) = fake_relay(|message, stream| {
            if message.command == Command::ReadHbw {
                stream.shutdown(Shutdown::Both).unwrap();
            }
        });
        let channel = TcpChannel::connect(addr).unwrap();
        assert!(channel.get_data(512).unwrap_err().is_link_down());
        assert!(!channel.is_alive());
        assert!(channel.read_control(4).unwrap_err().is_link_down());
    }

    #[test]
    fn oversized_control_packet_is_rejected_locally() {
        let (addr, handle) = fake_relay(|_, _| {});
        let channel = TcpChannel::connect(addr).unwrap();
        assert!(matches!(
            channel.write_control(&[0; 33], TransferMode::Blocking),
            Err(ChannelError::Protocol(ProtocolError::FrameTooLarge { max: 32, got: 33 }))
        ));
        channel
            .write_control(&[0; 32], TransferMode::Blocking)
            .unwrap();
        channel.destroy();
        let commands: Vec<Command> = handle.join().unwrap().iter().map(|m| m.command).collect();
        assert_eq!(commands, [Command::Serial, Command::Send, Command::Disconnect]);
    }

    #[test]
    fn bulk_write_beyond_relay_limit_is_rejected_locally() {
        let (addr, _handle) = fake_relay(|_, _| {});
        let channel = TcpChannel::connect(addr).unwrap();
        assert!(matches!(
            channel.write_control_bulk(&vec![0; DEFAULT_MAX_FRAME_SIZE], TransferMode::Blocking),
            Err(ChannelError::Protocol(ProtocolError::FrameTooLarge { .. }))
        ));

        let channel = channel.with_max_frame_size(64);
        assert!(matches!(
            channel.write_control_bulk(&[0; 62], TransferMode::Blocking),
            Err(ChannelError::Protocol(ProtocolError::FrameTooLarge { max: 64, got: 65 }))
        ));
        channel
            .write_control_bulk(&[0; 61], TransferMode::Blocking)
            .unwrap();
        assert!(channel.is_alive());
    }

    #[test]
    fn oversized_read_is_rejected_locally() {
        let (addr, _handle) = fake_relay(|_, _| {});
        let channel = TcpChannel::connect(addr).unwrap();
        assert!(matches!(
            channel.read_control(300),
            Err(ChannelError::Protocol(ProtocolError::InvalidLength(300)))
        ));
        assert!(channel.is_alive());
    }
}
