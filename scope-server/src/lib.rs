//! # Scope Relay Server Library
//!
//! Exposes a locally attached scope to a single remote client over TCP.
//!
//! ## Overview
//!
//! The [`Server`] owns a [`CommandChannel`] to the real hardware. A client
//! connects to the control port and sends [`WireMessage`]s, which are
//! reassembled from the byte stream and executed against the hardware:
//!
//! | Command         | Action                                                  |
//! |-----------------|---------------------------------------------------------|
//! | `SEND`          | forward header and payload to the command endpoint      |
//! | `READ`          | read a command response, reply with its bytes           |
//! | `READ_HBW`      | wait for acquisition data, reply with its bytes         |
//! | `SERIAL`        | reply with the serial number, NUL padded to 8 bytes     |
//! | `FLUSH`         | discard buffered acquisition data                       |
//! | `DISCONNECT`    | end the session                                         |
//! | `STARTDATALINK` | connect back to the client and stream bursts            |
//!
//! ## Session States
//!
//! `Listening → Accepted → Serving → Disconnected | Reset → Listening`
//!
//! While listening the server announces itself through an [`Announcer`].
//! The announcement is withdrawn as soon as a client is accepted and
//! resumes once the session ended.
//!
//! ## Data Link
//!
//! After `STARTDATALINK`, a dedicated thread reads bursts from the hardware
//! and writes them as length prefixed packages to a second connection. The
//! amount of payload following each burst header is decided by a
//! [`BurstFramer`]. A failing data link ends the whole session; it is not
//! reconnected.
//!
//! ## Starting the Server
//!
//! ```ignore
//! use scope_server::Builder;
//! use std::sync::Arc;
//!
//! let server = Builder::new().burst_size(64).build(Arc::new(channel));
//! server.listen("0.0.0.0:25000")?;
//! ```
//!
//! ## Logging
//!
//! This crate uses the `log` crate for diagnostics: client connections and
//! disconnections at `info`, message dispatch at `debug` and hex dumps of
//! all forwarded bytes at `trace`.
//!
//! [`CommandChannel`]: scope_protocol::CommandChannel
//! [`WireMessage`]: scope_protocol::wire::WireMessage
mod announce;
pub mod error;
mod framer;
mod pump;
pub mod server;

pub use announce::{Announcer, UdpAnnouncer};
pub use error::ServerError;
pub use framer::{BurstFramer, HeaderOnly, LengthField};
pub use server::{Builder, Config, Server, StopHandle};
