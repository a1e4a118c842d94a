//! # Scope Protocol Library
//!
//! This crate implements the command protocol of a USB oscilloscope: the
//! byte-exact headers addressing its controllers, and the length prefixed
//! envelope used to tunnel those commands to a relay server over TCP.
//!
//! ## Overview
//!
//! The scope exposes several controllers, each with its own address space:
//!
//! - **PIC**: the supervisory microcontroller
//! - **ROM**: an EEPROM
//! - **FLASH**: 4 KiB of user flash
//! - **FPGA** / **FPGA_ROM**: FPGA settings and ROM, reached over I2C
//! - **AWG**: the waveform generator, reached over I2C
//!
//! Every command starts with a 3 to 5 byte header rendered by [`header::encode`].
//! The same bytes are produced regardless of whether they travel over USB or
//! inside a [`wire::WireMessage`].
//!
//! ## Basic Usage
//!
//! ### Rendering Headers
//!
//! ```
//! use scope_protocol::{Controller, Operation, header};
//!
//! let bytes = header::encode(Controller::Fpga, Operation::Write, 0x05, 3).unwrap();
//! assert_eq!(bytes, [0xC0, 10, 5, 0x18, 0x05]);
//! ```
//!
//! ### Splitting Large Writes
//!
//! Writes longer than 27 bytes are only supported by the AWG and are split
//! into a begin packet, body chunks of at most 29 bytes and an end packet:
//!
//! ```
//! use scope_protocol::{Controller, header};
//!
//! let packets = header::write_packets(Controller::Awg, 0, &[0u8; 61]).unwrap();
//! let sizes: Vec<usize> = packets.iter().map(|p| p.len()).collect();
//! assert_eq!(sizes, [5, 32, 32, 6, 3]);
//! ```
//!
//! ### Tunnelling Over TCP
//!
//! ```
//! use scope_protocol::wire::{FrameBuffer, WireMessage};
//!
//! let bytes = WireMessage::read(12).encode().unwrap();
//! assert_eq!(bytes, [0, 4, 11, 12]);
//!
//! let mut buffer = FrameBuffer::default();
//! buffer.extend(&bytes[..1]);
//! assert!(buffer.next_message().unwrap().is_none());
//! buffer.extend(&bytes[1..]);
//! assert_eq!(buffer.next_message().unwrap(), Some(WireMessage::read(12)));
//! ```
//!
//! ## Error Handling
//!
//! Frame level problems are reported as [`error::ProtocolError`]. Operations
//! of a [`channel::CommandChannel`] return [`error::ChannelError`], which adds
//! link failures and I/O errors.
//!
//! ## Features
//!
//! - `tokio`: [`codec::WireCodec`] and a data link codec for `tokio-util` framed streams.
pub mod channel;
#[cfg(feature = "tokio")]
pub mod codec;
pub mod datalink;
pub mod discovery;
pub mod error;
pub mod header;
pub mod protocol;
pub mod wire;

pub use channel::{CommandChannel, TransferMode};
pub use protocol::{Controller, Operation};
