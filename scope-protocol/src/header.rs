//! Byte-exact command headers for every controller.
//!
//! All headers start with [`COMMAND_MARKER`] followed by an opcode and a
//! controller specific layout, see [`HEADER_TABLE`]. Payload bytes of a write
//! are appended directly after the header by the caller, or by
//! [`write_packets`] which also takes care of splitting large AWG writes.
use crate::error::ProtocolError;
use crate::protocol::{
    COMMAND_MARKER, Controller, FLASH_WINDOW, HEADER_TABLE, HeaderRule, Layout,
    MAX_BODY_CHUNK, MAX_INLINE_PAYLOAD, Operation, lookup,
};

/// Renders the header for `operation` on `controller`.
///
/// Only the low byte of `length` is transmitted. FLASH headers additionally
/// carry the high byte of `address`.
pub fn encode(
    controller: Controller,
    operation: Operation,
    address: u32,
    length: u32,
) -> Result<Vec<u8>, ProtocolError> {
    let rule = lookup(controller, operation).ok_or(ProtocolError::UnsupportedOperation {
        controller,
        operation,
    })?;

    if controller == Controller::Flash
        && u64::from(address) + u64::from(length) > u64::from(FLASH_WINDOW)
    {
        return Err(ProtocolError::AddressOutOfRange { address, length });
    }

    let addr8 = address as u8;
    let len8 = length as u8;
    let mut header = Vec::with_capacity(rule.layout.header_len());
    header.push(COMMAND_MARKER);
    header.push(rule.opcode);
    match rule.layout {
        Layout::AddressLength => header.extend_from_slice(&[addr8, len8]),
        Layout::FlashAddressLength => {
            header.extend_from_slice(&[addr8, len8, (address >> 8) as u8])
        }
        Layout::I2cWrite => header.extend_from_slice(&[
            len8.wrapping_add(2),
            i2c_address(controller) << 1,
            addr8,
        ]),
        Layout::I2cRead => header.extend_from_slice(&[i2c_address(controller), len8]),
        Layout::LengthOnly => header.push(len8),
    }
    Ok(header)
}

fn i2c_address(controller: Controller) -> u8 {
    // Every I2C layout in the table belongs to a controller with a bus address.
    controller.i2c_address().unwrap_or_default()
}

/// Builds the USB packets for one logical register write.
///
/// Payloads of up to [`MAX_INLINE_PAYLOAD`] bytes travel in a single packet.
/// Larger AWG payloads are split into `WRITE_BEGIN`, one or more `WRITE_BODY`
/// packets of at most [`MAX_BODY_CHUNK`] bytes, and `WRITE_END`.
pub fn write_packets(
    controller: Controller,
    address: u32,
    payload: &[u8],
) -> Result<Vec<Vec<u8>>, ProtocolError> {
    if payload.len() <= MAX_INLINE_PAYLOAD {
        let mut packet = encode(controller, Operation::Write, address, payload.len() as u32)?;
        packet.extend_from_slice(payload);
        return Ok(vec![packet]);
    }
    if controller != Controller::Awg {
        return Err(ProtocolError::PayloadTooLarge {
            controller,
            len: payload.len(),
        });
    }

    let mut packets = Vec::with_capacity(payload.len().div_ceil(MAX_BODY_CHUNK) + 2);
    packets.push(encode(controller, Operation::WriteBegin, address, 0)?);
    for chunk in payload.chunks(MAX_BODY_CHUNK) {
        let mut packet = encode(controller, Operation::WriteBody, address, chunk.len() as u32)?;
        packet.extend_from_slice(chunk);
        packets.push(packet);
    }
    packets.push(encode(controller, Operation::WriteEnd, address, 0)?);
    Ok(packets)
}

/// Builds the packets that request a register read.
///
/// For FPGA and FPGA_ROM this starts with an empty write that sets the
/// register pointer, followed by the read header.
pub fn read_packets(
    controller: Controller,
    address: u32,
    length: usize,
) -> Result<Vec<Vec<u8>>, ProtocolError> {
    if length > controller.max_read_len() {
        return Err(ProtocolError::ReadTooLong {
            controller,
            requested: length,
            max: controller.max_read_len(),
        });
    }
    let mut packets = Vec::with_capacity(2);
    if controller.needs_pointer_write() {
        packets.push(encode(controller, Operation::Write, address, 0)?);
    }
    packets.push(encode(controller, Operation::Read, address, length as u32)?);
    Ok(packets)
}

/// Extracts `length` payload bytes from a probe read, dropping the response header.
pub fn read_response(
    controller: Controller,
    probe: &[u8],
    length: usize,
) -> Result<Vec<u8>, ProtocolError> {
    let start = controller.read_header_len();
    let end = start + length;
    if probe.len() < end {
        return Err(ProtocolError::ShortTransfer {
            expected: end,
            actual: probe.len(),
        });
    }
    Ok(probe[start..end].to_vec())
}

/// A header recovered from a packet on the command endpoint.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DecodedHeader {
    pub controller: Controller,
    pub operation: Operation,
    /// Not transmitted by I2C reads and chunk headers.
    pub address: Option<u32>,
    pub length: u32,
    pub header_len: usize,
}

/// Parses the header at the start of `packet` and returns it together with the trailing payload.
pub fn decode(packet: &[u8]) -> Result<(DecodedHeader, &[u8]), ProtocolError> {
    if packet.len() < 3 {
        return Err(ProtocolError::MalformedFrame(format!(
            "header needs at least 3 bytes, got {}",
            packet.len()
        )));
    }
    if packet[0] != COMMAND_MARKER {
        return Err(ProtocolError::MalformedFrame(format!(
            "missing command marker, got 0x{:02x}",
            packet[0]
        )));
    }
    let opcode = packet[1];
    let rule = HEADER_TABLE
        .iter()
        .filter(|r| r.opcode == opcode && packet.len() >= r.layout.header_len())
        .find(|r| matches_bus(r, packet))
        .ok_or_else(|| {
            ProtocolError::MalformedFrame(format!("no header matches opcode {}", opcode))
        })?;

    let (address, length) = match rule.layout {
        Layout::AddressLength => (Some(u32::from(packet[2])), u32::from(packet[3])),
        Layout::FlashAddressLength => (
            Some(u32::from(packet[2]) | u32::from(packet[4]) << 8),
            u32::from(packet[3]),
        ),
        Layout::I2cWrite => (
            Some(u32::from(packet[4])),
            u32::from(packet[2].wrapping_sub(2)),
        ),
        Layout::I2cRead => (None, u32::from(packet[3])),
        Layout::LengthOnly => (None, u32::from(packet[2])),
    };
    let header_len = rule.layout.header_len();
    Ok((
        DecodedHeader {
            controller: rule.controller,
            operation: rule.operation,
            address,
            length,
            header_len,
        },
        &packet[header_len..],
    ))
}

fn matches_bus(rule: &HeaderRule, packet: &[u8]) -> bool {
    match rule.layout {
        Layout::I2cWrite => packet[3] == i2c_address(rule.controller) << 1,
        Layout::I2cRead => packet[2] == i2c_address(rule.controller),
        _ => true,
    }
}
