use std::fmt::Display;

/// First byte of every command header.
pub const COMMAND_MARKER: u8 = 0xC0;

/// Largest packet accepted by the command OUT endpoint.
pub const MAX_COMMAND_PACKET: usize = 32;

/// Fixed size of every read on the command response (probe) endpoint.
pub const PROBE_READ_LEN: usize = 16;

/// Largest payload sent in the same packet as a five byte write header.
pub const MAX_INLINE_PAYLOAD: usize = 27;

/// Largest payload following a three byte `WRITE_BODY` header.
pub const MAX_BODY_CHUNK: usize = 29;

/// Size of the user flash window. Accesses must stay below this address.
pub const FLASH_WINDOW: u32 = 0x1000;

/// An addressable target on the device.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Controller {
    /// Supervisory microcontroller
    Pic,
    /// EEPROM
    Rom,
    /// User flash memory
    Flash,
    /// FPGA settings bus
    Fpga,
    /// FPGA ROM bus
    FpgaRom,
    /// Arbitrary waveform generator, behind the internal I2C bridge
    Awg,
}

impl Controller {
    pub const ALL: [Controller; 6] = [
        Controller::Pic,
        Controller::Rom,
        Controller::Flash,
        Controller::Fpga,
        Controller::FpgaRom,
        Controller::Awg,
    ];

    /// The 7-bit I2C bus address for controllers reached through the I2C bridge.
    pub const fn i2c_address(self) -> Option<u8> {
        match self {
            Controller::Fpga => Some(0x0C),
            Controller::FpgaRom => Some(0x0D),
            Controller::Awg => Some(0x0E),
            Controller::Pic | Controller::Rom | Controller::Flash => None,
        }
    }

    /// Number of response header bytes preceding the payload of a probe read.
    pub const fn read_header_len(self) -> usize {
        match self {
            Controller::Flash => 5,
            _ => 4,
        }
    }

    /// Largest `length` accepted by a single register read.
    pub const fn max_read_len(self) -> usize {
        PROBE_READ_LEN - self.read_header_len()
    }

    /// The firmware cannot address an I2C register within a read transaction,
    /// so the register pointer has to be set by an empty write first.
    pub const fn needs_pointer_write(self) -> bool {
        matches!(self, Controller::Fpga | Controller::FpgaRom)
    }
}

impl Display for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Controller::Pic => "PIC",
            Controller::Rom => "ROM",
            Controller::Flash => "FLASH",
            Controller::Fpga => "FPGA",
            Controller::FpgaRom => "FPGA_ROM",
            Controller::Awg => "AWG",
        };
        f.write_str(name)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Operation {
    Read,
    Write,
    /// I2C start condition of a chunked AWG write
    WriteBegin,
    /// One chunk of a chunked AWG write
    WriteBody,
    /// I2C stop condition of a chunked AWG write
    WriteEnd,
}

/// How the bytes after the opcode are laid out.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Layout {
    /// `[addr, len]`
    AddressLength,
    /// `[addr, len, addr_hi]`
    FlashAddressLength,
    /// `[len + 2, i2c << 1, addr]`
    I2cWrite,
    /// `[i2c, len]`
    I2cRead,
    /// `[len]`
    LengthOnly,
}

impl Layout {
    /// Total header length including marker and opcode.
    pub const fn header_len(self) -> usize {
        match self {
            Layout::AddressLength | Layout::I2cRead => 4,
            Layout::FlashAddressLength | Layout::I2cWrite => 5,
            Layout::LengthOnly => 3,
        }
    }
}

/// One row of the header table.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct HeaderRule {
    pub controller: Controller,
    pub operation: Operation,
    pub opcode: u8,
    pub layout: Layout,
}

const fn rule(
    controller: Controller,
    operation: Operation,
    opcode: u8,
    layout: Layout,
) -> HeaderRule {
    HeaderRule {
        controller,
        operation,
        opcode,
        layout,
    }
}

/// Every header the device understands. Combinations missing from this table are unsupported.
pub const HEADER_TABLE: [HeaderRule; 14] = [
    rule(Controller::Pic, Operation::Write, 2, Layout::AddressLength),
    rule(Controller::Pic, Operation::Read, 3, Layout::AddressLength),
    rule(Controller::Rom, Operation::Write, 7, Layout::AddressLength),
    rule(Controller::Rom, Operation::Read, 6, Layout::AddressLength),
    rule(Controller::Flash, Operation::Write, 9, Layout::FlashAddressLength),
    rule(Controller::Flash, Operation::Read, 8, Layout::FlashAddressLength),
    rule(Controller::Fpga, Operation::Write, 10, Layout::I2cWrite),
    rule(Controller::Fpga, Operation::Read, 11, Layout::I2cRead),
    rule(Controller::FpgaRom, Operation::Write, 10, Layout::I2cWrite),
    rule(Controller::FpgaRom, Operation::Read, 11, Layout::I2cRead),
    rule(Controller::Awg, Operation::Write, 10, Layout::I2cWrite),
    rule(Controller::Awg, Operation::WriteBegin, 14, Layout::I2cWrite),
    rule(Controller::Awg, Operation::WriteBody, 15, Layout::LengthOnly),
    rule(Controller::Awg, Operation::WriteEnd, 16, Layout::LengthOnly),
];

/// Looks up the table row for a controller/operation pair.
pub fn lookup(controller: Controller, operation: Operation) -> Option<&'static HeaderRule> {
    HEADER_TABLE
        .iter()
        .find(|r| r.controller == controller && r.operation == operation)
}

#[test]
fn every_rule_is_unique() {
    for (i, a) in HEADER_TABLE.iter().enumerate() {
        for b in &HEADER_TABLE[i + 1..] {
            assert!(
                !(a.controller == b.controller && a.operation == b.operation),
                "duplicate rule for {} {:?}",
                a.controller,
                a.operation
            );
        }
    }
}

#[test]
fn max_read_len_respects_probe_size() {
    assert_eq!(Controller::Fpga.max_read_len(), 12);
    assert_eq!(Controller::Flash.max_read_len(), 11);
}
