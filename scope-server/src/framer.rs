//! Deciding how much payload follows a burst header.
//!
//! The layout of acquisition bursts is a property of the scope firmware, so
//! the relay delegates it to a [`BurstFramer`].

/// Determines the payload size announced by a burst header.
pub trait BurstFramer: Send + Sync {
    /// Number of payload bytes following `header`, or `None` if the header
    /// cannot be interpreted.
    fn payload_len(&self, header: &[u8]) -> Option<usize>;
}

/// Bursts consist of the header alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderOnly;

impl BurstFramer for HeaderOnly {
    fn payload_len(&self, _header: &[u8]) -> Option<usize> {
        Some(0)
    }
}

/// The payload length is a little-endian field inside the header.
#[derive(Debug, Clone, Copy)]
pub struct LengthField {
    pub offset: usize,
    /// Width of the field in bytes, at most 4.
    pub width: usize,
}

impl BurstFramer for LengthField {
    fn payload_len(&self, header: &[u8]) -> Option<usize> {
        if self.width == 0 || self.width > 4 {
            return None;
        }
        let field = header.get(self.offset..self.offset.checked_add(self.width)?)?;
        let mut bytes = [0u8; 4];
        bytes[..self.width].copy_from_slice(field);
        Some(u32::from_le_bytes(bytes) as usize)
    }
}

impl<F> BurstFramer for F
where
    F: Fn(&[u8]) -> Option<usize> + Send + Sync,
{
    fn payload_len(&self, header: &[u8]) -> Option<usize> {
        self(header)
    }
}

#[test]
fn length_field_is_little_endian() {
    let framer = LengthField {
        offset: 2,
        width: 2,
    };
    assert_eq!(framer.payload_len(&[0xFF, 0xFF, 0x00, 0x02, 0xFF]), Some(512));
}

#[test]
fn length_field_outside_header() {
    let framer = LengthField {
        offset: 6,
        width: 4,
    };
    assert_eq!(framer.payload_len(&[0; 8]), None);
}

#[test]
fn closures_are_framers() {
    let framer = |header: &[u8]| header.first().map(|&b| b as usize * 10);
    assert_eq!(framer.payload_len(&[3]), Some(30));
    assert_eq!(HeaderOnly.payload_len(&[1, 2, 3]), Some(0));
}
