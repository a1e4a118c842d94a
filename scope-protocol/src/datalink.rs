//! Acquisition packages on the data link.
//!
//! Each package is a 4-byte big-endian length followed by the burst header
//! and its payload. There is no command byte.
use std::io::{self, Read, Write};

/// Writes one package and flushes the writer.
pub fn write_package(writer: &mut impl Write, header: &[u8], payload: &[u8]) -> io::Result<()> {
    let length = u32::try_from(header.len() + payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "package exceeds 4 GiB"))?;
    writer.write_all(&length.to_be_bytes())?;
    writer.write_all(header)?;
    writer.write_all(payload)?;
    writer.flush()
}

/// Reads one package. Fails if the declared length exceeds `max_len`.
pub fn read_package(reader: &mut impl Read, max_len: usize) -> io::Result<Vec<u8>> {
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix)?;
    let length = u32::from_be_bytes(prefix) as usize;
    if length > max_len {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("package of {} bytes exceeds maximum of {}", length, max_len),
        ));
    }
    let mut package = vec![0u8; length];
    reader.read_exact(&mut package)?;
    Ok(package)
}
