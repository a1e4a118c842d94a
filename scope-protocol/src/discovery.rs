//! Service records announcing a relay server on the local network.
//!
//! ```text
//! "SCPE" | version u8 | kind u8 | port u16 BE | name_len u8 | name | serial_len u8 | serial
//! ```
use crate::error::ProtocolError;

const MAGIC: &[u8; 4] = b"SCPE";
const VERSION: u8 = 1;

/// Default UDP port announcements are broadcast to.
pub const DISCOVERY_PORT: u16 = 28752;

/// Default service name of a relay server.
pub const SERVICE_NAME: &str = "_scope-relay._tcp";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RecordKind {
    /// The relay is listening and accepts a client.
    Announce = 1,
    /// The relay stopped listening, usually because it is serving a client.
    Withdraw = 2,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServiceRecord {
    pub kind: RecordKind,
    pub name: String,
    /// TCP port of the control connection.
    pub port: u16,
    pub serial: String,
}

impl ServiceRecord {
    pub fn announce(
        name: impl Into<String>,
        port: u16,
        serial: impl Into<String>,
    ) -> ServiceRecord {
        ServiceRecord {
            kind: RecordKind::Announce,
            name: name.into(),
            port,
            serial: serial.into(),
        }
    }

    /// The same record, marked as withdrawn.
    pub fn withdrawn(&self) -> ServiceRecord {
        ServiceRecord {
            kind: RecordKind::Withdraw,
            ..self.clone()
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let name = short_string(&self.name)?;
        let serial = short_string(&self.serial)?;
        let mut out = Vec::with_capacity(10 + name.len() + serial.len());
        out.extend_from_slice(MAGIC);
        out.push(VERSION);
        out.push(self.kind as u8);
        out.extend_from_slice(&self.port.to_be_bytes());
        out.push(name.len() as u8);
        out.extend_from_slice(name);
        out.push(serial.len() as u8);
        out.extend_from_slice(serial);
        Ok(out)
    }

    pub fn decode(datagram: &[u8]) -> Result<ServiceRecord, ProtocolError> {
        let malformed =
            |what: &str| ProtocolError::MalformedFrame(format!("service record: {}", what));
        if datagram.len() < 10 || &datagram[..4] != MAGIC {
            return Err(malformed("bad magic"));
        }
        if datagram[4] != VERSION {
            return Err(malformed("unsupported version"));
        }
        let kind = match datagram[5] {
            1 => RecordKind::Announce,
            2 => RecordKind::Withdraw,
            _ => return Err(malformed("unknown kind")),
        };
        let port = u16::from_be_bytes([datagram[6], datagram[7]]);
        let (name, rest) =
            take_string(&datagram[8..]).ok_or_else(|| malformed("truncated name"))?;
        let (serial, _) = take_string(rest).ok_or_else(|| malformed("truncated serial"))?;
        Ok(ServiceRecord {
            kind,
            name,
            port,
            serial,
        })
    }
}

fn short_string(value: &str) -> Result<&[u8], ProtocolError> {
    if value.len() > u8::MAX as usize {
        return Err(ProtocolError::InvalidLength(value.len()));
    }
    Ok(value.as_bytes())
}

fn take_string(bytes: &[u8]) -> Option<(String, &[u8])> {
    let (&len, rest) = bytes.split_first()?;
    let value = rest.get(..len as usize)?;
    Some((
        String::from_utf8_lossy(value).into_owned(),
        &rest[len as usize..],
    ))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn record_survives_encoding() {
        let record = ServiceRecord::announce(SERVICE_NAME, 25482, "24340000123");
        let decoded = ServiceRecord::decode(&record.encode().unwrap()).unwrap();
        assert_eq!(decoded, record);
        let withdrawn = ServiceRecord::decode(&record.withdrawn().encode().unwrap()).unwrap();
        assert_eq!(withdrawn.kind, RecordKind::Withdraw);
        assert_eq!(withdrawn.port, 25482);
    }

    #[test]
    fn truncated_record_is_rejected() {
        let encoded = ServiceRecord::announce("relay", 1, "abc").encode().unwrap();
        assert!(ServiceRecord::decode(&encoded[..encoded.len() - 1]).is_err());
        assert!(ServiceRecord::decode(b"XXXX\x01\x01\x00\x01\x00\x00").is_err());
    }
}
