//! SNMP value types carried in AgentX variable bindings.

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::oid::Oid;

/// Maximum octet string payload (RFC 2741 caps vb lengths at 16 bits).
pub const MAX_OCTET_STRING_LEN: usize = 65535;

/// VarBind type tags (RFC 2741 section 5.4).
pub mod tag {
    /// Integer type (tag 2).
    pub const INTEGER: u16 = 2;
    /// Octet string type (tag 4).
    pub const OCTET_STRING: u16 = 4;
    /// Null type (tag 5).
    pub const NULL: u16 = 5;
    /// Object identifier type (tag 6).
    pub const OBJECT_IDENTIFIER: u16 = 6;
    /// IP address type (tag 64).
    pub const IP_ADDRESS: u16 = 64;
    /// 32-bit counter type (tag 65).
    pub const COUNTER32: u16 = 65;
    /// 32-bit gauge type (tag 66).
    pub const GAUGE32: u16 = 66;
    /// Time ticks type in hundredths of a second (tag 67).
    pub const TIMETICKS: u16 = 67;
    /// Opaque type for arbitrary ASN.1 data (tag 68).
    pub const OPAQUE: u16 = 68;
    /// 64-bit counter type (tag 70).
    pub const COUNTER64: u16 = 70;
    /// No such object exception (tag 128).
    pub const NO_SUCH_OBJECT: u16 = 128;
    /// No such instance exception (tag 129).
    pub const NO_SUCH_INSTANCE: u16 = 129;
    /// End of MIB view exception (tag 130).
    pub const END_OF_MIB_VIEW: u16 = 130;
}

/// A typed SNMP value.
///
/// The exception variants (NoSuchObject, NoSuchInstance, EndOfMibView)
/// carry no payload; they stand in for a value in GET/GETNEXT responses.
/// Counter64 is only legal on sessions that negotiated SNMPv2 support.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i32),
    OctetString(Bytes),
    Null,
    ObjectIdentifier(Oid),
    IpAddress([u8; 4]),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Opaque(Bytes),
    Counter64(u64),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl Value {
    /// The RFC 2741 type tag for this value.
    pub fn tag(&self) -> u16 {
        match self {
            Value::Integer(_) => tag::INTEGER,
            Value::OctetString(_) => tag::OCTET_STRING,
            Value::Null => tag::NULL,
            Value::ObjectIdentifier(_) => tag::OBJECT_IDENTIFIER,
            Value::IpAddress(_) => tag::IP_ADDRESS,
            Value::Counter32(_) => tag::COUNTER32,
            Value::Gauge32(_) => tag::GAUGE32,
            Value::TimeTicks(_) => tag::TIMETICKS,
            Value::Opaque(_) => tag::OPAQUE,
            Value::Counter64(_) => tag::COUNTER64,
            Value::NoSuchObject => tag::NO_SUCH_OBJECT,
            Value::NoSuchInstance => tag::NO_SUCH_INSTANCE,
            Value::EndOfMibView => tag::END_OF_MIB_VIEW,
        }
    }

    /// True for the three exception markers.
    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            Value::NoSuchObject | Value::NoSuchInstance | Value::EndOfMibView
        )
    }

    /// Validate wire limits before encoding.
    ///
    /// Octet strings and opaques above 65535 bytes can never be framed;
    /// callers reject them at the call site rather than on the wire.
    pub fn validate(&self) -> Result<()> {
        match self {
            Value::OctetString(data) | Value::Opaque(data) => {
                if data.len() > MAX_OCTET_STRING_LEN {
                    return Err(Error::ValueTooLarge {
                        len: data.len(),
                        max: MAX_OCTET_STRING_LEN,
                    });
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Integer(v) => write!(f, "{}", v),
            Value::OctetString(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "{:?}", s),
                Err(_) => {
                    for b in data.iter() {
                        write!(f, "{:02x}", b)?;
                    }
                    Ok(())
                }
            },
            Value::Null => write!(f, "null"),
            Value::ObjectIdentifier(oid) => write!(f, "{}", oid),
            Value::IpAddress([a, b, c, d]) => write!(f, "{}.{}.{}.{}", a, b, c, d),
            Value::Counter32(v) => write!(f, "{}", v),
            Value::Gauge32(v) => write!(f, "{}", v),
            Value::TimeTicks(v) => write!(f, "{}", v),
            Value::Opaque(data) => {
                for b in data.iter() {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
            Value::Counter64(v) => write!(f, "{}", v),
            Value::NoSuchObject => write!(f, "noSuchObject"),
            Value::NoSuchInstance => write!(f, "noSuchInstance"),
            Value::EndOfMibView => write!(f, "endOfMibView"),
        }
    }
}
