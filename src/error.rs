//! Error types for async-agentx.
//!
//! All errors are `#[non_exhaustive]` to allow adding new variants without breaking changes.

use std::time::Duration;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// OID validation error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OidErrorKind {
    /// Empty OID string.
    Empty,
    /// Empty component between dots (e.g. "1..3").
    EmptyComponent,
    /// Leading zero in a multi-digit component.
    LeadingZero,
    /// Sub-identifier exceeds 2^32 - 1.
    ArcOverflow,
    /// OID has too many sub-identifiers (exceeds MAX_OID_LEN).
    TooLong { count: usize, max: usize },
    /// Non-digit character in a component.
    InvalidCharacter,
}

impl std::fmt::Display for OidErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty OID"),
            Self::EmptyComponent => write!(f, "empty component"),
            Self::LeadingZero => write!(f, "leading zero in component"),
            Self::ArcOverflow => write!(f, "sub-identifier exceeds 2^32 - 1"),
            Self::TooLong { count, max } => {
                write!(f, "OID has {} sub-identifiers, exceeds maximum {}", count, max)
            }
            Self::InvalidCharacter => write!(f, "non-digit character in component"),
        }
    }
}

/// Wire decode/encode error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireErrorKind {
    /// Data truncated unexpectedly.
    Truncated { needed: usize, available: usize },
    /// Header version is not 1.
    BadVersion(u8),
    /// Unknown PDU type octet.
    UnknownPduType(u8),
    /// Unknown value type tag in a VarBind.
    UnknownValueTag(u16),
    /// Reserved byte is nonzero.
    NonZeroReserved,
    /// Undefined header flag bits are set.
    UnknownFlags(u8),
    /// A defined flag is set on a PDU type it does not apply to.
    UnexpectedFlag(u8),
    /// NON_DEFAULT_CONTEXT set on a PDU type that cannot carry a context.
    UnexpectedContext,
    /// Header payload_length disagrees with the bytes actually present.
    PayloadLengthMismatch { declared: u32, actual: usize },
    /// payload_length is not a multiple of 4.
    UnalignedPayload { length: u32 },
    /// OID exceeds maximum sub-identifier count.
    OidTooLong { count: usize },
    /// OID include octet is neither 0 nor 1.
    BadInclude(u8),
    /// Octet string exceeds 65535 bytes.
    OctetStringTooLong { length: usize },
    /// Octet string padding contains nonzero bytes.
    BadPadding,
    /// IpAddress payload is not exactly 4 bytes.
    BadIpAddressLength { length: usize },
    /// Bytes left over after decoding the full payload.
    TrailingBytes { remaining: usize },
}

impl std::fmt::Display for WireErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated { needed, available } => {
                write!(f, "need {} bytes but only {} remaining", needed, available)
            }
            Self::BadVersion(v) => write!(f, "unsupported AgentX version: {}", v),
            Self::UnknownPduType(t) => write!(f, "unknown PDU type: {}", t),
            Self::UnknownValueTag(t) => write!(f, "unknown value type tag: 0x{:04X}", t),
            Self::NonZeroReserved => write!(f, "reserved byte is nonzero"),
            Self::UnknownFlags(bits) => write!(f, "undefined flag bits set: 0x{:02X}", bits),
            Self::UnexpectedFlag(flag) => {
                write!(f, "flag 0x{:02X} not applicable to this PDU type", flag)
            }
            Self::UnexpectedContext => write!(f, "PDU type cannot carry a context"),
            Self::PayloadLengthMismatch { declared, actual } => {
                write!(f, "payload_length {} but {} bytes present", declared, actual)
            }
            Self::UnalignedPayload { length } => {
                write!(f, "payload_length {} is not 4-byte aligned", length)
            }
            Self::OidTooLong { count } => {
                write!(f, "OID has {} sub-identifiers, exceeds maximum 128", count)
            }
            Self::BadInclude(v) => write!(f, "OID include octet must be 0 or 1, got {}", v),
            Self::OctetStringTooLong { length } => {
                write!(f, "octet string length {} exceeds 65535", length)
            }
            Self::BadPadding => write!(f, "nonzero octet string padding"),
            Self::BadIpAddressLength { length } => {
                write!(f, "IP address must be 4 bytes, got {}", length)
            }
            Self::TrailingBytes { remaining } => {
                write!(f, "{} trailing bytes after PDU payload", remaining)
            }
        }
    }
}

/// AgentX response error codes (RFC 2741 section 6.2.16).
///
/// Covers the administrative range assigned by AgentX plus the SNMPv2
/// error statuses that flow through TestSet/CommitSet responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ResponseError {
    NoError,
    GenErr,
    NoAccess,
    WrongType,
    WrongLength,
    WrongEncoding,
    WrongValue,
    NoCreation,
    InconsistentValue,
    ResourceUnavailable,
    CommitFailed,
    UndoFailed,
    NotWritable,
    InconsistentName,
    OpenFailed,
    NotOpen,
    IndexWrongType,
    IndexAlreadyAllocated,
    IndexNoneAvailable,
    IndexNotAllocated,
    UnsupportedContext,
    DuplicateRegistration,
    UnknownRegistration,
    UnknownAgentCaps,
    ParseError,
    RequestDenied,
    ProcessingError,
    /// Unknown/future error code.
    Unknown(u16),
}

impl ResponseError {
    /// Create from the raw wire code.
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => Self::NoError,
            5 => Self::GenErr,
            6 => Self::NoAccess,
            7 => Self::WrongType,
            8 => Self::WrongLength,
            9 => Self::WrongEncoding,
            10 => Self::WrongValue,
            11 => Self::NoCreation,
            12 => Self::InconsistentValue,
            13 => Self::ResourceUnavailable,
            14 => Self::CommitFailed,
            15 => Self::UndoFailed,
            17 => Self::NotWritable,
            18 => Self::InconsistentName,
            256 => Self::OpenFailed,
            257 => Self::NotOpen,
            258 => Self::IndexWrongType,
            259 => Self::IndexAlreadyAllocated,
            260 => Self::IndexNoneAvailable,
            261 => Self::IndexNotAllocated,
            262 => Self::UnsupportedContext,
            263 => Self::DuplicateRegistration,
            264 => Self::UnknownRegistration,
            265 => Self::UnknownAgentCaps,
            266 => Self::ParseError,
            267 => Self::RequestDenied,
            268 => Self::ProcessingError,
            other => Self::Unknown(other),
        }
    }

    /// Convert to the raw wire code.
    pub fn as_u16(&self) -> u16 {
        match self {
            Self::NoError => 0,
            Self::GenErr => 5,
            Self::NoAccess => 6,
            Self::WrongType => 7,
            Self::WrongLength => 8,
            Self::WrongEncoding => 9,
            Self::WrongValue => 10,
            Self::NoCreation => 11,
            Self::InconsistentValue => 12,
            Self::ResourceUnavailable => 13,
            Self::CommitFailed => 14,
            Self::UndoFailed => 15,
            Self::NotWritable => 17,
            Self::InconsistentName => 18,
            Self::OpenFailed => 256,
            Self::NotOpen => 257,
            Self::IndexWrongType => 258,
            Self::IndexAlreadyAllocated => 259,
            Self::IndexNoneAvailable => 260,
            Self::IndexNotAllocated => 261,
            Self::UnsupportedContext => 262,
            Self::DuplicateRegistration => 263,
            Self::UnknownRegistration => 264,
            Self::UnknownAgentCaps => 265,
            Self::ParseError => 266,
            Self::RequestDenied => 267,
            Self::ProcessingError => 268,
            Self::Unknown(code) => *code,
        }
    }

    /// Check whether this code means success.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::NoError)
    }
}

impl std::fmt::Display for ResponseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoError => write!(f, "noAgentXError"),
            Self::GenErr => write!(f, "genErr"),
            Self::NoAccess => write!(f, "noAccess"),
            Self::WrongType => write!(f, "wrongType"),
            Self::WrongLength => write!(f, "wrongLength"),
            Self::WrongEncoding => write!(f, "wrongEncoding"),
            Self::WrongValue => write!(f, "wrongValue"),
            Self::NoCreation => write!(f, "noCreation"),
            Self::InconsistentValue => write!(f, "inconsistentValue"),
            Self::ResourceUnavailable => write!(f, "resourceUnavailable"),
            Self::CommitFailed => write!(f, "commitFailed"),
            Self::UndoFailed => write!(f, "undoFailed"),
            Self::NotWritable => write!(f, "notWritable"),
            Self::InconsistentName => write!(f, "inconsistentName"),
            Self::OpenFailed => write!(f, "openFailed"),
            Self::NotOpen => write!(f, "notOpen"),
            Self::IndexWrongType => write!(f, "indexWrongType"),
            Self::IndexAlreadyAllocated => write!(f, "indexAlreadyAllocated"),
            Self::IndexNoneAvailable => write!(f, "indexNoneAvailable"),
            Self::IndexNotAllocated => write!(f, "indexNotAllocated"),
            Self::UnsupportedContext => write!(f, "unsupportedContext"),
            Self::DuplicateRegistration => write!(f, "duplicateRegistration"),
            Self::UnknownRegistration => write!(f, "unknownRegistration"),
            Self::UnknownAgentCaps => write!(f, "unknownAgentCaps"),
            Self::ParseError => write!(f, "parseError"),
            Self::RequestDenied => write!(f, "requestDenied"),
            Self::ProcessingError => write!(f, "processingError"),
            Self::Unknown(code) => write!(f, "unknown({})", code),
        }
    }
}

/// Library error type.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid OID format.
    #[error("invalid OID: {kind}")]
    InvalidOid {
        kind: OidErrorKind,
        input: Option<Box<str>>, // Only allocated when parsing string input
    },

    /// Value payload exceeds the wire limit (octet strings are capped at 65535 bytes).
    #[error("value too large: {len} bytes exceeds maximum {max}")]
    ValueTooLarge { len: usize, max: usize },

    /// I/O error on the master connection.
    #[error("connection error{}: {source}", endpoint.as_deref().map(|e| format!(" ({})", e)).unwrap_or_default())]
    Connection {
        endpoint: Option<String>,
        #[source]
        source: std::io::Error,
    },

    /// Master rejected a Register or Unregister PDU.
    #[error("registration of {subtree} failed: {status}")]
    Registration {
        subtree: crate::oid::Oid,
        status: ResponseError,
    },

    /// Malformed PDU on the wire.
    #[error("wire error at offset {offset}: {kind}")]
    Wire { offset: usize, kind: WireErrorKind },

    /// A request to the master did not complete in time.
    #[error("timeout after {elapsed:?} (packet_id={packet_id})")]
    Timeout { elapsed: Duration, packet_id: u32 },

    /// A region updater failed; the previous snapshot is retained.
    #[error("updater for {subtree} failed: {source}")]
    Updater {
        subtree: crate::oid::Oid,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Operation on a session that has been stopped.
    #[error("session is closed")]
    SessionClosed,
}

impl Error {
    /// Create a wire error.
    pub fn wire(offset: usize, kind: WireErrorKind) -> Self {
        Self::Wire { offset, kind }
    }

    /// Create an invalid OID error from a kind (no input string).
    pub fn invalid_oid(kind: OidErrorKind) -> Self {
        Self::InvalidOid { kind, input: None }
    }

    /// Create an invalid OID error with the input string that failed.
    pub fn invalid_oid_with_input(kind: OidErrorKind, input: impl Into<Box<str>>) -> Self {
        Self::InvalidOid {
            kind,
            input: Some(input.into()),
        }
    }

    /// Create a connection error without an endpoint.
    pub fn io(source: std::io::Error) -> Self {
        Self::Connection {
            endpoint: None,
            source,
        }
    }

    /// Whether this error should tear down the session transport.
    ///
    /// Wire errors with an intact framing layer are recoverable: the PDU is
    /// dropped and the read loop continues.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Wire { .. })
    }
}
