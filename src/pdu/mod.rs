//! RFC 2741 PDU model and codec.
//!
//! Every PDU carries a 20-byte header followed by a 4-byte-aligned payload.
//! The byte order of all multi-byte fields is chosen per PDU by the
//! NETWORK_BYTE_ORDER header flag; [`Pdu`] records the order it was (or will
//! be) framed with so that `decode(encode(p)) == p` holds exactly.

mod decode;
mod encode;
mod wire;

pub use decode::RawHeader;

use bytes::Bytes;

use crate::error::ResponseError;
use crate::oid::Oid;
use crate::varbind::{SearchRange, VarBind};

/// Wire byte order for one PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Network byte order (NETWORK_BYTE_ORDER flag set).
    Big,
    /// Little-endian (flag clear).
    Little,
}

impl ByteOrder {
    /// The host's native order; preferred for PDUs this subagent originates.
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }
}

/// Header flag bits (RFC 2741 section 6.1).
pub mod flags {
    /// Register an instance rather than a subtree.
    pub const INSTANCE_REGISTRATION: u8 = 0x01;
    /// IndexAllocate: allocate a new index value.
    pub const NEW_INDEX: u8 = 0x02;
    /// IndexAllocate: allocate any index value.
    pub const ANY_INDEX: u8 = 0x04;
    /// A context octet string precedes the payload.
    pub const NON_DEFAULT_CONTEXT: u8 = 0x08;
    /// Multi-byte fields are big-endian.
    pub const NETWORK_BYTE_ORDER: u8 = 0x10;

    /// All defined flag bits.
    pub const ALL: u8 = 0x1F;
}

/// PDU type octet (RFC 2741 section 6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PduType {
    Open = 1,
    Close = 2,
    Register = 3,
    Unregister = 4,
    Get = 5,
    GetNext = 6,
    GetBulk = 7,
    TestSet = 8,
    CommitSet = 9,
    UndoSet = 10,
    CleanupSet = 11,
    Notify = 12,
    Ping = 13,
    IndexAllocate = 14,
    IndexDeallocate = 15,
    AddAgentCaps = 16,
    RemoveAgentCaps = 17,
    Response = 18,
}

impl PduType {
    /// Create from the wire octet.
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            1 => Self::Open,
            2 => Self::Close,
            3 => Self::Register,
            4 => Self::Unregister,
            5 => Self::Get,
            6 => Self::GetNext,
            7 => Self::GetBulk,
            8 => Self::TestSet,
            9 => Self::CommitSet,
            10 => Self::UndoSet,
            11 => Self::CleanupSet,
            12 => Self::Notify,
            13 => Self::Ping,
            14 => Self::IndexAllocate,
            15 => Self::IndexDeallocate,
            16 => Self::AddAgentCaps,
            17 => Self::RemoveAgentCaps,
            18 => Self::Response,
            _ => return None,
        })
    }

    /// The wire octet.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether a context octet string may precede this payload.
    pub const fn admits_context(self) -> bool {
        matches!(
            self,
            Self::Register
                | Self::Unregister
                | Self::Get
                | Self::GetNext
                | Self::GetBulk
                | Self::TestSet
                | Self::Notify
                | Self::Ping
                | Self::IndexAllocate
                | Self::IndexDeallocate
                | Self::AddAgentCaps
                | Self::RemoveAgentCaps
        )
    }
}

/// Close PDU reason codes (RFC 2741 section 6.2.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum CloseReason {
    Other,
    ParseError,
    ProtocolError,
    Timeouts,
    Shutdown,
    ByManager,
    /// Unknown/future reason code.
    Unknown(u8),
}

impl CloseReason {
    /// Create from the wire octet.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Other,
            2 => Self::ParseError,
            3 => Self::ProtocolError,
            4 => Self::Timeouts,
            5 => Self::Shutdown,
            6 => Self::ByManager,
            other => Self::Unknown(other),
        }
    }

    /// The wire octet.
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Other => 1,
            Self::ParseError => 2,
            Self::ProtocolError => 3,
            Self::Timeouts => 4,
            Self::Shutdown => 5,
            Self::ByManager => 6,
            Self::Unknown(code) => *code,
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Other => write!(f, "reasonOther"),
            Self::ParseError => write!(f, "reasonParseError"),
            Self::ProtocolError => write!(f, "reasonProtocolError"),
            Self::Timeouts => write!(f, "reasonTimeouts"),
            Self::Shutdown => write!(f, "reasonShutdown"),
            Self::ByManager => write!(f, "reasonByManager"),
            Self::Unknown(code) => write!(f, "reasonUnknown({})", code),
        }
    }
}

/// Open PDU payload.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenPayload {
    /// Session-wide request timeout in seconds (0 = master default).
    pub timeout: u8,
    /// Identifier of the subagent (an enterprise OID, possibly empty).
    pub id: Oid,
    /// Human-readable subagent description.
    pub description: Bytes,
}

/// Register PDU payload.
///
/// `upper_bound` is only on the wire when `range_subid` is nonzero; it is
/// carried as plain `u32` here and ignored otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterPayload {
    /// Per-region timeout override in seconds (0 = session default).
    pub timeout: u8,
    /// Registration priority; lower wins (default 127).
    pub priority: u8,
    /// 1-based index of the ranged sub-identifier, or 0.
    pub range_subid: u8,
    /// Root of the claimed subtree.
    pub subtree: Oid,
    /// Upper bound of the ranged sub-identifier when `range_subid != 0`.
    pub upper_bound: u32,
    /// INSTANCE_REGISTRATION: subtree names a fully-qualified instance.
    pub instance: bool,
}

/// Unregister PDU payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnregisterPayload {
    pub priority: u8,
    pub range_subid: u8,
    pub subtree: Oid,
    pub upper_bound: u32,
}

/// GetBulk PDU payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetBulkPayload {
    /// Leading ranges answered exactly once.
    pub non_repeaters: u16,
    /// Repetition count for the remaining ranges.
    pub max_repetitions: u16,
    pub ranges: Vec<SearchRange>,
}

/// IndexAllocate PDU payload with its flag bits.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexAllocatePayload {
    pub new_index: bool,
    pub any_index: bool,
    pub varbinds: Vec<VarBind>,
}

/// Response PDU payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponsePayload {
    /// Master's notion of sysUpTime; subagents send 0.
    pub sys_uptime: u32,
    pub error: ResponseError,
    /// 1-based index of the failing VarBind, 0 on success.
    pub index: u16,
    pub varbinds: Vec<VarBind>,
}

impl ResponsePayload {
    /// A success payload carrying `varbinds`.
    pub fn success(varbinds: Vec<VarBind>) -> Self {
        Self {
            sys_uptime: 0,
            error: ResponseError::NoError,
            index: 0,
            varbinds,
        }
    }

    /// An error payload.
    pub fn error(error: ResponseError, index: u16, varbinds: Vec<VarBind>) -> Self {
        Self {
            sys_uptime: 0,
            error,
            index,
            varbinds,
        }
    }
}

/// Typed PDU payload, one variant per RFC 2741 PDU type.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Open(OpenPayload),
    Close { reason: CloseReason },
    Register(RegisterPayload),
    Unregister(UnregisterPayload),
    Get { ranges: Vec<SearchRange> },
    GetNext { ranges: Vec<SearchRange> },
    GetBulk(GetBulkPayload),
    TestSet { varbinds: Vec<VarBind> },
    CommitSet,
    UndoSet,
    CleanupSet,
    Notify { varbinds: Vec<VarBind> },
    Ping,
    IndexAllocate(IndexAllocatePayload),
    IndexDeallocate { varbinds: Vec<VarBind> },
    AddAgentCaps { id: Oid, description: Bytes },
    RemoveAgentCaps { id: Oid },
    Response(ResponsePayload),
}

impl Payload {
    /// The PDU type this payload belongs to.
    pub fn pdu_type(&self) -> PduType {
        match self {
            Payload::Open(_) => PduType::Open,
            Payload::Close { .. } => PduType::Close,
            Payload::Register(_) => PduType::Register,
            Payload::Unregister(_) => PduType::Unregister,
            Payload::Get { .. } => PduType::Get,
            Payload::GetNext { .. } => PduType::GetNext,
            Payload::GetBulk(_) => PduType::GetBulk,
            Payload::TestSet { .. } => PduType::TestSet,
            Payload::CommitSet => PduType::CommitSet,
            Payload::UndoSet => PduType::UndoSet,
            Payload::CleanupSet => PduType::CleanupSet,
            Payload::Notify { .. } => PduType::Notify,
            Payload::Ping => PduType::Ping,
            Payload::IndexAllocate(_) => PduType::IndexAllocate,
            Payload::IndexDeallocate { .. } => PduType::IndexDeallocate,
            Payload::AddAgentCaps { .. } => PduType::AddAgentCaps,
            Payload::RemoveAgentCaps { .. } => PduType::RemoveAgentCaps,
            Payload::Response(_) => PduType::Response,
        }
    }
}

/// A complete AgentX PDU.
#[derive(Debug, Clone, PartialEq)]
pub struct Pdu {
    pub session_id: u32,
    pub transaction_id: u32,
    pub packet_id: u32,
    pub byte_order: ByteOrder,
    /// Context octet string (NON_DEFAULT_CONTEXT).
    pub context: Option<Bytes>,
    pub payload: Payload,
}

impl Pdu {
    /// Create a PDU with zeroed ids, native byte order, and no context.
    pub fn new(payload: Payload) -> Self {
        Self {
            session_id: 0,
            transaction_id: 0,
            packet_id: 0,
            byte_order: ByteOrder::native(),
            context: None,
            payload,
        }
    }

    /// Set the header ids.
    pub fn with_ids(mut self, session_id: u32, transaction_id: u32, packet_id: u32) -> Self {
        self.session_id = session_id;
        self.transaction_id = transaction_id;
        self.packet_id = packet_id;
        self
    }

    /// Build a Response correlated to `request`, echoing its ids and byte order.
    pub fn response_to(request: &Pdu, payload: ResponsePayload) -> Self {
        Self {
            session_id: request.session_id,
            transaction_id: request.transaction_id,
            packet_id: request.packet_id,
            byte_order: request.byte_order,
            context: None,
            payload: Payload::Response(payload),
        }
    }

    /// The PDU type octet.
    pub fn pdu_type(&self) -> PduType {
        self.payload.pdu_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdu_type_octets() {
        assert_eq!(PduType::Open.as_u8(), 1);
        assert_eq!(PduType::Response.as_u8(), 18);
        for t in 1..=18u8 {
            assert_eq!(PduType::from_u8(t).unwrap().as_u8(), t);
        }
        assert!(PduType::from_u8(0).is_none());
        assert!(PduType::from_u8(19).is_none());
    }

    #[test]
    fn test_context_admissibility() {
        assert!(PduType::Get.admits_context());
        assert!(PduType::Ping.admits_context());
        assert!(!PduType::Open.admits_context());
        assert!(!PduType::Close.admits_context());
        assert!(!PduType::Response.admits_context());
    }

    #[test]
    fn test_close_reason_roundtrip() {
        for code in 1..=6u8 {
            assert_eq!(CloseReason::from_u8(code).as_u8(), code);
        }
        assert_eq!(CloseReason::from_u8(200), CloseReason::Unknown(200));
    }

    #[test]
    fn test_response_correlation() {
        let mut request = Pdu::new(Payload::Ping).with_ids(7, 8, 9);
        request.byte_order = ByteOrder::Big;

        let response = Pdu::response_to(&request, ResponsePayload::success(vec![]));
        assert_eq!(response.session_id, 7);
        assert_eq!(response.transaction_id, 8);
        assert_eq!(response.packet_id, 9);
        assert_eq!(response.byte_order, ByteOrder::Big);
        assert_eq!(response.pdu_type(), PduType::Response);
    }
}
