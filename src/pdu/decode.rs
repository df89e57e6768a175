//! PDU decoding.

use super::encode::HEADER_LEN;
use super::wire::Reader;
use super::{
    ByteOrder, CloseReason, GetBulkPayload, IndexAllocatePayload, OpenPayload, Payload, Pdu,
    PduType, RegisterPayload, ResponsePayload, UnregisterPayload, flags,
};
use crate::error::{Error, ResponseError, Result, WireErrorKind};

/// Parsed PDU header, prior to payload interpretation.
///
/// The transport frames on this: it learns `payload_length` (and the byte
/// order needed to read it) before the payload arrives, so a payload that
/// later fails to decode can still be skipped without losing stream sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawHeader {
    pub pdu_type: u8,
    pub flags: u8,
    pub session_id: u32,
    pub transaction_id: u32,
    pub packet_id: u32,
    pub payload_length: u32,
}

impl RawHeader {
    /// Header size on the wire.
    pub const LEN: usize = HEADER_LEN;

    /// Parse the fixed 20-byte header.
    ///
    /// Validates version, reserved byte, defined flag bits, and payload
    /// alignment; anything failing here means the stream cannot be re-framed.
    pub fn parse(bytes: &[u8; Self::LEN]) -> Result<Self> {
        if bytes[0] != 1 {
            return Err(Error::wire(0, WireErrorKind::BadVersion(bytes[0])));
        }
        let flag_bits = bytes[2];
        if flag_bits & !flags::ALL != 0 {
            return Err(Error::wire(
                2,
                WireErrorKind::UnknownFlags(flag_bits & !flags::ALL),
            ));
        }
        if bytes[3] != 0 {
            return Err(Error::wire(3, WireErrorKind::NonZeroReserved));
        }

        let order = if flag_bits & flags::NETWORK_BYTE_ORDER != 0 {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        };
        let mut r = Reader::new(&bytes[4..], 4, order);
        let session_id = r.u32()?;
        let transaction_id = r.u32()?;
        let packet_id = r.u32()?;
        let payload_length = r.u32()?;
        if payload_length % 4 != 0 {
            return Err(Error::wire(
                16,
                WireErrorKind::UnalignedPayload {
                    length: payload_length,
                },
            ));
        }

        Ok(Self {
            pdu_type: bytes[1],
            flags: flag_bits,
            session_id,
            transaction_id,
            packet_id,
            payload_length,
        })
    }

    /// Byte order selected by the NETWORK_BYTE_ORDER flag.
    pub fn byte_order(&self) -> ByteOrder {
        if self.flags & flags::NETWORK_BYTE_ORDER != 0 {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }
}

impl Pdu {
    /// Decode a complete frame (header plus payload).
    pub fn decode(frame: &[u8]) -> Result<Pdu> {
        if frame.len() < RawHeader::LEN {
            return Err(Error::wire(
                0,
                WireErrorKind::Truncated {
                    needed: RawHeader::LEN,
                    available: frame.len(),
                },
            ));
        }
        let header = RawHeader::parse(frame[..RawHeader::LEN].try_into().unwrap())?;
        let payload = &frame[RawHeader::LEN..];
        if payload.len() != header.payload_length as usize {
            return Err(Error::wire(
                16,
                WireErrorKind::PayloadLengthMismatch {
                    declared: header.payload_length,
                    actual: payload.len(),
                },
            ));
        }
        Self::decode_frame(&header, payload)
    }

    /// Decode a payload against an already-parsed header.
    pub fn decode_frame(header: &RawHeader, payload: &[u8]) -> Result<Pdu> {
        let pdu_type = PduType::from_u8(header.pdu_type)
            .ok_or_else(|| Error::wire(1, WireErrorKind::UnknownPduType(header.pdu_type)))?;

        let mut allowed = flags::NETWORK_BYTE_ORDER;
        if pdu_type.admits_context() {
            allowed |= flags::NON_DEFAULT_CONTEXT;
        }
        match pdu_type {
            PduType::Register => allowed |= flags::INSTANCE_REGISTRATION,
            PduType::IndexAllocate => allowed |= flags::NEW_INDEX | flags::ANY_INDEX,
            _ => {}
        }
        let stray = header.flags & !allowed;
        if stray != 0 {
            let kind = if stray & flags::NON_DEFAULT_CONTEXT != 0 {
                WireErrorKind::UnexpectedContext
            } else {
                WireErrorKind::UnexpectedFlag(stray)
            };
            return Err(Error::wire(2, kind));
        }

        let order = header.byte_order();
        let mut r = Reader::new(payload, RawHeader::LEN, order);

        let context = if header.flags & flags::NON_DEFAULT_CONTEXT != 0 {
            Some(r.octet_string()?)
        } else {
            None
        };

        let payload = match pdu_type {
            PduType::Open => {
                let timeout = r.u8()?;
                reserved3(&mut r)?;
                let (id, _) = r.oid()?;
                let description = r.octet_string()?;
                Payload::Open(OpenPayload {
                    timeout,
                    id,
                    description,
                })
            }
            PduType::Close => {
                let reason = CloseReason::from_u8(r.u8()?);
                reserved3(&mut r)?;
                Payload::Close { reason }
            }
            PduType::Register => {
                let timeout = r.u8()?;
                let priority = r.u8()?;
                let range_subid = r.u8()?;
                reserved1(&mut r)?;
                let (subtree, _) = r.oid()?;
                let upper_bound = if range_subid != 0 { r.u32()? } else { 0 };
                Payload::Register(RegisterPayload {
                    timeout,
                    priority,
                    range_subid,
                    subtree,
                    upper_bound,
                    instance: header.flags & flags::INSTANCE_REGISTRATION != 0,
                })
            }
            PduType::Unregister => {
                reserved1(&mut r)?;
                let priority = r.u8()?;
                let range_subid = r.u8()?;
                reserved1(&mut r)?;
                let (subtree, _) = r.oid()?;
                let upper_bound = if range_subid != 0 { r.u32()? } else { 0 };
                Payload::Unregister(UnregisterPayload {
                    priority,
                    range_subid,
                    subtree,
                    upper_bound,
                })
            }
            PduType::Get => Payload::Get {
                ranges: r.search_range_list()?,
            },
            PduType::GetNext => Payload::GetNext {
                ranges: r.search_range_list()?,
            },
            PduType::GetBulk => {
                let non_repeaters = r.u16()?;
                let max_repetitions = r.u16()?;
                Payload::GetBulk(GetBulkPayload {
                    non_repeaters,
                    max_repetitions,
                    ranges: r.search_range_list()?,
                })
            }
            PduType::TestSet => Payload::TestSet {
                varbinds: r.varbind_list()?,
            },
            PduType::CommitSet => Payload::CommitSet,
            PduType::UndoSet => Payload::UndoSet,
            PduType::CleanupSet => Payload::CleanupSet,
            PduType::Notify => Payload::Notify {
                varbinds: r.varbind_list()?,
            },
            PduType::Ping => Payload::Ping,
            PduType::IndexAllocate => Payload::IndexAllocate(IndexAllocatePayload {
                new_index: header.flags & flags::NEW_INDEX != 0,
                any_index: header.flags & flags::ANY_INDEX != 0,
                varbinds: r.varbind_list()?,
            }),
            PduType::IndexDeallocate => Payload::IndexDeallocate {
                varbinds: r.varbind_list()?,
            },
            PduType::AddAgentCaps => {
                let (id, _) = r.oid()?;
                let description = r.octet_string()?;
                Payload::AddAgentCaps { id, description }
            }
            PduType::RemoveAgentCaps => {
                let (id, _) = r.oid()?;
                Payload::RemoveAgentCaps { id }
            }
            PduType::Response => {
                let sys_uptime = r.u32()?;
                let error = ResponseError::from_u16(r.u16()?);
                let index = r.u16()?;
                Payload::Response(ResponsePayload {
                    sys_uptime,
                    error,
                    index,
                    varbinds: r.varbind_list()?,
                })
            }
        };

        r.expect_empty()?;
        Ok(Pdu {
            session_id: header.session_id,
            transaction_id: header.transaction_id,
            packet_id: header.packet_id,
            byte_order: order,
            context,
            payload,
        })
    }
}

fn reserved1(r: &mut Reader<'_>) -> Result<()> {
    let offset = r.offset();
    if r.u8()? != 0 {
        return Err(Error::wire(offset, WireErrorKind::NonZeroReserved));
    }
    Ok(())
}

fn reserved3(r: &mut Reader<'_>) -> Result<()> {
    for _ in 0..3 {
        reserved1(r)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid;
    use crate::oid::Oid;
    use crate::value::Value;
    use crate::varbind::{SearchRange, VarBind};
    use bytes::Bytes;

    fn all_payloads() -> Vec<Payload> {
        vec![
            Payload::Open(OpenPayload {
                timeout: 5,
                id: oid!(1, 3, 6, 1, 4, 1, 12345),
                description: Bytes::from_static(b"test"),
            }),
            Payload::Close {
                reason: CloseReason::Shutdown,
            },
            Payload::Register(RegisterPayload {
                timeout: 0,
                priority: 127,
                range_subid: 0,
                subtree: oid!(1, 3, 6, 1, 4, 1, 12345),
                upper_bound: 0,
                instance: false,
            }),
            Payload::Register(RegisterPayload {
                timeout: 10,
                priority: 1,
                range_subid: 8,
                subtree: oid!(1, 3, 6, 1, 4, 1, 12345, 1),
                upper_bound: 42,
                instance: true,
            }),
            Payload::Unregister(UnregisterPayload {
                priority: 127,
                range_subid: 0,
                subtree: oid!(1, 3, 6, 1, 4, 1, 12345),
                upper_bound: 0,
            }),
            Payload::Get {
                ranges: vec![SearchRange::exact(oid!(1, 3, 6, 1, 2, 1, 1, 1, 0))],
            },
            Payload::GetNext {
                ranges: vec![SearchRange::new(
                    oid!(1, 3, 6, 1, 2, 1),
                    false,
                    oid!(1, 3, 6, 1, 2, 2),
                )],
            },
            Payload::GetBulk(GetBulkPayload {
                non_repeaters: 1,
                max_repetitions: 5,
                ranges: vec![
                    SearchRange::exact(oid!(1, 3, 6, 1, 2, 1, 1, 3, 0)),
                    SearchRange::new(oid!(1, 3, 6, 1, 2, 1, 2), true, Oid::empty()),
                ],
            }),
            Payload::TestSet {
                varbinds: vec![VarBind::new(
                    oid!(1, 3, 6, 1, 4, 1, 12345, 1, 0),
                    Value::Integer(7),
                )],
            },
            Payload::CommitSet,
            Payload::UndoSet,
            Payload::CleanupSet,
            Payload::Notify {
                varbinds: vec![VarBind::new(
                    oid!(1, 3, 6, 1, 6, 3, 1, 1, 4, 1, 0),
                    Value::ObjectIdentifier(oid!(1, 3, 6, 1, 4, 1, 12345, 0, 1)),
                )],
            },
            Payload::Ping,
            Payload::IndexAllocate(IndexAllocatePayload {
                new_index: true,
                any_index: false,
                varbinds: vec![VarBind::new(oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 1), Value::Integer(0))],
            }),
            Payload::IndexDeallocate {
                varbinds: vec![VarBind::new(
                    oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 1),
                    Value::Integer(12),
                )],
            },
            Payload::AddAgentCaps {
                id: oid!(1, 3, 6, 1, 4, 1, 12345, 99),
                description: Bytes::from_static(b"caps"),
            },
            Payload::RemoveAgentCaps {
                id: oid!(1, 3, 6, 1, 4, 1, 12345, 99),
            },
            Payload::Response(ResponsePayload {
                sys_uptime: 1234,
                error: ResponseError::NoError,
                index: 0,
                varbinds: vec![VarBind::new(
                    oid!(1, 3, 6, 1, 2, 1, 1, 1, 0),
                    Value::OctetString(Bytes::from_static(b"hello")),
                )],
            }),
        ]
    }

    #[test]
    fn test_roundtrip_every_variant_both_orders() {
        for order in [ByteOrder::Big, ByteOrder::Little] {
            for payload in all_payloads() {
                let mut pdu = Pdu::new(payload).with_ids(11, 22, 33);
                pdu.byte_order = order;
                if pdu.pdu_type().admits_context() {
                    pdu.context = Some(Bytes::from_static(b"ctx"));
                }

                let frame = pdu.encode().unwrap();
                let decoded = Pdu::decode(&frame).unwrap();
                assert_eq!(decoded, pdu);
                // Encoded length is header plus the declared payload length.
                assert_eq!(
                    frame.len(),
                    RawHeader::LEN
                        + RawHeader::parse(frame[..20].try_into().unwrap())
                            .unwrap()
                            .payload_length as usize
                );
            }
        }
    }

    #[test]
    fn test_decode_rejects_bad_version() {
        let mut frame = Pdu::new(Payload::Ping).encode().unwrap().to_vec();
        frame[0] = 2;
        assert!(matches!(
            Pdu::decode(&frame),
            Err(Error::Wire {
                kind: WireErrorKind::BadVersion(2),
                ..
            })
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let mut frame = Pdu::new(Payload::Ping).encode().unwrap().to_vec();
        frame[1] = 42;
        assert!(matches!(
            Pdu::decode(&frame),
            Err(Error::Wire {
                kind: WireErrorKind::UnknownPduType(42),
                ..
            })
        ));
    }

    #[test]
    fn test_decode_rejects_reserved_and_flag_misuse() {
        let mut frame = Pdu::new(Payload::Ping).encode().unwrap().to_vec();
        frame[3] = 1;
        assert!(matches!(
            Pdu::decode(&frame),
            Err(Error::Wire {
                kind: WireErrorKind::NonZeroReserved,
                ..
            })
        ));

        // INSTANCE_REGISTRATION on a Ping.
        let mut frame = Pdu::new(Payload::Ping).encode().unwrap().to_vec();
        frame[2] |= flags::INSTANCE_REGISTRATION;
        assert!(matches!(
            Pdu::decode(&frame),
            Err(Error::Wire {
                kind: WireErrorKind::UnexpectedFlag(_),
                ..
            })
        ));

        // Context flag on a Response.
        let mut frame = Pdu::new(Payload::Response(ResponsePayload::success(vec![])))
            .encode()
            .unwrap()
            .to_vec();
        frame[2] |= flags::NON_DEFAULT_CONTEXT;
        assert!(matches!(
            Pdu::decode(&frame),
            Err(Error::Wire {
                kind: WireErrorKind::UnexpectedContext,
                ..
            })
        ));

        // Undefined high bit.
        let mut frame = Pdu::new(Payload::Ping).encode().unwrap().to_vec();
        frame[2] |= 0x80;
        assert!(matches!(
            Pdu::decode(&frame),
            Err(Error::Wire {
                kind: WireErrorKind::UnknownFlags(0x80),
                ..
            })
        ));
    }

    #[test]
    fn test_decode_rejects_length_mismatch_and_trailing() {
        let frame = Pdu::new(Payload::Ping).encode().unwrap();

        let mut longer = frame.to_vec();
        longer.extend_from_slice(&[0, 0, 0, 0]);
        assert!(matches!(
            Pdu::decode(&longer),
            Err(Error::Wire {
                kind: WireErrorKind::PayloadLengthMismatch { .. },
                ..
            })
        ));

        // Declare the extra bytes and they become trailing payload garbage.
        let mut pdu = Pdu::new(Payload::Ping);
        pdu.byte_order = ByteOrder::Big;
        let mut padded = pdu.encode().unwrap().to_vec();
        padded[16..20].copy_from_slice(&4u32.to_be_bytes());
        padded.extend_from_slice(&[0, 0, 0, 0]);
        assert!(matches!(
            Pdu::decode(&padded),
            Err(Error::Wire {
                kind: WireErrorKind::TrailingBytes { remaining: 4 },
                ..
            })
        ));
    }

    #[test]
    fn test_decode_truncated_header() {
        assert!(matches!(
            Pdu::decode(&[1, 13, 0]),
            Err(Error::Wire {
                kind: WireErrorKind::Truncated { .. },
                ..
            })
        ));
    }

    #[test]
    fn test_header_parse_is_order_aware() {
        let mut pdu = Pdu::new(Payload::Close {
            reason: CloseReason::ByManager,
        })
        .with_ids(0x01020304, 0, 0xA1B2C3D4);
        pdu.byte_order = ByteOrder::Little;

        let frame = pdu.encode().unwrap();
        let header = RawHeader::parse(frame[..20].try_into().unwrap()).unwrap();
        assert_eq!(header.byte_order(), ByteOrder::Little);
        assert_eq!(header.session_id, 0x01020304);
        assert_eq!(header.packet_id, 0xA1B2C3D4);
        assert_eq!(header.payload_length, 4);
    }
}
