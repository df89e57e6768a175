//! PDU encoding.

use bytes::Bytes;

use super::wire::Writer;
use super::{ByteOrder, Payload, Pdu, flags};
use crate::error::{Error, Result, WireErrorKind};

/// Header length in bytes.
pub(crate) const HEADER_LEN: usize = 20;

impl Pdu {
    /// Encode the full frame (header plus payload) in this PDU's byte order.
    ///
    /// Fails on values that can never be framed (oversized octet strings,
    /// over-long OIDs) or a context on a PDU type that cannot carry one;
    /// nothing is written to the wire in that case.
    pub fn encode(&self) -> Result<Bytes> {
        let pdu_type = self.pdu_type();
        if self.context.is_some() && !pdu_type.admits_context() {
            return Err(Error::wire(HEADER_LEN, WireErrorKind::UnexpectedContext));
        }

        let mut body = Writer::new(self.byte_order);
        if let Some(context) = &self.context {
            body.put_octet_string(context)?;
        }
        self.payload.encode_into(&mut body)?;
        let payload = body.into_bytes();

        let mut frame = Writer::new(self.byte_order);
        frame.put_u8(1);
        frame.put_u8(pdu_type.as_u8());
        frame.put_u8(self.flag_bits());
        frame.put_u8(0);
        frame.put_u32(self.session_id);
        frame.put_u32(self.transaction_id);
        frame.put_u32(self.packet_id);
        frame.put_u32(payload.len() as u32);
        frame.put_raw(&payload);
        Ok(frame.into_bytes())
    }

    fn flag_bits(&self) -> u8 {
        let mut bits = 0;
        if self.byte_order == ByteOrder::Big {
            bits |= flags::NETWORK_BYTE_ORDER;
        }
        if self.context.is_some() {
            bits |= flags::NON_DEFAULT_CONTEXT;
        }
        match &self.payload {
            Payload::Register(r) if r.instance => bits |= flags::INSTANCE_REGISTRATION,
            Payload::IndexAllocate(p) => {
                if p.new_index {
                    bits |= flags::NEW_INDEX;
                }
                if p.any_index {
                    bits |= flags::ANY_INDEX;
                }
            }
            _ => {}
        }
        bits
    }
}

impl Payload {
    fn encode_into(&self, w: &mut Writer) -> Result<()> {
        match self {
            Payload::Open(open) => {
                w.put_u8(open.timeout);
                w.put_u8(0);
                w.put_u8(0);
                w.put_u8(0);
                w.put_oid(&open.id, false)?;
                w.put_octet_string(&open.description)?;
            }
            Payload::Close { reason } => {
                w.put_u8(reason.as_u8());
                w.put_u8(0);
                w.put_u8(0);
                w.put_u8(0);
            }
            Payload::Register(r) => {
                w.put_u8(r.timeout);
                w.put_u8(r.priority);
                w.put_u8(r.range_subid);
                w.put_u8(0);
                w.put_oid(&r.subtree, false)?;
                if r.range_subid != 0 {
                    w.put_u32(r.upper_bound);
                }
            }
            Payload::Unregister(u) => {
                w.put_u8(0);
                w.put_u8(u.priority);
                w.put_u8(u.range_subid);
                w.put_u8(0);
                w.put_oid(&u.subtree, false)?;
                if u.range_subid != 0 {
                    w.put_u32(u.upper_bound);
                }
            }
            Payload::Get { ranges } | Payload::GetNext { ranges } => {
                for range in ranges {
                    w.put_search_range(range)?;
                }
            }
            Payload::GetBulk(bulk) => {
                w.put_u16(bulk.non_repeaters);
                w.put_u16(bulk.max_repetitions);
                for range in &bulk.ranges {
                    w.put_search_range(range)?;
                }
            }
            Payload::TestSet { varbinds }
            | Payload::Notify { varbinds }
            | Payload::IndexDeallocate { varbinds } => {
                for vb in varbinds {
                    w.put_varbind(vb)?;
                }
            }
            Payload::IndexAllocate(p) => {
                for vb in &p.varbinds {
                    w.put_varbind(vb)?;
                }
            }
            Payload::CommitSet | Payload::UndoSet | Payload::CleanupSet | Payload::Ping => {}
            Payload::AddAgentCaps { id, description } => {
                w.put_oid(id, false)?;
                w.put_octet_string(description)?;
            }
            Payload::RemoveAgentCaps { id } => {
                w.put_oid(id, false)?;
            }
            Payload::Response(resp) => {
                w.put_u32(resp.sys_uptime);
                w.put_u16(resp.error.as_u16());
                w.put_u16(resp.index);
                for vb in &resp.varbinds {
                    w.put_varbind(vb)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::oid;
    use crate::oid::Oid;
    use crate::pdu::{OpenPayload, ResponsePayload};
    use crate::value::Value;
    use crate::varbind::VarBind;

    #[test]
    fn test_encode_open_header_and_length() {
        let mut pdu = Pdu::new(Payload::Open(OpenPayload {
            timeout: 5,
            id: oid!(1, 3, 6, 1, 4, 1, 12345),
            description: Bytes::from_static(b"test"),
        }));
        pdu.byte_order = ByteOrder::Big;
        pdu.packet_id = 1;

        let bytes = pdu.encode().unwrap();
        // timeout block (4) + compressed OID (4 + 2 arcs) + padded string (8).
        assert_eq!(bytes.len(), HEADER_LEN + 4 + 12 + 8);

        assert_eq!(bytes[0], 1); // version
        assert_eq!(bytes[1], 1); // type Open
        assert_eq!(bytes[2], flags::NETWORK_BYTE_ORDER);
        assert_eq!(bytes[3], 0);
        assert_eq!(&bytes[16..20], &24u32.to_be_bytes()); // payload_length
        assert_eq!(bytes[20], 5); // timeout
    }

    #[test]
    fn test_payload_length_matches_frame() {
        let pdu = Pdu::new(Payload::Response(ResponsePayload::success(vec![
            VarBind::new(oid!(1, 3, 6, 1, 2, 1, 1, 1, 0), Value::Integer(42)),
        ])))
        .with_ids(1, 2, 3);

        let bytes = pdu.encode().unwrap();
        let declared = match pdu.byte_order {
            ByteOrder::Big => u32::from_be_bytes(bytes[16..20].try_into().unwrap()),
            ByteOrder::Little => u32::from_le_bytes(bytes[16..20].try_into().unwrap()),
        };
        assert_eq!(declared as usize, bytes.len() - HEADER_LEN);
        assert_eq!(declared % 4, 0);
    }

    #[test]
    fn test_context_flag_set_when_present() {
        let mut pdu = Pdu::new(Payload::Ping);
        pdu.context = Some(Bytes::from_static(b"backup"));
        let bytes = pdu.encode().unwrap();
        assert_ne!(bytes[2] & flags::NON_DEFAULT_CONTEXT, 0);
    }

    #[test]
    fn test_context_rejected_on_open() {
        let mut pdu = Pdu::new(Payload::Open(OpenPayload {
            timeout: 0,
            id: Oid::empty(),
            description: Bytes::new(),
        }));
        pdu.context = Some(Bytes::from_static(b"ctx"));
        assert!(matches!(
            pdu.encode(),
            Err(Error::Wire {
                kind: WireErrorKind::UnexpectedContext,
                ..
            })
        ));
    }

    #[test]
    fn test_oversized_octet_string_never_reaches_wire() {
        let pdu = Pdu::new(Payload::TestSet {
            varbinds: vec![VarBind::new(
                oid!(1, 3),
                Value::OctetString(Bytes::from(vec![0u8; 70000])),
            )],
        });
        assert!(matches!(pdu.encode(), Err(Error::ValueTooLarge { .. })));
    }
}
