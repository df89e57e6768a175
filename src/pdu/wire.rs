//! Byte-order-parameterized wire primitives.
//!
//! RFC 2741 selects big- or little-endian per PDU via a header flag, so
//! every multi-byte read and write threads the PDU's [`ByteOrder`] through
//! these helpers rather than fixing an endianness at the codec boundary.

use bytes::{BufMut, Bytes, BytesMut};

use super::ByteOrder;
use crate::error::{Error, Result, WireErrorKind};
use crate::oid::{MAX_OID_LEN, Oid};
use crate::value::{MAX_OCTET_STRING_LEN, Value, tag};
use crate::varbind::{SearchRange, VarBind};

// Sub-identifier index where 1.3.6.1.x prefix compression applies.
const INTERNET_PREFIX: [u32; 4] = [1, 3, 6, 1];

/// Growable encode buffer.
pub struct Writer {
    buf: BytesMut,
    order: ByteOrder,
}

impl Writer {
    pub fn new(order: ByteOrder) -> Self {
        Self {
            buf: BytesMut::with_capacity(256),
            order,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        match self.order {
            ByteOrder::Big => self.buf.put_u16(v),
            ByteOrder::Little => self.buf.put_u16_le(v),
        }
    }

    pub fn put_u32(&mut self, v: u32) {
        match self.order {
            ByteOrder::Big => self.buf.put_u32(v),
            ByteOrder::Little => self.buf.put_u32_le(v),
        }
    }

    pub fn put_u64(&mut self, v: u64) {
        match self.order {
            ByteOrder::Big => self.buf.put_u64(v),
            ByteOrder::Little => self.buf.put_u64_le(v),
        }
    }

    /// Object identifier with optional 1.3.6.1.x prefix compression.
    pub fn put_oid(&mut self, oid: &Oid, include: bool) -> Result<()> {
        let arcs = oid.arcs();
        if arcs.len() > MAX_OID_LEN {
            return Err(Error::wire(
                self.len(),
                WireErrorKind::OidTooLong { count: arcs.len() },
            ));
        }

        let (prefix, rest) = match arcs {
            [a, b, c, d, fifth, rest @ ..]
                if [*a, *b, *c, *d] == INTERNET_PREFIX && *fifth <= 255 && *fifth > 0 =>
            {
                (*fifth as u8, rest)
            }
            _ => (0, arcs),
        };

        self.put_u8(rest.len() as u8);
        self.put_u8(prefix);
        self.put_u8(include as u8);
        self.put_u8(0);
        for &arc in rest {
            self.put_u32(arc);
        }
        Ok(())
    }

    /// Length-prefixed octet string, zero-padded to 4-byte alignment.
    pub fn put_octet_string(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > MAX_OCTET_STRING_LEN {
            return Err(Error::ValueTooLarge {
                len: data.len(),
                max: MAX_OCTET_STRING_LEN,
            });
        }
        self.put_u32(data.len() as u32);
        self.buf.put_slice(data);
        let pad = (4 - data.len() % 4) % 4;
        for _ in 0..pad {
            self.buf.put_u8(0);
        }
        Ok(())
    }

    pub fn put_value(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Integer(v) => self.put_u32(*v as u32),
            Value::Counter32(v) | Value::Gauge32(v) | Value::TimeTicks(v) => self.put_u32(*v),
            Value::Counter64(v) => self.put_u64(*v),
            Value::OctetString(data) | Value::Opaque(data) => self.put_octet_string(data)?,
            Value::ObjectIdentifier(oid) => self.put_oid(oid, false)?,
            Value::IpAddress(addr) => self.put_octet_string(addr)?,
            Value::Null | Value::NoSuchObject | Value::NoSuchInstance | Value::EndOfMibView => {}
        }
        Ok(())
    }

    pub fn put_varbind(&mut self, vb: &VarBind) -> Result<()> {
        self.put_u16(vb.value.tag());
        self.put_u16(0);
        self.put_oid(&vb.name, false)?;
        self.put_value(&vb.value)
    }

    pub fn put_search_range(&mut self, range: &SearchRange) -> Result<()> {
        self.put_oid(&range.start, range.include)?;
        self.put_oid(&range.end, false)
    }

    /// Append pre-encoded bytes verbatim.
    pub fn put_raw(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Bounds-checked decode cursor.
///
/// `base` is the cursor's offset within the enclosing frame so that error
/// offsets point into the original byte stream, not the payload slice.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    base: usize,
    order: ByteOrder,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8], base: usize, order: ByteOrder) -> Self {
        Self {
            buf,
            pos: 0,
            base,
            order,
        }
    }

    /// Absolute offset within the frame, for error reporting.
    pub fn offset(&self) -> usize {
        self.base + self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::wire(
                self.offset(),
                WireErrorKind::Truncated {
                    needed: n,
                    available: self.remaining(),
                },
            ));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        let bytes: [u8; 2] = self.take(2)?.try_into().unwrap();
        Ok(match self.order {
            ByteOrder::Big => u16::from_be_bytes(bytes),
            ByteOrder::Little => u16::from_le_bytes(bytes),
        })
    }

    pub fn u32(&mut self) -> Result<u32> {
        let bytes: [u8; 4] = self.take(4)?.try_into().unwrap();
        Ok(match self.order {
            ByteOrder::Big => u32::from_be_bytes(bytes),
            ByteOrder::Little => u32::from_le_bytes(bytes),
        })
    }

    pub fn u64(&mut self) -> Result<u64> {
        let bytes: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(match self.order {
            ByteOrder::Big => u64::from_be_bytes(bytes),
            ByteOrder::Little => u64::from_le_bytes(bytes),
        })
    }

    /// Object identifier plus its include flag.
    pub fn oid(&mut self) -> Result<(Oid, bool)> {
        let start = self.offset();
        let n_subid = self.u8()? as usize;
        let prefix = self.u8()?;
        let include = match self.u8()? {
            0 => false,
            1 => true,
            other => return Err(Error::wire(start + 2, WireErrorKind::BadInclude(other))),
        };
        if self.u8()? != 0 {
            return Err(Error::wire(start + 3, WireErrorKind::NonZeroReserved));
        }

        let total = n_subid + if prefix != 0 { 5 } else { 0 };
        if total > MAX_OID_LEN {
            return Err(Error::wire(start, WireErrorKind::OidTooLong { count: total }));
        }

        let mut arcs = Vec::with_capacity(total);
        if prefix != 0 {
            arcs.extend_from_slice(&INTERNET_PREFIX);
            arcs.push(prefix as u32);
        }
        for _ in 0..n_subid {
            arcs.push(self.u32()?);
        }
        Ok((Oid::from_arcs(arcs)?, include))
    }

    pub fn octet_string(&mut self) -> Result<Bytes> {
        let start = self.offset();
        let len = self.u32()? as usize;
        if len > MAX_OCTET_STRING_LEN {
            return Err(Error::wire(
                start,
                WireErrorKind::OctetStringTooLong { length: len },
            ));
        }
        let data = Bytes::copy_from_slice(self.take(len)?);
        let pad = (4 - len % 4) % 4;
        let padding = self.take(pad)?;
        if padding.iter().any(|&b| b != 0) {
            return Err(Error::wire(start, WireErrorKind::BadPadding));
        }
        Ok(data)
    }

    pub fn value(&mut self, value_tag: u16) -> Result<Value> {
        let start = self.offset();
        Ok(match value_tag {
            tag::INTEGER => Value::Integer(self.u32()? as i32),
            tag::OCTET_STRING => Value::OctetString(self.octet_string()?),
            tag::NULL => Value::Null,
            tag::OBJECT_IDENTIFIER => Value::ObjectIdentifier(self.oid()?.0),
            tag::IP_ADDRESS => {
                let data = self.octet_string()?;
                let addr: [u8; 4] = data.as_ref().try_into().map_err(|_| {
                    Error::wire(start, WireErrorKind::BadIpAddressLength { length: data.len() })
                })?;
                Value::IpAddress(addr)
            }
            tag::COUNTER32 => Value::Counter32(self.u32()?),
            tag::GAUGE32 => Value::Gauge32(self.u32()?),
            tag::TIMETICKS => Value::TimeTicks(self.u32()?),
            tag::OPAQUE => Value::Opaque(self.octet_string()?),
            tag::COUNTER64 => Value::Counter64(self.u64()?),
            tag::NO_SUCH_OBJECT => Value::NoSuchObject,
            tag::NO_SUCH_INSTANCE => Value::NoSuchInstance,
            tag::END_OF_MIB_VIEW => Value::EndOfMibView,
            other => {
                return Err(Error::wire(start, WireErrorKind::UnknownValueTag(other)));
            }
        })
    }

    pub fn varbind(&mut self) -> Result<VarBind> {
        let start = self.offset();
        let value_tag = self.u16()?;
        if self.u16()? != 0 {
            return Err(Error::wire(start + 2, WireErrorKind::NonZeroReserved));
        }
        let (name, _) = self.oid()?;
        let value = self.value(value_tag)?;
        Ok(VarBind::new(name, value))
    }

    pub fn search_range(&mut self) -> Result<SearchRange> {
        let (start, include) = self.oid()?;
        let (end, _) = self.oid()?;
        Ok(SearchRange::new(start, include, end))
    }

    /// Drain the remaining bytes as a VarBind list.
    pub fn varbind_list(&mut self) -> Result<Vec<VarBind>> {
        let mut varbinds = Vec::new();
        while !self.is_empty() {
            varbinds.push(self.varbind()?);
        }
        Ok(varbinds)
    }

    /// Drain the remaining bytes as a SearchRange list.
    pub fn search_range_list(&mut self) -> Result<Vec<SearchRange>> {
        let mut ranges = Vec::new();
        while !self.is_empty() {
            ranges.push(self.search_range()?);
        }
        Ok(ranges)
    }

    /// Fail if any bytes remain.
    pub fn expect_empty(&self) -> Result<()> {
        if !self.is_empty() {
            return Err(Error::wire(
                self.offset(),
                WireErrorKind::TrailingBytes {
                    remaining: self.remaining(),
                },
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oid;

    fn roundtrip_oid(order: ByteOrder, oid: &Oid, include: bool) -> (Oid, bool) {
        let mut w = Writer::new(order);
        w.put_oid(oid, include).unwrap();
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes, 0, order);
        let out = r.oid().unwrap();
        r.expect_empty().unwrap();
        out
    }

    #[test]
    fn test_oid_prefix_compression() {
        let mut w = Writer::new(ByteOrder::Big);
        w.put_oid(&oid!(1, 3, 6, 1, 4, 1, 12345), false).unwrap();
        let bytes = w.into_bytes();
        // Header (n_subid=2, prefix=4, include=0, reserved) + two arcs.
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[..4], &[2, 4, 0, 0]);
        assert_eq!(&bytes[4..8], &1u32.to_be_bytes());
        assert_eq!(&bytes[8..12], &12345u32.to_be_bytes());
    }

    #[test]
    fn test_oid_no_compression_outside_internet() {
        let mut w = Writer::new(ByteOrder::Big);
        w.put_oid(&oid!(2, 5, 6), false).unwrap();
        let bytes = w.into_bytes();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[..4], &[3, 0, 0, 0]);
    }

    #[test]
    fn test_oid_fifth_arc_too_wide_for_prefix() {
        // 256 does not fit the prefix octet, so arcs encode verbatim.
        let wide = oid!(1, 3, 6, 1, 256, 7);
        let mut w = Writer::new(ByteOrder::Big);
        w.put_oid(&wide, false).unwrap();
        assert_eq!(w.into_bytes()[..2], [6, 0]);
        assert_eq!(roundtrip_oid(ByteOrder::Big, &wide, false).0, wide);
    }

    #[test]
    fn test_oid_roundtrip_both_orders() {
        for order in [ByteOrder::Big, ByteOrder::Little] {
            for oid in [
                Oid::empty(),
                oid!(0),
                oid!(1, 3, 6, 1, 4, 1, 12345, 1, 0),
                oid!(2, 4294967295, 17),
            ] {
                for include in [false, true] {
                    assert_eq!(roundtrip_oid(order, &oid, include), (oid.clone(), include));
                }
            }
        }
    }

    #[test]
    fn test_oid_rejects_bad_include_and_reserved() {
        let mut r = Reader::new(&[0, 0, 2, 0], 0, ByteOrder::Big);
        assert!(matches!(
            r.oid(),
            Err(Error::Wire {
                kind: WireErrorKind::BadInclude(2),
                ..
            })
        ));

        let mut r = Reader::new(&[0, 0, 0, 7], 0, ByteOrder::Big);
        assert!(matches!(
            r.oid(),
            Err(Error::Wire {
                kind: WireErrorKind::NonZeroReserved,
                ..
            })
        ));
    }

    #[test]
    fn test_octet_string_padding() {
        let mut w = Writer::new(ByteOrder::Big);
        w.put_octet_string(b"test1").unwrap();
        let bytes = w.into_bytes();
        // 4 length + 5 data + 3 pad.
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[..4], &5u32.to_be_bytes());
        assert_eq!(&bytes[4..9], b"test1");
        assert_eq!(&bytes[9..], &[0, 0, 0]);

        let mut r = Reader::new(&bytes, 0, ByteOrder::Big);
        assert_eq!(r.octet_string().unwrap(), Bytes::from_static(b"test1"));
        r.expect_empty().unwrap();
    }

    #[test]
    fn test_octet_string_rejects_nonzero_padding() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&1u32.to_be_bytes());
        frame.extend_from_slice(&[b'x', 0, 0, 1]);
        let mut r = Reader::new(&frame, 0, ByteOrder::Big);
        assert!(matches!(
            r.octet_string(),
            Err(Error::Wire {
                kind: WireErrorKind::BadPadding,
                ..
            })
        ));
    }

    #[test]
    fn test_truncation_reports_frame_offset() {
        let mut r = Reader::new(&[0x01], 20, ByteOrder::Big);
        let err = r.u32().unwrap_err();
        assert!(matches!(
            err,
            Error::Wire {
                offset: 20,
                kind: WireErrorKind::Truncated {
                    needed: 4,
                    available: 1
                },
            }
        ));
    }

    #[test]
    fn test_varbind_roundtrip_all_types() {
        let cases = [
            Value::Integer(-42),
            Value::OctetString(Bytes::from_static(b"hello")),
            Value::Null,
            Value::ObjectIdentifier(oid!(1, 3, 6, 1, 2)),
            Value::IpAddress([192, 168, 0, 1]),
            Value::Counter32(4000000000),
            Value::Gauge32(1),
            Value::TimeTicks(0),
            Value::Opaque(Bytes::from_static(&[0xde, 0xad])),
            Value::Counter64(u64::MAX),
            Value::NoSuchObject,
            Value::NoSuchInstance,
            Value::EndOfMibView,
        ];
        for order in [ByteOrder::Big, ByteOrder::Little] {
            for value in &cases {
                let vb = VarBind::new(oid!(1, 3, 6, 1, 4, 1, 12345, 1, 0), value.clone());
                let mut w = Writer::new(order);
                w.put_varbind(&vb).unwrap();
                let bytes = w.into_bytes();
                assert_eq!(bytes.len() % 4, 0, "unaligned varbind for {:?}", value);
                let mut r = Reader::new(&bytes, 0, order);
                assert_eq!(r.varbind().unwrap(), vb);
                r.expect_empty().unwrap();
            }
        }
    }

    #[test]
    fn test_search_range_roundtrip() {
        let range = SearchRange::new(oid!(1, 3, 6, 1, 2, 1), true, oid!(1, 3, 6, 1, 2, 2));
        let mut w = Writer::new(ByteOrder::Little);
        w.put_search_range(&range).unwrap();
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes, 0, ByteOrder::Little);
        assert_eq!(r.search_range().unwrap(), range);
    }
}
