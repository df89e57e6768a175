//! Immutable region snapshots and the builder updaters populate.

use bytes::Bytes;

use crate::error::Result;
use crate::oid::Oid;
use crate::trie::OidTrie;
use crate::value::Value;

/// An immutable view of one region's bindings.
///
/// Built by an updater in a single refresh, then published atomically.
/// Requests read whichever snapshot was current when they arrived; a
/// publish never mutates a snapshot a reader already holds.
#[derive(Debug, Default)]
pub struct Snapshot {
    entries: OidTrie<Value>,
}

impl Snapshot {
    /// The empty snapshot a region serves before its first refresh.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Exact-match lookup by absolute OID.
    pub fn get(&self, name: &Oid) -> Option<&Value> {
        self.entries.get(name)
    }

    /// Smallest bound name greater than `name` (or equal, when `inclusive`).
    pub fn successor(&self, name: &Oid, inclusive: bool) -> Option<(Oid, &Value)> {
        self.entries.successor(name, inclusive)
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the region has no bindings.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Accumulates bindings for the snapshot under construction.
///
/// Suffixes are relative to the region root; each setter validates the
/// combined OID length and the value's wire limits before accepting it, so
/// nothing unencodable ever reaches a published snapshot.
#[derive(Debug)]
pub struct SnapshotBuilder {
    root: Oid,
    entries: OidTrie<Value>,
}

impl SnapshotBuilder {
    pub(crate) fn new(root: Oid) -> Self {
        Self {
            root,
            entries: OidTrie::new(),
        }
    }

    /// The region root this builder is anchored at.
    pub fn root(&self) -> &Oid {
        &self.root
    }

    /// Bind `root.suffix` to a value.
    pub fn set(&mut self, suffix: Oid, value: Value) -> Result<()> {
        value.validate()?;
        let name = self.root.child(&suffix)?;
        self.entries.insert(name, value);
        Ok(())
    }

    pub fn set_integer(&mut self, suffix: Oid, value: i32) -> Result<()> {
        self.set(suffix, Value::Integer(value))
    }

    pub fn set_octet_string(&mut self, suffix: Oid, value: impl Into<Bytes>) -> Result<()> {
        self.set(suffix, Value::OctetString(value.into()))
    }

    pub fn set_null(&mut self, suffix: Oid) -> Result<()> {
        self.set(suffix, Value::Null)
    }

    pub fn set_object_identifier(&mut self, suffix: Oid, value: Oid) -> Result<()> {
        self.set(suffix, Value::ObjectIdentifier(value))
    }

    pub fn set_ip_address(&mut self, suffix: Oid, value: [u8; 4]) -> Result<()> {
        self.set(suffix, Value::IpAddress(value))
    }

    pub fn set_counter32(&mut self, suffix: Oid, value: u32) -> Result<()> {
        self.set(suffix, Value::Counter32(value))
    }

    pub fn set_gauge32(&mut self, suffix: Oid, value: u32) -> Result<()> {
        self.set(suffix, Value::Gauge32(value))
    }

    pub fn set_time_ticks(&mut self, suffix: Oid, value: u32) -> Result<()> {
        self.set(suffix, Value::TimeTicks(value))
    }

    pub fn set_opaque(&mut self, suffix: Oid, value: impl Into<Bytes>) -> Result<()> {
        self.set(suffix, Value::Opaque(value.into()))
    }

    pub fn set_counter64(&mut self, suffix: Oid, value: u64) -> Result<()> {
        self.set(suffix, Value::Counter64(value))
    }

    /// Seal the accumulated bindings into an immutable snapshot.
    pub(crate) fn finish(self) -> Snapshot {
        Snapshot {
            entries: self.entries,
        }
    }
}
