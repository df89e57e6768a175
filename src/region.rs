//! Region registry.
//!
//! A region claims a subtree of the OID namespace, owns the updater that
//! refreshes it, and publishes the snapshot requests read. The table keeps
//! regions ordered by subtree and rejects overlapping claims locally,
//! before the master ever sees a Register PDU.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use bytes::Bytes;

use crate::error::{Error, ResponseError, Result};
use crate::handler::{SetHandler, Updater};
use crate::oid::Oid;
use crate::snapshot::Snapshot;

/// Per-region registration options.
///
/// Defaults follow RFC 2741: priority 127, whole-subtree registration
/// (no ranged sub-identifier), default context.
pub struct RegionOptions {
    pub(crate) frequency: Duration,
    pub(crate) priority: u8,
    pub(crate) range_subid: u8,
    pub(crate) upper_bound: u32,
    pub(crate) context: Option<Bytes>,
    pub(crate) set_handler: Option<Arc<dyn SetHandler>>,
}

impl RegionOptions {
    /// Options for a region refreshed every `frequency`.
    pub fn new(frequency: Duration) -> Self {
        Self {
            frequency,
            priority: 127,
            range_subid: 0,
            upper_bound: 0,
            context: None,
            set_handler: None,
        }
    }

    /// Registration priority; lower values win contested subtrees.
    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Register a range of subtrees by varying the `range_subid`-th
    /// sub-identifier up to `upper_bound`.
    pub fn range_subid(mut self, range_subid: u8, upper_bound: u32) -> Self {
        self.range_subid = range_subid;
        self.upper_bound = upper_bound;
        self
    }

    /// Register within a non-default context.
    pub fn context(mut self, context: impl Into<Bytes>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Attach a set handler; without one the region is read-only.
    pub fn set_handler(mut self, handler: Arc<dyn SetHandler>) -> Self {
        self.set_handler = Some(handler);
        self
    }
}

/// Opaque handle identifying a registered region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionHandle(pub(crate) u64);

/// A registered region and its published snapshot.
pub(crate) struct Region {
    pub id: u64,
    pub subtree: Oid,
    pub frequency: Duration,
    pub priority: u8,
    pub range_subid: u8,
    pub upper_bound: u32,
    pub context: Option<Bytes>,
    pub updater: Arc<dyn Updater>,
    pub set_handler: Option<Arc<dyn SetHandler>>,
    published: RwLock<Arc<Snapshot>>,
}

impl Region {
    pub fn new(id: u64, subtree: Oid, updater: Arc<dyn Updater>, options: RegionOptions) -> Self {
        Self {
            id,
            subtree,
            frequency: options.frequency,
            priority: options.priority,
            range_subid: options.range_subid,
            upper_bound: options.upper_bound,
            context: options.context,
            updater,
            set_handler: options.set_handler,
            published: RwLock::new(Arc::new(Snapshot::empty())),
        }
    }

    /// The currently published snapshot.
    ///
    /// Readers hold the returned `Arc` for the duration of one request; a
    /// concurrent publish swaps the cell without disturbing them.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.published.read().unwrap().clone()
    }

    /// Replace the published snapshot.
    pub fn publish(&self, snapshot: Snapshot) {
        *self.published.write().unwrap() = Arc::new(snapshot);
    }
}

/// Regions held by one session, ordered by subtree.
#[derive(Default)]
pub(crate) struct RegionTable {
    regions: Vec<Arc<Region>>,
}

impl RegionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a region, rejecting overlap with an existing subtree.
    pub fn insert(&mut self, region: Arc<Region>) -> Result<()> {
        for existing in &self.regions {
            if existing.subtree.is_prefix_of(&region.subtree)
                || region.subtree.is_prefix_of(&existing.subtree)
            {
                return Err(Error::Registration {
                    subtree: region.subtree.clone(),
                    status: ResponseError::DuplicateRegistration,
                });
            }
        }
        let at = self
            .regions
            .partition_point(|r| r.subtree < region.subtree);
        self.regions.insert(at, region);
        Ok(())
    }

    pub fn remove(&mut self, id: u64) -> Option<Arc<Region>> {
        let at = self.regions.iter().position(|r| r.id == id)?;
        Some(self.regions.remove(at))
    }

    pub fn get(&self, id: u64) -> Option<&Arc<Region>> {
        self.regions.iter().find(|r| r.id == id)
    }

    /// The region whose subtree contains `name`, if any.
    pub fn find_containing(&self, name: &Oid) -> Option<&Arc<Region>> {
        self.regions.iter().find(|r| r.subtree.is_prefix_of(name))
    }

    /// Regions in ascending subtree order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Region>> {
        self.regions.iter()
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}
