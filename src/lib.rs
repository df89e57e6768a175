//! Async AgentX (RFC 2741) subagent toolkit.
//!
//! This crate implements the subagent side of the AgentX protocol: it
//! connects to a master SNMP agent over a stream socket, registers regions
//! of the OID namespace, and answers GET, GETNEXT, GETBULK, and two-phase
//! SET requests on their behalf.
//!
//! # Architecture
//!
//! ```text
//! inbound bytes -> framer -> PDU decoder -> session loop
//!                                              |
//!                            +-----------------+------------------+
//!                            |                 |                  |
//!                      region dispatch   two-phase SET      pending table
//!                            |            transactions     (our requests)
//!                     region snapshots
//!                            ^
//!                     updater tasks (periodic refresh, atomic publish)
//! ```
//!
//! Each [`Session`] runs one cooperative event loop that owns the
//! transport; updaters run as separate tasks and hand the loop immutable
//! snapshots through an atomic publish-replace cell. Reads observe either
//! the pre-refresh or post-refresh snapshot of a region, never a mix.
//!
//! # Getting started
//!
//! Implement [`handler::Updater`] for your data source, optionally
//! [`handler::SetHandler`] for writable regions, and register both under a
//! subtree; see the [`session`] module for a complete example.

pub mod error;
pub mod handler;
pub mod oid;
pub mod pdu;
pub mod region;
pub mod session;
pub mod snapshot;
pub mod transport;
pub mod trie;
pub mod value;
pub mod varbind;

pub mod prelude;

pub use error::{Error, ResponseError, Result};
pub use oid::Oid;
pub use region::{RegionHandle, RegionOptions};
pub use session::Session;
pub use snapshot::{Snapshot, SnapshotBuilder};
pub use transport::Endpoint;
pub use trie::OidTrie;
pub use value::Value;
pub use varbind::{SearchRange, VarBind};
