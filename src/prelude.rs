//! Prelude module for convenient imports.
//!
//! ```rust,no_run
//! use async_agentx::prelude::*;
//! ```
//!
//! This imports the session surface ([`Session`], [`Endpoint`],
//! [`RegionOptions`]), the data model ([`Oid`], [`Value`], [`VarBind`]),
//! the handler traits, error handling, and the [`oid!`] macro.

pub use crate::error::{Error, Result};
pub use crate::handler::{BoxFuture, SetHandler, SetOutcome, Updater};
pub use crate::oid::Oid;
pub use crate::region::{RegionHandle, RegionOptions};
pub use crate::session::Session;
pub use crate::snapshot::SnapshotBuilder;
pub use crate::transport::Endpoint;
pub use crate::value::Value;
pub use crate::varbind::{SearchRange, VarBind};

#[doc(no_inline)]
pub use crate::oid;
