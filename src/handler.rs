//! Updater and set-handler contracts.
//!
//! Both traits are dyn-compatible: async hooks return [`BoxFuture`] so the
//! session can hold them as trait objects for its whole lifetime.

use std::future::Future;
use std::pin::Pin;

use crate::error::{ResponseError, Result};
use crate::snapshot::SnapshotBuilder;
use crate::varbind::VarBind;

/// Type alias for boxed async return type (dyn-compatible).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Refreshes a region's snapshot.
///
/// The scheduler invokes [`update`](Updater::update) once at registration
/// and then at the region's configured frequency. The builder starts empty
/// each time; on `Ok` the result replaces the published snapshot
/// atomically, on `Err` the previous snapshot is retained and the error is
/// logged.
///
/// # Example
///
/// ```rust
/// use async_agentx::handler::{BoxFuture, Updater};
/// use async_agentx::{Result, SnapshotBuilder, oid};
///
/// struct Uptime;
///
/// impl Updater for Uptime {
///     fn update<'a>(&'a self, builder: &'a mut SnapshotBuilder) -> BoxFuture<'a, Result<()>> {
///         Box::pin(async move {
///             builder.set_time_ticks(oid!(1, 0), 12345)?;
///             Ok(())
///         })
///     }
/// }
/// ```
pub trait Updater: Send + Sync + 'static {
    /// Populate a fresh snapshot for the region.
    fn update<'a>(&'a self, builder: &'a mut SnapshotBuilder) -> BoxFuture<'a, Result<()>>;
}

/// Error status a SET phase can report (RFC 2741 section 7.2.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetError {
    WrongType,
    WrongLength,
    WrongValue,
    WrongEncoding,
    NoAccess,
    NotWritable,
    NoCreation,
    InconsistentName,
    InconsistentValue,
    ResourceUnavailable,
    CommitFailed,
    UndoFailed,
    GenErr,
}

impl SetError {
    /// The response error code this status maps to.
    pub fn to_response_error(self) -> ResponseError {
        match self {
            Self::WrongType => ResponseError::WrongType,
            Self::WrongLength => ResponseError::WrongLength,
            Self::WrongValue => ResponseError::WrongValue,
            Self::WrongEncoding => ResponseError::WrongEncoding,
            Self::NoAccess => ResponseError::NoAccess,
            Self::NotWritable => ResponseError::NotWritable,
            Self::NoCreation => ResponseError::NoCreation,
            Self::InconsistentName => ResponseError::InconsistentName,
            Self::InconsistentValue => ResponseError::InconsistentValue,
            Self::ResourceUnavailable => ResponseError::ResourceUnavailable,
            Self::CommitFailed => ResponseError::CommitFailed,
            Self::UndoFailed => ResponseError::UndoFailed,
            Self::GenErr => ResponseError::GenErr,
        }
    }
}

/// Result of a single SET phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// The phase succeeded.
    Ok,
    /// The phase failed at the given 1-based VarBind index.
    Failed { status: SetError, index: u16 },
}

impl SetOutcome {
    /// A failure at `index` (1-based; 0 when no single VarBind is at fault).
    pub fn failed(status: SetError, index: u16) -> Self {
        Self::Failed { status, index }
    }

    /// Check if this outcome indicates success.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }
}

/// Processes writes for a region via the AgentX two-phase commit.
///
/// Per transaction the session invokes the hooks at most once each, only in
/// the order test, commit, undo, cleanup (later phases may be skipped, never
/// reordered). All hooks receive the full VarBind list of the transaction's
/// TestSet.
///
/// `test` must not change state; `commit` applies the writes; `undo`
/// reverts a commit when the master rolls the transaction back; `cleanup`
/// releases any resources held since `test`. Errors never propagate to the
/// master beyond the mapped status code.
pub trait SetHandler: Send + Sync + 'static {
    /// Validate that the writes could be applied (phase 1).
    fn test<'a>(&'a self, varbinds: &'a [VarBind]) -> BoxFuture<'a, SetOutcome>;

    /// Apply the writes (phase 2).
    fn commit<'a>(&'a self, varbinds: &'a [VarBind]) -> BoxFuture<'a, SetOutcome>;

    /// Revert a commit. Default reports success without doing anything.
    fn undo<'a>(&'a self, _varbinds: &'a [VarBind]) -> BoxFuture<'a, SetOutcome> {
        Box::pin(async { SetOutcome::Ok })
    }

    /// Release per-transaction resources. Default does nothing.
    fn cleanup<'a>(&'a self, _varbinds: &'a [VarBind]) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }
}
