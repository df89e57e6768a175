//! Shared test utilities for async-agentx integration tests.

// Allow dead code since not all test files use all utilities
#![allow(dead_code)]

mod master;

pub use master::MockMaster;

use std::sync::{Arc, Mutex};

use async_agentx::handler::{BoxFuture, SetHandler, SetOutcome, Updater};
use async_agentx::{Oid, Result, SnapshotBuilder, Value};

/// Updater serving a fixed table of suffix/value pairs.
pub struct TableUpdater {
    entries: Vec<(Oid, Value)>,
}

impl TableUpdater {
    pub fn new(entries: Vec<(Oid, Value)>) -> Self {
        Self { entries }
    }
}

impl Updater for TableUpdater {
    fn update<'a>(&'a self, builder: &'a mut SnapshotBuilder) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            for (suffix, value) in &self.entries {
                builder.set(suffix.clone(), value.clone())?;
            }
            Ok(())
        })
    }
}

/// Set handler that records every hook invocation and can be told to fail
/// individual phases.
pub struct RecordingSetHandler {
    pub calls: Arc<Mutex<Vec<&'static str>>>,
    pub fail_test: bool,
    pub fail_commit: bool,
}

impl RecordingSetHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            fail_test: false,
            fail_commit: false,
        })
    }

    pub fn failing_commit() -> Arc<Self> {
        Arc::new(Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            fail_test: false,
            fail_commit: true,
        })
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

impl SetHandler for RecordingSetHandler {
    fn test<'a>(
        &'a self,
        _varbinds: &'a [async_agentx::VarBind],
    ) -> BoxFuture<'a, SetOutcome> {
        Box::pin(async move {
            self.calls.lock().unwrap().push("test");
            if self.fail_test {
                SetOutcome::failed(async_agentx::handler::SetError::WrongValue, 1)
            } else {
                SetOutcome::Ok
            }
        })
    }

    fn commit<'a>(
        &'a self,
        _varbinds: &'a [async_agentx::VarBind],
    ) -> BoxFuture<'a, SetOutcome> {
        Box::pin(async move {
            self.calls.lock().unwrap().push("commit");
            if self.fail_commit {
                SetOutcome::failed(async_agentx::handler::SetError::CommitFailed, 1)
            } else {
                SetOutcome::Ok
            }
        })
    }

    fn undo<'a>(
        &'a self,
        _varbinds: &'a [async_agentx::VarBind],
    ) -> BoxFuture<'a, SetOutcome> {
        Box::pin(async move {
            self.calls.lock().unwrap().push("undo");
            SetOutcome::Ok
        })
    }

    fn cleanup<'a>(&'a self, _varbinds: &'a [async_agentx::VarBind]) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.calls.lock().unwrap().push("cleanup");
        })
    }
}
