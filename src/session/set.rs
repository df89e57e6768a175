//! Two-phase SET transactions.
//!
//! Each transaction is keyed by the PDU's transactionID and walks the
//! TestSet -> CommitSet -> UndoSet -> CleanupSet ladder. Handler hooks run
//! at most once per transaction and only in that order; a PDU arriving out
//! of sequence is answered with processingError without touching the
//! handler. State never survives the session: a dropped connection forgets
//! all open transactions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::ResponseError;
use crate::handler::{SetError, SetHandler, SetOutcome};
use crate::pdu::ResponsePayload;
use crate::varbind::VarBind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    TestedOk,
    TestFailed,
    Committed,
    CommitFailed,
    Undone,
}

struct SetTransaction {
    varbinds: Vec<VarBind>,
    // None when TestSet never reached a writable region; such transactions
    // only wait for their CleanupSet.
    handler: Option<Arc<dyn SetHandler>>,
    phase: Phase,
    touched: Instant,
}

/// Open SET transactions for one session.
pub(crate) struct SetTable {
    transactions: HashMap<u32, SetTransaction>,
    timeout: Duration,
}

impl SetTable {
    pub fn new(timeout: Duration) -> Self {
        Self {
            transactions: HashMap::new(),
            timeout,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Handle TestSet.
    ///
    /// `resolved` carries the region's set handler, or the error status and
    /// 1-based index to report when some VarBind has no writable home.
    pub async fn test(
        &mut self,
        transaction_id: u32,
        varbinds: Vec<VarBind>,
        resolved: std::result::Result<Arc<dyn SetHandler>, (SetError, u16)>,
    ) -> ResponsePayload {
        // A master never legally reuses an open transaction id; treat a
        // duplicate as a lost CleanupSet and retire the stale state first.
        if self.transactions.contains_key(&transaction_id) {
            tracing::warn!(
                agentx.transaction_id = transaction_id,
                "TestSet for an open transaction, running synthetic cleanup"
            );
            self.cleanup(transaction_id).await;
        }

        match resolved {
            Err((status, index)) => {
                self.transactions.insert(
                    transaction_id,
                    SetTransaction {
                        varbinds,
                        handler: None,
                        phase: Phase::TestFailed,
                        touched: Instant::now(),
                    },
                );
                ResponsePayload::error(status.to_response_error(), index, vec![])
            }
            Ok(handler) => {
                let outcome = handler.test(&varbinds).await;
                let (phase, response) = match outcome {
                    SetOutcome::Ok => (Phase::TestedOk, ResponsePayload::success(vec![])),
                    SetOutcome::Failed { status, index } => (
                        Phase::TestFailed,
                        ResponsePayload::error(status.to_response_error(), index, vec![]),
                    ),
                };
                self.transactions.insert(
                    transaction_id,
                    SetTransaction {
                        varbinds,
                        handler: Some(handler),
                        phase,
                        touched: Instant::now(),
                    },
                );
                response
            }
        }
    }

    /// Handle CommitSet; only legal from Tested-OK.
    pub async fn commit(&mut self, transaction_id: u32) -> ResponsePayload {
        let Some(txn) = self.transactions.get_mut(&transaction_id) else {
            return ResponsePayload::error(ResponseError::ProcessingError, 0, vec![]);
        };
        txn.touched = Instant::now();
        let Some(handler) = txn.handler.clone() else {
            return ResponsePayload::error(ResponseError::ProcessingError, 0, vec![]);
        };
        if txn.phase != Phase::TestedOk {
            return ResponsePayload::error(ResponseError::ProcessingError, 0, vec![]);
        }

        match handler.commit(&txn.varbinds).await {
            SetOutcome::Ok => {
                txn.phase = Phase::Committed;
                ResponsePayload::success(vec![])
            }
            SetOutcome::Failed { index, .. } => {
                txn.phase = Phase::CommitFailed;
                ResponsePayload::error(ResponseError::CommitFailed, index, vec![])
            }
        }
    }

    /// Handle UndoSet; legal from Committed or Commit-Failed.
    pub async fn undo(&mut self, transaction_id: u32) -> ResponsePayload {
        let Some(txn) = self.transactions.get_mut(&transaction_id) else {
            return ResponsePayload::error(ResponseError::ProcessingError, 0, vec![]);
        };
        txn.touched = Instant::now();
        let Some(handler) = txn.handler.clone() else {
            return ResponsePayload::error(ResponseError::ProcessingError, 0, vec![]);
        };
        if !matches!(txn.phase, Phase::Committed | Phase::CommitFailed) {
            return ResponsePayload::error(ResponseError::ProcessingError, 0, vec![]);
        }

        let outcome = handler.undo(&txn.varbinds).await;
        txn.phase = Phase::Undone;
        match outcome {
            SetOutcome::Ok => ResponsePayload::success(vec![]),
            SetOutcome::Failed { index, .. } => {
                ResponsePayload::error(ResponseError::UndoFailed, index, vec![])
            }
        }
    }

    /// Handle CleanupSet. No response PDU is generated.
    pub async fn cleanup(&mut self, transaction_id: u32) {
        let Some(txn) = self.transactions.remove(&transaction_id) else {
            tracing::debug!(
                agentx.transaction_id = transaction_id,
                "CleanupSet for unknown transaction"
            );
            return;
        };
        if let Some(handler) = &txn.handler {
            handler.cleanup(&txn.varbinds).await;
        }
    }

    /// Retire transactions whose master went quiet, invoking a synthetic
    /// cleanup so handlers can release what `test` acquired.
    pub async fn expire(&mut self) {
        let now = Instant::now();
        let stale: Vec<u32> = self
            .transactions
            .iter()
            .filter(|(_, txn)| now.duration_since(txn.touched) > self.timeout)
            .map(|(&id, _)| id)
            .collect();
        for id in stale {
            tracing::warn!(
                agentx.transaction_id = id,
                "SET transaction expired without CleanupSet"
            );
            self.cleanup(id).await;
        }
    }

    /// Forget all transactions without invoking handlers; used when the
    /// transport drops and open transactions are implicitly cleaned.
    pub fn clear(&mut self) {
        if !self.transactions.is_empty() {
            tracing::debug!(
                count = self.transactions.len(),
                "dropping open SET transactions with the connection"
            );
            self.transactions.clear();
        }
    }
}
