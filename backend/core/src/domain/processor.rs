// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Transaction Processor Contract
//!
//! The scheduler's job ends at allocating transactions to workers; opening a
//! transaction and carrying it out is the processor's. Keeping the contract
//! here lets alternative processors be attached to the same scheduler.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::daemon::DaemonError;
use crate::domain::session::Session;
use crate::domain::transaction::Transaction;

/// Errors a processor can surface to its worker.
///
/// Outcomes of an execution *attempt* (tool failure, daemon rejection) are
/// recorded on the transaction itself, not raised here.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// Shutdown was observed before execution started; the transaction was
    /// not run and must be returned to its queue.
    #[error("shutdown in progress, transaction not started")]
    Cancelled,

    #[error(transparent)]
    Daemon(#[from] DaemonError),
}

/// Executes a single dequeued transaction end to end.
#[async_trait]
pub trait TransactionProcessor: Send + Sync {
    /// Route and execute `txn`, writing the outcome onto it.
    ///
    /// Must return [`ProcessError::Cancelled`] without starting any
    /// execution when `shutdown` is already cancelled; an execution that
    /// has already begun runs to completion.
    async fn process(
        &self,
        shutdown: &CancellationToken,
        session: &Arc<Session>,
        txn: &mut Transaction,
    ) -> Result<(), ProcessError>;
}
