// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Remote Dispatcher
//!
//! Ships a transaction to the daemon owning its filesystem server: one
//! pooled connection per daemon, one RPC per transaction, under a generous
//! but finite deadline (remote filesystem operations can be slow).
//!
//! Connection or RPC failures are reported through the shared error channel
//! and recorded as a failed transaction. They are **not** retried here —
//! retry policy for remote dispatch is an explicit non-feature of this
//! layer (see DESIGN.md).

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::domain::daemon::DaemonError;
use crate::domain::filesystem::RemoteEndpoint;
use crate::domain::processor::ProcessError;
use crate::domain::transaction::Transaction;
use crate::infrastructure::daemon_pool::DaemonPool;
use crate::infrastructure::error_channel::ErrorSink;

/// Remote filesystems may sit behind slow interconnects; the deadline is
/// deliberately generous.
const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Dispatches transactions to remote daemons through the connection pool.
pub struct RemoteDispatcher {
    pool: Arc<DaemonPool>,
    errors: ErrorSink,
    rpc_timeout: Duration,
}

impl RemoteDispatcher {
    pub fn new(pool: Arc<DaemonPool>, errors: ErrorSink) -> Self {
        Self {
            pool,
            errors,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
        }
    }

    pub fn with_rpc_timeout(mut self, rpc_timeout: Duration) -> Self {
        self.rpc_timeout = rpc_timeout;
        self
    }

    /// Execute `txn` on the daemon at `endpoint`, recording the outcome onto
    /// the transaction.
    pub async fn dispatch(
        &self,
        txn: &mut Transaction,
        endpoint: &RemoteEndpoint,
        relative_path: &str,
    ) -> Result<(), ProcessError> {
        let address = endpoint.address();

        let conn = match self.pool.get_conn(&address).await {
            Ok(conn) => conn,
            Err(err) => {
                self.errors.report(
                    anyhow::Error::new(err.clone())
                        .context(format!("acquiring daemon connection for {address}")),
                );
                txn.mark_failed(format!("failed to connect to daemon at {address}"));
                return Err(ProcessError::Daemon(err));
            }
        };

        debug!(
            transaction_id = %txn.id,
            address = %address,
            path = relative_path,
            "dispatching transaction to daemon"
        );

        let started = Instant::now();
        let result = tokio::time::timeout(
            self.rpc_timeout,
            conn.apply_acl_entries(txn.id, relative_path, &txn.entries),
        )
        .await;
        let duration_ms = started.elapsed().as_millis() as i64;

        match result {
            Ok(Ok(outcome)) if outcome.success => {
                for entry in &mut txn.entries {
                    entry.success = true;
                }
                let output = if outcome.message.is_empty() {
                    "ACL applied by remote daemon".to_string()
                } else {
                    outcome.message
                };
                txn.record_execution(true, output, duration_ms, None);
                Ok(())
            }
            Ok(Ok(outcome)) => {
                let error = format!(
                    "daemon at {address} rejected the ACL change: {}",
                    outcome.message
                );
                txn.record_execution(false, outcome.message, duration_ms, Some(error));
                Ok(())
            }
            Ok(Err(err)) => {
                self.errors.report(
                    anyhow::Error::new(err.clone())
                        .context(format!("ACL RPC to daemon at {address}")),
                );
                txn.record_execution(false, String::new(), duration_ms, Some(err.to_string()));
                Err(ProcessError::Daemon(err))
            }
            Err(_) => {
                let err = DaemonError::Rpc(format!(
                    "deadline of {:?} exceeded for daemon at {address}",
                    self.rpc_timeout
                ));
                self.errors.report(
                    anyhow::Error::new(err.clone())
                        .context(format!("ACL RPC to daemon at {address}")),
                );
                txn.record_execution(false, String::new(), duration_ms, Some(err.to_string()));
                Err(ProcessError::Daemon(err))
            }
        }
    }
}
