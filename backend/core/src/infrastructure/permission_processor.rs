// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Permission Processor
//!
//! The transaction router: resolves a dequeued transaction's target path
//! against the configured filesystem servers and hands it to the local
//! executor or the remote dispatcher.
//!
//! An unresolvable path is a client/config error — the transaction is
//! recorded as failed with a descriptive message and neither executor is
//! touched, and nothing retries it.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::filesystem::{resolve_target, FileSystemServer, TargetRoute};
use crate::domain::processor::{ProcessError, TransactionProcessor};
use crate::domain::session::Session;
use crate::domain::transaction::Transaction;
use crate::infrastructure::local_executor::LocalExecutor;
use crate::infrastructure::remote_dispatcher::RemoteDispatcher;

/// Routes and executes permission transactions; pluggable into any
/// scheduler through [`TransactionProcessor`].
pub struct PermissionProcessor {
    servers: Vec<FileSystemServer>,
    /// Root the backend's local mounts live under.
    base_path: PathBuf,
    local: LocalExecutor,
    remote: RemoteDispatcher,
}

impl PermissionProcessor {
    pub fn new(
        servers: Vec<FileSystemServer>,
        base_path: impl Into<PathBuf>,
        local: LocalExecutor,
        remote: RemoteDispatcher,
    ) -> Self {
        Self {
            servers,
            base_path: base_path.into(),
            local,
            remote,
        }
    }
}

#[async_trait]
impl TransactionProcessor for PermissionProcessor {
    async fn process(
        &self,
        shutdown: &CancellationToken,
        session: &Arc<Session>,
        txn: &mut Transaction,
    ) -> Result<(), ProcessError> {
        // No new execution once shutdown has begun; in-flight work elsewhere
        // runs to completion.
        if shutdown.is_cancelled() {
            return Err(ProcessError::Cancelled);
        }

        info!(
            user = %session.username,
            transaction_id = %txn.id,
            path = %txn.target_path,
            "processing transaction"
        );

        match resolve_target(&self.servers, &self.base_path, &txn.target_path) {
            None => {
                warn!(
                    transaction_id = %txn.id,
                    path = %txn.target_path,
                    "no filesystem server configured for target path"
                );
                txn.mark_failed(format!(
                    "filesystem not found for path {}",
                    txn.target_path
                ));
                Ok(())
            }
            Some(TargetRoute::Local { absolute_path }) => {
                self.local.execute(txn, &absolute_path).await;
                Ok(())
            }
            Some(TargetRoute::Remote {
                endpoint,
                relative_path,
            }) => self.remote.dispatch(txn, &endpoint, &relative_path).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::daemon::{
        AclApplyOutcome, DaemonConnection, DaemonConnector, DaemonError,
    };
    use crate::domain::session::SessionId;
    use crate::domain::transaction::{
        AclAction, AclEntry, EntityType, Operation, TransactionId, TransactionRequest,
        TransactionStatus,
    };
    use crate::infrastructure::daemon_pool::DaemonPool;
    use crate::infrastructure::error_channel::error_channel;
    use crate::infrastructure::local_executor::{CommandOutput, CommandRunner};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRunner {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CommandRunner for CountingRunner {
        async fn run(&self, _program: &str, _args: &[String]) -> std::io::Result<CommandOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(CommandOutput {
                success: true,
                output: String::new(),
            })
        }
    }

    struct CountingConnector {
        dials: Arc<AtomicUsize>,
    }

    struct NoopConnection;

    #[async_trait]
    impl DaemonConnection for NoopConnection {
        async fn apply_acl_entries(
            &self,
            _transaction_id: TransactionId,
            _target_path: &str,
            _entries: &[AclEntry],
        ) -> Result<AclApplyOutcome, DaemonError> {
            Ok(AclApplyOutcome {
                success: true,
                message: String::new(),
            })
        }
        async fn ping(&self) -> Result<(), DaemonError> {
            Ok(())
        }
        async fn close(&self) -> Result<(), DaemonError> {
            Ok(())
        }
    }

    #[async_trait]
    impl DaemonConnector for CountingConnector {
        async fn dial(&self, _address: &str) -> Result<Arc<dyn DaemonConnection>, DaemonError> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NoopConnection))
        }
    }

    fn processor() -> (PermissionProcessor, Arc<AtomicUsize>, Arc<CountingRunner>) {
        let dials = Arc::new(AtomicUsize::new(0));
        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
        });
        let (errors, _rx) = error_channel(16);
        let pool = DaemonPool::new(
            Arc::new(CountingConnector {
                dials: dials.clone(),
            }),
            errors.clone(),
        );
        let processor = PermissionProcessor::new(
            vec![FileSystemServer {
                path: "/mnt/scratch".to_string(),
                method: crate::domain::filesystem::ServerMethod::Local,
                remote: None,
            }],
            "/export",
            LocalExecutor::with_runner(runner.clone()),
            RemoteDispatcher::new(pool, errors),
        );
        (processor, dials, runner)
    }

    fn txn(path: &str) -> Transaction {
        Transaction::from_request(
            SessionId::new(),
            "alice",
            TransactionRequest {
                operation: Operation::SetAcl,
                target_path: path.to_string(),
                entries: vec![AclEntry {
                    entity_type: EntityType::User,
                    entity: "alice".to_string(),
                    permissions: "rw".to_string(),
                    action: AclAction::Add,
                    is_default: false,
                    success: false,
                    error: None,
                }],
            },
        )
    }

    fn session() -> Arc<Session> {
        Arc::new(Session::new(
            "alice",
            "10.0.0.7",
            "curl/8.5",
            Utc::now() + chrono::Duration::hours(1),
        ))
    }

    #[tokio::test]
    async fn test_unroutable_path_fails_without_execution() {
        let (processor, dials, runner) = processor();
        let mut transaction = txn("/mnt/unknown/file");

        processor
            .process(&CancellationToken::new(), &session(), &mut transaction)
            .await
            .unwrap();

        assert_eq!(transaction.status, TransactionStatus::Failed);
        assert!(transaction
            .error_msg
            .as_deref()
            .unwrap()
            .contains("filesystem not found"));
        assert_eq!(dials.load(Ordering::SeqCst), 0);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_shutdown_starts_nothing() {
        let (processor, dials, runner) = processor();
        let token = CancellationToken::new();
        token.cancel();

        let mut transaction = txn("/mnt/scratch/file");
        let result = processor.process(&token, &session(), &mut transaction).await;

        assert!(matches!(result, Err(ProcessError::Cancelled)));
        assert_eq!(transaction.status, TransactionStatus::Pending);
        assert_eq!(dials.load(Ordering::SeqCst), 0);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_local_path_runs_acl_tool() {
        let (processor, dials, runner) = processor();
        let mut transaction = txn("/mnt/scratch/file");

        processor
            .process(&CancellationToken::new(), &session(), &mut transaction)
            .await
            .unwrap();

        assert_eq!(transaction.status, TransactionStatus::Success);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(dials.load(Ordering::SeqCst), 0);
    }
}
