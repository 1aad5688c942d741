// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Local Executor
//!
//! Executes ACL changes against filesystems mounted on the backend host by
//! shelling out to the OS ACL tools (`setfacl`/`getfacl`).
//!
//! # Per-Path Serialization
//!
//! All workers share one lazily-populated table of path-keyed mutexes.
//! Concurrent transactions touching the same absolute path are serialized so
//! add/remove pairs cannot interleave destructively; transactions for
//! different paths run concurrently.
//!
//! # Outcome Recording
//!
//! A failing tool invocation is an execution failure recorded on the
//! transaction (per-entry error, transaction-level `Failed`), never a
//! scheduler-fatal error.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::transaction::{AclAction, AclEntry, Operation, Transaction};

/// Tool used to mutate ACLs.
const MODIFY_TOOL: &str = "setfacl";
/// Tool used to read ACLs back.
const READ_TOOL: &str = "getfacl";

/// Combined result of one external command invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    /// stdout and stderr interleaved, the way an operator would see it.
    pub output: String,
}

/// Seam between the executor and the operating system, so tests can observe
/// serialization and inject failures without a real `setfacl`.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput>;
}

/// Production runner backed by `tokio::process`.
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> std::io::Result<CommandOutput> {
        let result = tokio::process::Command::new(program)
            .args(args)
            .output()
            .await?;

        let mut combined = String::from_utf8_lossy(&result.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&result.stderr));
        Ok(CommandOutput {
            success: result.status.success(),
            output: combined,
        })
    }
}

/// Executes local transactions with per-path serialization.
pub struct LocalExecutor {
    runner: Arc<dyn CommandRunner>,
    /// Lazily-created lock per absolute path, shared by all workers.
    path_locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalExecutor {
    pub fn new() -> Self {
        Self::with_runner(Arc::new(SystemCommandRunner))
    }

    pub fn with_runner(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            path_locks: DashMap::new(),
        }
    }

    /// Execute `txn` against `absolute_path`, recording the outcome onto the
    /// transaction. Holds the path lock for the whole transaction so its
    /// entries apply as one uninterrupted group.
    pub async fn execute(&self, txn: &mut Transaction, absolute_path: &Path) {
        let lock = self.path_lock(absolute_path);
        let _guard = lock.lock().await;

        debug!(
            transaction_id = %txn.id,
            path = %absolute_path.display(),
            operation = txn.operation.as_str(),
            "executing local transaction"
        );

        let started = Instant::now();
        let (success, output, error) = match txn.operation {
            Operation::GetAcl => self.read_acl(absolute_path).await,
            Operation::SetAcl => self.apply_entries(&mut txn.entries, absolute_path).await,
        };
        let duration_ms = started.elapsed().as_millis() as i64;

        txn.record_execution(success, output, duration_ms, error);
    }

    fn path_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        self.path_locks
            .entry(path.to_path_buf())
            .or_default()
            .clone()
    }

    async fn read_acl(&self, path: &Path) -> (bool, String, Option<String>) {
        let args = vec![path.display().to_string()];
        match self.runner.run(READ_TOOL, &args).await {
            Ok(result) if result.success => (true, result.output, None),
            Ok(result) => {
                let error = format!("{READ_TOOL} failed: {}", result.output.trim());
                (false, result.output, Some(error))
            }
            Err(err) => (
                false,
                String::new(),
                Some(format!("{READ_TOOL} could not be started: {err}")),
            ),
        }
    }

    async fn apply_entries(
        &self,
        entries: &mut [AclEntry],
        path: &Path,
    ) -> (bool, String, Option<String>) {
        let mut combined = String::new();
        let mut all_succeeded = true;
        let mut first_error = None;

        for entry in entries.iter_mut() {
            let args = match entry.action {
                AclAction::Add | AclAction::Modify => vec![
                    "-m".to_string(),
                    entry.modify_spec(),
                    path.display().to_string(),
                ],
                AclAction::Remove => vec![
                    "-x".to_string(),
                    entry.remove_spec(),
                    path.display().to_string(),
                ],
            };

            match self.runner.run(MODIFY_TOOL, &args).await {
                Ok(result) => {
                    combined.push_str(&result.output);
                    if result.success {
                        entry.success = true;
                        entry.error = None;
                    } else {
                        let error = format!("{MODIFY_TOOL} failed: {}", result.output.trim());
                        entry.success = false;
                        entry.error = Some(error.clone());
                        first_error.get_or_insert(error);
                        all_succeeded = false;
                    }
                }
                Err(err) => {
                    let error = format!("{MODIFY_TOOL} could not be started: {err}");
                    entry.success = false;
                    entry.error = Some(error.clone());
                    first_error.get_or_insert(error);
                    all_succeeded = false;
                }
            }
        }

        (all_succeeded, combined, first_error)
    }
}
