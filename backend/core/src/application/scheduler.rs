// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # FCFS Scheduler Application Service
//!
//! The top-level scheduling loop. Transactions are FCFS within a session;
//! fairness across sessions comes from sweeping the registry's round-robin
//! ring and pulling exactly **one** transaction per session per sweep — a
//! user who floods their queue cannot starve anyone else.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Drive the registry sweep, bound worker concurrency, and
//!   hand dequeued transactions to the processor
//! - **Dependencies:** `SessionRegistry`, `TransactionProcessor`, error sink
//!
//! # Loop
//!
//! ```text
//! loop {
//!     stop if the shutdown token is cancelled
//!     session = registry.get_next_session()      // none → brief sleep
//!     txn = session.queue.pop_front()            // empty → next sweep
//!     permit = semaphore.acquire()               // blocks at capacity
//!     spawn worker(txn)                          // permit released on drop
//! }
//! ```
//!
//! The scheduler is modular: any [`TransactionProcessor`] can be attached,
//! so the scheduling policy stays independent of what transactions contain.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::registry::SessionRegistry;
use crate::domain::processor::{ProcessError, TransactionProcessor};
use crate::infrastructure::error_channel::ErrorSink;

/// Fallback parallelism when the host refuses to report one.
const FALLBACK_PARALLELISM: usize = 4;

/// Sleep between sweeps when no session is registered.
const IDLE_BACKOFF: Duration = Duration::from_millis(10);

/// Tunables injected by the bootstrap layer.
#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
    /// Worker cap override; defaults to [`default_worker_count`].
    pub worker_count: Option<usize>,
}

/// Worker cap: ~75% of available hardware parallelism, at least one worker,
/// never more than the hardware offers — the serving process keeps headroom.
pub fn default_worker_count() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|parallelism| parallelism.get())
        .unwrap_or(FALLBACK_PARALLELISM);
    (cores * 3 / 4).clamp(1, cores)
}

/// First-come-first-served scheduler over the session registry.
#[derive(Clone)]
pub struct FcfsScheduler {
    registry: Arc<SessionRegistry>,
    processor: Arc<dyn TransactionProcessor>,
    errors: ErrorSink,
    /// Bounds concurrently executing workers.
    semaphore: Arc<Semaphore>,
    worker_count: usize,
}

impl FcfsScheduler {
    pub fn new(
        registry: Arc<SessionRegistry>,
        processor: Arc<dyn TransactionProcessor>,
        errors: ErrorSink,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        let worker_count = config.worker_count.unwrap_or_else(default_worker_count).max(1);
        Arc::new(Self {
            registry,
            processor,
            errors,
            semaphore: Arc::new(Semaphore::new(worker_count)),
            worker_count,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Run the scheduling loop until `shutdown` is cancelled.
    ///
    /// Every dequeued transaction is handed to exactly one worker; the
    /// semaphore permit travels into the worker and is released when the
    /// worker finishes, error or not.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        info!(workers = self.worker_count, "scheduler started");

        loop {
            if shutdown.is_cancelled() {
                info!("scheduler stopped gracefully");
                return Ok(());
            }

            let Some(session) = self.registry.get_next_session().await else {
                tokio::time::sleep(IDLE_BACKOFF).await;
                continue;
            };

            let txn = {
                let mut state = session.state.lock().await;
                state.queue.pop_front()
            };
            let Some(mut txn) = txn else { continue };

            // Block here when all workers are busy.
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore closed unexpectedly");

            let registry = self.registry.clone();
            let processor = self.processor.clone();
            let errors = self.errors.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let txn_id = txn.id;

                match processor.process(&shutdown, &session, &mut txn).await {
                    Ok(()) => {}
                    Err(ProcessError::Cancelled) => {
                        // Never executed: put it back at the front so expiry
                        // drains it into the archival store as pending.
                        warn!(
                            user = %session.username,
                            transaction_id = %txn_id,
                            "transaction processing stopped by shutdown"
                        );
                        session.state.lock().await.queue.push_front(txn);
                        return;
                    }
                    Err(err) => {
                        errors.report(
                            anyhow::Error::new(err)
                                .context(format!("processing transaction {txn_id}")),
                        );
                    }
                }

                // Bookkeeping runs for failed executions too.
                registry.complete_transaction(&session, &txn).await;
                debug!(
                    user = %session.username,
                    transaction_id = %txn_id,
                    status = %txn.status,
                    "transaction completed"
                );
            });
        }
    }

    /// Spawn the run loop as a background task. A run-loop error is fatal to
    /// scheduling and is pushed onto the error channel so the bootstrap
    /// layer can initiate graceful shutdown.
    pub fn start(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            if let Err(err) = scheduler.run(shutdown).await {
                scheduler
                    .errors
                    .report(err.context("scheduler run loop failed"));
            }
        })
    }
}
