// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Daemon Connection Pool
//!
//! Caches one RPC connection per daemon address and watches each with its
//! own health-check task. A connection lives until its first failed health
//! check; eviction is transparent because the next `get_conn` for that
//! address redials.
//!
//! # Concurrency
//!
//! The pool map sits behind one reader/writer lock. `get_conn` takes the
//! read lock on the fast path and re-checks under the write lock before
//! dialing, so two callers racing on a cold address produce exactly one
//! dial.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::daemon::{DaemonConnection, DaemonConnector, DaemonError};
use crate::infrastructure::error_channel::ErrorSink;

/// Health-monitor cadence and probe deadline.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub health_interval: Duration,
    pub health_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            health_interval: Duration::from_secs(10),
            health_timeout: Duration::from_secs(3),
        }
    }
}

/// Connection pool for the fleet's ACL daemons, keyed by `host:port`.
pub struct DaemonPool {
    conns: RwLock<HashMap<String, Arc<dyn DaemonConnection>>>,
    connector: Arc<dyn DaemonConnector>,
    errors: ErrorSink,
    settings: PoolSettings,
    /// Cancels every health monitor at shutdown.
    stop: CancellationToken,
    /// Handed to health monitors so eviction does not keep the pool alive.
    weak_self: Weak<DaemonPool>,
}

impl DaemonPool {
    pub fn new(connector: Arc<dyn DaemonConnector>, errors: ErrorSink) -> Arc<Self> {
        Self::with_settings(connector, errors, PoolSettings::default())
    }

    pub fn with_settings(
        connector: Arc<dyn DaemonConnector>,
        errors: ErrorSink,
        settings: PoolSettings,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            conns: RwLock::new(HashMap::new()),
            connector,
            errors,
            settings,
            stop: CancellationToken::new(),
            weak_self: weak_self.clone(),
        })
    }

    /// Return the pooled connection for `address`, dialing on demand.
    ///
    /// A freshly dialed connection gets its own background health monitor
    /// before it is handed out.
    pub async fn get_conn(&self, address: &str) -> Result<Arc<dyn DaemonConnection>, DaemonError> {
        {
            let conns = self.conns.read().await;
            if let Some(conn) = conns.get(address) {
                return Ok(conn.clone());
            }
        }

        let mut conns = self.conns.write().await;
        // Double check: another caller may have dialed while we waited.
        if let Some(conn) = conns.get(address) {
            return Ok(conn.clone());
        }

        let conn = self.connector.dial(address).await?;
        conns.insert(address.to_string(), conn.clone());
        self.spawn_monitor(address.to_string(), conn.clone());

        info!(address, "daemon connection established");
        Ok(conn)
    }

    /// Close every pooled connection and reset the pool; shutdown only.
    /// Individual close errors are reported, not raised.
    pub async fn close_all(&self) {
        self.stop.cancel();

        let mut conns = self.conns.write().await;
        for (address, conn) in conns.drain() {
            if let Err(err) = conn.close().await {
                self.errors.report(
                    anyhow::Error::new(err)
                        .context(format!("closing pooled connection to {address}")),
                );
            }
        }
        info!("daemon connection pool closed");
    }

    /// Number of pooled connections.
    pub async fn len(&self) -> usize {
        self.conns.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.conns.read().await.is_empty()
    }

    fn spawn_monitor(&self, address: String, conn: Arc<dyn DaemonConnection>) {
        let pool = self.weak_self.clone();
        let errors = self.errors.clone();
        let stop = self.stop.clone();
        let interval = self.settings.health_interval;
        let probe_deadline = self.settings.health_timeout;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(
                tokio::time::Instant::now() + interval,
                interval,
            );

            loop {
                tokio::select! {
                    _ = stop.cancelled() => return,
                    _ = ticker.tick() => {
                        let reason = match tokio::time::timeout(probe_deadline, conn.ping()).await {
                            Ok(Ok(())) => {
                                debug!(address = %address, "daemon ping succeeded");
                                continue;
                            }
                            Ok(Err(err)) => err.to_string(),
                            Err(_) => format!("ping deadline of {probe_deadline:?} exceeded"),
                        };

                        errors.report(DaemonError::Unhealthy {
                            address: address.clone(),
                            reason,
                        });

                        if let Err(err) = conn.close().await {
                            errors.report(anyhow::Error::new(err).context(format!(
                                "closing unhealthy connection to {address}"
                            )));
                        }
                        if let Some(pool) = pool.upgrade() {
                            let mut conns = pool.conns.write().await;
                            // Only evict our own connection; the address may
                            // already hold a fresh redial.
                            if let Some(current) = conns.get(&address) {
                                if Arc::ptr_eq(current, &conn) {
                                    conns.remove(&address);
                                }
                            }
                        }
                        warn!(address = %address, "daemon connection evicted after failed health check");
                        return;
                    }
                }
            }
        });
    }
}
