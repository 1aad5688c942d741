// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Daemon Transport Abstraction
//!
//! Domain-level contract for talking to the per-host ACL daemons. The core
//! never owns a wire transport of its own; it drives a generic RPC client
//! behind these traits. The gRPC implementation lives in
//! [`crate::infrastructure::grpc_daemon`]; tests substitute in-process
//! fakes to exercise the pool and dispatcher without a network.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::transaction::{AclEntry, TransactionId};

/// Errors raised by daemon transports.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DaemonError {
    #[error("failed to dial daemon at {address}: {reason}")]
    Dial { address: String, reason: String },

    #[error("daemon RPC failed: {0}")]
    Rpc(String),

    #[error("daemon health check failed for {address}: {reason}")]
    Unhealthy { address: String, reason: String },
}

/// Result of asking a daemon to apply ACL entries.
#[derive(Debug, Clone)]
pub struct AclApplyOutcome {
    pub success: bool,
    pub message: String,
}

/// One live connection to a daemon.
#[async_trait]
pub trait DaemonConnection: Send + Sync {
    /// Ship the transaction's entries to the daemon in a single RPC.
    async fn apply_acl_entries(
        &self,
        transaction_id: TransactionId,
        target_path: &str,
        entries: &[AclEntry],
    ) -> Result<AclApplyOutcome, DaemonError>;

    /// Liveness probe used by the pool's health monitor.
    async fn ping(&self) -> Result<(), DaemonError>;

    /// Release the connection's resources. Close failures are reported,
    /// never raised, since callers run during eviction or shutdown.
    async fn close(&self) -> Result<(), DaemonError>;
}

/// Factory dialing daemon connections, keyed by `host:port`.
#[async_trait]
pub trait DaemonConnector: Send + Sync {
    async fn dial(&self, address: &str) -> Result<Arc<dyn DaemonConnection>, DaemonError>;
}
