// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # gRPC Daemon Transport
//!
//! Production implementation of the daemon transport traits over tonic.
//! One [`tonic::transport::Channel`] per daemon address, owned by the
//! connection pool; per-call clients are cheap clones of the channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::Channel;

use crate::domain::daemon::{AclApplyOutcome, DaemonConnection, DaemonConnector, DaemonError};
use crate::domain::transaction::{AclEntry, TransactionId};
use crate::infrastructure::daemon_proto::acldaemon::v1 as proto;

use proto::acl_service_client::AclServiceClient;
use proto::ping_service_client::PingServiceClient;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Dials gRPC channels to ACL daemons.
pub struct GrpcDaemonConnector {
    connect_timeout: Duration,
}

impl Default for GrpcDaemonConnector {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl GrpcDaemonConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl DaemonConnector for GrpcDaemonConnector {
    async fn dial(&self, address: &str) -> Result<Arc<dyn DaemonConnection>, DaemonError> {
        let uri = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };

        let endpoint = Channel::from_shared(uri)
            .map_err(|err| DaemonError::Dial {
                address: address.to_string(),
                reason: err.to_string(),
            })?
            .connect_timeout(self.connect_timeout);

        let channel = endpoint.connect().await.map_err(|err| DaemonError::Dial {
            address: address.to_string(),
            reason: err.to_string(),
        })?;

        Ok(Arc::new(GrpcDaemonConnection { channel }))
    }
}

/// One live gRPC channel to a daemon.
pub struct GrpcDaemonConnection {
    channel: Channel,
}

#[async_trait]
impl DaemonConnection for GrpcDaemonConnection {
    async fn apply_acl_entries(
        &self,
        transaction_id: TransactionId,
        target_path: &str,
        entries: &[AclEntry],
    ) -> Result<AclApplyOutcome, DaemonError> {
        let request = proto::ApplyAclRequest {
            transaction_id: transaction_id.to_string(),
            target_path: target_path.to_string(),
            entries: entries
                .iter()
                .map(|entry| proto::AclEntry {
                    entity_type: entry.entity_type.as_str().to_string(),
                    entity: entry.entity.clone(),
                    permissions: entry.permissions.clone(),
                    action: entry.action.as_str().to_string(),
                    is_default: entry.is_default,
                })
                .collect(),
        };

        let mut client = AclServiceClient::new(self.channel.clone());
        let response = client
            .apply_acl_entries(request)
            .await
            .map_err(|status| DaemonError::Rpc(status.to_string()))?
            .into_inner();

        Ok(AclApplyOutcome {
            success: response.success,
            message: response.message,
        })
    }

    async fn ping(&self) -> Result<(), DaemonError> {
        let mut client = PingServiceClient::new(self.channel.clone());
        client
            .ping(proto::PingRequest {})
            .await
            .map_err(|status| DaemonError::Rpc(status.to_string()))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), DaemonError> {
        // tonic channels release their transport once the last clone drops;
        // there is nothing to tear down eagerly.
        Ok(())
    }
}
