// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Filesystem Server Routing
//!
//! Read-only configuration describing the fleet's filesystem servers, plus
//! the prefix-match rule that routes a transaction's target path to one of
//! them. Loading and validating the configuration file is the bootstrap
//! layer's job; the core only consumes the parsed structures.
//!
//! Resolution is **first matching prefix in configuration order**. When
//! prefixes overlap the outcome depends on the order servers are listed,
//! not on prefix specificity — a known footgun, kept deliberately (see
//! DESIGN.md) rather than silently replaced with longest-prefix matching.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// How a filesystem server is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMethod {
    /// Mounted on the backend host; executed via the local ACL tool.
    Local,
    /// Reached through the per-host daemon over RPC.
    Remote,
}

/// Address of a remote filesystem server's ACL daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEndpoint {
    pub host: String,
    pub port: u16,
}

impl RemoteEndpoint {
    /// `host:port` form used as the connection pool key.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// One configured filesystem server (read-only config).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileSystemServer {
    /// Path prefix owned by this server.
    pub path: String,
    pub method: ServerMethod,
    /// Present only for `method: remote`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteEndpoint>,
}

/// Where a transaction's target path resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetRoute {
    /// Execute on the backend host against the mount.
    Local {
        /// Target joined onto the backend's base path.
        absolute_path: PathBuf,
    },
    /// Dispatch to the daemon owning the prefix.
    Remote {
        endpoint: RemoteEndpoint,
        /// Target with the server's prefix stripped, as the daemon sees it.
        relative_path: String,
    },
}

/// Resolve `target` against the ordered server list.
///
/// Returns `None` when no configured prefix matches — a client/config error
/// the router records as a failed transaction, never retried.
pub fn resolve_target(
    servers: &[FileSystemServer],
    base_path: &Path,
    target: &str,
) -> Option<TargetRoute> {
    for server in servers {
        if !target.starts_with(&server.path) {
            continue;
        }
        return match (&server.method, &server.remote) {
            (ServerMethod::Remote, Some(endpoint)) => Some(TargetRoute::Remote {
                endpoint: endpoint.clone(),
                relative_path: target
                    .strip_prefix(&server.path)
                    .unwrap_or(target)
                    .to_string(),
            }),
            // A remote server without an endpoint cannot be dispatched to;
            // treat it the same as an unconfigured path.
            (ServerMethod::Remote, None) => None,
            (ServerMethod::Local, _) => Some(TargetRoute::Local {
                absolute_path: base_path.join(target.trim_start_matches('/')),
            }),
        };
    }

    None
}
