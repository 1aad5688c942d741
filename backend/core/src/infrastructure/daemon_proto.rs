// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Generated gRPC bindings for the ACL daemon protocol.
//!
//! Compiled by `build.rs` from `proto/acl_daemon.proto` via `tonic-build`;
//! see [`crate::infrastructure::grpc_daemon`] for the client wrapper.

pub mod acldaemon {
    pub mod v1 {
        tonic::include_proto!("acldaemon.v1");
    }
}
