// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod repositories;
pub mod db;
pub mod error_channel;
pub mod local_executor;
pub mod remote_dispatcher;
pub mod daemon_pool;
pub mod daemon_proto;
pub mod grpc_daemon;
pub mod permission_processor;

pub use error_channel::{error_channel, ErrorSink};
pub use permission_processor::PermissionProcessor;
