// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Build Script for acl-backend-core
//!
//! Compiles the Protocol Buffer contract spoken between the backend core and
//! the per-host ACL daemons.
//!
//! # Code Generation
//!
//! Uses `tonic-build` to generate Rust client stubs from
//! `../../proto/acl_daemon.proto`. Generated code is placed in `OUT_DIR` and
//! included via `tonic::include_proto!` in
//! `src/infrastructure/daemon_proto.rs`.
//!
//! # Dependencies
//!
//! - **protoc**: Protocol buffer compiler (vendored via `protoc-bin-vendored`)
//! - **tonic-build**: Code generator for Rust gRPC stubs

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Point tonic-build at the vendored protoc so builders need no system
    // protoc install.
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path().unwrap());

    tonic_build::configure()
        .build_server(false)
        .build_client(true)
        .compile_protos(&["../../proto/acl_daemon.proto"], &["../../proto"])?;

    println!("cargo:rerun-if-changed=../../proto/acl_daemon.proto");

    Ok(())
}
