// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod registry;
pub mod scheduler;

// Re-export the service types for convenience
pub use registry::{RegistryConfig, SessionRegistry};
pub use scheduler::{FcfsScheduler, SchedulerConfig};
