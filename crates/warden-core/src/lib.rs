//! # warden-core
//!
//! Low-level Linux primitives for the warden sandbox tool.
//!
//! This crate provides safe abstractions over:
//! - **Privilege scoping**: effective-uid elevation with guaranteed restore.
//! - **Private `/dev`**: a minimal device tree for a new sandbox.
//! - **Namespaces**: joining a running sandbox's namespaces via `setns(2)`.
//! - **Capabilities and seccomp**: bounding-set replication and filter loading.
//! - **Cgroups and CPU affinity**: applying a sandbox's resource placement.
//!
//! All unsafe system calls are encapsulated in safe wrappers with
//! proper error handling and `// SAFETY:` documentation.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

#[cfg(not(target_os = "linux"))]
compile_error!("warden only supports Linux");

pub mod capability;
pub mod cgroup;
pub mod device;
pub mod fslog;
pub mod namespace;
pub mod privilege;
pub mod seccomp;
