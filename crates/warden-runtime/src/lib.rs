//! Joining running sandboxes for the warden tool.
//!
//! A join inspects the target through `/proc`, enters its namespaces,
//! forks, and walks the child through the privilege transition that ends
//! in executing the requested command. The parent supervises the child
//! and reports its termination as the tool's exit status.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod inspect;
pub mod join;
pub mod launch;
pub mod procfs;
pub mod signals;
pub mod supervisor;
pub mod target;
pub mod transition;
