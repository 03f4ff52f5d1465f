#![forbid(unsafe_code)]
//! ChainFS public API facade.
//!
//! Re-exports the engine surface from `cfs-core` through a stable external
//! interface. This is the crate the bridge host depends on.

pub use cfs_core::*;
