//! src/dataloader/common/mod.rs
//!
//! Utilities shared by the worker pool and the iterators.
//!
//! This module currently contains only thread-local storage.

pub mod thread;
