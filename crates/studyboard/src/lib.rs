#![doc = include_str!("../../../README.md")]
//!

//! This crate re-exports the studyboard synchronization store, backend
//! client and poller for applications that embed them.

pub use studyboard_core::*;
