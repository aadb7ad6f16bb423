//! # Configuration Module
//!
//! Centralizes the numeric constants the storage and index layers share.
//! Interdependent values live next to each other with their constraints
//! enforced at compile time, so a page-size change cannot silently break
//! the node layouts that are sized against it.

pub mod constants;
pub use constants::*;
