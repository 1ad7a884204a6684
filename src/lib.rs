//! swapfarm — farming automation client for duplicate item matching.
//!
//! Library crate exposing all modules for the embedding account manager
//! and for integration tests.

pub mod account;
pub mod cache;
pub mod config;
pub mod context;
pub mod logging;
pub mod matcher;
pub mod types;
pub mod web;
