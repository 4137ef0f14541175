//! SHARPLINE: Betting-market consensus, gating and settlement engine
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod storage;
pub mod consensus;
pub mod strategy;
pub mod providers;
pub mod engine;
pub mod dashboard;
