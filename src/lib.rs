//! LOOPSIM: closed-loop simulation over recorded driving logs
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod geometry;
pub mod data;
pub mod dataset;
pub mod simulation;
