//! Core module containing the test engine
//!
//! This module provides:
//! - Serial transport and a simulated device
//! - The line source (reader thread and shared history)
//! - Predicate evaluation and per-test execution
//! - Run control across iterations, with cooperative stop
//! - Session logging and report export

pub mod evaluator;
pub mod executor;
pub mod history;
pub mod line_source;
pub mod logger;
pub mod observer;
pub mod outcome;
pub mod report;
pub mod runner;
pub mod simulator;
pub mod testcase;
pub mod transport;
