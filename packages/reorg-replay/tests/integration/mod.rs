//! Integration test suite for change capture and replay.
//!
//! 1. Fixed change scenarios
//! 2. Convergence of the replacement table with the original
//! 3. Coordinator budget, consistency and failure handling

pub mod convergence_tests;
pub mod coordinator_tests;
pub mod scenario_tests;
