//! Integration tests for the replacement-table storage primitive.
//!
//! 1. Heap lifecycle across many command ids
//! 2. Schema fingerprints of configured tables

pub mod schema_tests;
