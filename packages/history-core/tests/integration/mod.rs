//! Integration test suite.
//!
//! 1. History capture over sessions
//! 2. Rollback workflows
//! 3. Persistence integration

pub mod helpers;
pub mod history_tests;
pub mod persistence_tests;
pub mod rollback_tests;
