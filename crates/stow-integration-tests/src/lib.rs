//! Integration test crate for the Stowage marketplace.
//!
//! This crate exists solely to run integration tests that span multiple stow crates.
//! It has no public API - all functionality is in the test modules.

#![forbid(unsafe_code)]
