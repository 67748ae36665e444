//! Integration tests for `streamcore`
//!
//! This crate contains integration tests that drive streams, publishers and
//! subscribers from the core crate against the in-memory broker.

// This is a test-only crate
#![cfg(test)]
