//! Integration tests module
//!
//! Every test runs all nodes of a room concurrently on one `MemoryRelay`.

pub mod transport_test;
