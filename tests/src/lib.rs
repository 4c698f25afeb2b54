//! # Relay Test Suite
//!
//! Cross-crate scenarios run against the in-memory broker.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── support.rs     # broker harness, component launcher, topic observers
//!     ├── scenarios.rs   # product, failure, directed reply, gateway timeout
//!     ├── scopes.rs      # auto-exit, request chains through the gateway, cc
//!     ├── errors.rs      # error routing, error_pubtopic, multi-hop error replies
//!     ├── ordering.rs    # per-queue acknowledgement order, generators
//!     ├── resilience.rs  # reconnect and rebind after broker loss
//!     └── http.rs        # gateway HTTP surface over live components
//! tests/benches/         # routing and codec benchmarks
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p relay-tests
//! cargo test -p relay-tests integration::scopes::
//! cargo bench -p relay-tests
//! ```

#![allow(dead_code)]

pub mod integration;
