//! # Remote Capabilities Test Suite
//!
//! Multi-node scenarios: every node runs a real `Dispatcher` with its own
//! ed25519 key, connected through the in-memory network.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── harness.rs        # DON construction, fake capabilities
//!     ├── target_flows.rs   # Execute across two DONs
//!     └── trigger_flows.rs  # Registration and event streaming
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p rc-tests
//! cargo test -p rc-tests integration::target_flows::
//! ```

pub mod integration;
