//! Application Layer - Port definitions.
//!
//! Interfaces the connection supervisor depends on, so the lifecycle logic
//! can run against a real WebSocket or a scripted transport in tests.

/// Port interfaces for external systems (duplex transport).
pub mod ports;
