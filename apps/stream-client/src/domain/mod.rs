//! Domain Layer - Core streaming types with no I/O.
//!
//! This layer contains the canonical internal representation of price
//! updates, connection lifecycle and assistant stream events. Nothing here
//! touches a socket or a timer.

/// Connection lifecycle state.
pub mod connection;

/// Assistant chat stream events and consumer-side reply state.
pub mod conversation;

/// Price updates, history series and coalesced batches.
pub mod market;
