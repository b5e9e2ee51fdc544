//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (stream, store, catalog, broadcast).
pub mod ports;

/// Application services: bootstrap, per-feed ownership and fan-out.
pub mod services;
