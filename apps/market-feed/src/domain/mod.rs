//! Domain Layer - Core streaming types and business logic.
//!
//! This layer contains the core domain types for market data streaming
//! with no I/O. Everything here is plain Rust with serialization support.

/// Instrument catalog types.
pub mod catalog;

/// Market data streaming types (tickers, book tickers, depth).
pub mod streaming;

/// Per-connection subscription registry.
pub mod subscription;
