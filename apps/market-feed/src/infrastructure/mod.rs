//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Binance wire format, classifier rules and REST catalog client.
pub mod binance;

/// Resilient WebSocket stream connection.
pub mod stream;

/// In-memory snapshot store.
pub mod snapshot;

/// Broadcast channel adapter for snapshot batches.
pub mod broadcast;

/// Downstream WebSocket gateway.
pub mod gateway;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
