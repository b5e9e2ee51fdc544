//! Resilient WebSocket transport for market feeds.
//!
//! - `connection`: session loop, outbound queue and frame routing
//! - `heartbeat`: liveness detection via ping/pong
//! - `reconnect`: backoff schedule

mod connection;
mod heartbeat;
mod reconnect;

pub use connection::{
    ConnectError, ConnectionError, ConnectionHandle, ConnectionStats, StreamConfig,
    StreamConnection,
};
pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
pub use reconnect::{BackoffStrategy, ReconnectConfig, ReconnectPolicy};
