//! Room Session Lifecycle
//!
//! join / leave のオーケストレーション、heartbeat、再接続バックオフ。

mod backoff;
mod heartbeat;
mod manager;

pub use backoff::{BackoffPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY};
pub use heartbeat::{DEFAULT_HEARTBEAT_INTERVAL, HeartbeatHandle, HeartbeatScheduler};
pub use manager::{RoomEventHandlers, RoomSessionManager};
