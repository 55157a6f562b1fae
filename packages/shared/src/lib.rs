//! Shared utilities for the butai live-room client.
//!
//! Provides the clock abstraction used for chat cursors and heartbeat
//! bookkeeping, plus logging setup shared by binaries and tests.

pub mod logger;
pub mod time;
