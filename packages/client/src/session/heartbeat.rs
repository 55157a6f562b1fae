//! Heartbeat Scheduler
//!
//! 一定間隔（既定 30 秒）で生存確認 RPC を送る。多重化層から独立した
//! タスクなので、購読の一時的なエラーが起きても生き残る。
//! 失敗は記録して次の tick で再試行するのみで、セッションを殺すことはない。

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::domain::{RoomRpc, StreamKey};

/// 既定の heartbeat 間隔
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// 稼働中の heartbeat タスクへのハンドル
///
/// drop 時にもタスクを停止する（リーク防止）。
pub struct HeartbeatHandle {
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    /// heartbeat を停止する
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// 周期的な生存確認タスクの起動役
pub struct HeartbeatScheduler {
    interval: Duration,
}

impl HeartbeatScheduler {
    /// 新しい HeartbeatScheduler を作成
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// 指定した stream_key で heartbeat を開始する
    ///
    /// 最初の tick は 1 間隔後（join RPC 自体が直近の生存証明になるため）。
    pub fn start(&self, rpc: Arc<dyn RoomRpc>, stream_key: StreamKey) -> HeartbeatHandle {
        let interval = self.interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // interval の初回 tick は即時発火するため読み捨てる
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match rpc.heartbeat(&stream_key).await {
                    Ok(()) => {
                        tracing::trace!("Heartbeat sent for '{}'", stream_key);
                    }
                    Err(e) => {
                        // 致命的ではない。次の tick で再試行する。
                        tracing::warn!("Heartbeat failed for '{}': {}", stream_key, e);
                    }
                }
            }
        });
        HeartbeatHandle { task }
    }
}

impl Default for HeartbeatScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_INTERVAL)
    }
}
