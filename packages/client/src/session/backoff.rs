//! 再接続のバックオフポリシー
//!
//! トランスポートレベルの切断に対する指数バックオフ。基準遅延を試行ごとに
//! 倍増し、上限でクリップ、試行回数も有限。

use std::time::Duration;

/// 既定の基準遅延
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
/// 既定の遅延上限
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
/// 既定の最大試行回数
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// 指数バックオフのスケジュール
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl BackoffPolicy {
    /// 新しいポリシーを作成
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
        }
    }

    /// `attempt` 回目（0 始まり）の再試行前に待つ遅延を返す
    ///
    /// 試行回数を使い切った場合は `None`（呼び出し側は諦める）。
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        Some(delay.min(self.max_delay))
    }

    /// 最大試行回数
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}
