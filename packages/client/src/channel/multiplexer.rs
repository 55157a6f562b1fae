//! Channel Multiplexer 実装
//!
//! ## 責務
//!
//! - ルームスコープの購読ハンドルの管理（登録・個別解除・一括解除）
//! - 購読数プローブの提供（リーク検査用）
//!
//! 変換は一切行わない。購読が所有側のセッションより長生きしてはならない
//! （放置されたギフト購読は古いコーディネータを二重解決しうる）。

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::domain::{ChangeFeed, Concern, EventCallback, FeedError, RoomId, SubscriptionId};

/// ルームごとの change-feed 購読を束ねる多重化層
pub struct ChannelMultiplexer {
    feed: Arc<dyn ChangeFeed>,
    /// アクティブな購読ハンドル
    handles: Mutex<Vec<SubscriptionId>>,
}

impl ChannelMultiplexer {
    /// 新しい ChannelMultiplexer を作成
    pub fn new(feed: Arc<dyn ChangeFeed>) -> Self {
        Self {
            feed,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// 指定ルーム・concern の購読を開始し、ハンドルを登録する
    pub async fn subscribe(
        &self,
        room_id: &RoomId,
        concern: Concern,
        on_event: EventCallback,
    ) -> Result<SubscriptionId, FeedError> {
        let id = self.feed.subscribe(concern, room_id, on_event).await?;
        self.handles.lock().await.push(id);
        tracing::debug!("Subscribed to '{}' feed for room '{}'", concern, room_id);
        Ok(id)
    }

    /// 指定したハンドルの購読を解除する
    ///
    /// 未登録のハンドルは no-op。解除エラーは記録するのみ
    /// （台帳からは常に取り除く）。
    pub async fn unsubscribe(&self, id: SubscriptionId) {
        let mut handles = self.handles.lock().await;
        let Some(index) = handles.iter().position(|h| *h == id) else {
            tracing::debug!("unsubscribe called with unknown handle {:?}", id);
            return;
        };
        handles.swap_remove(index);
        drop(handles);
        if let Err(e) = self.feed.unsubscribe(id).await {
            tracing::warn!("Failed to unsubscribe {:?}: {}", id, e);
        }
    }

    /// 全ての購読を解除する
    ///
    /// 個々の解除エラーは記録するのみで処理を続行する。leave の完遂が
    /// 購読解除の成否より優先される。
    pub async fn unsubscribe_all(&self) {
        let handles: Vec<SubscriptionId> = self.handles.lock().await.drain(..).collect();
        for id in handles {
            if let Err(e) = self.feed.unsubscribe(id).await {
                tracing::warn!("Failed to unsubscribe {:?}: {}", id, e);
            }
        }
    }

    /// 現在登録されている購読数（リーク検査用プローブ）
    pub async fn subscription_count(&self) -> usize {
        self.handles.lock().await.len()
    }
}
