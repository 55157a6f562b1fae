//! チャット履歴のページネーション
//!
//! 固定ページサイズで新しい順に取得し、表示用に時系列昇順へ反転して返す。
//! カーソルは `created_at` の strictly-less-than。無制限の履歴ロードは行わない。

use std::sync::Arc;

use crate::domain::{ChatMessage, RoomId, RoomRpc, RpcError};

/// 1 ページあたりのメッセージ数
pub const CHAT_PAGE_SIZE: usize = 50;

/// チャット履歴のローダー
pub struct ChatHistory {
    rpc: Arc<dyn RoomRpc>,
}

impl ChatHistory {
    /// 新しい ChatHistory を作成
    pub fn new(rpc: Arc<dyn RoomRpc>) -> Self {
        Self { rpc }
    }

    /// 1 ページ分の履歴を取得する
    ///
    /// # Arguments
    ///
    /// * `room_id` - 対象ルーム
    /// * `before` - カーソル（UTC ミリ秒）。`Some(t)` なら `created_at < t` のみ
    ///
    /// # Returns
    ///
    /// 時系列昇順のメッセージ列（長さ ≤ `CHAT_PAGE_SIZE`）
    pub async fn load_page(
        &self,
        room_id: &RoomId,
        before: Option<i64>,
    ) -> Result<Vec<ChatMessage>, RpcError> {
        let mut page = self
            .rpc
            .fetch_chat_page(room_id, before, CHAT_PAGE_SIZE)
            .await?;

        // バックエンドは新しい順で返す。カーソル違反と超過分は防衛的に落とす。
        if let Some(cursor) = before {
            page.retain(|m| m.created_at < cursor);
        }
        page.truncate(CHAT_PAGE_SIZE);
        page.reverse();
        Ok(page)
    }
}
