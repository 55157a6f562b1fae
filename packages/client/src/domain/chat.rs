//! Domain Model: チャットメッセージ
//!
//! 受信後は不変。ルーム内では `created_at` について単調に並び、
//! ページ境界のカーソルにも `created_at` を使う（古い方向は strictly-less-than）。

use super::room::{ParticipantId, RoomId};

/// チャットメッセージ（不変）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: String,
    pub room_id: RoomId,
    pub sender_id: ParticipantId,
    pub body: String,
    /// UTC ミリ秒
    pub created_at: i64,
}

impl ChatMessage {
    /// `created_at` を RFC 3339 形式で返す（ログ・表示用）
    pub fn created_at_rfc3339(&self) -> String {
        butai_shared::time::timestamp_to_rfc3339(self.created_at)
    }
}
