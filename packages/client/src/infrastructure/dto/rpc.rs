//! RPC エンドポイントのリクエスト / レスポンス DTO

use serde::{Deserialize, Serialize};

/// join_room リクエスト
#[derive(Debug, Serialize)]
pub struct JoinRoomRequest {
    pub stream_key: String,
}

/// join_room レスポンス
#[derive(Debug, Deserialize)]
pub struct JoinRoomReply {
    pub room_id: String,
    pub role: String,
    pub viewer_count: u32,
}

/// leave_room / room_heartbeat リクエスト
#[derive(Debug, Serialize)]
pub struct RoomKeyRequest {
    pub stream_key: String,
}

/// send_gift リクエスト
#[derive(Debug, Serialize)]
pub struct SendGiftRequest {
    pub stream_key: String,
    pub gift_id: String,
    pub idempotency_key: String,
}

/// send_gift レスポンス
///
/// `ack=true` はサーバー側で台帳書き込みがコミットされたことを意味する。
/// `error` は残高不足等の明示的な拒否理由。
#[derive(Debug, Deserialize)]
pub struct SendGiftReply {
    pub ack: bool,
    #[serde(default)]
    pub transaction: Option<GiftTransactionRecord>,
    #[serde(default)]
    pub new_balance: i64,
    #[serde(default)]
    pub new_level: i32,
    #[serde(default)]
    pub new_xp: i64,
    #[serde(default)]
    pub diamonds_earned: i64,
    #[serde(default)]
    pub error: Option<String>,
}

/// ギフトトランザクションのレコード（change-feed / RPC 共通）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GiftTransactionRecord {
    pub id: String,
    pub idempotency_key: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub room_id: String,
    pub gift_id: String,
    pub coin_cost: i64,
    pub status: String,
}

/// チャットメッセージのレコード（change-feed / 履歴 API 共通）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessageRecord {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub body: String,
    /// UTC ミリ秒
    pub created_at: i64,
}

/// チャット履歴レスポンス
#[derive(Debug, Deserialize)]
pub struct ChatPageReply {
    pub messages: Vec<ChatMessageRecord>,
}

/// アクティブ参加者数レスポンス
#[derive(Debug, Deserialize)]
pub struct ParticipantCountReply {
    pub count: u32,
}
