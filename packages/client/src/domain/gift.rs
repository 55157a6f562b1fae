//! Domain Model: ギフトトランザクション
//!
//! `GiftTransaction` はバックエンドの課金成功時にのみ作成され、クライアントが
//! 偽造することはない。1 つの冪等性キーに対して `Confirmed` に到達する
//! トランザクションは最大 1 つ。

use std::fmt;

use uuid::Uuid;

use super::room::{ParticipantId, RoomId};

/// クライアントが生成する冪等性キー（送信試行ごとに一意）
///
/// 同じキーのリプレイは同じトランザクションに解決され、二重課金は発生しない。
/// タイムアウト後の再試行では必ず新しいキーを生成すること。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(Uuid);

impl IdempotencyKey {
    /// 新しいキーをランダム生成（UUID v4）
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// 既存のキー文字列から復元（change-feed イベントとの突き合わせ用）
    pub fn parse(value: &str) -> Option<Self> {
        Uuid::parse_str(value).ok().map(Self)
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ギフトの種類 ID
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GiftId(String);

impl GiftId {
    pub fn new(value: String) -> Self {
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GiftId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// トランザクションの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiftStatus {
    Pending,
    Confirmed,
    Failed,
}

impl GiftStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(GiftStatus::Pending),
            "confirmed" => Some(GiftStatus::Confirmed),
            "failed" => Some(GiftStatus::Failed),
            _ => None,
        }
    }
}

/// サーバー側の台帳に書き込まれたギフトトランザクション
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GiftTransaction {
    /// サーバーが割り当てた ID
    pub id: String,
    pub idempotency_key: IdempotencyKey,
    pub sender_id: ParticipantId,
    pub receiver_id: ParticipantId,
    pub room_id: RoomId,
    pub gift_id: GiftId,
    pub coin_cost: i64,
    pub status: GiftStatus,
}

/// send_gift RPC の即時応答ペイロード
#[derive(Debug, Clone)]
pub struct GiftAck {
    /// サーバー側でコミットが確認されたか
    pub ack: bool,
    pub transaction: Option<GiftTransaction>,
    pub new_balance: i64,
    pub new_level: i32,
    pub new_xp: i64,
    pub diamonds_earned: i64,
    /// サーバーが報告した拒否理由（例: 残高不足）
    pub error: Option<String>,
}
