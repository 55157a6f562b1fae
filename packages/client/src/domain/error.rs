//! エラー型定義
//!
//! レイヤーごとのエラー分類を定義します。
//! `GiftError::AckTimeout` は「結果不明」を表し、「確定失敗」とは区別されます
//! （サーバー側でコミット済みの可能性があるため、再試行には新しい冪等性キーが必要）。

use thiserror::Error;

/// Domain Model の検証エラー
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    /// 値が空
    #[error("{0} must not be empty")]
    Empty(&'static str),

    /// 値が長すぎる
    #[error("{0} exceeds maximum length of {1}")]
    TooLong(&'static str, usize),

    /// 形式が不正
    #[error("{0} has an invalid format")]
    Invalid(&'static str),
}

/// RPC 呼び出しのエラー（トランスポート層）
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// 認証エラー（HTTP 401）
    #[error("not authenticated")]
    Unauthorized,

    /// HTTP ステータスエラー（2xx 以外）
    #[error("http error: status {0}")]
    Status(u16),

    /// ネットワーク到達不能（接続断、タイムアウト等）
    #[error("network unreachable: {0}")]
    Network(String),

    /// レスポンスのデコード失敗
    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// Change-feed 購読のエラー
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeedError {
    /// 購読の開始に失敗
    #[error("failed to subscribe to '{0}': {1}")]
    SubscribeFailed(String, String),

    /// 購読の解除に失敗
    #[error("failed to unsubscribe: {0}")]
    UnsubscribeFailed(String),

    /// トランスポートが未接続
    #[error("transport not connected")]
    NotConnected,
}

/// シグナリング送信のエラー
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignalingError {
    /// メッセージ送信に失敗
    #[error("failed to send signaling message: {0}")]
    SendFailed(String),
}

/// ローカルメディア取得のエラー
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// メディアデバイスの取得に失敗
    #[error("failed to acquire local media: {0}")]
    AcquireFailed(String),
}

/// ピア接続（メッシュ）のエラー
///
/// ピア単位で分離され、1 つのピアの失敗が他のピアやルームセッションを
/// 巻き込むことはない。
#[derive(Debug, Error)]
pub enum MeshError {
    /// SDP ネゴシエーションの失敗
    #[error("negotiation failed with '{remote}': {reason}")]
    Negotiation { remote: String, reason: String },

    /// ローカルメディアの取得失敗
    #[error(transparent)]
    Media(#[from] MediaError),

    /// シグナリング送信の失敗
    #[error(transparent)]
    Signaling(#[from] SignalingError),
}

/// ギフト送信のエラー
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GiftError {
    /// 未認証
    #[error("not authenticated")]
    NotAuthenticated,

    /// HTTP ステータスエラー（確定失敗：課金されていない）
    #[error("http error: status {0}")]
    Http(u16),

    /// ACK タイムアウト（結果不明：サーバー側でコミット済みの可能性あり）
    #[error("gift acknowledgment timed out (outcome unknown)")]
    AckTimeout,

    /// サーバーによる明示的な拒否（確定失敗、例：残高不足）
    #[error("server rejected gift: {0}")]
    ServerRejected(String),

    /// ルーム退出によるキャンセル
    #[error("room left before gift resolved")]
    RoomLeft,

    /// 同一冪等性キーの送信が既に進行中
    #[error("a gift request with this idempotency key is already in flight")]
    DuplicateRequest,
}

/// ルームセッション操作のエラー
#[derive(Debug, Error)]
pub enum SessionError {
    /// 未認証
    #[error("not authenticated")]
    NotAuthenticated,

    /// join/leave RPC の失敗
    #[error("room rpc failed: {0}")]
    Rpc(#[from] RpcError),

    /// Change-feed 購読の失敗
    #[error("subscription setup failed: {0}")]
    Subscribe(#[from] FeedError),
}
