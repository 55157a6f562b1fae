//! トランスポート層の trait 定義
//!
//! ドメイン層が必要とするバックエンドへのインターフェースを定義します。
//! 具体的な実装は Infrastructure 層が提供します（依存性の逆転）。
//!
//! - `RoomRpc`: 単一レスポンスを返すリモートプロシージャ呼び出し
//! - `ChangeFeed`: 名前付きで独立順序の購読を開く change-feed API
//! - `AuthProvider`: 現在のユーザー ID と bearer credential の提供元

use async_trait::async_trait;

use super::chat::ChatMessage;
use super::error::{FeedError, RpcError};
use super::event::{Concern, EventCallback, SubscriptionId};
use super::gift::{GiftAck, GiftId, IdempotencyKey};
use super::room::{ParticipantId, RoomId, RoomRole, StreamKey};

/// join_room RPC の応答
#[derive(Debug, Clone)]
pub struct JoinReply {
    pub room_id: RoomId,
    pub role: RoomRole,
    pub viewer_count: u32,
}

/// ルーム関連の RPC エンドポイント
///
/// `send_gift` は `idempotency_key` について冪等でなければならない
/// （同じキーのリプレイは同じトランザクションを返す）。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RoomRpc: Send + Sync {
    /// ルームに参加し、roomId / role / 現在の視聴者数を得る
    async fn join_room(&self, stream_key: &StreamKey) -> Result<JoinReply, RpcError>;

    /// ルームから退出する（ベストエフォート）
    async fn leave_room(&self, stream_key: &StreamKey) -> Result<(), RpcError>;

    /// 生存確認（メンバーシップの期限切れ防止）
    async fn heartbeat(&self, stream_key: &StreamKey) -> Result<(), RpcError>;

    /// ギフトを送信する（サーバー側で残高検証と台帳書き込みを行う）
    async fn send_gift(
        &self,
        stream_key: &StreamKey,
        gift_id: &GiftId,
        idempotency_key: &IdempotencyKey,
    ) -> Result<GiftAck, RpcError>;

    /// チャット履歴を新しい順に 1 ページ取得する
    ///
    /// `before` が指定された場合、`created_at < before` のメッセージのみを返す。
    async fn fetch_chat_page(
        &self,
        room_id: &RoomId,
        before: Option<i64>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, RpcError>;

    /// 現在のアクティブ参加者数を取得する
    ///
    /// presence はインクリメンタルに数えず、イベントのたびに再クエリする
    /// （取りこぼしによるドリフトを避けるため）。
    async fn active_participant_count(&self, room_id: &RoomId) -> Result<u32, RpcError>;
}

/// Change-feed 購読 API
///
/// 購読は concern ごとに独立しており、concern 内の配信順はバックエンドの
/// コミット順と一致する。再接続後は再開（resume）ではなく再作成が必要。
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// 指定ルーム・concern の購読を開始する
    async fn subscribe(
        &self,
        concern: Concern,
        room_id: &RoomId,
        on_event: EventCallback,
    ) -> Result<SubscriptionId, FeedError>;

    /// 購読を解除する
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), FeedError>;

    /// 現在アクティブな購読数（リーク検査用プローブ）
    async fn subscription_count(&self) -> usize;
}

/// 認証セッションの提供元
///
/// ギフト送信と join RPC は有効な credential を要求する。
pub trait AuthProvider: Send + Sync {
    /// ログイン中のユーザー ID（未認証なら None）
    fn current_user(&self) -> Option<ParticipantId>;

    /// bearer credential（未認証なら None）
    fn bearer_token(&self) -> Option<String>;
}
