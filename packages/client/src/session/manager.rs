//! Room Session Manager
//!
//! ## 責務
//!
//! - join: RPC → チャット履歴 1 ページ → 4 つの購読 → heartbeat 開始
//! - leave: heartbeat 停止 → 全購読解除 → leave RPC（ベストエフォート）→
//!   pending ギフト棄却 → 状態クリア。個々のステップが失敗しても必ず完遂する
//! - セッションはプロセスごとに最大 1 つ。新しい join は前のセッションを
//!   暗黙に片付ける
//!
//! ## 設計ノート
//!
//! 隠れたモジュールレベルのグローバルは持たない。このサービスオブジェクトを
//! 明示的に構築し、ルーム UI の所有者に参照で渡す。状態の変更面は
//! `join_room` / `leave_room` のみ。
//!
//! feed 配信エラーは `Reconnecting` への遷移のみで、自動再購読は行わない。
//! 再 join するかどうかは呼び出し側のポリシーに委ねる。

use std::sync::Arc;

use tokio::sync::{Mutex, watch};

use crate::channel::{ChannelMultiplexer, ChatHistory};
use crate::domain::{
    AuthProvider, ChangeEvent, Concern, ConnectionStatus, EventCallback, GiftError, JoinedRoom,
    RoomRpc, RoomSession, SessionError, StreamKey,
};
use crate::gift::GiftCoordinator;
use crate::infrastructure::dto::conversion::gift_transaction_from_event;

use super::heartbeat::{HeartbeatHandle, HeartbeatScheduler};

/// ルームイベントの受け口（呼び出し側が提供する）
#[derive(Clone)]
pub struct RoomEventHandlers {
    /// chat feed のイベント
    pub on_chat: EventCallback,
    /// gifts feed のイベント（コーディネータでの解決後にも通知される）
    pub on_gift: EventCallback,
    /// battle feed のイベント
    pub on_battle: EventCallback,
    /// presence 変化後に再計算された視聴者数
    pub on_viewer_count: Arc<dyn Fn(u32) + Send + Sync>,
}

impl RoomEventHandlers {
    /// 全て無視するハンドラ（テスト・購読だけ張りたい場合用）
    pub fn noop() -> Self {
        Self {
            on_chat: Arc::new(|_| {}),
            on_gift: Arc::new(|_| {}),
            on_battle: Arc::new(|_| {}),
            on_viewer_count: Arc::new(|_| {}),
        }
    }
}

/// ルームセッションのライフサイクル管理
pub struct RoomSessionManager {
    rpc: Arc<dyn RoomRpc>,
    auth: Arc<dyn AuthProvider>,
    multiplexer: Arc<ChannelMultiplexer>,
    gifts: Arc<GiftCoordinator>,
    history: ChatHistory,
    heartbeat_scheduler: HeartbeatScheduler,
    heartbeat: Mutex<Option<HeartbeatHandle>>,
    active: Mutex<Option<RoomSession>>,
    /// join / leave を直列化するライフサイクルロック
    /// （「最大 1 セッション」を呼び出し側の行儀に依存せず保証する）
    lifecycle: Mutex<()>,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl RoomSessionManager {
    /// 新しい RoomSessionManager を作成
    pub fn new(
        rpc: Arc<dyn RoomRpc>,
        auth: Arc<dyn AuthProvider>,
        multiplexer: Arc<ChannelMultiplexer>,
        gifts: Arc<GiftCoordinator>,
    ) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            rpc: Arc::clone(&rpc),
            auth,
            multiplexer,
            gifts,
            history: ChatHistory::new(rpc),
            heartbeat_scheduler: HeartbeatScheduler::default(),
            heartbeat: Mutex::new(None),
            active: Mutex::new(None),
            lifecycle: Mutex::new(()),
            status_tx,
        }
    }

    /// heartbeat 間隔を変更する（テスト・チューニング用）
    pub fn with_heartbeat_scheduler(mut self, scheduler: HeartbeatScheduler) -> Self {
        self.heartbeat_scheduler = scheduler;
        self
    }

    /// ルームに参加する
    ///
    /// すでにアクティブなセッションがある場合は先に完全な leave を行う
    /// （「最大 1 セッション」の不変条件）。
    pub async fn join_room(
        &self,
        stream_key: StreamKey,
        handlers: RoomEventHandlers,
    ) -> Result<JoinedRoom, SessionError> {
        let _lifecycle = self.lifecycle.lock().await;

        // 1. 前のセッションの暗黙的な片付け
        self.leave_room_inner().await;

        // 2. 認証の確認と join RPC
        if self.auth.current_user().is_none() {
            return Err(SessionError::NotAuthenticated);
        }
        let reply = self.rpc.join_room(&stream_key).await?;
        tracing::info!(
            "Joined room '{}' as {} ({} viewers)",
            reply.room_id,
            reply.role.as_str(),
            reply.viewer_count
        );

        // 3. チャット履歴の最新 1 ページ（時系列昇順）。join RPC 成功後に
        // 失敗したらサーバー側のメンバーシップをベストエフォートで解消する
        let initial_chat_page = match self.history.load_page(&reply.room_id, None).await {
            Ok(page) => page,
            Err(e) => {
                self.abort_join(&stream_key).await;
                return Err(SessionError::Rpc(e));
            }
        };

        // 4. 4 つの concern を購読する。途中で失敗したら張った分を解除して返す
        if let Err(e) = self.subscribe_all(&reply.room_id, &handlers).await {
            self.multiplexer.unsubscribe_all().await;
            self.abort_join(&stream_key).await;
            return Err(SessionError::Subscribe(e));
        }

        // 5. heartbeat の開始
        let handle = self
            .heartbeat_scheduler
            .start(Arc::clone(&self.rpc), stream_key.clone());
        *self.heartbeat.lock().await = Some(handle);

        // 6. セッションの確立
        *self.active.lock().await = Some(RoomSession {
            room_id: reply.room_id.clone(),
            stream_key,
            role: reply.role,
        });
        let _ = self.status_tx.send(ConnectionStatus::Connected);

        Ok(JoinedRoom {
            room_id: reply.room_id,
            role: reply.role,
            initial_viewer_count: reply.viewer_count,
            initial_chat_page,
        })
    }

    /// ルームから退出する
    ///
    /// 冪等：アクティブなセッションがなければ no-op。個々のステップが
    /// 失敗しても残りのクリーンアップを必ず実行する。
    pub async fn leave_room(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.leave_room_inner().await;
    }

    /// join 確定前に失敗した場合の巻き戻し（leave RPC のみ、失敗は記録のみ）
    async fn abort_join(&self, stream_key: &StreamKey) {
        if let Err(e) = self.rpc.leave_room(stream_key).await {
            tracing::warn!("leave_room rpc failed for '{}': {}", stream_key, e);
        }
    }

    async fn leave_room_inner(&self) {
        let session = self.active.lock().await.take();
        let Some(session) = session else {
            tracing::debug!("leave_room called with no active session");
            return;
        };

        // 1. heartbeat の停止
        if let Some(handle) = self.heartbeat.lock().await.take() {
            handle.stop();
        }

        // 2. 全購読の解除（個々のエラーは多重化層が記録する）
        self.multiplexer.unsubscribe_all().await;

        // 3. leave RPC（ベストエフォート）
        if let Err(e) = self.rpc.leave_room(&session.stream_key).await {
            tracing::warn!("leave_room rpc failed for '{}': {}", session.stream_key, e);
        }

        // 4. pending ギフトの棄却（呼び出し側をハングさせない）
        self.gifts.reject_all(GiftError::RoomLeft);

        // 5. 状態のクリア（active は take 済み）
        let _ = self.status_tx.send(ConnectionStatus::Disconnected);
        tracing::info!("Left room '{}'", session.room_id);
    }

    /// トランスポートレベルの配信エラーを通知する
    ///
    /// セッションは破棄せず `Reconnecting` に遷移するだけ。再購読は
    /// 行わない（再 join の判断は呼び出し側）。
    pub async fn note_transport_disruption(&self) {
        if self.active.lock().await.is_some() {
            tracing::warn!("Transport disruption noted; session now reconnecting");
            let _ = self.status_tx.send(ConnectionStatus::Reconnecting);
        }
    }

    /// 接続状態の監視用レシーバ
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// 現在の接続状態
    pub fn current_status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    /// アクティブなセッション（なければ None）
    pub async fn current_session(&self) -> Option<RoomSession> {
        self.active.lock().await.clone()
    }

    /// 指定カーソルより古いチャット履歴を 1 ページ取得する
    pub async fn load_older_chat(
        &self,
        before: i64,
    ) -> Result<Vec<crate::domain::ChatMessage>, SessionError> {
        let session = self.active.lock().await.clone();
        let Some(session) = session else {
            return Ok(Vec::new());
        };
        Ok(self.history.load_page(&session.room_id, Some(before)).await?)
    }

    async fn subscribe_all(
        &self,
        room_id: &crate::domain::RoomId,
        handlers: &RoomEventHandlers,
    ) -> Result<(), crate::domain::FeedError> {
        // chat / battle はそのまま配送
        self.multiplexer
            .subscribe(room_id, Concern::Chat, Arc::clone(&handlers.on_chat))
            .await?;

        // gifts はコーディネータでの突き合わせを挟んでから通知する
        let gifts = Arc::clone(&self.gifts);
        let on_gift = Arc::clone(&handlers.on_gift);
        let gift_callback: EventCallback = Arc::new(move |event: ChangeEvent| {
            if let Some(transaction) = gift_transaction_from_event(&event) {
                gifts.resolve_from_feed(transaction);
            }
            on_gift(event);
        });
        self.multiplexer
            .subscribe(room_id, Concern::Gifts, gift_callback)
            .await?;

        self.multiplexer
            .subscribe(room_id, Concern::Battle, Arc::clone(&handlers.on_battle))
            .await?;

        // presence は差分を数えず、イベントごとに参加者数を再クエリする
        // （取りこぼしによるドリフトを避ける）
        let rpc = Arc::clone(&self.rpc);
        let on_viewer_count = Arc::clone(&handlers.on_viewer_count);
        let room = room_id.clone();
        let presence_callback: EventCallback = Arc::new(move |_event: ChangeEvent| {
            let rpc = Arc::clone(&rpc);
            let on_viewer_count = Arc::clone(&on_viewer_count);
            let room = room.clone();
            tokio::spawn(async move {
                match rpc.active_participant_count(&room).await {
                    Ok(count) => on_viewer_count(count),
                    Err(e) => {
                        tracing::warn!("Failed to recount viewers for '{}': {}", room, e);
                    }
                }
            });
        });
        self.multiplexer
            .subscribe(room_id, Concern::Presence, presence_callback)
            .await?;

        Ok(())
    }
}
