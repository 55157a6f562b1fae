//! Peer Mesh Controller
//!
//! ## 責務
//!
//! - リモート参加者ごとに 1 つのメディア接続（エントリ）を維持する
//! - シグナリングメッセージ（join / offer / answer / candidate / left）に
//!   応じてネゴシエーションを駆動する
//! - ローカルメディアを全エントリで共有し、参照カウントで解放を管理する
//!
//! ## 設計ノート
//!
//! エントリごとの状態機械:
//! `New → Offering|Answering → Connected → (Renegotiating)* → Closed`
//!
//! リモート記述が設定される前に届いた ICE 候補はエントリ内にバッファし、
//! 記述の設定後にまとめて適用する（候補の到着順は保証されない）。
//!
//! 1 つのピアの失敗は該当エントリの破棄で済ませ、他のピアや
//! ルームセッションには波及させない。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::domain::{
    AuthProvider, IceCandidate, MediaError, MediaHandle, MediaProvider, MeshError, ParticipantId,
    PeerConnection, PeerConnectionFactory, SessionDescription, SignalMessage, SignalingChannel,
};

/// エントリごとのネゴシエーション状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// 作成直後（ネゴシエーション未開始）
    New,
    /// offer を送信し、answer 待ち
    Offering,
    /// offer を受信し、answer を返した
    Answering,
    /// リモートトラックを受信済み
    Connected,
    /// 接続済みエントリの再ネゴシエーション中
    Renegotiating,
    /// 閉鎖済み
    Closed,
}

/// リモート参加者 1 人分の接続エントリ
struct PeerConnectionEntry {
    conn: Arc<dyn PeerConnection>,
    state: NegotiationState,
    has_remote_description: bool,
    /// リモート記述の設定前に届いた ICE 候補
    buffered_candidates: Vec<IceCandidate>,
}

/// 参照カウント付きの共有ローカルメディア
struct LocalMediaShare {
    handle: MediaHandle,
    /// このメディアを使用しているエントリ数
    refs: usize,
}

/// ピアメッシュの調整役
pub struct PeerMeshController {
    media: Arc<dyn MediaProvider>,
    factory: Arc<dyn PeerConnectionFactory>,
    signaling: Arc<dyn SignalingChannel>,
    auth: Arc<dyn AuthProvider>,
    local: Mutex<Option<LocalMediaShare>>,
    entries: Mutex<HashMap<ParticipantId, PeerConnectionEntry>>,
}

impl PeerMeshController {
    /// 新しい PeerMeshController を作成
    pub fn new(
        media: Arc<dyn MediaProvider>,
        factory: Arc<dyn PeerConnectionFactory>,
        signaling: Arc<dyn SignalingChannel>,
        auth: Arc<dyn AuthProvider>,
    ) -> Self {
        Self {
            media,
            factory,
            signaling,
            auth,
            local: Mutex::new(None),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// ローカルメディアを取得する（冪等：取得済みならキャッシュを返す）
    pub async fn ensure_local_media(&self) -> Result<MediaHandle, MediaError> {
        let mut local = self.local.lock().await;
        match local.as_ref() {
            Some(share) => Ok(Arc::clone(&share.handle)),
            None => {
                let handle = self.media.acquire().await?;
                tracing::info!("Acquired local media '{}'", handle.id());
                *local = Some(LocalMediaShare {
                    handle: Arc::clone(&handle),
                    refs: 0,
                });
                Ok(handle)
            }
        }
    }

    /// シグナリングメッセージを処理する
    ///
    /// ピア単位の失敗はログに記録して該当エントリを閉じるのみで、
    /// 呼び出し側には伝播しない。
    pub async fn handle_signal(&self, message: SignalMessage) {
        match message {
            SignalMessage::UserJoined { participant } => {
                if self.is_self(&participant) {
                    tracing::debug!("Ignoring own join echo");
                    return;
                }
                if let Err(e) = self.start_offer(&participant).await {
                    tracing::warn!("Failed to open peer connection to '{}': {}", participant, e);
                }
            }
            SignalMessage::UserLeft { participant } => {
                self.close_entry(&participant).await;
            }
            SignalMessage::Offer { from, description } => {
                if let Err(e) = self.accept_offer(&from, description).await {
                    tracing::warn!("Negotiation with '{}' failed: {}", from, e);
                    self.close_entry(&from).await;
                }
            }
            SignalMessage::Answer { from, description } => {
                if let Err(e) = self.apply_answer(&from, description).await {
                    tracing::warn!("Failed to apply answer from '{}': {}", from, e);
                    self.close_entry(&from).await;
                }
            }
            SignalMessage::Candidate { from, candidate } => {
                self.apply_candidate(&from, candidate).await;
            }
        }
    }

    /// リモートトラックの受信通知（WebRTC 実装側のフックから呼ばれる）
    pub async fn notify_remote_track(&self, remote: &ParticipantId) {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(remote) else {
            return;
        };
        match entry.state {
            NegotiationState::Offering
            | NegotiationState::Answering
            | NegotiationState::Renegotiating => {
                entry.state = NegotiationState::Connected;
                tracing::info!("Peer connection to '{}' is now connected", remote);
            }
            _ => {}
        }
    }

    /// 再ネゴシエーションが必要になった通知（トラックの増減時）
    ///
    /// 接続済みエントリに対してその場で再 offer を送る。接続は作り直さない。
    pub async fn notify_renegotiation_needed(
        &self,
        remote: &ParticipantId,
    ) -> Result<(), MeshError> {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(remote) else {
            return Ok(());
        };
        if entry.state != NegotiationState::Connected {
            tracing::debug!(
                "Renegotiation for '{}' requested in state {:?}; ignoring",
                remote,
                entry.state
            );
            return Ok(());
        }
        entry.state = NegotiationState::Renegotiating;
        let offer = entry.conn.create_offer().await?;
        let from = self.local_user(remote)?;
        self.signaling
            .send(
                Some(remote),
                SignalMessage::Offer {
                    from,
                    description: offer,
                },
            )
            .await?;
        Ok(())
    }

    /// 指定ピアのエントリを閉じる（存在しなければ no-op）
    ///
    /// 共有メディアの参照を 1 つ解放する。最後の参照だった場合のみ
    /// メディア本体を停止する。
    pub async fn close_entry(&self, remote: &ParticipantId) {
        let removed = self.entries.lock().await.remove(remote);
        if let Some(entry) = removed {
            entry.conn.close().await;
            self.release_media_ref().await;
            tracing::info!("Closed peer connection to '{}'", remote);
        }
    }

    /// 全エントリを閉じ、ローカルメディアを解放する（ルーム退出時）
    pub async fn close_all(&self) {
        let drained: Vec<(ParticipantId, PeerConnectionEntry)> =
            self.entries.lock().await.drain().collect();
        for (remote, entry) in drained {
            entry.conn.close().await;
            self.release_media_ref().await;
            tracing::debug!("Closed peer connection to '{}'", remote);
        }
        // ensure_local_media だけが呼ばれてエントリが 1 つもない場合の分
        let mut local = self.local.lock().await;
        if let Some(share) = local.take() {
            share.handle.stop();
        }
    }

    /// 現在のエントリ数（リーク検査用プローブ）
    pub async fn entry_count(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// 指定ピアのネゴシエーション状態
    pub async fn state_of(&self, remote: &ParticipantId) -> Option<NegotiationState> {
        self.entries.lock().await.get(remote).map(|e| e.state)
    }

    /// ローカルメディアの現在の参照数（リーク検査用プローブ）
    pub async fn media_ref_count(&self) -> usize {
        self.local.lock().await.as_ref().map_or(0, |s| s.refs)
    }

    // ── 内部実装 ────────────────────────────────────────────────

    /// participant_joined: 接続を作成し offer を送る（New → Offering）
    async fn start_offer(&self, remote: &ParticipantId) -> Result<(), MeshError> {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(remote) {
            tracing::debug!("Peer connection to '{}' already exists; ignoring join", remote);
            return Ok(());
        }
        let from = self.local_user(remote)?;
        let media = self.acquire_media_ref().await?;

        let negotiated: Result<Arc<dyn PeerConnection>, MeshError> = async {
            let conn = self.factory.create(remote).await?;
            conn.attach_media(media).await?;
            let offer = conn.create_offer().await?;
            self.signaling
                .send(
                    Some(remote),
                    SignalMessage::Offer {
                        from,
                        description: offer,
                    },
                )
                .await?;
            Ok(conn)
        }
        .await;

        match negotiated {
            Ok(conn) => {
                entries.insert(
                    remote.clone(),
                    PeerConnectionEntry {
                        conn,
                        state: NegotiationState::Offering,
                        has_remote_description: false,
                        buffered_candidates: Vec::new(),
                    },
                );
                Ok(())
            }
            Err(e) => {
                self.release_media_ref().await;
                Err(e)
            }
        }
    }

    /// offer_received: 接続を作成し answer を返す（New → Answering）
    ///
    /// 既存エントリへの再 offer は接続を作り直さず、その場で
    /// 再ネゴシエーションする（Connected → Renegotiating）。
    async fn accept_offer(
        &self,
        from: &ParticipantId,
        description: SessionDescription,
    ) -> Result<(), MeshError> {
        let mut entries = self.entries.lock().await;

        if let Some(entry) = entries.get_mut(from) {
            entry.state = NegotiationState::Renegotiating;
            entry.conn.set_remote_description(description).await?;
            entry.has_remote_description = true;
            let buffered: Vec<IceCandidate> = entry.buffered_candidates.drain(..).collect();
            apply_buffered(&entry.conn, from, buffered).await;
            let answer = entry.conn.create_answer().await?;
            let local = self.local_user(from)?;
            self.signaling
                .send(
                    Some(from),
                    SignalMessage::Answer {
                        from: local,
                        description: answer,
                    },
                )
                .await?;
            return Ok(());
        }

        let local = self.local_user(from)?;
        let media = self.acquire_media_ref().await?;

        let negotiated: Result<Arc<dyn PeerConnection>, MeshError> = async {
            let conn = self.factory.create(from).await?;
            conn.attach_media(media).await?;
            conn.set_remote_description(description).await?;
            let answer = conn.create_answer().await?;
            self.signaling
                .send(
                    Some(from),
                    SignalMessage::Answer {
                        from: local,
                        description: answer,
                    },
                )
                .await?;
            Ok(conn)
        }
        .await;

        match negotiated {
            Ok(conn) => {
                entries.insert(
                    from.clone(),
                    PeerConnectionEntry {
                        conn,
                        state: NegotiationState::Answering,
                        has_remote_description: true,
                        buffered_candidates: Vec::new(),
                    },
                );
                Ok(())
            }
            Err(e) => {
                self.release_media_ref().await;
                Err(e)
            }
        }
    }

    /// answer の適用とバッファ済み候補のフラッシュ
    async fn apply_answer(
        &self,
        from: &ParticipantId,
        description: SessionDescription,
    ) -> Result<(), MeshError> {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(from) else {
            tracing::debug!("Answer from '{}' with no matching entry; ignoring", from);
            return Ok(());
        };
        entry.conn.set_remote_description(description).await?;
        entry.has_remote_description = true;
        let buffered: Vec<IceCandidate> = entry.buffered_candidates.drain(..).collect();
        apply_buffered(&entry.conn, from, buffered).await;
        Ok(())
    }

    /// ICE 候補の適用。リモート記述の設定前ならバッファする
    async fn apply_candidate(&self, from: &ParticipantId, candidate: IceCandidate) {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(from) else {
            tracing::debug!("Candidate from '{}' with no matching entry; dropping", from);
            return;
        };
        if entry.has_remote_description {
            if let Err(e) = entry.conn.add_ice_candidate(candidate).await {
                tracing::warn!("Failed to apply candidate from '{}': {}", from, e);
            }
        } else {
            entry.buffered_candidates.push(candidate);
        }
    }

    /// 共有メディアの参照を 1 つ獲得する（未取得なら取得する）
    async fn acquire_media_ref(&self) -> Result<MediaHandle, MeshError> {
        let mut local = self.local.lock().await;
        match local.as_mut() {
            Some(share) => {
                share.refs += 1;
                Ok(Arc::clone(&share.handle))
            }
            None => {
                let handle = self.media.acquire().await?;
                tracing::info!("Acquired local media '{}'", handle.id());
                *local = Some(LocalMediaShare {
                    handle: Arc::clone(&handle),
                    refs: 1,
                });
                Ok(handle)
            }
        }
    }

    /// 共有メディアの参照を 1 つ解放する。最後の参照なら本体を停止する
    async fn release_media_ref(&self) {
        let mut local = self.local.lock().await;
        if let Some(share) = local.as_mut() {
            share.refs = share.refs.saturating_sub(1);
            if share.refs == 0 {
                tracing::info!("Releasing local media '{}'", share.handle.id());
                share.handle.stop();
                *local = None;
            }
        }
    }

    fn is_self(&self, participant: &ParticipantId) -> bool {
        self.auth.current_user().as_ref() == Some(participant)
    }

    fn local_user(&self, remote: &ParticipantId) -> Result<ParticipantId, MeshError> {
        self.auth
            .current_user()
            .ok_or_else(|| MeshError::Negotiation {
                remote: remote.as_str().to_string(),
                reason: "not authenticated".to_string(),
            })
    }
}

/// バッファ済みの ICE 候補をまとめて適用する。個々の失敗は記録して続行
async fn apply_buffered(
    conn: &Arc<dyn PeerConnection>,
    remote: &ParticipantId,
    buffered: Vec<IceCandidate>,
) {
    for candidate in buffered {
        if let Err(e) = conn.add_ice_candidate(candidate).await {
            tracing::warn!("Failed to apply buffered candidate for '{}': {}", remote, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use async_trait::async_trait;

    use crate::domain::{LocalMedia, SdpKind, SignalingError};

    // ── テスト用フェイク ────────────────────────────────────────

    struct FakeMedia {
        stopped: AtomicBool,
    }

    impl LocalMedia for FakeMedia {
        fn id(&self) -> &str {
            "media-1"
        }

        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    struct FakeMediaProvider {
        media: Arc<FakeMedia>,
        acquire_calls: AtomicU32,
    }

    impl FakeMediaProvider {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                media: Arc::new(FakeMedia {
                    stopped: AtomicBool::new(false),
                }),
                acquire_calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl MediaProvider for FakeMediaProvider {
        async fn acquire(&self) -> Result<MediaHandle, MediaError> {
            self.acquire_calls.fetch_add(1, Ordering::SeqCst);
            let handle: MediaHandle = self.media.clone();
            Ok(handle)
        }
    }

    #[derive(Default)]
    struct FakePeerConnection {
        attached: std::sync::Mutex<Vec<String>>,
        remote_descriptions: std::sync::Mutex<Vec<SessionDescription>>,
        candidates: std::sync::Mutex<Vec<IceCandidate>>,
        offers_created: AtomicU32,
        answers_created: AtomicU32,
        closed: AtomicBool,
    }

    #[async_trait]
    impl PeerConnection for FakePeerConnection {
        async fn attach_media(&self, media: MediaHandle) -> Result<(), MeshError> {
            self.attached.lock().unwrap().push(media.id().to_string());
            Ok(())
        }

        async fn create_offer(&self) -> Result<SessionDescription, MeshError> {
            self.offers_created.fetch_add(1, Ordering::SeqCst);
            Ok(SessionDescription {
                kind: SdpKind::Offer,
                sdp: "v=0 offer".to_string(),
            })
        }

        async fn create_answer(&self) -> Result<SessionDescription, MeshError> {
            self.answers_created.fetch_add(1, Ordering::SeqCst);
            Ok(SessionDescription {
                kind: SdpKind::Answer,
                sdp: "v=0 answer".to_string(),
            })
        }

        async fn set_remote_description(
            &self,
            description: SessionDescription,
        ) -> Result<(), MeshError> {
            self.remote_descriptions.lock().unwrap().push(description);
            Ok(())
        }

        async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MeshError> {
            self.candidates.lock().unwrap().push(candidate);
            Ok(())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct FakeFactory {
        created: std::sync::Mutex<HashMap<String, Arc<FakePeerConnection>>>,
        /// この参加者への接続作成を失敗させる
        fail_for: Option<String>,
    }

    impl FakeFactory {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                created: std::sync::Mutex::new(HashMap::new()),
                fail_for: None,
            })
        }

        fn failing_for(remote: &str) -> Arc<Self> {
            Arc::new(Self {
                created: std::sync::Mutex::new(HashMap::new()),
                fail_for: Some(remote.to_string()),
            })
        }

        fn conn_for(&self, remote: &str) -> Arc<FakePeerConnection> {
            self.created
                .lock()
                .unwrap()
                .get(remote)
                .expect("connection not created")
                .clone()
        }

        fn created_count(&self) -> usize {
            self.created.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PeerConnectionFactory for FakeFactory {
        async fn create(
            &self,
            remote: &ParticipantId,
        ) -> Result<Arc<dyn PeerConnection>, MeshError> {
            if self.fail_for.as_deref() == Some(remote.as_str()) {
                return Err(MeshError::Negotiation {
                    remote: remote.as_str().to_string(),
                    reason: "factory refused".to_string(),
                });
            }
            let conn = Arc::new(FakePeerConnection::default());
            self.created
                .lock()
                .unwrap()
                .insert(remote.as_str().to_string(), conn.clone());
            Ok(conn)
        }
    }

    struct FakeSignaling {
        sent: std::sync::Mutex<Vec<(Option<String>, SignalMessage)>>,
    }

    impl FakeSignaling {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: std::sync::Mutex::new(Vec::new()),
            })
        }

        fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }

        fn last_sent(&self) -> (Option<String>, SignalMessage) {
            self.sent.lock().unwrap().last().expect("nothing sent").clone()
        }
    }

    #[async_trait]
    impl SignalingChannel for FakeSignaling {
        async fn send(
            &self,
            to: Option<&ParticipantId>,
            message: SignalMessage,
        ) -> Result<(), SignalingError> {
            self.sent
                .lock()
                .unwrap()
                .push((to.map(|p| p.as_str().to_string()), message));
            Ok(())
        }
    }

    struct FakeAuth {
        user: Option<ParticipantId>,
    }

    impl AuthProvider for FakeAuth {
        fn current_user(&self) -> Option<ParticipantId> {
            self.user.clone()
        }

        fn bearer_token(&self) -> Option<String> {
            self.user.as_ref().map(|_| "token".to_string())
        }
    }

    struct Harness {
        controller: PeerMeshController,
        provider: Arc<FakeMediaProvider>,
        factory: Arc<FakeFactory>,
        signaling: Arc<FakeSignaling>,
    }

    fn harness_with(factory: Arc<FakeFactory>) -> Harness {
        let provider = FakeMediaProvider::new();
        let signaling = FakeSignaling::new();
        let auth = Arc::new(FakeAuth {
            user: Some(participant("alice")),
        });
        let controller = PeerMeshController::new(
            provider.clone(),
            factory.clone(),
            signaling.clone(),
            auth,
        );
        Harness {
            controller,
            provider,
            factory,
            signaling,
        }
    }

    fn harness() -> Harness {
        harness_with(FakeFactory::new())
    }

    fn participant(name: &str) -> ParticipantId {
        ParticipantId::new(name.to_string()).unwrap()
    }

    fn offer(sdp: &str) -> SessionDescription {
        SessionDescription {
            kind: SdpKind::Offer,
            sdp: sdp.to_string(),
        }
    }

    fn answer(sdp: &str) -> SessionDescription {
        SessionDescription {
            kind: SdpKind::Answer,
            sdp: sdp.to_string(),
        }
    }

    fn candidate(n: u32) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:{n} 1 udp 2122260223 192.0.2.1 54400 typ host"),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        }
    }

    // ── テスト ──────────────────────────────────────────────────

    #[tokio::test]
    async fn test_ensure_local_media_is_idempotent() {
        // テスト項目: ensure_local_media を 2 回呼んでも取得は 1 回だけ
        // given (前提条件):
        let h = harness();

        // when (操作):
        let first = h.controller.ensure_local_media().await.unwrap();
        let second = h.controller.ensure_local_media().await.unwrap();

        // then (期待する結果):
        assert_eq!(h.provider.acquire_calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.id(), second.id());
    }

    #[tokio::test]
    async fn test_two_joins_create_two_connected_entries_sharing_media() {
        // テスト項目: 2 人の join で 2 エントリが作られ、1 つのメディアを共有する
        // given (前提条件):
        let h = harness();

        // when (操作):
        h.controller
            .handle_signal(SignalMessage::UserJoined {
                participant: participant("bob"),
            })
            .await;
        h.controller
            .handle_signal(SignalMessage::UserJoined {
                participant: participant("carol"),
            })
            .await;
        h.controller.notify_remote_track(&participant("bob")).await;
        h.controller.notify_remote_track(&participant("carol")).await;

        // then (期待する結果): メディア取得は 1 回、参照は 2 つ
        assert_eq!(h.controller.entry_count().await, 2);
        assert_eq!(
            h.controller.state_of(&participant("bob")).await,
            Some(NegotiationState::Connected)
        );
        assert_eq!(
            h.controller.state_of(&participant("carol")).await,
            Some(NegotiationState::Connected)
        );
        assert_eq!(h.provider.acquire_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.controller.media_ref_count().await, 2);
        assert_eq!(
            *h.factory.conn_for("bob").attached.lock().unwrap(),
            vec!["media-1"]
        );
    }

    #[tokio::test]
    async fn test_join_sends_offer_to_new_participant() {
        // テスト項目: join を受けたらその参加者宛に offer を送る
        // given (前提条件):
        let h = harness();

        // when (操作):
        h.controller
            .handle_signal(SignalMessage::UserJoined {
                participant: participant("bob"),
            })
            .await;

        // then (期待する結果):
        assert_eq!(
            h.controller.state_of(&participant("bob")).await,
            Some(NegotiationState::Offering)
        );
        let (to, message) = h.signaling.last_sent();
        assert_eq!(to.as_deref(), Some("bob"));
        assert!(matches!(message, SignalMessage::Offer { .. }));
    }

    #[tokio::test]
    async fn test_own_join_echo_is_ignored() {
        // テスト項目: 自分自身の join echo は無視される
        // given (前提条件):
        let h = harness();

        // when (操作):
        h.controller
            .handle_signal(SignalMessage::UserJoined {
                participant: participant("alice"),
            })
            .await;

        // then (期待する結果):
        assert_eq!(h.controller.entry_count().await, 0);
        assert_eq!(h.signaling.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_received_offer_creates_answering_entry() {
        // テスト項目: offer を受信したら接続を作り answer を返す
        // given (前提条件):
        let h = harness();

        // when (操作):
        h.controller
            .handle_signal(SignalMessage::Offer {
                from: participant("bob"),
                description: offer("v=0 bob"),
            })
            .await;

        // then (期待する結果):
        assert_eq!(
            h.controller.state_of(&participant("bob")).await,
            Some(NegotiationState::Answering)
        );
        let conn = h.factory.conn_for("bob");
        assert_eq!(conn.remote_descriptions.lock().unwrap().len(), 1);
        assert_eq!(conn.answers_created.load(Ordering::SeqCst), 1);
        let (to, message) = h.signaling.last_sent();
        assert_eq!(to.as_deref(), Some("bob"));
        assert!(matches!(message, SignalMessage::Answer { .. }));
    }

    #[tokio::test]
    async fn test_candidates_are_buffered_until_remote_description() {
        // テスト項目: リモート記述前の候補はバッファされ、answer 適用後に
        // まとめて流れる
        // given (前提条件): offer 済み（リモート記述なし）のエントリ
        let h = harness();
        h.controller
            .handle_signal(SignalMessage::UserJoined {
                participant: participant("bob"),
            })
            .await;

        // when (操作): answer より先に候補が 2 つ届く
        h.controller
            .handle_signal(SignalMessage::Candidate {
                from: participant("bob"),
                candidate: candidate(1),
            })
            .await;
        h.controller
            .handle_signal(SignalMessage::Candidate {
                from: participant("bob"),
                candidate: candidate(2),
            })
            .await;
        let conn = h.factory.conn_for("bob");
        assert_eq!(conn.candidates.lock().unwrap().len(), 0);

        h.controller
            .handle_signal(SignalMessage::Answer {
                from: participant("bob"),
                description: answer("v=0 bob"),
            })
            .await;

        // then (期待する結果): バッファ済みの 2 つが到着順で適用される
        let applied = conn.candidates.lock().unwrap();
        assert_eq!(applied.len(), 2);
        assert!(applied[0].candidate.starts_with("candidate:1"));
        assert!(applied[1].candidate.starts_with("candidate:2"));
    }

    #[tokio::test]
    async fn test_candidate_after_remote_description_applies_immediately() {
        // テスト項目: リモート記述の設定後に届いた候補は即座に適用される
        // given (前提条件): answer まで済んだエントリ
        let h = harness();
        h.controller
            .handle_signal(SignalMessage::UserJoined {
                participant: participant("bob"),
            })
            .await;
        h.controller
            .handle_signal(SignalMessage::Answer {
                from: participant("bob"),
                description: answer("v=0 bob"),
            })
            .await;

        // when (操作):
        h.controller
            .handle_signal(SignalMessage::Candidate {
                from: participant("bob"),
                candidate: candidate(1),
            })
            .await;

        // then (期待する結果):
        let conn = h.factory.conn_for("bob");
        assert_eq!(conn.candidates.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_candidate_for_unknown_peer_is_dropped() {
        // テスト項目: エントリのないピアからの候補は黙って捨てられる
        // given (前提条件):
        let h = harness();

        // when (操作):
        h.controller
            .handle_signal(SignalMessage::Candidate {
                from: participant("stranger"),
                candidate: candidate(1),
            })
            .await;

        // then (期待する結果):
        assert_eq!(h.controller.entry_count().await, 0);
    }

    #[tokio::test]
    async fn test_participant_left_closes_entry_but_keeps_shared_media() {
        // テスト項目: 1 人退出してもエントリが残る限りメディアは停止しない
        // given (前提条件): bob と carol が接続済み
        let h = harness();
        for name in ["bob", "carol"] {
            h.controller
                .handle_signal(SignalMessage::UserJoined {
                    participant: participant(name),
                })
                .await;
            h.controller.notify_remote_track(&participant(name)).await;
        }
        assert_eq!(h.controller.media_ref_count().await, 2);

        // when (操作):
        h.controller
            .handle_signal(SignalMessage::UserLeft {
                participant: participant("bob"),
            })
            .await;

        // then (期待する結果): bob の接続は閉じ、メディアは生きている
        assert_eq!(h.controller.entry_count().await, 1);
        assert!(h.controller.state_of(&participant("bob")).await.is_none());
        assert!(h.factory.conn_for("bob").closed.load(Ordering::SeqCst));
        assert_eq!(h.controller.media_ref_count().await, 1);
        assert!(!h.provider.media.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_last_entry_closing_releases_media() {
        // テスト項目: 最後のエントリが閉じるとメディア本体が停止する
        // given (前提条件):
        let h = harness();
        h.controller
            .handle_signal(SignalMessage::UserJoined {
                participant: participant("bob"),
            })
            .await;

        // when (操作):
        h.controller
            .handle_signal(SignalMessage::UserLeft {
                participant: participant("bob"),
            })
            .await;

        // then (期待する結果):
        assert_eq!(h.controller.media_ref_count().await, 0);
        assert!(h.provider.media.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_reoffer_renegotiates_existing_entry_in_place() {
        // テスト項目: 接続済みピアからの再 offer は接続を作り直さない
        // given (前提条件): bob が接続済み
        let h = harness();
        h.controller
            .handle_signal(SignalMessage::UserJoined {
                participant: participant("bob"),
            })
            .await;
        h.controller.notify_remote_track(&participant("bob")).await;
        assert_eq!(h.factory.created_count(), 1);

        // when (操作): bob から再 offer が届く
        h.controller
            .handle_signal(SignalMessage::Offer {
                from: participant("bob"),
                description: offer("v=0 bob renegotiate"),
            })
            .await;

        // then (期待する結果): 同じ接続のまま Renegotiating、answer 送信済み
        assert_eq!(h.factory.created_count(), 1);
        assert_eq!(
            h.controller.state_of(&participant("bob")).await,
            Some(NegotiationState::Renegotiating)
        );
        assert_eq!(
            h.factory.conn_for("bob").answers_created.load(Ordering::SeqCst),
            1
        );

        // リモートトラックの再受信で Connected に戻る
        h.controller.notify_remote_track(&participant("bob")).await;
        assert_eq!(
            h.controller.state_of(&participant("bob")).await,
            Some(NegotiationState::Connected)
        );
    }

    #[tokio::test]
    async fn test_renegotiation_needed_sends_fresh_offer() {
        // テスト項目: 再ネゴシエーション要求で再 offer が送られる
        // given (前提条件): bob が接続済み
        let h = harness();
        h.controller
            .handle_signal(SignalMessage::UserJoined {
                participant: participant("bob"),
            })
            .await;
        h.controller.notify_remote_track(&participant("bob")).await;
        let sent_before = h.signaling.sent_count();

        // when (操作):
        h.controller
            .notify_renegotiation_needed(&participant("bob"))
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(
            h.controller.state_of(&participant("bob")).await,
            Some(NegotiationState::Renegotiating)
        );
        assert_eq!(h.signaling.sent_count(), sent_before + 1);
        assert_eq!(
            h.factory.conn_for("bob").offers_created.load(Ordering::SeqCst),
            2
        );
    }

    #[tokio::test]
    async fn test_peer_failure_is_isolated() {
        // テスト項目: 1 人の接続作成失敗が他のピアに波及しない
        // given (前提条件): bob への接続作成だけが失敗する
        let h = harness_with(FakeFactory::failing_for("bob"));

        // when (操作):
        h.controller
            .handle_signal(SignalMessage::UserJoined {
                participant: participant("bob"),
            })
            .await;
        h.controller
            .handle_signal(SignalMessage::UserJoined {
                participant: participant("carol"),
            })
            .await;
        h.controller.notify_remote_track(&participant("carol")).await;

        // then (期待する結果): carol だけが残り、メディア参照も 1 つ
        assert_eq!(h.controller.entry_count().await, 1);
        assert!(h.controller.state_of(&participant("bob")).await.is_none());
        assert_eq!(
            h.controller.state_of(&participant("carol")).await,
            Some(NegotiationState::Connected)
        );
        assert_eq!(h.controller.media_ref_count().await, 1);
    }

    #[tokio::test]
    async fn test_close_all_closes_connections_and_releases_media() {
        // テスト項目: close_all で全接続が閉じ、メディアが解放される
        // given (前提条件):
        let h = harness();
        for name in ["bob", "carol"] {
            h.controller
                .handle_signal(SignalMessage::UserJoined {
                    participant: participant(name),
                })
                .await;
        }

        // when (操作):
        h.controller.close_all().await;

        // then (期待する結果):
        assert_eq!(h.controller.entry_count().await, 0);
        assert_eq!(h.controller.media_ref_count().await, 0);
        assert!(h.factory.conn_for("bob").closed.load(Ordering::SeqCst));
        assert!(h.factory.conn_for("carol").closed.load(Ordering::SeqCst));
        assert!(h.provider.media.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_answer_for_unknown_peer_is_ignored() {
        // テスト項目: エントリのないピアからの answer は無視される
        // given (前提条件):
        let h = harness();

        // when (操作):
        h.controller
            .handle_signal(SignalMessage::Answer {
                from: participant("stranger"),
                description: answer("v=0"),
            })
            .await;

        // then (期待する結果):
        assert_eq!(h.controller.entry_count().await, 0);
    }
}
