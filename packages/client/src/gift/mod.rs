//! Gift Transaction Coordinator
//!
//! ## 責務
//!
//! - クライアント生成の冪等性キーでギフト送信を追跡する
//! - 2 経路（RPC 即時応答 / gifts change-feed）のうち先着した方で解決する
//! - ハードタイムアウト（既定 10 秒）で「結果不明」を返す
//!
//! ## 二重経路レースについて
//!
//! 直接 RPC 経路は高速だが、サーバーがコミットした後のネットワーク断で
//! 応答が失われうる。change-feed 経路は確実だが遅延しうる。両方を同時に
//! 待ち、冪等性キーによってどちらの経路でも exactly-once に適用される。
//!
//! タイムアウトは「失敗」ではなく「結果不明」。サーバー側でコミット済みの
//! 可能性があるため、再試行する場合は必ず新しいキーを生成すること。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::domain::{
    AuthProvider, GiftError, GiftId, GiftTransaction, IdempotencyKey, RoomRpc, RpcError, StreamKey,
};

/// ACK 待ちの既定タイムアウト
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// in-flight のギフト送信 1 件（キーごとに最大 1 つ）
struct PendingGiftRequest {
    resolver: oneshot::Sender<Result<GiftTransaction, GiftError>>,
}

type PendingMap = Arc<Mutex<HashMap<IdempotencyKey, PendingGiftRequest>>>;

/// ギフト送信の調整役
///
/// gifts change-feed のイベントは [`GiftCoordinator::resolve_from_feed`] 経由で
/// 流し込む（セッションマネージャが購読コールバックを配線する）。
pub struct GiftCoordinator {
    rpc: Arc<dyn RoomRpc>,
    auth: Arc<dyn AuthProvider>,
    pending: PendingMap,
    ack_timeout: Duration,
}

impl GiftCoordinator {
    /// 新しい GiftCoordinator を作成
    pub fn new(rpc: Arc<dyn RoomRpc>, auth: Arc<dyn AuthProvider>) -> Self {
        Self {
            rpc,
            auth,
            pending: Arc::new(Mutex::new(HashMap::new())),
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }

    /// ACK タイムアウトを変更する（テスト・チューニング用）
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// ギフトを送信し、確定したトランザクションを返す
    ///
    /// # Errors
    ///
    /// * `GiftError::NotAuthenticated` - 未認証
    /// * `GiftError::Http` / `GiftError::ServerRejected` - 確定失敗（課金なし）
    /// * `GiftError::AckTimeout` - 結果不明（呼び出し側は残高照合か、
    ///   新しいキーでの再試行が必要）
    /// * `GiftError::RoomLeft` - 解決前にルームを退出した
    pub async fn send_gift(
        &self,
        stream_key: &StreamKey,
        gift_id: &GiftId,
    ) -> Result<GiftTransaction, GiftError> {
        if self.auth.current_user().is_none() {
            return Err(GiftError::NotAuthenticated);
        }
        let key = IdempotencyKey::generate();
        self.send_gift_with_key(stream_key, gift_id, key).await
    }

    /// 指定した冪等性キーでギフトを送信する
    ///
    /// 同じキーの送信が既に in-flight の場合は `DuplicateRequest` を返す
    /// （2 つ目の pending エントリは作らない）。
    pub async fn send_gift_with_key(
        &self,
        stream_key: &StreamKey,
        gift_id: &GiftId,
        key: IdempotencyKey,
    ) -> Result<GiftTransaction, GiftError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().expect("pending map poisoned");
            if pending.contains_key(&key) {
                return Err(GiftError::DuplicateRequest);
            }
            pending.insert(key.clone(), PendingGiftRequest { resolver: tx });
        }

        self.spawn_rpc_path(stream_key.clone(), gift_id.clone(), key.clone());

        match tokio::time::timeout(self.ack_timeout, rx).await {
            Ok(Ok(resolution)) => resolution,
            Ok(Err(_closed)) => {
                // resolver が送信せずに破棄された。結果は確定していない。
                Self::remove_pending(&self.pending, &key);
                Err(GiftError::AckTimeout)
            }
            Err(_elapsed) => {
                Self::remove_pending(&self.pending, &key);
                tracing::warn!(
                    "Gift ack timed out for key '{}' (outcome unknown; retry requires a fresh key)",
                    key
                );
                Err(GiftError::AckTimeout)
            }
        }
    }

    /// RPC 経路を起動する
    ///
    /// RPC の成否にかかわらず send_gift 本体は oneshot の解決だけを待つ。
    /// トランスポートレベルの失敗は change-feed 経路へのフォールバックとなる。
    fn spawn_rpc_path(&self, stream_key: StreamKey, gift_id: GiftId, key: IdempotencyKey) {
        let rpc = Arc::clone(&self.rpc);
        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            match rpc.send_gift(&stream_key, &gift_id, &key).await {
                Ok(ack) => {
                    if let Some(reason) = ack.error {
                        // サーバーによる明示的な拒否：コミット前の確定失敗
                        Self::resolve(&pending, &key, Err(GiftError::ServerRejected(reason)));
                    } else if ack.ack {
                        match ack.transaction {
                            Some(transaction) => {
                                if Self::resolve(&pending, &key, Ok(transaction)) {
                                    tracing::debug!("Gift '{}' resolved via rpc ack", key);
                                }
                            }
                            None => {
                                // ack=true なのにペイロードなし。feed 経路に委ねる。
                                tracing::warn!(
                                    "Gift rpc ack for '{}' carried no transaction; awaiting feed",
                                    key
                                );
                            }
                        }
                    } else {
                        tracing::debug!("Gift rpc for '{}' did not ack; awaiting feed", key);
                    }
                }
                Err(RpcError::Unauthorized) => {
                    Self::resolve(&pending, &key, Err(GiftError::NotAuthenticated));
                }
                Err(RpcError::Status(code)) => {
                    Self::resolve(&pending, &key, Err(GiftError::Http(code)));
                }
                Err(RpcError::Network(e)) | Err(RpcError::Decode(e)) => {
                    // サーバーがコミットした後に応答だけが失われた可能性がある。
                    // タイムアウトまで change-feed 経路を待つ。
                    tracing::debug!(
                        "Gift rpc for '{}' failed ({}); falling back to change-feed",
                        key,
                        e
                    );
                }
            }
        });
    }

    /// gifts change-feed から届いたトランザクションで pending を解決する
    ///
    /// 対応する pending がなければ no-op（リプレイされた重複イベント、または
    /// RPC 経路が先に解決済み）。最大 1 回しか解決しない。
    pub fn resolve_from_feed(&self, transaction: GiftTransaction) -> bool {
        let key = transaction.idempotency_key.clone();
        let resolved = Self::resolve(&self.pending, &key, Ok(transaction));
        if resolved {
            tracing::debug!("Gift '{}' resolved via change-feed", key);
        } else {
            tracing::debug!("Duplicate gift event for '{}' ignored", key);
        }
        resolved
    }

    /// 全ての pending を指定のエラーで棄却する（ルーム退出時）
    pub fn reject_all(&self, error: GiftError) {
        let drained: Vec<(IdempotencyKey, PendingGiftRequest)> = {
            let mut pending = self.pending.lock().expect("pending map poisoned");
            pending.drain().collect()
        };
        for (key, request) in drained {
            tracing::debug!("Rejecting pending gift '{}': {}", key, error);
            let _ = request.resolver.send(Err(error.clone()));
        }
    }

    /// 現在 in-flight の件数（リーク検査用プローブ）
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("pending map poisoned").len()
    }

    /// pending を取り除いて解決する。すでに解決済みなら false
    fn resolve(
        pending: &PendingMap,
        key: &IdempotencyKey,
        resolution: Result<GiftTransaction, GiftError>,
    ) -> bool {
        let request = {
            let mut map = pending.lock().expect("pending map poisoned");
            map.remove(key)
        };
        match request {
            Some(request) => {
                // 受信側がタイムアウト直後に消えていても単に無視する
                let _ = request.resolver.send(resolution);
                true
            }
            None => false,
        }
    }

    fn remove_pending(pending: &PendingMap, key: &IdempotencyKey) {
        let mut map = pending.lock().expect("pending map poisoned");
        map.remove(key);
    }
}
