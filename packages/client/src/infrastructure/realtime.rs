//! WebSocket リアルタイムトランスポート実装
//!
//! 1 本のソケットで change-feed 購読とシグナリングの両方を運ぶ
//! （[`ChangeFeed`] と [`SignalingChannel`] を同じクライアントが実装する）。
//!
//! ## 再接続について
//!
//! 切断時は [`BackoffPolicy`] に従って指数バックオフで接続し直し、
//! 登録済みの購読は Subscribe フレームを送り直して**再作成**する
//! （切断中のイベントは再生されない。resume ではない）。切断のたびに
//! disruption ハンドラを呼び、セッション層が `Reconnecting` を表示できる
//! ようにする。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::domain::{
    ChangeEvent, ChangeFeed, ChangeKind, Concern, EventCallback, FeedError, ParticipantId, RoomId,
    SignalMessage, SignalingChannel, SignalingError, SubscriptionId,
};
use crate::session::BackoffPolicy;

use super::dto::conversion::{signal_message_from_payload, signal_payload_from_message};
use super::dto::realtime::{ClientFrame, ServerFrame};

/// 着信シグナリングメッセージの受け口
pub type SignalHandler = Arc<dyn Fn(SignalMessage) + Send + Sync>;
/// トランスポート切断の通知先
pub type DisruptionHandler = Arc<dyn Fn() + Send + Sync>;

/// 購読 1 件分の登録情報（再接続時の Subscribe 再送に使う）
struct Registration {
    concern: Concern,
    room_id: String,
    callback: EventCallback,
}

struct ClientInner {
    url: String,
    backoff: BackoffPolicy,
    next_id: AtomicU64,
    connected: AtomicBool,
    subscriptions: Mutex<HashMap<u64, Registration>>,
    outbound_tx: mpsc::UnboundedSender<ClientFrame>,
    signal_handler: Mutex<Option<SignalHandler>>,
    disruption_handler: Mutex<Option<DisruptionHandler>>,
    /// シグナリング送信フレームに載せるルーム ID
    current_room: Mutex<Option<String>>,
}

impl ClientInner {
    /// 登録済みの全購読の Subscribe フレームを送り直す（再接続直後）
    fn resubscribe_all(&self) {
        let subscriptions = self.subscriptions.lock().expect("subscriptions poisoned");
        for (id, registration) in subscriptions.iter() {
            tracing::info!(
                "Re-subscribing '{}' feed for room '{}'",
                registration.concern,
                registration.room_id
            );
            let _ = self.outbound_tx.send(ClientFrame::Subscribe {
                subscription: *id,
                concern: registration.concern.as_str().to_string(),
                room_id: registration.room_id.clone(),
            });
        }
    }

    fn notify_disruption(&self) {
        let handler = self
            .disruption_handler
            .lock()
            .expect("handler poisoned")
            .clone();
        if let Some(handler) = handler {
            handler();
        }
    }

    /// 着信フレーム 1 件の振り分け
    fn dispatch(&self, text: &str) {
        let frame: ServerFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Discarding malformed frame: {}", e);
                return;
            }
        };
        match frame {
            ServerFrame::Event {
                subscription,
                kind,
                old,
                new,
            } => {
                let Some(kind) = parse_change_kind(&kind) else {
                    tracing::warn!("Discarding event with unknown kind '{}'", kind);
                    return;
                };
                let callback = {
                    let subscriptions =
                        self.subscriptions.lock().expect("subscriptions poisoned");
                    subscriptions
                        .get(&subscription)
                        .map(|r| Arc::clone(&r.callback))
                };
                match callback {
                    Some(callback) => callback(ChangeEvent { kind, old, new }),
                    None => {
                        // 解除直後のイベントは届きうる
                        tracing::debug!("Event for unknown subscription {}; dropping", subscription);
                    }
                }
            }
            ServerFrame::Signal { from, message } => {
                match signal_message_from_payload(from, message) {
                    Ok(signal) => {
                        let handler =
                            self.signal_handler.lock().expect("handler poisoned").clone();
                        if let Some(handler) = handler {
                            handler(signal);
                        }
                    }
                    Err(e) => tracing::warn!("Discarding malformed signal: {}", e),
                }
            }
            ServerFrame::Error { reason } => {
                tracing::warn!("Realtime backend reported error: {}", reason);
            }
        }
    }
}

fn parse_change_kind(value: &str) -> Option<ChangeKind> {
    match value {
        "insert" => Some(ChangeKind::Insert),
        "update" => Some(ChangeKind::Update),
        "delete" => Some(ChangeKind::Delete),
        _ => None,
    }
}

/// WebSocket バックエンドに対する ChangeFeed / SignalingChannel 実装
pub struct WebSocketRealtimeClient {
    inner: Arc<ClientInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketRealtimeClient {
    /// クライアントを作成し、接続の監督タスクを起動する
    pub fn start(url: String, backoff: BackoffPolicy) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(ClientInner {
            url,
            backoff,
            next_id: AtomicU64::new(1),
            connected: AtomicBool::new(false),
            subscriptions: Mutex::new(HashMap::new()),
            outbound_tx,
            signal_handler: Mutex::new(None),
            disruption_handler: Mutex::new(None),
            current_room: Mutex::new(None),
        });
        let task = tokio::spawn(run_connection(Arc::clone(&inner), outbound_rx));
        Self {
            inner,
            task: Mutex::new(Some(task)),
        }
    }

    /// 着信シグナリングメッセージの受け口を設定する
    pub fn set_signal_handler(&self, handler: SignalHandler) {
        *self.inner.signal_handler.lock().expect("handler poisoned") = Some(handler);
    }

    /// トランスポート切断の通知先を設定する
    pub fn set_disruption_handler(&self, handler: DisruptionHandler) {
        *self
            .inner
            .disruption_handler
            .lock()
            .expect("handler poisoned") = Some(handler);
    }

    /// シグナリング送信のルームスコープを設定する（join 後に呼ぶ）
    pub fn bind_room(&self, room_id: &RoomId) {
        *self.inner.current_room.lock().expect("room poisoned") =
            Some(room_id.as_str().to_string());
    }

    /// ルームスコープを解除する（leave 後に呼ぶ）
    pub fn unbind_room(&self) {
        *self.inner.current_room.lock().expect("room poisoned") = None;
    }

    /// 現在接続中かどうか
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// 監督タスクを停止する
    pub fn shutdown(&self) {
        if let Some(task) = self.task.lock().expect("task poisoned").take() {
            task.abort();
        }
    }
}

impl Drop for WebSocketRealtimeClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[async_trait]
impl ChangeFeed for WebSocketRealtimeClient {
    async fn subscribe(
        &self,
        concern: Concern,
        room_id: &RoomId,
        on_event: EventCallback,
    ) -> Result<SubscriptionId, FeedError> {
        if !self.inner.connected.load(Ordering::SeqCst) {
            return Err(FeedError::NotConnected);
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .subscriptions
            .lock()
            .expect("subscriptions poisoned")
            .insert(
                id,
                Registration {
                    concern,
                    room_id: room_id.as_str().to_string(),
                    callback: on_event,
                },
            );
        let frame = ClientFrame::Subscribe {
            subscription: id,
            concern: concern.as_str().to_string(),
            room_id: room_id.as_str().to_string(),
        };
        if self.inner.outbound_tx.send(frame).is_err() {
            self.inner
                .subscriptions
                .lock()
                .expect("subscriptions poisoned")
                .remove(&id);
            return Err(FeedError::SubscribeFailed(
                concern.as_str().to_string(),
                "transport task stopped".to_string(),
            ));
        }
        Ok(SubscriptionId(id))
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), FeedError> {
        self.inner
            .subscriptions
            .lock()
            .expect("subscriptions poisoned")
            .remove(&id.0);
        self.inner
            .outbound_tx
            .send(ClientFrame::Unsubscribe { subscription: id.0 })
            .map_err(|_| FeedError::UnsubscribeFailed("transport task stopped".to_string()))
    }

    async fn subscription_count(&self) -> usize {
        self.inner
            .subscriptions
            .lock()
            .expect("subscriptions poisoned")
            .len()
    }
}

#[async_trait]
impl SignalingChannel for WebSocketRealtimeClient {
    async fn send(
        &self,
        to: Option<&ParticipantId>,
        message: SignalMessage,
    ) -> Result<(), SignalingError> {
        let room_id = self
            .inner
            .current_room
            .lock()
            .expect("room poisoned")
            .clone()
            .ok_or_else(|| SignalingError::SendFailed("no room bound".to_string()))?;
        let frame = ClientFrame::Signal {
            room_id,
            to: to.map(|p| p.as_str().to_string()),
            message: signal_payload_from_message(&message),
        };
        self.inner
            .outbound_tx
            .send(frame)
            .map_err(|_| SignalingError::SendFailed("transport task stopped".to_string()))
    }
}

/// 接続の監督ループ
///
/// 切断されるたびに disruption を通知し、バックオフを挟んで接続し直す。
/// 接続に成功したら試行カウンタをリセットし、購読を再作成する。
async fn run_connection(inner: Arc<ClientInner>, mut outbound: mpsc::UnboundedReceiver<ClientFrame>) {
    let mut attempt: u32 = 0;
    loop {
        match connect_async(&inner.url).await {
            Ok((stream, _)) => {
                tracing::info!("Realtime transport connected to '{}'", inner.url);
                attempt = 0;
                inner.connected.store(true, Ordering::SeqCst);
                inner.resubscribe_all();
                let reason = drive_socket(&inner, stream, &mut outbound).await;
                inner.connected.store(false, Ordering::SeqCst);
                tracing::warn!("Realtime transport disconnected: {}", reason);
                inner.notify_disruption();
            }
            Err(e) => {
                tracing::warn!("Realtime transport connect failed: {}", e);
            }
        }
        match inner.backoff.delay_for(attempt) {
            Some(delay) => tokio::time::sleep(delay).await,
            None => {
                tracing::error!(
                    "Realtime transport giving up after {} attempts",
                    inner.backoff.max_attempts()
                );
                return;
            }
        }
        attempt += 1;
    }
}

/// 確立済みソケットの読み書きループ。終了理由を返す
async fn drive_socket(
    inner: &Arc<ClientInner>,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    outbound: &mut mpsc::UnboundedReceiver<ClientFrame>,
) -> String {
    let (mut sink, mut source) = stream.split();
    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    return "client dropped".to_string();
                };
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!("Failed to encode outbound frame: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    return e.to_string();
                }
            }
            message = source.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => inner.dispatch(text.as_ref()),
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) => return "closed by server".to_string(),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return e.to_string(),
                    None => return "stream ended".to_string(),
                }
            }
        }
    }
}
