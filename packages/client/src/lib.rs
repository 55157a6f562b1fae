//! butai のライブルーム・クライアントコア
//!
//! ライブ配信ルームのリアルタイム機能を支えるクライアント側ライブラリです。
//!
//! - **session**: ルームへの参加・退出のオーケストレーションと heartbeat
//! - **gift**: 冪等性キーに基づくギフト送信の exactly-once 解決
//!   （RPC 応答と change-feed の二重経路レース）
//! - **channel**: change-feed 購読の多重化とチャット履歴のページング
//! - **mesh**: ピアツーピア映像配信のネゴシエーション管理
//! - **domain / infrastructure**: Domain Model・trait 定義と、
//!   HTTP / WebSocket による具体実装
//!
//! UI・レンダリングはこのクレートの責務外です。状態の観測点
//! （接続状態 watch、イベントハンドラ、購読数プローブ）だけを公開します。

pub mod channel;
pub mod domain;
pub mod gift;
pub mod infrastructure;
pub mod mesh;
pub mod session;

pub use channel::{CHAT_PAGE_SIZE, ChannelMultiplexer, ChatHistory};
pub use gift::{DEFAULT_ACK_TIMEOUT, GiftCoordinator};
pub use mesh::{NegotiationState, PeerMeshController};
pub use session::{
    BackoffPolicy, DEFAULT_HEARTBEAT_INTERVAL, HeartbeatScheduler, RoomEventHandlers,
    RoomSessionManager,
};
