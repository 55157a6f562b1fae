//! WebSocket リアルタイムトランスポートのフレーム DTO
//!
//! change-feed の購読とシグナリングは同じソケットを共有する。
//! フレームは `type` フィールドでタグ付けされた JSON。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// クライアント → サーバーのフレーム
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// 購読の開始（`subscription` はクライアントが採番し、サーバーが echo する）
    Subscribe {
        subscription: u64,
        concern: String,
        room_id: String,
    },
    /// 購読の解除
    Unsubscribe { subscription: u64 },
    /// シグナリングメッセージの送信
    Signal {
        room_id: String,
        /// None = ルーム内ブロードキャスト
        to: Option<String>,
        message: SignalPayload,
    },
}

/// サーバー → クライアントのフレーム
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// change-feed イベント
    Event {
        subscription: u64,
        #[serde(rename = "event")]
        kind: String,
        #[serde(default)]
        old: Option<Value>,
        #[serde(default)]
        new: Option<Value>,
    },
    /// シグナリングメッセージの着信
    Signal { from: String, message: SignalPayload },
    /// サーバーが報告するエラー（購読の拒否等）
    Error { reason: String },
}

/// シグナリングメッセージのペイロード
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalPayload {
    UserJoined {
        participant: String,
    },
    UserLeft {
        participant: String,
    },
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    Candidate {
        candidate: String,
        #[serde(default)]
        sdp_mid: Option<String>,
        #[serde(default)]
        sdp_mline_index: Option<u32>,
    },
}
