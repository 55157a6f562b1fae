//! メディア関連の trait 定義
//!
//! 映像のエンコード・転送の内部はこのコアの責務外であり、不透明な
//! ハンドルと trait の背後に置く。メッシュコントローラはこれらの trait を
//! 通じて接続のセットアップとネゴシエーションのみを駆動する。

use std::sync::Arc;

use async_trait::async_trait;

use super::error::{MediaError, MeshError};
use super::room::ParticipantId;
use super::signaling::{IceCandidate, SessionDescription};

/// 取得済みのローカルメディア（カメラ・マイク）への不透明ハンドル
///
/// 全てのピア接続で共有され、参照カウントで管理される。
pub trait LocalMedia: Send + Sync {
    /// ハンドルの識別子（ログ用）
    fn id(&self) -> &str;

    /// トラックを停止し、デバイスを解放する
    fn stop(&self);
}

/// 共有可能なローカルメディアのハンドル
pub type MediaHandle = Arc<dyn LocalMedia>;

/// ローカルメディアの取得元（メディアパーミッションの獲得を含む）
#[async_trait]
pub trait MediaProvider: Send + Sync {
    /// ローカルメディアを取得する
    async fn acquire(&self) -> Result<MediaHandle, MediaError>;
}

/// リモート参加者 1 人に対するメディア接続
///
/// WebRTC 実装の詳細（トラック、トランシーバ等）はこの trait の背後に隠れる。
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// ローカルメディアのトラックを接続に追加する
    async fn attach_media(&self, media: MediaHandle) -> Result<(), MeshError>;

    /// SDP offer を生成し、ローカル記述として設定する
    async fn create_offer(&self) -> Result<SessionDescription, MeshError>;

    /// SDP answer を生成し、ローカル記述として設定する
    async fn create_answer(&self) -> Result<SessionDescription, MeshError>;

    /// リモート記述を設定する
    async fn set_remote_description(&self, description: SessionDescription)
    -> Result<(), MeshError>;

    /// ICE 候補を適用する
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MeshError>;

    /// 接続を閉じる（ローカル参照の解放のみ。共有メディアは停止しない）
    async fn close(&self);
}

/// ピア接続のファクトリ
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    /// リモート参加者向けの新しい接続を作成する
    async fn create(&self, remote: &ParticipantId) -> Result<Arc<dyn PeerConnection>, MeshError>;
}
