//! シグナリングメッセージの Domain Model
//!
//! ピアメッシュのネゴシエーションは change-feed とは別の、ルームスコープの
//! 双方向メッセージチャンネルで運ばれる。

use async_trait::async_trait;

use super::error::SignalingError;
use super::room::ParticipantId;

/// SDP の種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

/// SDP（セッション記述）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

/// ICE 候補（ネットワーク経路の記述子）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u32>,
}

/// シグナリングチャンネルを流れるメッセージ
#[derive(Debug, Clone)]
pub enum SignalMessage {
    /// 新しい参加者が join した（受信側が offer を起点する）
    UserJoined { participant: ParticipantId },
    /// 参加者が退出した
    UserLeft { participant: ParticipantId },
    /// SDP offer（受信側が answer を返す）
    Offer {
        from: ParticipantId,
        description: SessionDescription,
    },
    /// SDP answer
    Answer {
        from: ParticipantId,
        description: SessionDescription,
    },
    /// ICE 候補（ネゴシエーション中に継続的に交換される）
    Candidate {
        from: ParticipantId,
        candidate: IceCandidate,
    },
}

/// ルームスコープの双方向シグナリングチャンネル
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// メッセージを送信する
    ///
    /// `to` が `None` の場合はルーム内の全参加者へのブロードキャスト。
    async fn send(
        &self,
        to: Option<&ParticipantId>,
        message: SignalMessage,
    ) -> Result<(), SignalingError>;
}
