//! Domain Model: ルームセッション
//!
//! ルームは永続的な `StreamKey`（クライアント指定）と、join 時にバックエンドが
//! 割り当てる `RoomId` の 2 つで識別されます。

use std::fmt;
use std::str::FromStr;

use super::chat::ChatMessage;
use super::error::DomainError;

/// StreamKey の最大長
const STREAM_KEY_MAX_LENGTH: usize = 128;

/// クライアントが指定するルームのセレクタ
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey(String);

impl StreamKey {
    /// 新しい StreamKey を作成（空文字・長すぎる値は拒否）
    pub fn new(value: String) -> Result<Self, DomainError> {
        if value.trim().is_empty() {
            return Err(DomainError::Empty("stream_key"));
        }
        if value.len() > STREAM_KEY_MAX_LENGTH {
            return Err(DomainError::TooLong("stream_key", STREAM_KEY_MAX_LENGTH));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// バックエンドが join 時に割り当てるルーム ID（クライアントからは不透明）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(value: String) -> Result<Self, DomainError> {
        if value.is_empty() {
            return Err(DomainError::Empty("room_id"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 参加者（ユーザー）の ID
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(value: String) -> Result<Self, DomainError> {
        if value.is_empty() {
            return Err(DomainError::Empty("participant_id"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ルーム内での役割（バックエンドが join 時に割り当てる）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomRole {
    Creator,
    Moderator,
    Viewer,
    Guest,
}

impl RoomRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomRole::Creator => "creator",
            RoomRole::Moderator => "moderator",
            RoomRole::Viewer => "viewer",
            RoomRole::Guest => "guest",
        }
    }
}

impl FromStr for RoomRole {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creator" => Ok(RoomRole::Creator),
            "moderator" => Ok(RoomRole::Moderator),
            "viewer" => Ok(RoomRole::Viewer),
            "guest" => Ok(RoomRole::Guest),
            _ => Err(DomainError::Invalid("role")),
        }
    }
}

/// セッションの接続状態
///
/// feed 配信エラーは `Reconnecting` への遷移のみを行い、セッション自体は
/// 破棄しない。再 join するかどうかは呼び出し側の判断に委ねる。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Reconnecting,
    Disconnected,
}

/// アクティブなルームメンバーシップ（プロセスごとに最大 1 つ）
#[derive(Debug, Clone)]
pub struct RoomSession {
    pub room_id: RoomId,
    pub stream_key: StreamKey,
    pub role: RoomRole,
}

/// join_room の結果
#[derive(Debug)]
pub struct JoinedRoom {
    pub room_id: RoomId,
    pub role: RoomRole,
    pub initial_viewer_count: u32,
    /// 最新 1 ページ分のチャット履歴（時系列昇順）
    pub initial_chat_page: Vec<ChatMessage>,
}
