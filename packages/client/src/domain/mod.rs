//! Domain 層
//!
//! ライブルームコアの Domain Model と、Infrastructure 層が実装する
//! trait（依存性の逆転）を定義します。

pub mod chat;
pub mod error;
pub mod event;
pub mod gift;
pub mod media;
pub mod room;
pub mod signaling;
pub mod transport;

pub use chat::ChatMessage;
pub use error::{
    DomainError, FeedError, GiftError, MediaError, MeshError, RpcError, SessionError,
    SignalingError,
};
pub use event::{ChangeEvent, ChangeKind, Concern, EventCallback, SubscriptionId};
pub use gift::{GiftAck, GiftId, GiftStatus, GiftTransaction, IdempotencyKey};
pub use media::{LocalMedia, MediaHandle, MediaProvider, PeerConnection, PeerConnectionFactory};
pub use room::{
    ConnectionStatus, JoinedRoom, ParticipantId, RoomId, RoomRole, RoomSession, StreamKey,
};
pub use signaling::{
    IceCandidate, SdpKind, SessionDescription, SignalMessage, SignalingChannel,
};
pub use transport::{AuthProvider, ChangeFeed, JoinReply, RoomRpc};
