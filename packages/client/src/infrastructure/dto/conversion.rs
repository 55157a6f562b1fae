//! DTO と Domain Model の変換
//!
//! change-feed イベントのペイロード解釈（ギフトの突き合わせ、チャットの
//! 型付け）もここに置く。多重化層は未変換のまま配送するため、消費側が
//! この変換を通す。

use std::str::FromStr;

use crate::domain::{
    ChangeEvent, ChatMessage, DomainError, GiftId, GiftStatus, GiftTransaction, IceCandidate,
    IdempotencyKey, ParticipantId, RoomId, SdpKind, SessionDescription, SignalMessage,
};

use super::realtime::SignalPayload;
use super::rpc::{ChatMessageRecord, GiftTransactionRecord};

impl TryFrom<ChatMessageRecord> for ChatMessage {
    type Error = DomainError;

    fn try_from(record: ChatMessageRecord) -> Result<Self, Self::Error> {
        Ok(ChatMessage {
            id: record.id,
            room_id: RoomId::new(record.room_id)?,
            sender_id: ParticipantId::new(record.sender_id)?,
            body: record.body,
            created_at: record.created_at,
        })
    }
}

impl TryFrom<GiftTransactionRecord> for GiftTransaction {
    type Error = DomainError;

    fn try_from(record: GiftTransactionRecord) -> Result<Self, Self::Error> {
        let idempotency_key = IdempotencyKey::parse(&record.idempotency_key)
            .ok_or(DomainError::Invalid("idempotency_key"))?;
        let status =
            GiftStatus::parse(&record.status).ok_or(DomainError::Invalid("status"))?;
        Ok(GiftTransaction {
            id: record.id,
            idempotency_key,
            sender_id: ParticipantId::new(record.sender_id)?,
            receiver_id: ParticipantId::new(record.receiver_id)?,
            room_id: RoomId::new(record.room_id)?,
            gift_id: GiftId::new(record.gift_id),
            coin_cost: record.coin_cost,
            status,
        })
    }
}

/// gifts feed のイベントからトランザクションを取り出す
///
/// insert / update 以外、またはペイロードが解釈できない場合は `None`
/// （呼び出し側は no-op として扱う）。
pub fn gift_transaction_from_event(event: &ChangeEvent) -> Option<GiftTransaction> {
    let payload = event.new.as_ref()?;
    let record: GiftTransactionRecord = serde_json::from_value(payload.clone()).ok()?;
    match GiftTransaction::try_from(record) {
        Ok(transaction) => Some(transaction),
        Err(e) => {
            tracing::warn!("Discarding malformed gift event: {}", e);
            None
        }
    }
}

/// chat feed のイベントからメッセージを取り出す
pub fn chat_message_from_event(event: &ChangeEvent) -> Option<ChatMessage> {
    let payload = event.new.as_ref()?;
    let record: ChatMessageRecord = serde_json::from_value(payload.clone()).ok()?;
    ChatMessage::try_from(record).ok()
}

/// 着信フレームのシグナリングペイロードを Domain Model に変換する
pub fn signal_message_from_payload(
    from: String,
    payload: SignalPayload,
) -> Result<SignalMessage, DomainError> {
    let from = ParticipantId::new(from)?;
    let message = match payload {
        SignalPayload::UserJoined { participant } => SignalMessage::UserJoined {
            participant: ParticipantId::new(participant)?,
        },
        SignalPayload::UserLeft { participant } => SignalMessage::UserLeft {
            participant: ParticipantId::new(participant)?,
        },
        SignalPayload::Offer { sdp } => SignalMessage::Offer {
            from,
            description: SessionDescription {
                kind: SdpKind::Offer,
                sdp,
            },
        },
        SignalPayload::Answer { sdp } => SignalMessage::Answer {
            from,
            description: SessionDescription {
                kind: SdpKind::Answer,
                sdp,
            },
        },
        SignalPayload::Candidate {
            candidate,
            sdp_mid,
            sdp_mline_index,
        } => SignalMessage::Candidate {
            from,
            candidate: IceCandidate {
                candidate,
                sdp_mid,
                sdp_mline_index,
            },
        },
    };
    Ok(message)
}

/// 送信する Domain Model をフレームのペイロードに変換する
///
/// 送信者 ID はサーバー側で付与されるため、`from` はペイロードに含めない。
pub fn signal_payload_from_message(message: &SignalMessage) -> SignalPayload {
    match message {
        SignalMessage::UserJoined { participant } => SignalPayload::UserJoined {
            participant: participant.as_str().to_string(),
        },
        SignalMessage::UserLeft { participant } => SignalPayload::UserLeft {
            participant: participant.as_str().to_string(),
        },
        SignalMessage::Offer { description, .. } => SignalPayload::Offer {
            sdp: description.sdp.clone(),
        },
        SignalMessage::Answer { description, .. } => SignalPayload::Answer {
            sdp: description.sdp.clone(),
        },
        SignalMessage::Candidate { candidate, .. } => SignalPayload::Candidate {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
        },
    }
}

/// role を含む join 応答の変換補助
pub fn room_role_from_str(value: &str) -> Result<crate::domain::RoomRole, DomainError> {
    crate::domain::RoomRole::from_str(value)
}
