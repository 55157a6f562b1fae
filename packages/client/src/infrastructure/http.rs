//! HTTP RPC クライアント実装
//!
//! [`RoomRpc`] の reqwest による実装。bearer credential は
//! [`AuthProvider`] から毎リクエスト取得する（トークン更新に追従するため）。
//!
//! ステータスの対応:
//! - 401 → `RpcError::Unauthorized`
//! - その他の非 2xx → `RpcError::Status(code)`
//! - トランスポート障害 → `RpcError::Network`
//! - レスポンス本文の解釈失敗 → `RpcError::Decode`

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::{
    AuthProvider, ChatMessage, GiftAck, GiftId, GiftTransaction, IdempotencyKey, JoinReply,
    RoomId, RoomRpc, RpcError, StreamKey,
};

use super::dto::conversion::room_role_from_str;
use super::dto::rpc::{
    ChatPageReply, JoinRoomReply, JoinRoomRequest, ParticipantCountReply, RoomKeyRequest,
    SendGiftReply, SendGiftRequest,
};

/// HTTP ステータスを RpcError に対応付ける
fn status_error(code: u16) -> RpcError {
    if code == 401 {
        RpcError::Unauthorized
    } else {
        RpcError::Status(code)
    }
}

/// ベース URL とパスを連結する（末尾スラッシュの有無を吸収）
fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// HTTP バックエンドに対する RoomRpc 実装
pub struct HttpRoomRpc {
    http: reqwest::Client,
    base_url: String,
    auth: Arc<dyn AuthProvider>,
}

impl HttpRoomRpc {
    /// 新しい HttpRoomRpc を作成
    pub fn new(base_url: String, auth: Arc<dyn AuthProvider>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            auth,
        }
    }

    /// reqwest クライアントを差し替える（タイムアウト等のチューニング用）
    pub fn with_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth.bearer_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, RpcError> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| RpcError::Network(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status.as_u16()));
        }
        Ok(response)
    }

    async fn post_json<Req, Reply>(&self, path: &str, body: &Req) -> Result<Reply, RpcError>
    where
        Req: Serialize + Sync,
        Reply: DeserializeOwned,
    {
        let request = self.http.post(endpoint(&self.base_url, path)).json(body);
        let response = self.execute(request).await?;
        response
            .json::<Reply>()
            .await
            .map_err(|e| RpcError::Decode(e.to_string()))
    }

    /// レスポンス本文を読まない POST（leave / heartbeat 用）
    async fn post_no_content<Req>(&self, path: &str, body: &Req) -> Result<(), RpcError>
    where
        Req: Serialize + Sync,
    {
        let request = self.http.post(endpoint(&self.base_url, path)).json(body);
        self.execute(request).await?;
        Ok(())
    }

    async fn get_json<Reply>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Reply, RpcError>
    where
        Reply: DeserializeOwned,
    {
        let request = self.http.get(endpoint(&self.base_url, path)).query(query);
        let response = self.execute(request).await?;
        response
            .json::<Reply>()
            .await
            .map_err(|e| RpcError::Decode(e.to_string()))
    }
}

#[async_trait]
impl RoomRpc for HttpRoomRpc {
    async fn join_room(&self, stream_key: &StreamKey) -> Result<JoinReply, RpcError> {
        let reply: JoinRoomReply = self
            .post_json(
                "/api/rooms/join",
                &JoinRoomRequest {
                    stream_key: stream_key.as_str().to_string(),
                },
            )
            .await?;
        let room_id =
            RoomId::new(reply.room_id).map_err(|e| RpcError::Decode(e.to_string()))?;
        let role = room_role_from_str(&reply.role).map_err(|e| RpcError::Decode(e.to_string()))?;
        Ok(JoinReply {
            room_id,
            role,
            viewer_count: reply.viewer_count,
        })
    }

    async fn leave_room(&self, stream_key: &StreamKey) -> Result<(), RpcError> {
        self.post_no_content(
            "/api/rooms/leave",
            &RoomKeyRequest {
                stream_key: stream_key.as_str().to_string(),
            },
        )
        .await
    }

    async fn heartbeat(&self, stream_key: &StreamKey) -> Result<(), RpcError> {
        self.post_no_content(
            "/api/rooms/heartbeat",
            &RoomKeyRequest {
                stream_key: stream_key.as_str().to_string(),
            },
        )
        .await
    }

    async fn send_gift(
        &self,
        stream_key: &StreamKey,
        gift_id: &GiftId,
        idempotency_key: &IdempotencyKey,
    ) -> Result<GiftAck, RpcError> {
        let reply: SendGiftReply = self
            .post_json(
                "/api/gifts",
                &SendGiftRequest {
                    stream_key: stream_key.as_str().to_string(),
                    gift_id: gift_id.as_str().to_string(),
                    idempotency_key: idempotency_key.to_string(),
                },
            )
            .await?;
        let transaction = reply
            .transaction
            .map(GiftTransaction::try_from)
            .transpose()
            .map_err(|e| RpcError::Decode(e.to_string()))?;
        Ok(GiftAck {
            ack: reply.ack,
            transaction,
            new_balance: reply.new_balance,
            new_level: reply.new_level,
            new_xp: reply.new_xp,
            diamonds_earned: reply.diamonds_earned,
            error: reply.error,
        })
    }

    async fn fetch_chat_page(
        &self,
        room_id: &RoomId,
        before: Option<i64>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, RpcError> {
        let mut query: Vec<(&str, String)> = vec![("limit", limit.to_string())];
        if let Some(before) = before {
            query.push(("before", before.to_string()));
        }
        let reply: ChatPageReply = self
            .get_json(&format!("/api/rooms/{}/chat", room_id.as_str()), &query)
            .await?;
        reply
            .messages
            .into_iter()
            .map(|record| {
                ChatMessage::try_from(record).map_err(|e| RpcError::Decode(e.to_string()))
            })
            .collect()
    }

    async fn active_participant_count(&self, room_id: &RoomId) -> Result<u32, RpcError> {
        let reply: ParticipantCountReply = self
            .get_json(
                &format!("/api/rooms/{}/participants", room_id.as_str()),
                &[],
            )
            .await?;
        Ok(reply.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_base_and_path() {
        // テスト項目: ベース URL とパスのスラッシュが正規化される
        // given (前提条件):

        // when (操作):

        // then (期待する結果):
        assert_eq!(
            endpoint("https://api.example.com", "/api/rooms/join"),
            "https://api.example.com/api/rooms/join"
        );
        assert_eq!(
            endpoint("https://api.example.com/", "api/rooms/join"),
            "https://api.example.com/api/rooms/join"
        );
    }

    #[test]
    fn test_status_error_maps_401_to_unauthorized() {
        // テスト項目: 401 だけが Unauthorized になり、他はステータスを保持する
        // given (前提条件):

        // when (操作):

        // then (期待する結果):
        assert_eq!(status_error(401), RpcError::Unauthorized);
        assert_eq!(status_error(402), RpcError::Status(402));
        assert_eq!(status_error(500), RpcError::Status(500));
    }
}
