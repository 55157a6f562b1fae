//! Infrastructure 層
//!
//! ドメイン層の trait（[`crate::domain::RoomRpc`] 等）に対する具体実装と、
//! ワイヤフォーマットの DTO を提供します。

pub mod dto;
pub mod http;
pub mod realtime;
