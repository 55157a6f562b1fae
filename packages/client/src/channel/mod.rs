//! Change-feed 多重化
//!
//! アクティブなルームの concern（chat / gifts / battle / presence）ごとに
//! 1 つの購読を所有し、受信イベントを登録済みコールバックへ配送する薄い
//! fan-out 層。ビジネスロジック（ギフト ACK の解決等）は消費側に置く。

mod multiplexer;
mod pagination;

pub use multiplexer::ChannelMultiplexer;
pub use pagination::{CHAT_PAGE_SIZE, ChatHistory};
