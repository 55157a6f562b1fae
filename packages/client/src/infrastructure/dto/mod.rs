//! DTO 層
//!
//! バックエンドとの境界で使う serde 型と、Domain Model への変換を提供します。
//! Domain 層は serde に依存せず、変換はこの層に閉じます。

pub mod conversion;
pub mod realtime;
pub mod rpc;
