//! Change-feed イベントの Domain Model
//!
//! 各 concern（chat / gifts / battle / presence）は独立した購読として配信され、
//! concern 内ではバックエンドのコミット順が保たれる。concern をまたいだ
//! 順序保証はない。

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// 購読対象の concern（バックエンドのレコードセットに対応）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Concern {
    Chat,
    Gifts,
    Battle,
    Presence,
}

impl Concern {
    /// 4 つ全ての concern（ルーム join 時の購読順）
    pub const ALL: [Concern; 4] = [
        Concern::Chat,
        Concern::Gifts,
        Concern::Battle,
        Concern::Presence,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Concern::Chat => "chat",
            Concern::Gifts => "gifts",
            Concern::Battle => "battle",
            Concern::Presence => "presence",
        }
    }
}

impl fmt::Display for Concern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// イベントの種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// 1 件の変更イベント
///
/// ペイロードは未変換の JSON のまま配信される。型付けされた解釈
/// （ギフトの突き合わせ等）は消費側コンポーネントの責務。
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    /// 変更前のレコード（update / delete のみ）
    pub old: Option<Value>,
    /// 変更後のレコード（insert / update のみ）
    pub new: Option<Value>,
}

/// 購読ハンドル（トランスポートが採番する）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// イベント配信コールバック
///
/// feed の読み取りループから同期的に呼ばれるため、ブロッキング処理や
/// 長時間の await を伴う処理は内部で spawn すること。
pub type EventCallback = Arc<dyn Fn(ChangeEvent) + Send + Sync>;
