//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（共有 TTL ストア、時計、ログ基盤）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - 共有ストアが唯一の正本（プロセス内にロック状態を持たない）
//! - 時刻と ID はテストで差し替え可能

pub mod clock;
pub mod event_sink;
pub mod id_generator;
pub mod ttl_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::EventSink;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::ttl_store::{StoreError, TtlStore};
