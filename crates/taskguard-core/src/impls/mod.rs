//! Impls - ports の実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryTtlStore**: プロセス内の TTL ストア
//! - **TracingEventSink**: tracing への構造化ログ
//! - **RecordingEventSink**: イベントをメモリに保持
//!
//! # 本番用実装
//! 共有ストア（Redis など）の実装は別クレートに配置します。

pub mod event_sinks;
pub mod inmem_store;

pub use self::event_sinks::{RecordingEventSink, TracingEventSink};
pub use self::inmem_store::InMemoryTtlStore;
