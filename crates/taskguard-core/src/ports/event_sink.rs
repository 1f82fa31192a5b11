//! EventSink port - イベント記録の抽象化
//!
//! # 実装
//! - TracingEventSink: `tracing` に構造化ログとして出す（デフォルト）
//! - RecordingEventSink: メモリに溜める（テスト・デモ用）

use crate::domain::GuardEvent;

/// EventSink はガードのイベントを記録
///
/// Emission is synchronous and must not fail; sinks that forward to a remote
/// system should buffer internally.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &GuardEvent);
}
