//! Typed - 型付き GuardedTask API
//!
//! task_type と policy を型に紐付け、`Guard::run_task` で実行します。
//! 文字列の task_type を呼び出し側で毎回書かなくて済むので typo を防げます。

pub mod task;

pub use self::task::GuardedTask;
