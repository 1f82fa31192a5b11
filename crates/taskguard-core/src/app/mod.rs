//! App - アプリケーション層
//!
//! ports を組み合わせてロックプロトコルを実装します。
//!
//! # 主要コンポーネント
//! - **GuardBuilder**: Guard の構築とワイヤリング（Fail-fast 検証つき）
//! - **Guard**: acquire / release / renew / run_guarded
//! - **Heartbeat**: 長時間ジョブの自動 renew
//! - **Reclaimer / ReclaimerLoop**: 放置ロックの回収
//! - **LockSnapshot / LockCounts**: ステータス表示用のビュー

pub mod builder;
pub mod guard;
pub mod heartbeat;
pub mod reclaimer;
pub mod reclaimer_loop;
pub mod status;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, GuardBuilder};
pub use self::guard::Guard;
pub use self::heartbeat::{Heartbeat, renew_interval};
pub use self::reclaimer::{ReclaimReport, Reclaimer};
pub use self::reclaimer_loop::ReclaimerLoop;
pub use self::status::{LockCounts, LockSnapshot};
