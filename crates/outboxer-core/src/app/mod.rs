//! App - アプリケーション層
//!
//! ports を組み合わせて配送エンジンを実装します。
//!
//! # 主要コンポーネント
//! - **PublisherBuilder**: 構築とワイヤリング
//! - **Publisher**: worker pool / queue / error stream のライフサイクル
//! - **WorkerLoop**: claim → publish → confirm
//! - **RecoveryScanner**: 未 publish 行の再発見

pub mod builder;
pub mod config;
pub mod publisher;
pub mod recovery;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::builder::PublisherBuilder;
pub use self::config::{PublisherConfig, WorkerMode};
pub use self::publisher::{Publisher, SweepHandle};
pub use self::recovery::{RecoveryScanner, SweepReport};
pub use self::worker_loop::ErrorStream;
