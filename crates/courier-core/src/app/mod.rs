//! App - アプリケーション層
//!
//! ストア、レーン、協調者を組み合わせてキューを動かします。
//!
//! # 主要コンポーネント
//! - **EngineBuilder**: ワイヤリングと設定の検証
//! - **JobQueueEngine**: 起動時リカバリ、Ready ゲート、ディスパッチ、完了処理
//! - **QueueCounts**: ラベルごとの状態別件数

mod builder;
mod engine;
mod status;

pub use self::builder::EngineBuilder;
pub use self::engine::{EngineState, JobQueueEngine};
pub use self::status::QueueCounts;
