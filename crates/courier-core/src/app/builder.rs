//! EngineBuilder - JobQueueEngine の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）

use std::sync::Arc;

use super::engine::JobQueueEngine;
use crate::config::QueueConfig;
use crate::domain::QueueError;
use crate::ports::{Clock, IdGenerator, JobFactory, Store, SystemClock, UlidGenerator};

/// EngineBuilder は [`JobQueueEngine`] を構築
///
/// # 使用例
/// ```ignore
/// let engine = EngineBuilder::new(store, factory)
///     .config(QueueConfig::new("messages"))
///     .build()?;
/// engine.set_ready(true);
/// ```
///
/// # Fail-fast 設計
/// - `build()` は何も spawn する前に設定を検証する
/// - 不正な設定で中途半端に起動したエンジンは作られない
pub struct EngineBuilder {
    store: Arc<dyn Store>,
    factory: Arc<dyn JobFactory>,
    config: QueueConfig,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

impl EngineBuilder {
    pub fn new(store: Arc<dyn Store>, factory: Arc<dyn JobFactory>) -> Self {
        Self {
            store,
            factory,
            config: QueueConfig::default(),
            clock: None,
            ids: None,
        }
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Defaults to a monotonic ULID generator on the engine's clock.
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Validate and start the engine. Must be called inside a tokio runtime.
    ///
    /// The engine starts NotReady; call `set_ready(true)` to recover and dispatch.
    pub fn build(self) -> Result<JobQueueEngine, QueueError> {
        self.config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));

        Ok(JobQueueEngine::start(
            self.config,
            self.store,
            self.factory,
            clock,
            ids,
        ))
    }
}

impl JobQueueEngine {
    pub fn builder(store: Arc<dyn Store>, factory: Arc<dyn JobFactory>) -> EngineBuilder {
        EngineBuilder::new(store, factory)
    }
}
