//! QueueConfig - キュー設定
//!
//! # 学習ポイント
//! - `#[serde(default)]` で欠けたフィールドをデフォルト値で補う
//! - 起動時検証（Fail-fast）: 不正な値は `build()` で弾く

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{QueueError, RetryPolicy};

/// QueueConfig は 1 つのエンジンの設定
///
/// Every field has a default, so a config file only names what it changes:
///
/// ```json
/// { "label": "messages", "retry": { "max_retries": 5 }, "max_concurrency": 8 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Queue label. Only records with this label are recovered and dispatched.
    pub label: String,

    pub retry: RetryPolicy,

    /// Cap on work items running at once across all lanes.
    pub max_concurrency: Option<usize>,

    /// Buffer of the lifecycle event channel; slow subscribers lag past it.
    pub event_capacity: usize,

    /// Wait before retrying a dispatch, recovery or outcome commit that the
    /// store rejected.
    pub reclaim_delay_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            label: "default".to_string(),
            retry: RetryPolicy::default(),
            max_concurrency: None,
            event_capacity: 1024,
            reclaim_delay_ms: 1000,
        }
    }
}

impl QueueConfig {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, QueueError> {
        serde_json::from_str(json).map_err(|e| QueueError::Config(format!("json decode: {e}")))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| QueueError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), QueueError> {
        if self.label.trim().is_empty() {
            return Err(QueueError::Config("label must not be empty".to_string()));
        }
        if self.max_concurrency == Some(0) {
            return Err(QueueError::Config(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(QueueError::Config(
                "event_capacity must be at least 1".to_string(),
            ));
        }
        if self.reclaim_delay_ms == 0 {
            return Err(QueueError::Config(
                "reclaim_delay_ms must be at least 1".to_string(),
            ));
        }
        self.retry.validate().map_err(QueueError::Config)
    }

    pub fn reclaim_delay(&self) -> Duration {
        Duration::from_millis(self.reclaim_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn partial_json_keeps_defaults() {
        let config =
            QueueConfig::from_json_str(r#"{ "label": "messages", "retry": { "max_retries": 5 } }"#)
                .unwrap();
        assert_eq!(config.label, "messages");
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.backoff_base, 1.9);
        assert_eq!(config.max_concurrency, None);
    }

    #[test]
    fn reads_config_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        std::fs::write(&path, r#"{ "label": "receipts", "max_concurrency": 4 }"#).unwrap();
        let config = QueueConfig::from_path(&path).unwrap();
        assert_eq!(config.label, "receipts");
        assert_eq!(config.max_concurrency, Some(4));
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        assert!(matches!(
            QueueConfig::from_json_str("{ nope"),
            Err(QueueError::Config(_))
        ));
    }

    #[rstest]
    #[case::empty_label(QueueConfig { label: " ".to_string(), ..QueueConfig::default() })]
    #[case::zero_concurrency(QueueConfig { max_concurrency: Some(0), ..QueueConfig::default() })]
    #[case::zero_event_capacity(QueueConfig { event_capacity: 0, ..QueueConfig::default() })]
    #[case::zero_reclaim_delay(QueueConfig { reclaim_delay_ms: 0, ..QueueConfig::default() })]
    #[case::nan_scale(QueueConfig {
        retry: RetryPolicy { scale: f64::NAN, ..RetryPolicy::default() },
        ..QueueConfig::default()
    })]
    fn validation_rejects(#[case] config: QueueConfig) {
        assert!(matches!(config.validate(), Err(QueueError::Config(_))));
    }

    #[test]
    fn default_config_is_valid() {
        QueueConfig::default().validate().unwrap();
    }
}
