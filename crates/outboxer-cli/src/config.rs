//! AppConfig - `outboxer.toml` の読み込み
//!
//! 優先順位: コマンドライン / 環境変数 > ファイル > デフォルト。
//! ファイルが無ければデフォルトのまま起動します。
//!
//! ```toml
//! database_url = "postgres://localhost/app"
//! nats_url = "nats://localhost:4222"
//! table = "outbox"
//! stream = "OUTBOX"
//! sweep_interval_secs = 60
//!
//! [publisher]
//! workers = { mode = "pooled", size = 4 }
//! ack_timeout_ms = 30000
//!
//! [log]
//! level = "info"
//! json = false
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use outboxer_core::PublisherConfig;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_url: String,
    pub nats_url: String,
    /// Outbox table, `name` or `schema.name`.
    pub table: String,
    /// JetStream stream that captures the outbox subjects. Empty skips stream setup.
    pub stream: String,
    /// Subjects bound to `stream` when it has to be created.
    pub subjects: Vec<String>,
    /// `CREATE TABLE IF NOT EXISTS` on startup.
    pub create_table: bool,
    /// PostgreSQL lock timeout per claim. Omit it for the server default.
    pub lock_timeout_ms: Option<u64>,
    pub publisher: PublisherConfig,
    pub log: LogConfig,
    /// Pause between sweeps in `run`.
    pub sweep_interval_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/outboxer".to_string(),
            nats_url: "nats://localhost:4222".to_string(),
            table: "outbox".to_string(),
            stream: String::new(),
            subjects: Vec::new(),
            create_table: false,
            lock_timeout_ms: None,
            publisher: PublisherConfig::default(),
            log: LogConfig::default(),
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Values given on the command line or in the environment.
#[derive(Debug, Default)]
pub struct Overrides {
    pub database_url: Option<String>,
    pub nats_url: Option<String>,
    pub table: Option<String>,
}

impl AppConfig {
    /// Read `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("failed to parse config at {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(url) = overrides.database_url {
            self.database_url = url;
        }
        if let Some(url) = overrides.nats_url {
            self.nats_url = url;
        }
        if let Some(table) = overrides.table {
            self.table = table;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.publisher.validate()?;
        // PostgreSQL は 0 を「無制限」と解釈する
        if self.lock_timeout_ms == Some(0) {
            anyhow::bail!("lock_timeout_ms must be positive, omit it for the server default");
        }
        if self.sweep_interval_secs == 0 {
            anyhow::bail!("sweep_interval_secs must be at least 1");
        }
        if !self.stream.is_empty() && self.subjects.is_empty() {
            anyhow::bail!("stream {:?} is set but no subjects are bound to it", self.stream);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outboxer_core::WorkerMode;
    use rstest::rstest;

    #[test]
    fn empty_file_is_all_defaults() {
        assert_eq!(AppConfig::parse("").unwrap(), AppConfig::default());
    }

    #[test]
    fn missing_file_is_all_defaults() {
        let config = AppConfig::load(Path::new("/nonexistent/outboxer.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn full_file_parses() {
        let config = AppConfig::parse(
            r#"
            database_url = "postgres://db/app"
            table = "events.outbox"
            stream = "OUTBOX"
            subjects = ["orders.>"]
            sweep_interval_secs = 5

            [publisher]
            workers = { mode = "ad_hoc", queue_capacity = 16 }
            ack_timeout_ms = 1000

            [log]
            level = "debug"
            json = true
            "#,
        )
        .unwrap();

        assert_eq!(config.database_url, "postgres://db/app");
        assert_eq!(config.nats_url, AppConfig::default().nats_url);
        assert_eq!(config.table, "events.outbox");
        assert_eq!(
            config.publisher.workers,
            WorkerMode::AdHoc { queue_capacity: 16 }
        );
        assert_eq!(config.publisher.ack_timeout_ms, Some(1000));
        assert!(config.log.json);
        assert_eq!(config.sweep_interval_secs, 5);
    }

    #[rstest]
    #[case::zero_pool("[publisher]\nworkers = { mode = \"pooled\", size = 0 }")]
    #[case::zero_interval("sweep_interval_secs = 0")]
    #[case::zero_lock_timeout("lock_timeout_ms = 0")]
    #[case::stream_without_subjects("stream = \"OUTBOX\"")]
    #[case::unknown_mode("[publisher]\nworkers = { mode = \"threads\" }")]
    fn rejects(#[case] contents: &str) {
        assert!(AppConfig::parse(contents).is_err());
    }

    #[test]
    fn positive_lock_timeout_is_kept() {
        let config = AppConfig::parse("lock_timeout_ms = 250").unwrap();
        assert_eq!(config.lock_timeout_ms, Some(250));
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = AppConfig::default();
        config.apply(Overrides {
            database_url: Some("postgres://override/db".to_string()),
            nats_url: None,
            table: Some("outbox_v2".to_string()),
        });
        assert_eq!(config.database_url, "postgres://override/db");
        assert_eq!(config.nats_url, AppConfig::default().nats_url);
        assert_eq!(config.table, "outbox_v2");
    }
}
