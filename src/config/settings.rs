use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for the HTTP control surface, logging and the ingestion
/// core. Every section falls back to its defaults, so partial files are fine.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub log: LogSettings,
    pub ingest: IngestSettings,
}

/// Configuration settings for the HTTP control surface.
///
/// Defines the host and port the server will bind to.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// What a hand-off queue does when a slow sink falls behind.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Evict the oldest queued message to make room.
    #[default]
    DropOldest,
    /// Refuse the incoming message.
    DropNewest,
}

/// When the append-log sink flushes its buffered writer.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FlushPolicy {
    /// Flush after every line.
    #[default]
    Sync,
    /// Flush once `flush_interval_ms` has elapsed since the last flush, and on
    /// stop. Lines written since the last flush are lost on a crash.
    Batched,
}

/// Configuration for the ingestion core.
///
/// Controls buffering, sink hand-off, append-log and store placement, and the
/// reconnect policy applied to every session.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IngestSettings {
    /// Messages kept per session in the in-memory buffer.
    pub buffer_capacity: usize,
    /// Capacity of each hand-off queue in front of a slow sink.
    pub queue_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    pub sink_timeout_ms: u64,
    /// How long a stopping session waits for queued sink writes.
    pub drain_timeout_ms: u64,
    pub log_dir: PathBuf,
    pub flush_policy: FlushPolicy,
    pub flush_interval_ms: u64,
    pub store_path: PathBuf,
    /// Per-session retention cap of the store sink. `None` keeps everything.
    pub store_max_messages: Option<usize>,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_multiplier: f64,
    /// Relative jitter applied to every backoff delay (0.2 = ±20%).
    pub backoff_jitter: f64,
    /// Reconnect attempts before a session is marked failed. `None` retries
    /// forever.
    pub max_reconnect_attempts: Option<u32>,
    pub connect_timeout_ms: u64,
    pub keep_alive_secs: u64,
    /// Capacity of the channel between a connection driver and its session.
    pub event_channel_capacity: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            buffer_capacity: 1000,
            queue_capacity: 1024,
            overflow_policy: OverflowPolicy::DropOldest,
            sink_timeout_ms: 5000,
            drain_timeout_ms: 2000,
            log_dir: PathBuf::from("ingest_logs"),
            flush_policy: FlushPolicy::Sync,
            flush_interval_ms: 1000,
            store_path: PathBuf::from("ingest_db"),
            store_max_messages: Some(10_000),
            backoff_initial_ms: 1000,
            backoff_max_ms: 60_000,
            backoff_multiplier: 2.0,
            backoff_jitter: 0.2,
            max_reconnect_attempts: None,
            connect_timeout_ms: 10_000,
            keep_alive_secs: 60,
            event_channel_capacity: 1024,
        }
    }
}

impl IngestSettings {
    pub fn sink_timeout(&self) -> Duration {
        Duration::from_millis(self.sink_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
