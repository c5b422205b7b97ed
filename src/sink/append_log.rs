//! Append-log sink
//!
//! Writes one JSON line per message to `<log_dir>/<session>.log`.
//!
//! Durability depends on the flush policy:
//! - `sync`: the writer is flushed after every line, so a crash loses nothing
//!   that `write` reported as done.
//! - `batched`: the writer is flushed when `flush_interval` has passed since
//!   the previous flush, when the queue worker goes idle for that long, and
//!   when the session stops. A crash loses the lines written since the last
//!   flush.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;

use super::{Sink, SinkKind};
use crate::config::FlushPolicy;
use crate::message::Message;
use crate::utils::SinkError;

struct LogFile {
    writer: BufWriter<File>,
    last_flush: Instant,
}

pub struct AppendLog {
    path: PathBuf,
    policy: FlushPolicy,
    interval: Duration,
    file: Mutex<LogFile>,
}

impl AppendLog {
    pub async fn open(
        dir: &Path,
        session_id: &str,
        policy: FlushPolicy,
        interval: Duration,
    ) -> Result<Self, SinkError> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{}.log", file_stem(session_id)));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            policy,
            interval,
            file: Mutex::new(LogFile {
                writer: BufWriter::new(file),
                last_flush: Instant::now(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Session ids come from callers. Bytes outside `[A-Za-z0-9._-]` are
/// written as `%XX`, so distinct ids always get distinct files.
pub fn file_stem(session_id: &str) -> String {
    let mut stem = String::with_capacity(session_id.len());
    for byte in session_id.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("%{byte:02X}"));
        }
    }
    stem
}

#[async_trait]
impl Sink for AppendLog {
    fn name(&self) -> &str {
        "append-log"
    }

    fn kind(&self) -> SinkKind {
        SinkKind::AppendLog
    }

    fn may_block(&self) -> bool {
        true
    }

    fn flush_interval(&self) -> Option<Duration> {
        match self.policy {
            FlushPolicy::Sync => None,
            FlushPolicy::Batched => Some(self.interval),
        }
    }

    async fn write(&self, message: Arc<Message>) -> Result<(), SinkError> {
        let mut line = message.to_json_line()?;
        line.push('\n');

        let mut file = self.file.lock().await;
        file.writer.write_all(line.as_bytes()).await?;

        let due = match self.policy {
            FlushPolicy::Sync => true,
            FlushPolicy::Batched => file.last_flush.elapsed() >= self.interval,
        };
        if due {
            file.writer.flush().await?;
            file.last_flush = Instant::now();
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), SinkError> {
        let mut file = self.file.lock().await;
        file.writer.flush().await?;
        file.last_flush = Instant::now();
        Ok(())
    }
}
