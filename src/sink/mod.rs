//! Message sinks.
//!
//! Every session fans each ingested message out to its sinks through a
//! [`SinkPipeline`]. Sinks that can stall (file and store writes) sit behind
//! their own [`HandoffQueue`] and worker so they never hold up ingestion or
//! each other; in-memory sinks are written inline.

pub mod append_log;
pub mod buffer;
pub mod pipeline;
pub mod push;
pub mod queue;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::utils::SinkError;

pub use append_log::AppendLog;
pub use buffer::{Gap, MessageBuffer, MessagePage};
pub use pipeline::{PipelineCounters, SinkPipeline};
pub use push::PushChannel;
pub use queue::{HandoffQueue, PushOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SinkKind {
    BoundedBuffer,
    AppendLog,
    PushChannel,
    ExternalStore,
}

#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> SinkKind;

    /// Whether `write` may wait on I/O. Such sinks get a queue and a worker.
    fn may_block(&self) -> bool;

    async fn write(&self, message: Arc<Message>) -> Result<(), SinkError>;

    async fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }

    /// How long the worker may sit idle before it calls `flush`.
    fn flush_interval(&self) -> Option<Duration> {
        None
    }
}
