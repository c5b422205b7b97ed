use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, warn};

use super::queue::HandoffQueue;
use super::Sink;
use crate::config::IngestSettings;
use crate::message::Message;
use crate::utils::SinkError;

/// Shared with the session so status reads never touch the pipeline itself.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    dropped: AtomicU64,
    errors: AtomicU64,
}

impl PipelineCounters {
    /// Messages a queued sink never saw because its queue overflowed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Failed or timed-out sink writes and flushes.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }
}

struct Lane {
    name: String,
    queue: Arc<HandoffQueue<Arc<Message>>>,
    worker: JoinHandle<()>,
}

/// Fan-out from one session to its sinks.
///
/// Non-blocking sinks are written inline by `deliver`; every other sink gets a
/// bounded queue drained by its own task, so a stalled sink only ever loses
/// its own messages.
pub struct SinkPipeline {
    session_id: String,
    inline: Vec<Arc<dyn Sink>>,
    lanes: Vec<Lane>,
    counters: Arc<PipelineCounters>,
}

impl SinkPipeline {
    /// Must be called from within a tokio runtime; queued sinks start their
    /// workers immediately.
    pub fn new(
        session_id: &str,
        sinks: Vec<Arc<dyn Sink>>,
        settings: &IngestSettings,
        counters: Arc<PipelineCounters>,
    ) -> Self {
        let mut inline = Vec::new();
        let mut lanes = Vec::new();

        for sink in sinks {
            if !sink.may_block() {
                inline.push(sink);
                continue;
            }
            let queue = Arc::new(HandoffQueue::new(
                settings.queue_capacity,
                settings.overflow_policy,
            ));
            let name = sink.name().to_string();
            let worker = tokio::spawn(drain(
                session_id.to_string(),
                sink,
                Arc::clone(&queue),
                settings.sink_timeout(),
                Arc::clone(&counters),
            ));
            lanes.push(Lane {
                name,
                queue,
                worker,
            });
        }

        Self {
            session_id: session_id.to_string(),
            inline,
            lanes,
            counters,
        }
    }

    pub fn counters(&self) -> Arc<PipelineCounters> {
        Arc::clone(&self.counters)
    }

    pub async fn deliver(&self, message: Arc<Message>) {
        for sink in &self.inline {
            if let Err(err) = sink.write(Arc::clone(&message)).await {
                self.counters.record_error();
                warn!(session = %self.session_id, sink = sink.name(), error = %err, "Sink write failed");
            }
        }

        for lane in &self.lanes {
            let outcome = lane.queue.push(Arc::clone(&message));
            if outcome.dropped() {
                self.counters.record_drop();
                debug!(
                    session = %self.session_id,
                    sink = %lane.name,
                    ?outcome,
                    "Sink queue full"
                );
            }
        }
    }

    /// Stop accepting messages and let queued sinks drain for at most
    /// `drain_timeout` in total. Workers still busy after that are aborted.
    pub async fn shutdown(self, drain_timeout: Duration) {
        for lane in &self.lanes {
            lane.queue.close();
        }

        let deadline = Instant::now() + drain_timeout;
        for mut lane in self.lanes {
            if timeout_at(deadline, &mut lane.worker).await.is_err() {
                lane.worker.abort();
                warn!(
                    session = %self.session_id,
                    sink = %lane.name,
                    left = lane.queue.len(),
                    "Sink did not drain in time"
                );
            }
        }

        for sink in &self.inline {
            if let Err(err) = sink.flush().await {
                warn!(session = %self.session_id, sink = sink.name(), error = %err, "Sink flush failed");
            }
        }
    }
}

async fn drain(
    session_id: String,
    sink: Arc<dyn Sink>,
    queue: Arc<HandoffQueue<Arc<Message>>>,
    write_timeout: Duration,
    counters: Arc<PipelineCounters>,
) {
    let idle = sink.flush_interval();

    loop {
        let next = match idle {
            Some(interval) => match timeout(interval, queue.pop()).await {
                Ok(next) => next,
                Err(_) => {
                    flush(&session_id, sink.as_ref(), write_timeout, &counters).await;
                    continue;
                }
            },
            None => queue.pop().await,
        };
        let Some(message) = next else {
            break;
        };

        let sequence = message.sequence_number;
        let result = match timeout(write_timeout, sink.write(message)).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::Timeout(write_timeout)),
        };
        if let Err(err) = result {
            counters.record_error();
            warn!(session = %session_id, sink = sink.name(), sequence, error = %err, "Sink write failed");
        }
    }

    flush(&session_id, sink.as_ref(), write_timeout, &counters).await;
    debug!(session = %session_id, sink = sink.name(), "Sink worker finished");
}

async fn flush(session_id: &str, sink: &dyn Sink, limit: Duration, counters: &PipelineCounters) {
    let result = match timeout(limit, sink.flush()).await {
        Ok(result) => result,
        Err(_) => Err(SinkError::Timeout(limit)),
    };
    if let Err(err) = result {
        counters.record_error();
        warn!(session = %session_id, sink = sink.name(), error = %err, "Sink flush failed");
    }
}
