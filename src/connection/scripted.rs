//! In-memory broker double used by the test suites.
//!
//! A `ScriptedConnector` hands out links whose behaviour the test controls:
//! queued open failures, slow opens and closes, rejected filters, a gate that
//! holds subscribe calls, and a feed to push publications or a dropped connection into the newest
//! link. It also counts opens and live links.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::QoS;
use tokio::sync::{Semaphore, mpsc};

use super::endpoint::BrokerEndpoint;
use super::link::{BrokerLink, Connector, Publication};
use crate::utils::LinkError;

type Feed = mpsc::UnboundedSender<Result<Publication, LinkError>>;

#[derive(Default)]
struct Script {
    open_plan: VecDeque<LinkError>,
    open_delay: Option<Duration>,
    close_delay: Option<Duration>,
    opens: usize,
    live: usize,
    subscribes: Vec<(usize, String)>,
    unsubscribes: Vec<(usize, String)>,
    rejected: HashSet<String>,
    feeds: Vec<Feed>,
    gate: Option<Arc<Semaphore>>,
    endpoints: Vec<BrokerEndpoint>,
}

#[derive(Clone, Default)]
pub struct ScriptedConnector {
    script: Arc<Mutex<Script>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `open` fails with `err`. Calls queue up.
    pub fn fail_next_open(&self, err: LinkError) {
        self.script.lock().unwrap().open_plan.push_back(err);
    }

    /// Every `open` sleeps this long before answering.
    pub fn set_open_delay(&self, delay: Duration) {
        self.script.lock().unwrap().open_delay = Some(delay);
    }

    /// Every `close` sleeps this long before the link counts as released.
    pub fn set_close_delay(&self, delay: Duration) {
        self.script.lock().unwrap().close_delay = Some(delay);
    }

    pub fn reject_filter(&self, filter: &str) {
        self.script.lock().unwrap().rejected.insert(filter.to_string());
    }

    /// From now on every subscribe waits for a permit on the returned
    /// semaphore.
    pub fn gate_subscribes(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        self.script.lock().unwrap().gate = Some(gate.clone());
        gate
    }

    /// Deliver a publication on the newest link.
    pub fn publish(&self, topic: &str, payload: &[u8]) -> bool {
        self.feed(Ok(Publication::new(topic, payload.to_vec())))
    }

    /// Break the newest link as a network failure would.
    pub fn drop_connection(&self) -> bool {
        self.feed(Err(LinkError::Transport("connection reset by peer".to_string())))
    }

    fn feed(&self, item: Result<Publication, LinkError>) -> bool {
        let script = self.script.lock().unwrap();
        match script.feeds.last() {
            Some(feed) => feed.send(item).is_ok(),
            None => false,
        }
    }

    pub fn opens(&self) -> usize {
        self.script.lock().unwrap().opens
    }

    pub fn live(&self) -> usize {
        self.script.lock().unwrap().live
    }

    /// `(link number, filter)` for every subscribe that reached a link.
    pub fn subscribes(&self) -> Vec<(usize, String)> {
        self.script.lock().unwrap().subscribes.clone()
    }

    pub fn unsubscribes(&self) -> Vec<(usize, String)> {
        self.script.lock().unwrap().unsubscribes.clone()
    }

    pub fn endpoints(&self) -> Vec<BrokerEndpoint> {
        self.script.lock().unwrap().endpoints.clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn open(&self, endpoint: &BrokerEndpoint) -> Result<Box<dyn BrokerLink>, LinkError> {
        let delay = self.script.lock().unwrap().open_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut script = self.script.lock().unwrap();
        script.endpoints.push(endpoint.clone());
        if let Some(err) = script.open_plan.pop_front() {
            return Err(err);
        }

        script.opens += 1;
        script.live += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        script.feeds.push(tx);

        Ok(Box::new(ScriptedLink {
            id: script.opens,
            feed: rx,
            script: self.script.clone(),
            closed: false,
        }))
    }
}

struct ScriptedLink {
    id: usize,
    feed: mpsc::UnboundedReceiver<Result<Publication, LinkError>>,
    script: Arc<Mutex<Script>>,
    closed: bool,
}

impl ScriptedLink {
    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.script.lock().unwrap().live -= 1;
        }
    }
}

#[async_trait]
impl BrokerLink for ScriptedLink {
    async fn subscribe(&mut self, filter: &str, _qos: QoS) -> Result<(), LinkError> {
        let gate = self.script.lock().unwrap().gate.clone();
        if let Some(gate) = gate {
            gate.acquire().await.expect("gate closed").forget();
        }

        let mut script = self.script.lock().unwrap();
        script.subscribes.push((self.id, filter.to_string()));
        if script.rejected.contains(filter) {
            return Err(LinkError::Rejected {
                filter: filter.to_string(),
                reason: "broker returned failure".to_string(),
            });
        }
        Ok(())
    }

    async fn unsubscribe(&mut self, filter: &str) -> Result<(), LinkError> {
        self.script
            .lock()
            .unwrap()
            .unsubscribes
            .push((self.id, filter.to_string()));
        Ok(())
    }

    async fn next_publication(&mut self) -> Result<Publication, LinkError> {
        match self.feed.recv().await {
            Some(item) => item,
            None => Err(LinkError::Transport("feed closed".to_string())),
        }
    }

    async fn close(&mut self) {
        let delay = self.script.lock().unwrap().close_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.release();
    }
}

impl Drop for ScriptedLink {
    fn drop(&mut self) {
        self.release();
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
