//! Broadcast hub
//!
//! A single coordination task owns the subscriber [`Registry`]. Everything
//! else talks to it through [`Hub`], which only submits commands to the
//! task's inbox. Commands are handled one at a time in arrival order, so the
//! registry never sees concurrent mutation and a fan-out pass never races a
//! subscribe or unsubscribe.
//!
//! Delivery to a subscriber is a non-blocking enqueue onto that client's
//! bounded queue. The actual transport write happens in the client's own
//! delivery worker (see [`session`]), so a slow client can only fill its own
//! queue, at which point the hub drops it.

pub mod client;
pub mod message;
pub mod registry;
pub mod session;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{HubError, Result};

pub use client::{Client, ClientId, ClientState, Eviction, Mailbox};
pub use message::BroadcastMessage;
pub use registry::{FanOut, Registry};

/// Default bound of the coordination inbox
pub const DEFAULT_INBOX_CAPACITY: usize = 1024;

/// Default bound of each client's delivery queue
pub const DEFAULT_CLIENT_QUEUE_CAPACITY: usize = 256;

/// Default limit on a single transport write
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time a finished session lets its worker flush the backlog
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Hub sizing and per-client delivery limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    /// Pending commands the coordination task may have queued
    pub inbox_capacity: usize,
    /// Messages a client may have queued before it is considered dead
    pub client_queue_capacity: usize,
    /// A transport write taking longer than this counts as a failed client
    pub write_timeout: Duration,
    /// After a peer disconnects, how long its worker may keep flushing
    /// before the backlog is abandoned
    pub close_grace: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
            client_queue_capacity: DEFAULT_CLIENT_QUEUE_CAPACITY,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            close_grace: DEFAULT_CLOSE_GRACE,
        }
    }
}

/// Counters reported by the coordination task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub subscribers: usize,
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
    /// Acceptance time of the most recent message
    pub last_published_at: Option<DateTime<Utc>>,
}

enum Command {
    Subscribe(Client),
    Unsubscribe(ClientId),
    Publish(Arc<str>),
    Stats(oneshot::Sender<HubStats>),
    Subscribers(oneshot::Sender<Vec<ClientId>>),
    Shutdown,
}

/// Handle to a running broadcast hub. Cheap to clone.
#[derive(Clone)]
pub struct Hub {
    inbox: mpsc::Sender<Command>,
    config: HubConfig,
    clients: Arc<AtomicUsize>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
    stopped: watch::Receiver<bool>,
}

impl Hub {
    /// Spawn the coordination task. Must be called inside a tokio runtime.
    pub fn new(config: HubConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.inbox_capacity.max(1));
        let clients = Arc::new(AtomicUsize::new(0));
        let (stopped_tx, stopped_rx) = watch::channel(false);

        let coordinator = Coordinator {
            inbox: rx,
            registry: Registry::new(),
            clients: Arc::clone(&clients),
            stats: HubStats::default(),
            next_seq: 1,
            stopped: stopped_tx,
        };
        let task = tokio::spawn(coordinator.run());

        Self {
            inbox: tx,
            config,
            clients,
            task: Arc::new(Mutex::new(Some(task))),
            stopped: stopped_rx,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Create a client sized for this hub. The client still has to be
    /// passed to [`Hub::subscribe`].
    pub fn new_client(&self) -> (Client, Mailbox) {
        Client::new(self.config.client_queue_capacity)
    }

    /// Register a client for every message published after this call is
    /// processed.
    pub async fn subscribe(&self, client: Client) -> Result<()> {
        self.submit(Command::Subscribe(client)).await
    }

    /// Remove a client. Unknown ids, repeated calls and calls after the hub
    /// closed are all no-ops.
    pub async fn unsubscribe(&self, id: ClientId) {
        if self.submit(Command::Unsubscribe(id)).await.is_err() {
            debug!(client = %id, "Unsubscribe after hub closed");
        }
    }

    /// Hand a message to the hub for fan-out.
    ///
    /// Returns once the message is queued for the coordination task; it does
    /// not wait for any subscriber.
    pub async fn publish(&self, payload: impl Into<Arc<str>>) -> Result<()> {
        self.submit(Command::Publish(payload.into())).await
    }

    /// Registry size as of the last processed command
    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::Relaxed)
    }

    /// Counters, ordered after every command submitted before this call
    pub async fn stats(&self) -> Result<HubStats> {
        let (tx, rx) = oneshot::channel();
        self.submit(Command::Stats(tx)).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Registered client ids, ordered after every command submitted before
    /// this call
    pub async fn subscribers(&self) -> Result<Vec<ClientId>> {
        let (tx, rx) = oneshot::channel();
        self.submit(Command::Subscribers(tx)).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.inbox.is_closed()
    }

    /// Stop the hub: every client queue is dropped and the coordination
    /// task is awaited. Safe to call more than once, from any clone; every
    /// call returns only after the task has released its clients.
    pub async fn close(&self) {
        let _ = self.inbox.send(Command::Shutdown).await;

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Broadcast hub task failed: {}", e);
            }
        }

        // Another clone may hold the join handle; wait for the task itself.
        // An error means the task died without reporting, which is stopped too.
        let mut stopped = self.stopped.clone();
        let _ = stopped.wait_for(|stopped| *stopped).await;
    }

    async fn submit(&self, command: Command) -> Result<()> {
        self.inbox.send(command).await.map_err(|_| HubError::Closed)
    }
}

/// The coordination task. Sole owner of the registry.
struct Coordinator {
    inbox: mpsc::Receiver<Command>,
    registry: Registry,
    clients: Arc<AtomicUsize>,
    stats: HubStats,
    next_seq: u64,
    stopped: watch::Sender<bool>,
}

impl Coordinator {
    async fn run(mut self) {
        info!("Broadcast hub started");

        while let Some(command) = self.inbox.recv().await {
            match command {
                Command::Subscribe(client) => self.subscribe(client),
                Command::Unsubscribe(id) => self.unsubscribe(id),
                Command::Publish(payload) => self.publish(payload),
                Command::Stats(reply) => {
                    let _ = reply.send(HubStats {
                        subscribers: self.registry.len(),
                        ..self.stats
                    });
                }
                Command::Subscribers(reply) => {
                    let _ = reply.send(self.registry.ids());
                }
                Command::Shutdown => break,
            }
            self.clients.store(self.registry.len(), Ordering::Relaxed);
        }

        // Refuse new commands, then release everything still registered.
        self.inbox.close();
        let released = self.registry.clear();
        self.clients.store(0, Ordering::Relaxed);

        info!("Broadcast hub stopped, released {} clients", released);
        let _ = self.stopped.send(true);
    }

    fn subscribe(&mut self, client: Client) {
        let id = client.id();
        if self.registry.insert(client).is_some() {
            warn!(client = %id, "Client subscribed twice, replacing previous handle");
        }
        info!(client = %id, "Client connected. Total: {}", self.registry.len());
    }

    fn unsubscribe(&mut self, id: ClientId) {
        if self.registry.remove(&id).is_some() {
            info!(client = %id, "Client disconnected. Total: {}", self.registry.len());
        }
    }

    fn publish(&mut self, payload: Arc<str>) {
        let message = BroadcastMessage::new(self.next_seq, payload);
        self.next_seq += 1;

        debug!(
            seq = message.seq(),
            accepted_at = %message.accepted_at(),
            "Broadcasting to {} clients",
            self.registry.len()
        );

        let result = self.registry.broadcast(&message);

        self.stats.published += 1;
        self.stats.last_published_at = Some(message.accepted_at());
        self.stats.delivered += result.delivered as u64;
        self.stats.dropped += result.dropped.len() as u64;

        if !result.dropped.is_empty() {
            info!(
                seq = message.seq(),
                "Dropped {} unresponsive clients. Total: {}",
                result.dropped.len(),
                self.registry.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn small_hub(queue: usize) -> Hub {
        Hub::new(HubConfig {
            inbox_capacity: 64,
            client_queue_capacity: queue,
            ..HubConfig::default()
        })
    }

    fn drain(mailbox: &mut Mailbox) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(msg) = mailbox.try_recv() {
            out.push(msg.payload().to_string());
        }
        out
    }

    #[tokio::test]
    async fn test_hello_world_quiet_scenario() {
        let hub = small_hub(1);
        let (a, mut a_box) = hub.new_client();
        let (b, mut b_box) = hub.new_client();
        let (a_id, b_id) = (a.id(), b.id());

        hub.subscribe(a).await.unwrap();
        hub.subscribe(b).await.unwrap();

        hub.publish("hello").await.unwrap();
        hub.stats().await.unwrap();
        assert_eq!(drain(&mut a_box), vec!["hello"]);

        // B leaves "hello" unread, so its single-slot queue stays full.
        hub.publish("world").await.unwrap();
        let mut expected = vec![a_id];
        expected.sort();
        assert_eq!(hub.subscribers().await.unwrap(), expected);
        assert_eq!(drain(&mut a_box), vec!["world"]);
        // B was evicted, so its unread "hello" is abandoned too.
        assert!(b_box.is_evicted());
        assert!(drain(&mut b_box).is_empty());
        assert!(b_box.recv().await.is_none());
        assert!(!hub.subscribers().await.unwrap().contains(&b_id));

        hub.unsubscribe(a_id).await;
        hub.publish("quiet").await.unwrap();
        assert!(hub.subscribers().await.unwrap().is_empty());
        assert!(drain(&mut a_box).is_empty());

        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.published, 3);
        assert_eq!(stats.delivered, 3);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.subscribers, 0);

        hub.close().await;
    }

    #[tokio::test]
    async fn test_double_unsubscribe_is_noop() {
        let hub = small_hub(4);
        let (a, _a_box) = hub.new_client();
        let (b, _b_box) = hub.new_client();
        let a_id = a.id();
        hub.subscribe(a).await.unwrap();
        hub.subscribe(b).await.unwrap();

        hub.unsubscribe(a_id).await;
        assert_eq!(hub.stats().await.unwrap().subscribers, 1);

        hub.unsubscribe(a_id).await;
        hub.unsubscribe(ClientId::new()).await;
        assert_eq!(hub.stats().await.unwrap().subscribers, 1);
        assert_eq!(hub.client_count(), 1);

        hub.close().await;
    }

    #[tokio::test]
    async fn test_no_backlog_for_late_subscriber() {
        let hub = small_hub(4);
        hub.publish("before").await.unwrap();

        let (late, mut late_box) = hub.new_client();
        hub.subscribe(late).await.unwrap();
        hub.publish("after").await.unwrap();
        hub.stats().await.unwrap();

        assert_eq!(drain(&mut late_box), vec!["after"]);
        hub.close().await;
    }

    #[tokio::test]
    async fn test_publishes_arrive_in_processing_order() {
        let hub = small_hub(64);
        let (client, mut mailbox) = hub.new_client();
        hub.subscribe(client).await.unwrap();

        let mut publishers = Vec::new();
        for p in 0..4 {
            let hub = hub.clone();
            publishers.push(tokio::spawn(async move {
                for i in 0..10 {
                    hub.publish(format!("{}-{}", p, i)).await.unwrap();
                }
            }));
        }
        for publisher in publishers {
            publisher.await.unwrap();
        }
        hub.stats().await.unwrap();

        let mut seqs = Vec::new();
        let mut per_publisher: Vec<Vec<usize>> = vec![Vec::new(); 4];
        while let Some(msg) = mailbox.try_recv() {
            seqs.push(msg.seq());
            let (p, i) = msg.payload().split_once('-').unwrap();
            per_publisher[p.parse::<usize>().unwrap()].push(i.parse().unwrap());
        }

        assert_eq!(seqs, (1..=40).collect::<Vec<u64>>());
        for received in per_publisher {
            assert_eq!(received, (0..10).collect::<Vec<usize>>());
        }
        hub.close().await;
    }

    #[tokio::test]
    async fn test_registry_tracks_operation_sequence() {
        let hub = small_hub(128);
        let mut live: BTreeSet<ClientId> = BTreeSet::new();
        let mut all: Vec<ClientId> = Vec::new();
        let mut mailboxes = Vec::new();

        // Deterministic linear congruential sequence of operations
        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
        for step in 0..200 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            match (seed >> 33) % 3 {
                0 => {
                    let (client, mailbox) = hub.new_client();
                    live.insert(client.id());
                    all.push(client.id());
                    mailboxes.push(mailbox);
                    hub.subscribe(client).await.unwrap();
                }
                1 if !all.is_empty() => {
                    let id = all[(seed >> 40) as usize % all.len()];
                    live.remove(&id);
                    hub.unsubscribe(id).await;
                }
                _ => hub.publish(format!("step-{}", step)).await.unwrap(),
            }

            let registered = hub.subscribers().await.unwrap();
            assert_eq!(registered, live.iter().copied().collect::<Vec<_>>());
        }

        hub.close().await;
    }

    #[tokio::test]
    async fn test_publish_does_not_wait_for_stalled_clients() {
        let hub = small_hub(1);
        let mut stalled = Vec::new();
        for _ in 0..100 {
            let (client, mailbox) = hub.new_client();
            hub.subscribe(client).await.unwrap();
            stalled.push(mailbox);
        }

        let publishing = async {
            for i in 0..500 {
                hub.publish(format!("msg-{}", i)).await.unwrap();
            }
        };
        tokio::time::timeout(Duration::from_secs(5), publishing)
            .await
            .expect("publish blocked on stalled clients");

        // First publish filled every queue; the second dropped them all.
        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.subscribers, 0);
        assert_eq!(stats.dropped, 100);
        hub.close().await;
    }

    #[tokio::test]
    async fn test_operations_after_close() {
        let hub = small_hub(4);
        let (client, mut mailbox) = hub.new_client();
        hub.subscribe(client).await.unwrap();

        hub.close().await;

        assert!(hub.is_closed());
        assert_eq!(hub.client_count(), 0);
        assert!(mailbox.recv().await.is_none());
        assert!(matches!(hub.publish("late").await, Err(HubError::Closed)));
        assert!(matches!(hub.stats().await, Err(HubError::Closed)));

        let (again, _again_box) = hub.new_client();
        assert!(matches!(hub.subscribe(again).await, Err(HubError::Closed)));

        // Neither of these may panic
        hub.unsubscribe(ClientId::new()).await;
        hub.close().await;
    }

    #[tokio::test]
    async fn test_close_from_every_clone_waits_for_shutdown() {
        let hub = small_hub(4);
        let mut mailboxes = Vec::new();
        for _ in 0..3 {
            let (client, mailbox) = hub.new_client();
            hub.subscribe(client).await.unwrap();
            mailboxes.push(mailbox);
        }
        assert_eq!(hub.client_count(), 3);

        let (first, second) = (hub.clone(), hub.clone());
        let (first_seen, second_seen) = tokio::join!(
            async {
                first.close().await;
                (first.is_closed(), first.client_count())
            },
            async {
                second.close().await;
                (second.is_closed(), second.client_count())
            },
        );

        assert_eq!(first_seen, (true, 0));
        assert_eq!(second_seen, (true, 0));
        for mut mailbox in mailboxes {
            assert!(mailbox.try_recv().is_none());
        }
    }

    #[tokio::test]
    async fn test_stats_record_acceptance_time() {
        let hub = small_hub(4);
        assert_eq!(hub.stats().await.unwrap().last_published_at, None);

        let (client, mut mailbox) = hub.new_client();
        hub.subscribe(client).await.unwrap();

        let before = Utc::now();
        hub.publish("stamped").await.unwrap();
        let stats = hub.stats().await.unwrap();
        let after = Utc::now();

        let accepted_at = stats.last_published_at.unwrap();
        assert!(before <= accepted_at && accepted_at <= after);
        assert_eq!(mailbox.recv().await.unwrap().accepted_at(), accepted_at);
        hub.close().await;
    }

    #[tokio::test]
    async fn test_dead_mailbox_is_removed_on_next_publish() {
        let hub = small_hub(4);
        let (client, mailbox) = hub.new_client();
        let id = client.id();
        hub.subscribe(client).await.unwrap();
        drop(mailbox);

        hub.publish("anyone?").await.unwrap();
        assert!(!hub.subscribers().await.unwrap().contains(&id));
        hub.close().await;
    }
}
