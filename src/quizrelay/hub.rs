//! Per-topic broadcast actor.
//!
//! A hub owns the subscriber set of one quiz. The set lives inside the hub's
//! own task and is only touched by commands pulled off its mailbox, so
//! register, unregister and broadcast are totally ordered per topic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use log::{debug, info, warn};
use smallvec::SmallVec;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{ErrorCode, QuizRelayError, Result};
use crate::quizrelay::config::HubConfig;
use crate::quizrelay::types::{QuizId, SubscriberId};

/// Hub-side end of a viewer: dropping it closes the viewer's outbound queue.
pub struct Subscriber {
    pub id: SubscriberId,
    pub quiz_id: QuizId,
    queue: mpsc::Sender<Bytes>,
}

impl Subscriber {
    /// Creates a subscriber and the receiving end of its bounded queue.
    pub fn new(quiz_id: QuizId, queue_depth: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (queue, rx) = mpsc::channel(queue_depth);
        let subscriber = Self {
            id: Uuid::new_v4(),
            quiz_id,
            queue,
        };
        (subscriber, rx)
    }
}

/// Outcome of one fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub evicted: usize,
}

enum HubCommand {
    Register {
        subscriber: Subscriber,
        ack: oneshot::Sender<()>,
    },
    Unregister {
        id: SubscriberId,
        ack: oneshot::Sender<bool>,
    },
    Broadcast {
        payload: Bytes,
        ack: oneshot::Sender<BroadcastReport>,
    },
}

/// Handle to a running hub. Cheap to share; all calls go through the mailbox.
pub struct Hub {
    quiz_id: QuizId,
    generation: Uuid,
    mailbox: mpsc::Sender<HubCommand>,
    subscriber_count: Arc<AtomicUsize>,
}

pub(crate) type HubMap = DashMap<QuizId, Arc<Hub>>;

impl Hub {
    /// Starts the hub loop. The loop removes its own entry from `hubs` once
    /// it has had no subscribers for `idle_timeout`.
    pub(crate) fn spawn(
        quiz_id: QuizId,
        config: &HubConfig,
        hubs: Arc<HubMap>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let (mailbox, rx) = mpsc::channel(config.mailbox_capacity);
        let subscriber_count = Arc::new(AtomicUsize::new(0));
        let hub = Arc::new(Self {
            quiz_id,
            generation: Uuid::new_v4(),
            mailbox,
            subscriber_count: subscriber_count.clone(),
        });

        let actor = HubLoop {
            quiz_id,
            generation: hub.generation,
            subscribers: HashMap::new(),
            mailbox: rx,
            subscriber_count,
            hubs,
            idle_timeout: config.idle_timeout(),
            shutdown,
        };
        tokio::spawn(actor.run());
        info!("🚀 Hub started for quiz {}", quiz_id);
        hub
    }

    pub fn quiz_id(&self) -> QuizId {
        self.quiz_id
    }

    /// Identity of this hub instance; a reaped and recreated hub for the same
    /// quiz gets a new one.
    pub fn generation(&self) -> Uuid {
        self.generation
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriber_count.load(Ordering::Acquire)
    }

    pub fn has_subscribers(&self) -> bool {
        self.subscriber_count() > 0
    }

    /// Fails with `HubClosed` if the hub has stopped, in which case the
    /// subscriber has been dropped and its queue is closed.
    pub async fn register(&self, subscriber: Subscriber) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.mailbox
            .send(HubCommand::Register { subscriber, ack })
            .await
            .map_err(|_| self.closed())?;
        done.await.map_err(|_| self.closed())
    }

    /// Removes the subscriber if present and closes its queue. Returns
    /// whether anything was removed; unknown ids and stopped hubs are no-ops.
    pub async fn unregister(&self, id: SubscriberId) -> bool {
        let (ack, done) = oneshot::channel();
        if self.mailbox.send(HubCommand::Unregister { id, ack }).await.is_err() {
            return false;
        }
        done.await.unwrap_or(false)
    }

    pub async fn broadcast(&self, payload: Bytes) -> BroadcastReport {
        let (ack, done) = oneshot::channel();
        if self.mailbox.send(HubCommand::Broadcast { payload, ack }).await.is_err() {
            debug!("Broadcast to stopped hub for quiz {} dropped", self.quiz_id);
            return BroadcastReport::default();
        }
        done.await.unwrap_or_default()
    }

    fn closed(&self) -> QuizRelayError {
        QuizRelayError::new(ErrorCode::HubClosed, format!("hub for quiz {} has stopped", self.quiz_id))
    }
}

struct HubLoop {
    quiz_id: QuizId,
    generation: Uuid,
    subscribers: HashMap<SubscriberId, Subscriber>,
    mailbox: mpsc::Receiver<HubCommand>,
    subscriber_count: Arc<AtomicUsize>,
    hubs: Arc<HubMap>,
    idle_timeout: Duration,
    shutdown: CancellationToken,
}

impl HubLoop {
    async fn run(mut self) {
        let idle = sleep(self.idle_timeout);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("Hub for quiz {} shutting down", self.quiz_id);
                    break;
                }
                command = self.mailbox.recv() => {
                    let Some(command) = command else { break };
                    let was_empty = self.subscribers.is_empty();
                    self.handle(command);
                    if !was_empty && self.subscribers.is_empty() {
                        idle.as_mut().reset(Instant::now() + self.idle_timeout);
                    }
                }
                _ = &mut idle, if self.subscribers.is_empty() => {
                    self.reap();
                    break;
                }
            }
        }

        // Dropping the remaining subscribers closes their queues
        let remaining = self.subscribers.len();
        self.subscribers.clear();
        self.subscriber_count.store(0, Ordering::Release);
        info!("Hub for quiz {} stopped ({} subscribers released)", self.quiz_id, remaining);
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register { subscriber, ack } => {
                let id = subscriber.id;
                self.subscribers.insert(id, subscriber);
                self.publish_count();
                info!("Client {} registered for quiz {}. Total: {}", id, self.quiz_id, self.subscribers.len());
                let _ = ack.send(());
            }
            HubCommand::Unregister { id, ack } => {
                let removed = self.subscribers.remove(&id).is_some();
                self.publish_count();
                if removed {
                    info!("Client {} unregistered for quiz {}. Total: {}", id, self.quiz_id, self.subscribers.len());
                } else {
                    debug!("Client {} not registered for quiz {}", id, self.quiz_id);
                }
                let _ = ack.send(removed);
            }
            HubCommand::Broadcast { payload, ack } => {
                let report = self.broadcast(payload);
                self.publish_count();
                let _ = ack.send(report);
            }
        }
    }

    /// Runs before any ack so callers never observe a stale count.
    fn publish_count(&self) {
        self.subscriber_count.store(self.subscribers.len(), Ordering::Release);
    }

    /// Non-blocking fan-out: a subscriber whose queue is full or gone is
    /// evicted on the spot.
    fn broadcast(&mut self, payload: Bytes) -> BroadcastReport {
        let mut delivered = 0;
        let mut evicted: SmallVec<[SubscriberId; 8]> = SmallVec::new();

        for (id, subscriber) in &self.subscribers {
            match subscriber.queue.try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("⚠️ Client {} on quiz {} is not keeping up, evicting", id, self.quiz_id);
                    evicted.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Client {} on quiz {} already gone, evicting", id, self.quiz_id);
                    evicted.push(*id);
                }
            }
        }

        for id in &evicted {
            self.subscribers.remove(id);
        }
        if !evicted.is_empty() {
            info!("Evicted {:?} from quiz {}. Total: {}", evicted, self.quiz_id, self.subscribers.len());
        }
        debug!("Broadcast on quiz {} delivered to {} clients", self.quiz_id, delivered);

        BroadcastReport {
            delivered,
            evicted: evicted.len(),
        }
    }

    /// Removes this hub from the registry unless a newer hub replaced it.
    fn reap(&self) {
        let generation = self.generation;
        if self.hubs.remove_if(&self.quiz_id, |_, hub| hub.generation == generation).is_some() {
            info!("🧹 Reaped idle hub for quiz {}", self.quiz_id);
        }
    }
}
