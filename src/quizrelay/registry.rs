use std::sync::Arc;

use bytes::Bytes;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorCode, QuizRelayError, Result};
use crate::quizrelay::config::HubConfig;
use crate::quizrelay::hub::{BroadcastReport, Hub, HubMap, Subscriber};
use crate::quizrelay::types::{LeaderboardSnapshot, QuizId, SubscriberId};
use crate::wire::message::LeaderboardUpdate;

/// A reaped hub can turn away a registration that raced with it; after this
/// many fresh hubs in a row something else is wrong.
const SUBSCRIBE_ATTEMPTS: usize = 3;

/// A viewer's registration: its id, the hub it sits in and the receiving end
/// of its outbound queue.
pub struct Subscription {
    pub id: SubscriberId,
    pub hub: Arc<Hub>,
    pub queue: mpsc::Receiver<Bytes>,
}

/// Maps quiz ids to running hubs and creates them on demand
pub struct HubRegistry {
    hubs: Arc<HubMap>,
    config: HubConfig,
    shutdown: CancellationToken,
}

impl HubRegistry {
    pub fn new(config: HubConfig) -> Self {
        Self {
            hubs: Arc::new(HubMap::new()),
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Read-only lookup, never creates a hub
    pub fn get(&self, quiz_id: QuizId) -> Option<Arc<Hub>> {
        self.hubs.get(&quiz_id).map(|hub| hub.value().clone())
    }

    /// Returns the hub for `quiz_id`, starting one if none is running. The
    /// fast path only takes a read lock; creation re-checks under the write
    /// lock so concurrent callers always agree on one hub.
    pub fn get_or_create(&self, quiz_id: QuizId) -> Arc<Hub> {
        if let Some(hub) = self.get(quiz_id) {
            return hub;
        }

        self.hubs
            .entry(quiz_id)
            .or_insert_with(|| Hub::spawn(quiz_id, &self.config, self.hubs.clone(), self.shutdown.child_token()))
            .value()
            .clone()
    }

    /// Registers a new viewer for `quiz_id`. If the hub is reaped between
    /// lookup and registration the viewer is retried against a fresh one.
    pub async fn subscribe(&self, quiz_id: QuizId) -> Result<Subscription> {
        for attempt in 1..=SUBSCRIBE_ATTEMPTS {
            let hub = self.get_or_create(quiz_id);
            let (subscriber, queue) = Subscriber::new(quiz_id, self.config.queue_depth);
            let id = subscriber.id;

            match hub.register(subscriber).await {
                Ok(()) => return Ok(Subscription { id, hub, queue }),
                Err(e) => debug!("Subscribe attempt {} for quiz {} failed: {}", attempt, quiz_id, e),
            }
        }

        warn!("Giving up subscribing to quiz {} after {} attempts", quiz_id, SUBSCRIBE_ATTEMPTS);
        Err(QuizRelayError::new(
            ErrorCode::HubClosed,
            format!("could not register viewer for quiz {}", quiz_id),
        ))
    }

    pub async fn unregister(&self, quiz_id: QuizId, id: SubscriberId) -> bool {
        match self.get(quiz_id) {
            Some(hub) => hub.unregister(id).await,
            None => false,
        }
    }

    /// Whether anyone is watching `quiz_id` right now. Never creates a hub.
    pub fn has_subscribers(&self, quiz_id: QuizId) -> bool {
        self.get(quiz_id).map(|hub| hub.has_subscribers()).unwrap_or(false)
    }

    /// Fans `payload` out to the quiz's viewers. A quiz without a hub is a
    /// no-op and does not get one.
    pub async fn broadcast(&self, quiz_id: QuizId, payload: Bytes) -> BroadcastReport {
        match self.get(quiz_id) {
            Some(hub) => hub.broadcast(payload).await,
            None => {
                debug!("No hub for quiz {}, skipping broadcast", quiz_id);
                BroadcastReport::default()
            }
        }
    }

    /// Encodes the snapshot once and fans the same bytes out to every viewer
    pub async fn broadcast_leaderboard(
        &self,
        quiz_id: QuizId,
        leaderboard: LeaderboardSnapshot,
    ) -> Result<BroadcastReport> {
        let payload = LeaderboardUpdate::new(leaderboard).encode()?;
        Ok(self.broadcast(quiz_id, payload).await)
    }

    pub fn hub_count(&self) -> usize {
        self.hubs.len()
    }

    /// Stops every hub, closing all viewer queues
    pub fn shutdown(&self) {
        info!("Shutting down {} hubs", self.hubs.len());
        self.shutdown.cancel();
        self.hubs.clear();
    }
}
