use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorCode, QuizRelayError, Result};
use crate::quizrelay::config::SessionConfig;
use crate::quizrelay::hub::Hub;
use crate::quizrelay::registry::HubRegistry;
use crate::quizrelay::types::{QuizId, SubscriberId};

/// Time since the viewer last showed any sign of life.
struct Liveness {
    started: Instant,
    last_seen_ms: AtomicU64,
}

impl Liveness {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let now = self.started.elapsed().as_millis() as u64;
        self.last_seen_ms.store(now, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let last_seen = Duration::from_millis(self.last_seen_ms.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(last_seen)
    }
}

/// One websocket viewer of a quiz leaderboard.
///
/// The read half only watches for liveness and disconnects; anything the
/// viewer sends is discarded. The write half drains the viewer's hub queue,
/// pings on an interval and closes the socket once the hub drops the queue.
pub struct ViewerSession {
    id: SubscriberId,
    quiz_id: QuizId,
    hub: Arc<Hub>,
    liveness: Liveness,
    cancel_token: CancellationToken,
    config: SessionConfig,
}

impl ViewerSession {
    pub(crate) fn new(id: SubscriberId, quiz_id: QuizId, hub: Arc<Hub>, config: SessionConfig) -> Arc<Self> {
        Arc::new(Self {
            id,
            quiz_id,
            hub,
            liveness: Liveness::new(),
            cancel_token: CancellationToken::new(),
            config,
        })
    }

    /// Registers the socket as a viewer of `quiz_id` and serves it until
    /// either side goes away.
    pub async fn run<S, E>(socket: S, registry: Arc<HubRegistry>, quiz_id: QuizId, config: SessionConfig)
    where
        S: Stream<Item = std::result::Result<Message, E>> + Sink<Message, Error = E> + Send + 'static,
        E: Display + Send + 'static,
    {
        let subscription = match registry.subscribe(quiz_id).await {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!("Could not register viewer for quiz {}: {}", quiz_id, e);
                return;
            }
        };

        let session = Self::new(subscription.id, quiz_id, subscription.hub, config);
        info!("New viewer {} on quiz {}", session.id, quiz_id);

        let (writer, reader) = socket.split();
        let read_task = tokio::spawn(session.clone().read_pump(reader));
        session.write_pump(writer, subscription.queue).await;

        if let Err(e) = read_task.await {
            warn!("Read task for viewer {} failed: {}", session.id, e);
        }
        info!("Viewer {} on quiz {} disconnected", session.id, quiz_id);
    }

    pub(crate) async fn read_pump<R, E>(self: Arc<Self>, mut reader: R)
    where
        R: Stream<Item = std::result::Result<Message, E>> + Unpin,
        E: Display,
    {
        debug!("Starting read loop for viewer {}", self.id);
        loop {
            let next = tokio::select! {
                _ = self.cancel_token.cancelled() => break,
                next = reader.next() => next,
            };

            match next {
                Some(Ok(Message::Close(_))) => {
                    debug!("Viewer {} sent close", self.id);
                    break;
                }
                Some(Ok(_)) => self.liveness.touch(),
                Some(Err(e)) => {
                    warn!("Failed to read from viewer {}: {}", self.id, e);
                    break;
                }
                None => break,
            }
        }

        self.hub.unregister(self.id).await;
        debug!("Read loop for viewer {} finished", self.id);
    }

    pub(crate) async fn write_pump<W>(&self, mut writer: W, mut queue: mpsc::Receiver<Bytes>)
    where
        W: Sink<Message> + Unpin,
        W::Error: Display,
    {
        debug!("Starting write loop for viewer {}", self.id);
        let period = self.config.ping_interval();
        let mut ping = interval_at(Instant::now() + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                payload = queue.recv() => {
                    let Some(payload) = payload else {
                        debug!("Queue for viewer {} closed, sending close frame", self.id);
                        if let Err(e) = self.send(&mut writer, Message::Close(None)).await {
                            debug!("Close frame to viewer {} not delivered: {}", self.id, e);
                        }
                        break;
                    };
                    let text = String::from_utf8_lossy(&payload).into_owned();
                    if let Err(e) = self.send(&mut writer, Message::Text(text)).await {
                        warn!("Failed to write to viewer {}: {}", self.id, e);
                        self.hub.unregister(self.id).await;
                        break;
                    }
                }
                _ = ping.tick() => {
                    let idle = self.liveness.idle_for();
                    if idle > self.config.pong_timeout() {
                        info!("Viewer {} on quiz {} silent for {:?}, dropping", self.id, self.quiz_id, idle);
                        // The hub closes the queue, which ends the loop above
                        self.hub.unregister(self.id).await;
                        continue;
                    }
                    if let Err(e) = self.send(&mut writer, Message::Ping(Vec::new())).await {
                        warn!("Failed to ping viewer {}: {}", self.id, e);
                        self.hub.unregister(self.id).await;
                        break;
                    }
                }
            }
        }

        self.cancel_token.cancel();
        debug!("Write loop for viewer {} finished", self.id);
    }

    /// A write that cannot finish within the pong timeout counts as failed.
    async fn send<W>(&self, writer: &mut W, message: Message) -> Result<()>
    where
        W: Sink<Message> + Unpin,
        W::Error: Display,
    {
        match timeout(self.config.pong_timeout(), writer.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(QuizRelayError::new(ErrorCode::SendFailed, e.to_string())),
            Err(_) => Err(QuizRelayError::new(ErrorCode::SendFailed, "write timed out")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    use futures_util::{sink, stream};
    use uuid::Uuid;

    use crate::quizrelay::config::HubConfig;
    use crate::quizrelay::registry::Subscription;

    fn session_config(ping_interval_secs: u64, pong_timeout_secs: u64) -> SessionConfig {
        SessionConfig { ping_interval_secs, pong_timeout_secs }
    }

    async fn viewer(registry: &HubRegistry, quiz: QuizId, config: SessionConfig) -> (Arc<ViewerSession>, Subscription) {
        let subscription = registry.subscribe(quiz).await.unwrap();
        let session = ViewerSession::new(subscription.id, quiz, subscription.hub.clone(), config);
        (session, subscription)
    }

    #[tokio::test]
    async fn writes_queued_updates_then_closes() {
        let registry = HubRegistry::new(HubConfig::default());
        let quiz = Uuid::new_v4();
        let (session, subscription) = viewer(&registry, quiz, session_config(30, 90)).await;

        registry.broadcast(quiz, Bytes::from_static(b"{\"type\":\"leaderboard_update\"}")).await;
        assert!(registry.unregister(quiz, subscription.id).await);

        let mut frames: Vec<Message> = Vec::new();
        session.write_pump(&mut frames, subscription.queue).await;

        assert_eq!(
            frames,
            vec![Message::Text("{\"type\":\"leaderboard_update\"}".into()), Message::Close(None)]
        );
        assert!(session.cancel_token.is_cancelled());
    }

    #[tokio::test]
    async fn inbound_payloads_are_ignored_until_close() {
        let registry = HubRegistry::new(HubConfig::default());
        let quiz = Uuid::new_v4();
        let (session, _subscription) = viewer(&registry, quiz, session_config(30, 90)).await;

        let inbound = stream::iter(vec![
            Ok::<_, Infallible>(Message::Text("hello?".into())),
            Ok(Message::Binary(vec![1, 2, 3])),
            Ok(Message::Close(None)),
        ]);
        session.read_pump(inbound).await;

        assert!(!registry.has_subscribers(quiz));
    }

    #[tokio::test]
    async fn read_error_unregisters_viewer() {
        let registry = HubRegistry::new(HubConfig::default());
        let quiz = Uuid::new_v4();
        let (session, mut subscription) = viewer(&registry, quiz, session_config(30, 90)).await;

        session.read_pump(stream::iter(vec![Err::<Message, String>("connection reset".into())])).await;

        assert!(!registry.has_subscribers(quiz));
        assert_eq!(subscription.queue.recv().await, None);
    }

    #[tokio::test]
    async fn write_failure_unregisters_viewer() {
        let registry = HubRegistry::new(HubConfig::default());
        let quiz = Uuid::new_v4();
        let (session, subscription) = viewer(&registry, quiz, session_config(30, 90)).await;
        registry.broadcast(quiz, Bytes::from_static(b"{}")).await;

        let broken = Box::pin(sink::unfold((), |_, _: Message| async {
            Err::<(), String>("broken pipe".into())
        }));
        session.write_pump(broken, subscription.queue).await;

        assert!(!registry.has_subscribers(quiz));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_viewer_is_dropped_after_pong_timeout() {
        let registry = HubRegistry::new(HubConfig::default());
        let quiz = Uuid::new_v4();
        let (session, subscription) = viewer(&registry, quiz, session_config(1, 3)).await;

        let mut frames: Vec<Message> = Vec::new();
        session.write_pump(&mut frames, subscription.queue).await;

        let pings = frames.iter().filter(|m| matches!(m, Message::Ping(_))).count();
        assert_eq!(pings, 3);
        assert_eq!(frames.last(), Some(&Message::Close(None)));
        assert!(!registry.has_subscribers(quiz));
    }

    #[tokio::test(start_paused = true)]
    async fn liveness_tracks_last_activity() {
        let liveness = Liveness::new();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(liveness.idle_for() >= Duration::from_secs(10));

        liveness.touch();
        tokio::time::sleep(Duration::from_secs(2)).await;
        let idle = liveness.idle_for();
        assert!(idle >= Duration::from_secs(2) && idle < Duration::from_secs(3));
    }
}
