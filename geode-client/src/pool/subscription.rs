//! Subscription queues: server push channels, redundancy and interest
//! registration.
//!
//! A pool with subscriptions enabled keeps `redundancy + 1` dedicated
//! connections, the first to the primary queue and the rest to secondaries.
//! They never carry request traffic; control messages for the queues
//! (interest registration, acks, promotion) go over ordinary pooled
//! connections to the same servers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use geode_core::protocol::constants::{
    CLEAR_REGION, CLIENT_MARKER, CLIENT_READY, LOCAL_CREATE, LOCAL_DESTROY, LOCAL_DESTROY_REGION,
    LOCAL_INVALIDATE, LOCAL_UPDATE, MAKE_PRIMARY, PERIODIC_ACK, REGISTER_INTEREST,
    SERVER_TO_CLIENT_PING, message_type_name,
};
use geode_core::protocol::{CommunicationMode, EventId, Message, Part};
use geode_core::{GeodeError, Result, ServerLocation};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::event_tracker::EventTracker;
use crate::config::PoolConfig;
use crate::connection::{Connection, ConnectionManager};

/// Kind of a server push event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// An entry was created.
    Create,
    /// An entry was updated.
    Update,
    /// An entry was invalidated.
    Invalidate,
    /// An entry was destroyed.
    Destroy,
    /// The region was destroyed on the server.
    RegionDestroy,
    /// The region was cleared on the server.
    RegionClear,
}

/// A decoded server push event.
#[derive(Debug, Clone)]
pub struct Notification {
    /// Region the event belongs to.
    pub region: String,
    /// What happened.
    pub kind: NotificationKind,
    /// Serialized key, for entry events.
    pub key: Option<Part>,
    /// Serialized new value, for creates and updates.
    pub value: Option<Part>,
    /// Id of the originating event.
    pub event_id: EventId,
}

impl Notification {
    /// Decodes a push message; fails for message types that carry no event.
    pub fn from_message(message: &Message) -> Result<Self> {
        let kind = match message.message_type() {
            LOCAL_CREATE => NotificationKind::Create,
            LOCAL_UPDATE => NotificationKind::Update,
            LOCAL_INVALIDATE => NotificationKind::Invalidate,
            LOCAL_DESTROY => NotificationKind::Destroy,
            LOCAL_DESTROY_REGION => NotificationKind::RegionDestroy,
            CLEAR_REGION => NotificationKind::RegionClear,
            other => {
                return Err(GeodeError::Protocol(format!(
                    "{} is not a notification",
                    message_type_name(other)
                )))
            }
        };
        let region = message.part(0)?.as_string()?;
        let (key, value, event_part) = match kind {
            NotificationKind::Create | NotificationKind::Update => (
                Some(message.part(1)?.clone()),
                Some(message.part(2)?.clone()),
                message.part(3)?,
            ),
            NotificationKind::Invalidate | NotificationKind::Destroy => {
                (Some(message.part(1)?.clone()), None, message.part(2)?)
            }
            NotificationKind::RegionDestroy | NotificationKind::RegionClear => {
                (None, None, message.part(1)?)
            }
        };
        Ok(Self {
            region,
            kind,
            key,
            value,
            event_id: EventId::from_part(event_part)?,
        })
    }
}

/// Receiver of the events of a pool's subscription queues.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Applies one de-duplicated event.
    async fn deliver(&self, notification: Notification);

    /// The server finished delivering queued events.
    async fn region_live(&self) {}

    /// Every subscription queue was lost.
    async fn region_disconnected(&self) {}
}

/// Keys an interest registration covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterestKeys {
    /// Every key of the region.
    All,
    /// The listed serialized keys.
    List(Vec<Part>),
}

/// A recorded interest registration, replayed on a new primary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interest {
    /// Region name.
    pub region: String,
    /// Covered keys.
    pub keys: InterestKeys,
}

impl Interest {
    fn to_message(&self, durable: bool) -> Message {
        let mut message = Message::new(REGISTER_INTEREST).with_part(Part::string(&self.region));
        match &self.keys {
            InterestKeys::All => {
                message.push_part(Part::int(0));
                message.push_part(Part::byte(durable as u8));
            }
            InterestKeys::List(keys) => {
                message.push_part(Part::int(1));
                message.push_part(Part::byte(durable as u8));
                for key in keys {
                    message.push_part(key.clone());
                }
            }
        }
        message
    }
}

#[derive(Debug)]
struct Queue {
    endpoint: ServerLocation,
    primary: bool,
    reader: JoinHandle<()>,
}

struct ReaderContext {
    endpoint: ServerLocation,
    sink: Arc<dyn NotificationSink>,
    tracker: Arc<EventTracker>,
    lost: mpsc::UnboundedSender<ServerLocation>,
    shutdown: watch::Receiver<bool>,
    keepalive: Arc<AtomicBool>,
}

/// Manages the subscription queues of one pool.
pub struct SubscriptionManager {
    connections: Arc<ConnectionManager>,
    servers: Vec<ServerLocation>,
    redundancy: i32,
    member_id: Arc<Vec<u8>>,
    durable: bool,
    read_timeout: Duration,
    ack_interval: Duration,
    monitor_interval: Duration,
    sink: Arc<dyn NotificationSink>,
    tracker: Arc<EventTracker>,
    queues: Mutex<Vec<Queue>>,
    interests: Mutex<Vec<Interest>>,
    lost_tx: mpsc::UnboundedSender<ServerLocation>,
    lost_rx: Mutex<Option<mpsc::UnboundedReceiver<ServerLocation>>>,
    shutdown: watch::Sender<bool>,
    keepalive: Arc<AtomicBool>,
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("redundancy", &self.redundancy)
            .field("durable", &self.durable)
            .field("queues", &self.queue_servers())
            .finish()
    }
}

impl SubscriptionManager {
    /// Creates a manager; no queue is opened until [`SubscriptionManager::start`].
    pub fn new(
        config: &PoolConfig,
        connections: Arc<ConnectionManager>,
        member_id: Arc<Vec<u8>>,
        durable: bool,
        sink: Arc<dyn NotificationSink>,
    ) -> Arc<Self> {
        let (lost_tx, lost_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            connections,
            servers: config.servers().to_vec(),
            redundancy: config.subscription_redundancy(),
            member_id,
            durable,
            read_timeout: config.read_timeout(),
            ack_interval: config.subscription_ack_interval(),
            monitor_interval: config.ping_interval(),
            sink,
            tracker: Arc::new(EventTracker::new(
                config.subscription_message_tracking_timeout(),
            )),
            queues: Mutex::new(Vec::new()),
            interests: Mutex::new(Vec::new()),
            lost_tx,
            lost_rx: Mutex::new(Some(lost_rx)),
            shutdown,
            keepalive: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Opens the queues; fails if no primary queue can be established.
    pub async fn start(&self) -> Result<()> {
        self.restore_redundancy().await;
        if self.primary().is_none() {
            return Err(GeodeError::NotConnected(
                "no subscription queue could be established".to_string(),
            ));
        }
        tracing::info!(queues = ?self.queue_servers(), "subscription queues established");
        Ok(())
    }

    /// Returns the event tracker.
    pub fn tracker(&self) -> &EventTracker {
        &self.tracker
    }

    /// Returns the primary queue server.
    pub fn primary(&self) -> Option<ServerLocation> {
        self.lock_queues()
            .iter()
            .find(|q| q.primary)
            .map(|q| q.endpoint.clone())
    }

    /// Returns every queue server, primary first.
    pub fn queue_servers(&self) -> Vec<ServerLocation> {
        self.lock_queues().iter().map(|q| q.endpoint.clone()).collect()
    }

    /// Returns the recorded interest registrations.
    pub fn interests(&self) -> Vec<Interest> {
        self.interests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn lock_queues(&self) -> std::sync::MutexGuard<'_, Vec<Queue>> {
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn desired_queues(&self) -> usize {
        if self.redundancy < 0 {
            usize::MAX
        } else {
            self.redundancy as usize + 1
        }
    }

    async fn candidates(&self, excluded: &HashSet<ServerLocation>) -> Result<Vec<ServerLocation>> {
        match self.connections.source().locator() {
            Some(locator) => {
                let (durable_found, servers) = locator
                    .get_queue_servers(
                        self.member_id.to_vec(),
                        self.redundancy,
                        excluded,
                        self.durable,
                    )
                    .await?;
                if durable_found {
                    tracing::debug!("locator found an existing durable queue");
                }
                Ok(servers)
            }
            None => Ok(self
                .servers
                .iter()
                .filter(|s| !excluded.contains(*s))
                .cloned()
                .collect()),
        }
    }

    /// Opens queues until the configured redundancy is met. A new primary
    /// gets every recorded interest registered.
    pub async fn restore_redundancy(&self) {
        if *self.shutdown.borrow() {
            return;
        }
        let current: HashSet<ServerLocation> = self.queue_servers().into_iter().collect();
        if current.len() >= self.desired_queues() {
            return;
        }
        let candidates = match self.candidates(&current).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(error = %e, "cannot find subscription queue servers");
                return;
            }
        };

        for endpoint in candidates {
            if self.lock_queues().len() >= self.desired_queues() {
                break;
            }
            let primary = self.primary().is_none();
            let mode = if primary {
                CommunicationMode::PrimaryServerToClient
            } else {
                CommunicationMode::SecondaryServerToClient
            };
            let conn = match self.connections.open_dedicated(&endpoint, mode).await {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(endpoint = %endpoint, error = %e, "failed to open subscription queue");
                    continue;
                }
            };
            tracing::debug!(endpoint = %endpoint, primary, status = ?conn.queue_status(), "subscription queue opened");
            let reader = self.spawn_reader(conn);
            self.lock_queues().push(Queue {
                endpoint: endpoint.clone(),
                primary,
                reader,
            });
            if primary {
                self.register_recorded_interests(&endpoint).await;
            }
        }
    }

    fn spawn_reader(&self, conn: Connection) -> JoinHandle<()> {
        let context = ReaderContext {
            endpoint: conn.endpoint().clone(),
            sink: self.sink.clone(),
            tracker: self.tracker.clone(),
            lost: self.lost_tx.clone(),
            shutdown: self.shutdown.subscribe(),
            keepalive: self.keepalive.clone(),
        };
        tokio::spawn(read_queue(conn, context))
    }

    async fn register_recorded_interests(&self, primary: &ServerLocation) {
        for interest in self.interests() {
            if let Err(e) = self.send_interest(primary, &interest).await {
                tracing::warn!(region = %interest.region, error = %e, "re-registering interest failed");
            }
        }
    }

    async fn send_interest(&self, primary: &ServerLocation, interest: &Interest) -> Result<()> {
        let mut conn = self.connections.acquire_for(primary).await?;
        conn.send(&interest.to_message(self.durable), self.read_timeout)
            .await?
            .into_result()?;
        Ok(())
    }

    /// Records `interest` and registers it on the primary queue.
    pub async fn register_interest(&self, interest: Interest) -> Result<()> {
        {
            let mut interests = self.interests.lock().unwrap_or_else(|e| e.into_inner());
            if interest.keys == InterestKeys::All {
                interests.retain(|i| i.region != interest.region);
            }
            if !interests.contains(&interest) {
                interests.push(interest.clone());
            }
        }
        let primary = self.primary().ok_or_else(no_primary)?;
        self.send_interest(&primary, &interest).await
    }

    /// Tells the primary that a durable client is ready for queued events.
    pub async fn ready_for_events(&self) -> Result<()> {
        let primary = self.primary().ok_or_else(no_primary)?;
        let mut conn = self.connections.acquire_for(&primary).await?;
        conn.send_oneway(&Message::new(CLIENT_READY)).await
    }

    /// Acknowledges delivered events on the primary.
    pub async fn send_acks(&self) {
        let acks = self.tracker.take_pending_acks();
        if acks.is_empty() {
            return;
        }
        let Some(primary) = self.primary() else {
            return;
        };
        let result = async {
            let mut message =
                Message::new(PERIODIC_ACK).with_part(Part::int(acks.len() as i32));
            for id in &acks {
                message.push_part(id.to_part()?);
            }
            let mut conn = self.connections.acquire_for(&primary).await?;
            conn.send_oneway(&message).await
        }
        .await;
        match result {
            Ok(()) => tracing::trace!(count = acks.len(), "acked events"),
            Err(e) => tracing::warn!(error = %e, "periodic ack failed"),
        }
    }

    async fn make_primary(&self, endpoint: &ServerLocation) -> Result<()> {
        let mut conn = self.connections.acquire_for(endpoint).await?;
        conn.send(
            &Message::new(MAKE_PRIMARY).with_part(Part::byte(0)),
            self.read_timeout,
        )
        .await?
        .into_result()?;
        Ok(())
    }

    /// Handles the loss of the queue on `endpoint`: a lost primary is
    /// replaced by promoting the first live secondary.
    pub async fn handle_lost(&self, endpoint: &ServerLocation) {
        let was_primary = {
            let mut queues = self.lock_queues();
            match queues.iter().position(|q| &q.endpoint == endpoint) {
                Some(index) => {
                    let queue = queues.remove(index);
                    queue.reader.abort();
                    queue.primary
                }
                None => return,
            }
        };
        tracing::warn!(endpoint = %endpoint, primary = was_primary, "subscription queue lost");

        if was_primary {
            loop {
                let Some(candidate) = self.queue_servers().into_iter().next() else {
                    break;
                };
                match self.make_primary(&candidate).await {
                    Ok(()) => {
                        if let Some(queue) =
                            self.lock_queues().iter_mut().find(|q| q.endpoint == candidate)
                        {
                            queue.primary = true;
                        }
                        tracing::info!(endpoint = %candidate, "secondary queue promoted to primary");
                        self.register_recorded_interests(&candidate).await;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(endpoint = %candidate, error = %e, "promotion failed");
                        let mut queues = self.lock_queues();
                        if let Some(index) = queues.iter().position(|q| q.endpoint == candidate) {
                            queues.remove(index).reader.abort();
                        }
                    }
                }
            }
        }

        if self.lock_queues().is_empty() {
            self.sink.region_disconnected().await;
        }
        self.restore_redundancy().await;
    }

    /// Background loop: reacts to lost queues, sends acks, restores
    /// redundancy and expires tracked threads until destroyed.
    pub async fn run_maintenance(self: Arc<Self>) {
        let Some(mut lost) = self
            .lost_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            return;
        };
        let mut shutdown = self.shutdown.subscribe();
        let mut acks = tokio::time::interval(self.ack_interval.max(Duration::from_millis(10)));
        let mut monitor =
            tokio::time::interval(self.monitor_interval.max(Duration::from_millis(10)));
        loop {
            tokio::select! {
                endpoint = lost.recv() => match endpoint {
                    Some(endpoint) => self.handle_lost(&endpoint).await,
                    None => break,
                },
                _ = acks.tick() => self.send_acks().await,
                _ = monitor.tick() => {
                    self.restore_redundancy().await;
                    self.tracker.expire();
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::debug!("subscription maintenance stopped");
    }

    /// Closes every queue. With `keepalive` the servers keep a durable
    /// client's queues for its durable timeout.
    pub async fn destroy(&self, keepalive: bool) {
        self.keepalive.store(keepalive, Ordering::SeqCst);
        self.shutdown.send_replace(true);
        let queues: Vec<Queue> = self.lock_queues().drain(..).collect();
        for queue in queues {
            if tokio::time::timeout(Duration::from_secs(5), queue.reader)
                .await
                .is_err()
            {
                tracing::debug!(endpoint = %queue.endpoint, "subscription reader did not stop in time");
            }
        }
    }
}

fn no_primary() -> GeodeError {
    GeodeError::NotConnected("no primary subscription queue".to_string())
}

async fn read_queue(mut conn: Connection, mut context: ReaderContext) {
    loop {
        if *context.shutdown.borrow() {
            break;
        }
        let message = tokio::select! {
            message = conn.read_message(None) => Some(message),
            _ = context.shutdown.changed() => None,
        };
        match message {
            Some(Ok(message)) => handle_push(&context, message).await,
            Some(Err(e)) => {
                tracing::warn!(endpoint = %context.endpoint, error = %e, "subscription channel failed");
                let _ = context.lost.send(context.endpoint.clone());
                return;
            }
            None => break,
        }
    }
    conn.close(context.keepalive.load(Ordering::SeqCst)).await;
}

async fn handle_push(context: &ReaderContext, message: Message) {
    match message.message_type() {
        LOCAL_CREATE | LOCAL_UPDATE | LOCAL_INVALIDATE | LOCAL_DESTROY | LOCAL_DESTROY_REGION
        | CLEAR_REGION => match Notification::from_message(&message) {
            Ok(notification) => {
                if context.tracker.track(&notification.event_id) {
                    context.sink.deliver(notification).await;
                }
            }
            Err(e) => {
                tracing::warn!(endpoint = %context.endpoint, error = %e, "undecodable notification");
            }
        },
        CLIENT_MARKER => context.sink.region_live().await,
        SERVER_TO_CLIENT_PING => tracing::trace!(endpoint = %context.endpoint, "server ping"),
        other => {
            tracing::debug!(
                endpoint = %context.endpoint,
                message = message_type_name(other),
                "ignoring push message"
            );
        }
    }
}
