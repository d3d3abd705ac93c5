use crate::clock::Clock;
use crate::error::Error;
use crate::message::{Message, MessageKind};
use crate::snapshot::PresenceSnapshot;
use crate::state::{PresenceState, Reaction};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use multitab_broadcast::channel::BroadcastChannel;
use multitab_broadcast::handler::BroadcastHandler;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Timings an instance runs with.
#[derive(Clone, Copy, Debug)]
pub struct Timings {
    pub heartbeat_interval: Duration,
    pub reaper_interval: Duration,
    pub leader_check_delay: Duration,
}

/// Everything one running instance owns. Handlers and timers only hold weak
/// references to it.
pub struct Instance<C>
where
    C: BroadcastChannel,
{
    self_id: String,
    channel: Option<C>,
    supported: AtomicBool,
    clock: Arc<dyn Clock>,
    state: Mutex<PresenceState>,
    snapshot_sender: watch::Sender<PresenceSnapshot>,
    timings: Timings,
    debug: bool,
    shutdown_token: CancellationToken,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    leader_check: parking_lot::Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl<C> Instance<C>
where
    C: BroadcastChannel,
{
    pub fn new(
        channel: Option<C>,
        clock: Arc<dyn Clock>,
        state: PresenceState,
        timings: Timings,
        debug: bool,
    ) -> Self {
        let supported = channel.is_some();
        let (snapshot_sender, _) = watch::channel(state.snapshot(supported));

        Self {
            self_id: state.self_id().to_string(),
            channel,
            supported: AtomicBool::new(supported),
            clock,
            state: Mutex::new(state),
            snapshot_sender,
            timings,
            debug,
            shutdown_token: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(Vec::new()),
            leader_check: parking_lot::Mutex::new(None),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    pub fn is_supported(&self) -> bool {
        self.supported.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> PresenceSnapshot {
        self.snapshot_sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PresenceSnapshot> {
        self.snapshot_sender.subscribe()
    }

    /// Subscribes to the channel, announces the instance and starts the
    /// heartbeat and reaper tasks. Falls back to running alone if anything
    /// about the channel is unavailable.
    pub async fn start(self: &Arc<Self>) {
        let Some(channel) = &self.channel else {
            info!(
                "broadcast unsupported, instance {} runs alone",
                self.self_id
            );
            self.recompute().await;
            return;
        };

        let handler = PresenceHandler {
            instance: Arc::downgrade(self),
        };

        if let Err(e) = channel.subscribe(handler).await {
            warn!(
                "failed to subscribe to channel '{}', instance {} runs alone: {}",
                channel.name(),
                self.self_id,
                e
            );
            self.supported.store(false, Ordering::SeqCst);
            channel.close().await;
            self.recompute().await;
            return;
        }

        self.publish(MessageKind::RequestActiveInstances).await;
        self.publish(MessageKind::Heartbeat).await;
        self.spawn_timers();
        self.recompute().await;

        info!(
            "instance {} joined channel '{}'",
            self.self_id,
            channel.name()
        );
    }

    /// Applies a message and performs whatever it asks for.
    pub async fn receive(self: &Arc<Self>, message: Message) {
        let reaction = {
            let mut state = self.state.lock().await;
            let reaction = state.handle(&message, self.clock.now_ms());
            if reaction != Reaction::Ignored {
                self.publish_snapshot(&state);
            }
            reaction
        };

        match reaction {
            Reaction::Ignored | Reaction::Recomputed => {}
            Reaction::RecomputedAndReply => self.publish(MessageKind::Heartbeat).await,
            Reaction::ReplyAndCheckLeader => {
                self.publish(MessageKind::Heartbeat).await;
                self.schedule_leader_check();
            }
        }
    }

    /// Publishes a message of the given kind. Failures are logged and dropped.
    pub async fn publish(&self, kind: MessageKind) {
        if !self.is_supported() {
            return;
        }

        let Some(channel) = &self.channel else {
            return;
        };

        // The lock is held until the payload is handed to the channel, so
        // publishes are serialized and none can slip in behind the goodbye.
        let state = self.state.lock().await;

        // Only the goodbye may go out once shutdown started.
        if self.shut_down.load(Ordering::SeqCst) && kind != MessageKind::InstanceClosed {
            return;
        }

        let message = state.outgoing(kind, self.clock.now_ms());
        let payload: Bytes = match message.try_into() {
            Ok(payload) => payload,
            Err(e) => {
                warn!("failed to encode {} message: {}", kind, e);
                return;
            }
        };

        let published = channel.publish(payload).await;
        drop(state);

        if let Err(e) = published {
            warn!(
                "failed to publish {} on channel '{}': {}",
                kind,
                channel.name(),
                e
            );
        } else if self.debug {
            debug!("{} published {}", self.self_id, kind);
        }
    }

    /// Re-evaluates leadership after the configured delay. A newer call
    /// replaces a pending one.
    pub fn schedule_leader_check(self: &Arc<Self>) {
        let mut pending = self.leader_check.lock();
        if let Some(previous) = pending.take() {
            previous.abort();
        }

        if self.shutdown_token.is_cancelled() {
            return;
        }

        let instance = Arc::downgrade(self);
        let token = self.shutdown_token.clone();
        let delay = self.timings.leader_check_delay;

        *pending = Some(tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    if let Some(instance) = instance.upgrade() {
                        instance.recompute().await;
                    }
                }
            }
        }));
    }

    pub async fn recompute(&self) {
        let mut state = self.state.lock().await;
        state.recompute(self.clock.now_ms());
        self.publish_snapshot(&state);
    }

    pub async fn sweep(&self) {
        let mut state = self.state.lock().await;
        if state.sweep(self.clock.now_ms()) > 0 {
            self.publish_snapshot(&state);
        }
    }

    pub async fn navigate(&self, url: String) {
        let mut state = self.state.lock().await;
        state.set_url(url);
        state.recompute(self.clock.now_ms());
        self.publish_snapshot(&state);
    }

    /// Stops the timers, says goodbye and closes the channel. Only the first
    /// call does anything.
    pub async fn shutdown(&self) {
        if !self.begin_shutdown() {
            return;
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }

        self.publish(MessageKind::InstanceClosed).await;

        if let Some(channel) = &self.channel {
            channel.close().await;
        }

        info!("instance {} shut down", self.self_id);
    }

    /// Marks the instance as shutting down and cancels every timer without
    /// waiting. Returns `false` if shutdown had already begun.
    pub fn begin_shutdown(&self) -> bool {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return false;
        }

        self.shutdown_token.cancel();

        if let Some(pending) = self.leader_check.lock().take() {
            pending.abort();
        }

        true
    }

    pub fn abort_tasks(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn publish_snapshot(&self, state: &PresenceState) {
        self.snapshot_sender
            .send_replace(state.snapshot(self.is_supported()));
    }

    fn spawn_timers(self: &Arc<Self>) {
        let heartbeat = tokio::spawn(run_heartbeats(
            Arc::downgrade(self),
            self.timings.heartbeat_interval,
            self.shutdown_token.clone(),
        ));
        let reaper = tokio::spawn(run_reaper(
            Arc::downgrade(self),
            self.timings.reaper_interval,
            self.shutdown_token.clone(),
        ));

        self.tasks.lock().extend([heartbeat, reaper]);
    }
}

async fn run_heartbeats<C>(instance: Weak<Instance<C>>, period: Duration, token: CancellationToken)
where
    C: BroadcastChannel,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(instance) = instance.upgrade() else {
                    break;
                };
                instance.publish(MessageKind::Heartbeat).await;
            }
            () = token.cancelled() => {
                break;
            }
        }
    }
}

async fn run_reaper<C>(instance: Weak<Instance<C>>, period: Duration, token: CancellationToken)
where
    C: BroadcastChannel,
{
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(instance) = instance.upgrade() else {
                    break;
                };
                instance.sweep().await;
            }
            () = token.cancelled() => {
                break;
            }
        }
    }
}

/// Decodes channel payloads and feeds them to the instance.
struct PresenceHandler<C>
where
    C: BroadcastChannel,
{
    instance: Weak<Instance<C>>,
}

impl<C> Clone for PresenceHandler<C>
where
    C: BroadcastChannel,
{
    fn clone(&self) -> Self {
        Self {
            instance: Weak::clone(&self.instance),
        }
    }
}

#[async_trait]
impl<C> BroadcastHandler for PresenceHandler<C>
where
    C: BroadcastChannel,
{
    type Error = Error;

    async fn handle(&self, _channel_name: String, payload: Bytes) -> Result<(), Error> {
        let Some(instance) = self.instance.upgrade() else {
            return Ok(());
        };

        let message = Message::try_from(payload)?;
        instance.receive(message).await;

        Ok(())
    }
}
