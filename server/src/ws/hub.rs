//! The real-time hub: registry, subscriptions, router and liveness monitor
//! behind one handle.
//!
//! Built once at startup and shared as `Arc<Hub>` with the WebSocket route and
//! every event producer. Lifecycle is `Hub::new(config)` -> `start()` -> `stop()`.
//!
//! All state lives behind a single mutex. Every operation is a short in-memory
//! mutation plus non-blocking enqueues onto per-connection queues; the lock is
//! never held across an `.await`.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::auth::Principal;
use crate::config::HubConfig;
use crate::error::HubError;
use crate::ws::broadcast::{self, close_message, encode, Broadcaster, CLOSE_GOING_AWAY};
use crate::ws::channel::{ChannelKey, Params};
use crate::ws::liveness;
use crate::ws::message::{Event, ServerMessage};
use crate::ws::registry::{ConnectionEntry, Registry, RegistryStats};
use crate::ws::{ConnectionId, ConnectionSender};

/// What a connection actor gets back from [`Hub::register`].
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    /// Fires when the hub drops the connection (heartbeat or shutdown)
    pub cancel: CancellationToken,
}

pub struct Hub {
    config: HubConfig,
    registry: Mutex<Registry>,
    shutdown: CancellationToken,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl Hub {
    pub fn new(config: HubConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry: Mutex::new(Registry::new()),
            shutdown: CancellationToken::new(),
            monitor: Mutex::new(None),
        })
    }

    /// Start the liveness monitor. Must be called from within a tokio runtime.
    pub fn start(self: &Arc<Self>) -> Result<(), HubError> {
        let mut monitor = self.monitor.lock();
        if monitor.is_some() || self.shutdown.is_cancelled() {
            return Err(HubError::AlreadyStarted);
        }
        if self.config.heartbeat_interval.is_zero() {
            return Err(HubError::InvalidConfig {
                field: "heartbeat_interval_secs",
                reason: "must be at least 1 second".to_string(),
            });
        }
        *monitor = Some(liveness::spawn_monitor(
            Arc::downgrade(self),
            self.config.heartbeat_interval,
            self.shutdown.child_token(),
        ));

        tracing::info!(
            heartbeat_secs = self.config.heartbeat_interval.as_secs(),
            "Real-time hub started"
        );
        Ok(())
    }

    /// Close every connection with 1001 and stop the monitor. In-flight sends are not flushed.
    pub fn stop(&self) {
        self.shutdown.cancel();
        if let Some(handle) = self.monitor.lock().take() {
            handle.abort();
        }

        let drained = self.registry.lock().drain();
        let count = drained.len();
        let bye = close_message(CLOSE_GOING_AWAY, "Server shutting down");
        for entry in drained {
            let _ = entry.sender.send(bye.clone());
            entry.cancel.cancel();
        }

        tracing::info!(connections = count, "Real-time hub stopped");
    }

    /// Admit an authenticated connection. Returns `None` once the hub is stopped.
    pub fn register(&self, principal: &Principal, sender: ConnectionSender) -> Option<ConnectionHandle> {
        let mut registry = self.registry.lock();
        // Checked under the lock so a concurrent stop() cannot miss this connection
        if self.shutdown.is_cancelled() {
            return None;
        }
        let cancel = self.shutdown.child_token();
        let id = registry.register(principal, sender, cancel.clone());
        let connections = registry.connection_ids_of(&principal.id).count();
        drop(registry);

        tracing::debug!(
            user_id = %principal.id,
            connection_id = %id,
            connections,
            "Connection registered"
        );
        Some(ConnectionHandle { id, cancel })
    }

    /// Forget a connection. Unknown IDs are ignored.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        let removed = self.registry.lock().unregister(id);
        match removed {
            Some(entry) => {
                tracing::debug!(
                    user_id = %entry.principal_id,
                    connection_id = %id,
                    subscriptions = entry.subscriptions.len(),
                    "Connection unregistered"
                );
                true
            }
            None => false,
        }
    }

    /// Add a channel subscription. Returns `true` if it was not already present.
    pub fn subscribe(&self, id: &ConnectionId, channel: &str, params: &Params) -> bool {
        let key = ChannelKey::new(channel, params);
        let added = self.registry.lock().subscribe(id, key.clone()).unwrap_or(false);
        tracing::debug!(connection_id = %id, channel = %key, added, "Subscribe");
        added
    }

    /// Drop a channel subscription. Returns `true` if it existed.
    pub fn unsubscribe(&self, id: &ConnectionId, channel: &str, params: &Params) -> bool {
        let key = ChannelKey::new(channel, params);
        let removed = self.registry.lock().unsubscribe(id, &key).unwrap_or(false);
        tracing::debug!(connection_id = %id, channel = %key, removed, "Unsubscribe");
        removed
    }

    /// Record a pong.
    pub fn mark_alive(&self, id: &ConnectionId) {
        self.registry.lock().mark_alive(id);
    }

    /// One heartbeat tick. Returns the number of connections dropped.
    pub fn sweep(&self) -> usize {
        let outcome = liveness::sweep(&mut self.registry.lock());
        let reaped = outcome.reaped.len();
        for entry in outcome.reaped {
            terminate(entry);
        }
        tracing::trace!(pinged = outcome.pinged, reaped, "Heartbeat sweep");
        reaped
    }

    pub fn stats(&self) -> RegistryStats {
        self.registry.lock().stats()
    }

    pub fn is_registered(&self, id: &ConnectionId) -> bool {
        self.registry.lock().contains(id)
    }

    pub fn is_subscribed(&self, id: &ConnectionId, channel: &str, params: &Params) -> bool {
        self.registry
            .lock()
            .is_subscribed(id, &ChannelKey::new(channel, params))
    }

    pub fn connections_of(&self, principal_id: &str) -> Vec<ConnectionId> {
        self.registry
            .lock()
            .connection_ids_of(principal_id)
            .copied()
            .collect()
    }

    /// Subscription keys held by a connection, sorted.
    pub fn subscriptions(&self, id: &ConnectionId) -> Vec<ChannelKey> {
        let registry = self.registry.lock();
        let mut keys: Vec<ChannelKey> = registry
            .get(id)
            .map(|e| e.subscriptions.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

impl Broadcaster for Hub {
    fn broadcast_all(&self, event: &Event) -> usize {
        let Some(msg) = encode(event) else { return 0 };
        let delivered = broadcast::broadcast_to_all(&self.registry.lock(), &msg);
        tracing::debug!(event = event.kind.as_str(), delivered, "Broadcast to all");
        delivered
    }

    fn broadcast_to_principal(&self, principal_id: &str, event: &Event) -> usize {
        let Some(msg) = encode(event) else { return 0 };
        let delivered = broadcast::send_to_principal(&self.registry.lock(), principal_id, &msg);
        tracing::debug!(
            event = event.kind.as_str(),
            user_id = %principal_id,
            delivered,
            "Broadcast to principal"
        );
        delivered
    }

    fn broadcast_to_channel(&self, channel: &str, params: &Params, data: Value) -> usize {
        let key = ChannelKey::new(channel, params);
        let frame = ServerMessage::Broadcast {
            channel: channel.to_string(),
            params: params.clone(),
            data,
        };
        let Some(msg) = encode(&frame) else { return 0 };
        let delivered = broadcast::broadcast_to_channel(&self.registry.lock(), &key, &msg);
        tracing::debug!(channel = %key, delivered, "Broadcast to channel");
        delivered
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Close a connection the heartbeat gave up on. Routine, so debug only.
fn terminate(entry: ConnectionEntry) {
    tracing::debug!(
        user_id = %entry.principal_id,
        connection_id = %entry.id,
        "Heartbeat missed, terminating connection"
    );
    let _ = entry
        .sender
        .send(close_message(CLOSE_GOING_AWAY, "Heartbeat timeout"));
    entry.cancel.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::message::EventKind;
    use axum::extract::ws::Message;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn principal(id: &str) -> Principal {
        Principal {
            id: id.into(),
            display_name: id.into(),
        }
    }

    fn sport(s: &str) -> Params {
        let mut p = Params::new();
        p.insert("sport".into(), json!(s));
        p
    }

    fn connect(hub: &Hub, who: &str) -> (ConnectionHandle, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (hub.register(&principal(who), tx).unwrap(), rx)
    }

    fn texts(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            if let Message::Text(t) = msg {
                out.push(serde_json::from_str(t.as_str()).unwrap());
            }
        }
        out
    }

    #[test]
    fn two_tabs_one_principal_scenario() {
        let hub = Hub::new(HubConfig::default());
        let (tab1, mut rx1) = connect(&hub, "u1");
        let (tab2, mut rx2) = connect(&hub, "u1");
        hub.subscribe(&tab1.id, "odds", &sport("nba"));
        hub.subscribe(&tab2.id, "odds", &sport("nfl"));

        let n = hub.broadcast_to_channel("odds", &sport("nba"), json!({"line": -2.5}));
        assert_eq!(n, 1);
        let got1 = texts(&mut rx1);
        assert_eq!(got1.len(), 1);
        assert_eq!(got1[0]["type"], "broadcast");
        assert_eq!(got1[0]["params"], json!({"sport": "nba"}));
        assert!(texts(&mut rx2).is_empty());

        let event = Event::new(EventKind::BetSettled, json!({"betId": 1}));
        assert_eq!(hub.broadcast_to_principal("u1", &event), 2);
        assert_eq!(texts(&mut rx1)[0]["type"], "bet_settled");
        assert_eq!(texts(&mut rx2)[0]["type"], "bet_settled");
    }

    #[test]
    fn no_buffering_for_late_or_departed_connections() {
        let hub = Hub::new(HubConfig::default());
        let (early, mut rx_early) = connect(&hub, "u1");
        hub.unregister(&early.id);

        let event = Event::new(EventKind::ScoreUpdate, json!({}));
        assert_eq!(hub.broadcast_to_principal("u1", &event), 0);

        let (_late, mut rx_late) = connect(&hub, "u1");
        assert!(texts(&mut rx_early).is_empty());
        assert!(texts(&mut rx_late).is_empty());
    }

    #[test]
    fn channel_broadcast_matches_subscription_at_call_time() {
        let hub = Hub::new(HubConfig::default());
        let (c, mut rx) = connect(&hub, "u1");
        let params = sport("nba");

        assert_eq!(hub.broadcast_to_channel("odds", &params, json!(1)), 0);
        hub.subscribe(&c.id, "odds", &params);
        assert_eq!(hub.broadcast_to_channel("odds", &params, json!(2)), 1);
        hub.unsubscribe(&c.id, "odds", &params);
        assert_eq!(hub.broadcast_to_channel("odds", &params, json!(3)), 0);

        let got = texts(&mut rx);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0]["data"], json!(2));
    }

    #[test]
    fn broadcast_all_reaches_every_principal() {
        let hub = Hub::new(HubConfig::default());
        let (_a, mut ra) = connect(&hub, "u1");
        let (_b, mut rb) = connect(&hub, "u2");
        let event = Event::new(EventKind::InjuryUpdate, json!({"player": "x"}));
        assert_eq!(hub.broadcast_all(&event), 2);
        assert_eq!(texts(&mut ra).len(), 1);
        assert_eq!(texts(&mut rb).len(), 1);
    }

    #[test]
    fn stop_closes_everything_and_refuses_new_connections() {
        let hub = Hub::new(HubConfig::default());
        let (handle, mut rx) = connect(&hub, "u1");

        hub.stop();
        assert!(handle.cancel.is_cancelled());
        assert_eq!(hub.stats(), RegistryStats::default());
        match rx.try_recv() {
            Ok(Message::Close(Some(frame))) => assert_eq!(frame.code, CLOSE_GOING_AWAY),
            other => panic!("expected close frame, got {other:?}"),
        }

        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(hub.register(&principal("u2"), tx).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_connection_reaped_between_one_and_two_intervals() {
        let interval = Duration::from_secs(30);
        let hub = Hub::new(HubConfig {
            heartbeat_interval: interval,
        });
        hub.start().unwrap();
        let (handle, _rx) = connect(&hub, "u1");

        // Just before the first sweep nothing has happened
        tokio::time::sleep(interval - Duration::from_secs(1)).await;
        assert!(hub.is_registered(&handle.id));

        // First sweep pings; still registered right after it
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(hub.is_registered(&handle.id));

        // Second sweep (t = 60s) reaps
        tokio::time::sleep(interval).await;
        assert!(!hub.is_registered(&handle.id));
        assert!(handle.cancel.is_cancelled());
        hub.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn answering_connection_survives_many_sweeps() {
        let interval = Duration::from_secs(30);
        let hub = Hub::new(HubConfig {
            heartbeat_interval: interval,
        });
        hub.start().unwrap();
        let (handle, _rx) = connect(&hub, "u1");

        // Answer halfway between sweeps
        tokio::time::sleep(interval / 2).await;
        for _ in 0..5 {
            tokio::time::sleep(interval).await;
            hub.mark_alive(&handle.id);
        }
        assert!(hub.is_registered(&handle.id));
        assert!(matches!(hub.start(), Err(HubError::AlreadyStarted)));
        hub.stop();
    }

    #[tokio::test]
    async fn zero_heartbeat_interval_is_rejected() {
        let hub = Hub::new(HubConfig {
            heartbeat_interval: Duration::ZERO,
        });
        assert!(matches!(
            hub.start(),
            Err(HubError::InvalidConfig { field: "heartbeat_interval_secs", .. })
        ));
    }
}
