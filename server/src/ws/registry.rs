//! Connection registry and subscription table.
//!
//! Plain data structure with no locking of its own; the hub owns it behind a
//! single mutex so that a connection and its subscription entry are always
//! created and destroyed together.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::auth::Principal;
use crate::ws::channel::ChannelKey;
use crate::ws::{ConnectionId, ConnectionSender};

/// Everything the hub knows about one live connection.
#[derive(Debug)]
pub struct ConnectionEntry {
    pub id: ConnectionId,
    pub principal_id: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    /// Cleared by each heartbeat sweep, set again by a pong
    pub alive: bool,
    pub sender: ConnectionSender,
    /// Cancelling stops the connection's reader loop
    pub cancel: CancellationToken,
    pub subscriptions: HashSet<ChannelKey>,
}

impl ConnectionEntry {
    /// Whether the writer side is still draining this connection's queue.
    pub fn is_open(&self) -> bool {
        !self.sender.is_closed() && !self.cancel.is_cancelled()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub principals: usize,
    pub connections: usize,
    pub subscriptions: usize,
}

#[derive(Debug, Default)]
pub struct Registry {
    /// Principal ID -> its connections. Never holds an empty set.
    principals: HashMap<String, HashSet<ConnectionId>>,
    connections: HashMap<ConnectionId, ConnectionEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection for `principal` with an empty subscription entry.
    pub fn register(
        &mut self,
        principal: &Principal,
        sender: ConnectionSender,
        cancel: CancellationToken,
    ) -> ConnectionId {
        let id = ConnectionId::new_v4();
        self.connections.insert(
            id,
            ConnectionEntry {
                id,
                principal_id: principal.id.clone(),
                display_name: principal.display_name.clone(),
                created_at: Utc::now(),
                alive: true,
                sender,
                cancel,
                subscriptions: HashSet::new(),
            },
        );
        self.principals
            .entry(principal.id.clone())
            .or_default()
            .insert(id);
        id
    }

    /// Remove a connection and its subscriptions. Returns `None` if it was not registered.
    pub fn unregister(&mut self, id: &ConnectionId) -> Option<ConnectionEntry> {
        let entry = self.connections.remove(id)?;

        let now_empty = match self.principals.get_mut(&entry.principal_id) {
            Some(set) => {
                set.remove(id);
                set.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.principals.remove(&entry.principal_id);
        }

        Some(entry)
    }

    /// Returns `Some(true)` if the key was newly added, `Some(false)` if it was
    /// already present, `None` for an unknown connection.
    pub fn subscribe(&mut self, id: &ConnectionId, key: ChannelKey) -> Option<bool> {
        self.connections
            .get_mut(id)
            .map(|entry| entry.subscriptions.insert(key))
    }

    /// Returns `Some(true)` if the key was removed.
    pub fn unsubscribe(&mut self, id: &ConnectionId, key: &ChannelKey) -> Option<bool> {
        self.connections
            .get_mut(id)
            .map(|entry| entry.subscriptions.remove(key))
    }

    pub fn mark_alive(&mut self, id: &ConnectionId) {
        if let Some(entry) = self.connections.get_mut(id) {
            entry.alive = true;
        }
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&ConnectionEntry> {
        self.connections.get(id)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn is_subscribed(&self, id: &ConnectionId, key: &ChannelKey) -> bool {
        self.connections
            .get(id)
            .map(|e| e.subscriptions.contains(key))
            .unwrap_or(false)
    }

    pub fn connection_ids_of(&self, principal_id: &str) -> impl Iterator<Item = &ConnectionId> {
        self.principals.get(principal_id).into_iter().flatten()
    }

    pub fn connections_of<'a>(
        &'a self,
        principal_id: &str,
    ) -> impl Iterator<Item = &'a ConnectionEntry> + 'a {
        self.principals
            .get(principal_id)
            .into_iter()
            .flatten()
            .filter_map(move |id| self.connections.get(id))
    }

    pub fn subscribers<'a>(
        &'a self,
        key: &'a ChannelKey,
    ) -> impl Iterator<Item = &'a ConnectionEntry> + 'a {
        self.connections
            .values()
            .filter(move |e| e.subscriptions.contains(key))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConnectionEntry> {
        self.connections.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut ConnectionEntry> {
        self.connections.values_mut()
    }

    pub fn has_principal(&self, principal_id: &str) -> bool {
        self.principals.contains_key(principal_id)
    }

    /// Remove every connection, e.g. on shutdown.
    pub fn drain(&mut self) -> Vec<ConnectionEntry> {
        self.principals.clear();
        self.connections.drain().map(|(_, e)| e).collect()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            principals: self.principals.len(),
            connections: self.connections.len(),
            subscriptions: self.connections.values().map(|e| e.subscriptions.len()).sum(),
        }
    }

    #[cfg(test)]
    fn assert_invariants(&self) {
        for (principal, ids) in &self.principals {
            assert!(!ids.is_empty(), "principal {principal} has an empty connection set");
            for id in ids {
                let entry = self.connections.get(id).expect("indexed connection must exist");
                assert_eq!(&entry.principal_id, principal);
            }
        }
        for (id, entry) in &self.connections {
            assert!(
                self.principals
                    .get(&entry.principal_id)
                    .is_some_and(|ids| ids.contains(id)),
                "connection {id} missing from its principal's set"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::channel::Params;
    use axum::extract::ws::Message;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn principal(id: &str) -> Principal {
        Principal {
            id: id.to_string(),
            display_name: id.to_uppercase(),
        }
    }

    fn register(reg: &mut Registry, who: &str) -> (ConnectionId, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = reg.register(&principal(who), tx, CancellationToken::new());
        (id, rx)
    }

    fn key(channel: &str, sport: &str) -> ChannelKey {
        let mut params = Params::new();
        params.insert("sport".into(), json!(sport));
        ChannelKey::new(channel, &params)
    }

    #[test]
    fn register_creates_empty_subscription_entry() {
        let mut reg = Registry::new();
        let (id, _rx) = register(&mut reg, "u1");
        let entry = reg.get(&id).unwrap();
        assert!(entry.subscriptions.is_empty());
        assert!(entry.alive);
        assert_eq!(entry.display_name, "U1");
        assert!(reg.has_principal("u1"));
    }

    #[test]
    fn last_connection_removes_principal() {
        let mut reg = Registry::new();
        let (a, _ra) = register(&mut reg, "u1");
        let (b, _rb) = register(&mut reg, "u1");
        assert_eq!(reg.connection_ids_of("u1").count(), 2);

        reg.unregister(&a);
        assert!(reg.has_principal("u1"));
        reg.unregister(&b);
        assert!(!reg.has_principal("u1"));
        assert_eq!(reg.stats(), RegistryStats::default());
    }

    #[test]
    fn unregister_twice_is_noop() {
        let mut reg = Registry::new();
        let (a, _ra) = register(&mut reg, "u1");
        assert!(reg.unregister(&a).is_some());
        assert!(reg.unregister(&a).is_none());
        reg.assert_invariants();
    }

    #[test]
    fn subscribe_is_idempotent() {
        let mut reg = Registry::new();
        let (a, _ra) = register(&mut reg, "u1");
        assert_eq!(reg.subscribe(&a, key("odds", "nba")), Some(true));
        assert_eq!(reg.subscribe(&a, key("odds", "nba")), Some(false));
        assert_eq!(reg.get(&a).unwrap().subscriptions.len(), 1);
    }

    #[test]
    fn unsubscribe_unknown_channel_is_noop() {
        let mut reg = Registry::new();
        let (a, _ra) = register(&mut reg, "u1");
        reg.subscribe(&a, key("odds", "nba"));
        assert_eq!(reg.unsubscribe(&a, &key("odds", "nfl")), Some(false));
        assert!(reg.is_subscribed(&a, &key("odds", "nba")));
        assert_eq!(reg.subscribe(&ConnectionId::new_v4(), key("odds", "nba")), None);
    }

    #[test]
    fn subscriptions_die_with_connection() {
        let mut reg = Registry::new();
        let (a, _ra) = register(&mut reg, "u1");
        reg.subscribe(&a, key("odds", "nba"));
        let entry = reg.unregister(&a).unwrap();
        assert_eq!(entry.subscriptions.len(), 1);
        assert!(!reg.is_subscribed(&a, &key("odds", "nba")));
        assert_eq!(reg.subscribers(&key("odds", "nba")).count(), 0);
    }

    #[test]
    fn subscribers_span_principals() {
        let mut reg = Registry::new();
        let (a, _ra) = register(&mut reg, "u1");
        let (b, _rb) = register(&mut reg, "u2");
        let (c, _rc) = register(&mut reg, "u2");
        reg.subscribe(&a, key("odds", "nba"));
        reg.subscribe(&b, key("odds", "nba"));
        reg.subscribe(&c, key("odds", "nfl"));

        let nba = key("odds", "nba");
        let mut ids: Vec<_> = reg.subscribers(&nba).map(|e| e.id).collect();
        ids.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[test]
    fn no_empty_principal_sets_under_random_churn() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut reg = Registry::new();
        let mut live: Vec<(ConnectionId, mpsc::UnboundedReceiver<Message>)> = Vec::new();
        let mut dead: Vec<ConnectionId> = Vec::new();
        let users = ["u1", "u2", "u3", "u4"];

        for _ in 0..2_000 {
            match rng.random_range(0..4) {
                0 | 1 => {
                    let who = users[rng.random_range(0..users.len())];
                    live.push(register(&mut reg, who));
                }
                2 if !live.is_empty() => {
                    let (id, _rx) = live.swap_remove(rng.random_range(0..live.len()));
                    assert!(reg.unregister(&id).is_some());
                    dead.push(id);
                }
                _ if !dead.is_empty() => {
                    let id = dead[rng.random_range(0..dead.len())];
                    assert!(reg.unregister(&id).is_none());
                }
                _ => {}
            }
            reg.assert_invariants();
        }
        assert_eq!(reg.stats().connections, live.len());
    }
}
