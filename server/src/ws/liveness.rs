//! Heartbeat sweep.
//!
//! Per connection: `ALIVE -> AWAITING_PONG` when pinged, back to `ALIVE` on any
//! pong, `DEAD` if still awaiting at the next sweep. A peer that disappears
//! without a close frame is therefore dropped within two intervals.

use std::sync::Weak;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::Message;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::broadcast::send_to_connection;
use super::hub::Hub;
use super::registry::{ConnectionEntry, Registry};
use super::ConnectionId;

#[derive(Debug, Default)]
pub struct SweepOutcome {
    pub pinged: usize,
    /// Connections removed from the registry; the caller closes them.
    pub reaped: Vec<ConnectionEntry>,
}

/// One heartbeat tick over the whole registry.
pub fn sweep(registry: &mut Registry) -> SweepOutcome {
    let dead: Vec<ConnectionId> = registry
        .iter()
        .filter(|entry| !entry.alive)
        .map(|entry| entry.id)
        .collect();
    let reaped = dead
        .iter()
        .filter_map(|id| registry.unregister(id))
        .collect();

    let ping = Message::Ping(Bytes::new());
    let mut pinged = 0;
    for entry in registry.iter_mut() {
        entry.alive = false;
        if send_to_connection(entry, &ping) {
            pinged += 1;
        }
    }

    SweepOutcome { pinged, reaped }
}

/// Run [`Hub::sweep`] every `period` until `cancel` fires or the hub is dropped.
pub(crate) fn spawn_monitor(
    hub: Weak<Hub>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the first immediate tick
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let Some(hub) = hub.upgrade() else { break };
                    hub.sweep();
                }
            }
        }
        tracing::debug!("Liveness monitor stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Principal;
    use tokio::sync::mpsc;

    fn register(reg: &mut Registry) -> (ConnectionId, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let principal = Principal {
            id: "u1".into(),
            display_name: "u1".into(),
        };
        (reg.register(&principal, tx, CancellationToken::new()), rx)
    }

    #[test]
    fn first_sweep_pings_second_sweep_reaps_silent_peer() {
        let mut reg = Registry::new();
        let (id, mut rx) = register(&mut reg);

        let first = sweep(&mut reg);
        assert_eq!(first.pinged, 1);
        assert!(first.reaped.is_empty());
        assert!(matches!(rx.try_recv(), Ok(Message::Ping(_))));
        assert!(!reg.get(&id).unwrap().alive);

        let second = sweep(&mut reg);
        assert_eq!(second.reaped.len(), 1);
        assert_eq!(second.reaped[0].id, id);
        assert!(!reg.contains(&id));
        assert!(!reg.has_principal("u1"));
    }

    #[test]
    fn pong_between_sweeps_keeps_connection() {
        let mut reg = Registry::new();
        let (id, _rx) = register(&mut reg);

        for _ in 0..5 {
            let outcome = sweep(&mut reg);
            assert!(outcome.reaped.is_empty());
            reg.mark_alive(&id);
        }
        assert!(reg.contains(&id));
    }

    #[test]
    fn only_silent_connections_are_reaped() {
        let mut reg = Registry::new();
        let (talkative, _r1) = register(&mut reg);
        let (silent, _r2) = register(&mut reg);

        sweep(&mut reg);
        reg.mark_alive(&talkative);
        let outcome = sweep(&mut reg);

        let reaped: Vec<_> = outcome.reaped.iter().map(|e| e.id).collect();
        assert_eq!(reaped, vec![silent]);
        assert!(reg.contains(&talkative));
        assert_eq!(reg.connection_ids_of("u1").count(), 1);
    }
}
