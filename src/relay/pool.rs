//! The pool of connections for one sorted relay set: multiplexes
//! concurrent subscriptions, dedupes events, and resolves each query on
//! first-EOSE+grace or the hard deadline (C4).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::Config;
use crate::event::NwebEvent;

use super::connection::{ConnectionHandle, RelayFrame, RelayStatus};
use super::subscription::{new_sub_id, QueryCollector};
use super::Filter;

const INCOMING_CHANNEL_CAPACITY: usize = 4096;

#[derive(Clone)]
struct TrackedConnection {
    handle: ConnectionHandle,
    last_activity: Arc<Mutex<Instant>>,
}

/// One pool per sorted relay-set key, per spec: construct a fresh pool
/// for each distinct relay set a resolution touches, keyed by the
/// caller (the resolver keeps a map from relay-set key to pool).
pub struct RelayPool {
    connections: Arc<Mutex<HashMap<String, TrackedConnection>>>,
    incoming_tx: broadcast::Sender<(String, RelayFrame)>,
    config: Config,
    reaper: JoinHandle<()>,
}

impl RelayPool {
    pub fn new(relays: Vec<String>, config: Config) -> Self {
        let (incoming_tx, _rx) = broadcast::channel(INCOMING_CHANNEL_CAPACITY);

        let mut map = HashMap::new();
        for url in relays.into_iter().take(config.max_relays) {
            let handle = ConnectionHandle::spawn(url.clone(), incoming_tx.clone(), config.clone());
            map.insert(
                url,
                TrackedConnection {
                    handle,
                    last_activity: Arc::new(Mutex::new(Instant::now())),
                },
            );
        }

        let connections = Arc::new(Mutex::new(map));
        let reaper = spawn_idle_reaper(connections.clone(), config.idle_relay_close);

        RelayPool {
            connections,
            incoming_tx,
            config,
            reaper,
        }
    }

    pub fn relay_statuses(&self) -> Vec<(String, RelayStatus)> {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|c| (c.handle.url.clone(), c.handle.status()))
            .collect()
    }

    /// Runs one REQ against every currently-held relay connection:
    /// sends to each (queued automatically on ones still `Connecting`),
    /// then waits for first-EOSE+grace or the hard deadline, whichever
    /// comes first. Independent calls run fully concurrently since each
    /// subscribes its own broadcast receiver rather than sharing state.
    ///
    /// Per spec.md §4.4 step 5, the hard deadline is not a failure mode:
    /// it resolves with whatever was collected so far, empty vec
    /// included. Callers (the resolver's stage methods) are the ones
    /// that turn "nothing came back" into a typed error.
    pub async fn query(&self, filter: Filter) -> Vec<NwebEvent> {
        let sub_id = new_sub_id();
        let mut rx = self.incoming_tx.subscribe();
        let req = serde_json::json!(["REQ", sub_id, filter]).to_string();

        let conns: Vec<TrackedConnection> = self
            .connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();

        for conn in &conns {
            conn.handle.send(req.clone());
            *conn.last_activity.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
        }

        let hard_deadline = tokio::time::Instant::now() + self.config.ws_query_deadline;
        let result = collect_until_grace_or_deadline(
            &mut rx,
            sub_id.clone(),
            self.config.ws_eose_grace,
            hard_deadline,
        )
        .await;

        let close = serde_json::json!(["CLOSE", sub_id]).to_string();
        for conn in &conns {
            conn.handle.send(close.clone());
        }

        result
    }
}

impl Drop for RelayPool {
    fn drop(&mut self) {
        self.reaper.abort();
    }
}

async fn collect_until_grace_or_deadline(
    rx: &mut broadcast::Receiver<(String, RelayFrame)>,
    sub_id: String,
    grace: Duration,
    hard_deadline: tokio::time::Instant,
) -> Vec<NwebEvent> {
    let mut collector = QueryCollector::new();
    let mut grace_deadline: Option<tokio::time::Instant> = None;

    loop {
        let next_wake = match grace_deadline {
            Some(g) => g.min(hard_deadline),
            None => hard_deadline,
        };

        let received = tokio::select! {
            biased;
            _ = tokio::time::sleep_until(next_wake) => break,
            res = rx.recv() => res,
        };

        match received {
            Ok((_url, RelayFrame::Event { sub_id: frame_sub, event })) if frame_sub == sub_id => {
                collector.push(event);
            }
            Ok((_url, RelayFrame::Eose { sub_id: frame_sub })) if frame_sub == sub_id => {
                if grace_deadline.is_none() {
                    grace_deadline = Some(tokio::time::Instant::now() + grace);
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    collector.finish()
}

fn spawn_idle_reaper(
    connections: Arc<Mutex<HashMap<String, TrackedConnection>>>,
    idle_after: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let mut map = connections.lock().unwrap_or_else(|e| e.into_inner());
            let idle: Vec<String> = map
                .iter()
                .filter(|(_, c)| {
                    c.last_activity
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .elapsed()
                        > idle_after
                })
                .map(|(url, _)| url.clone())
                .collect();
            for url in idle {
                debug!(%url, "closing idle relay connection");
                map.remove(&url);
            }
        }
    })
}
