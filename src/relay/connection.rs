//! One relay's persistent duplex connection and its reconnect loop.

use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::config::Config;
use crate::event::NwebEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStatus {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// An incoming wire frame already destructured from its `["TYPE", ...]`
/// array. Frame types other than `EVENT`/`EOSE` are ignored per the
/// wire protocol (`NOTICE`, `OK`, and anything unrecognized).
#[derive(Debug, Clone)]
pub enum RelayFrame {
    Event { sub_id: String, event: NwebEvent },
    Eose { sub_id: String },
}

pub fn parse_frame(text: &str) -> Option<RelayFrame> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let arr = value.as_array()?;
    let tag = arr.first()?.as_str()?;
    match tag {
        "EVENT" => {
            let sub_id = arr.get(1)?.as_str()?.to_string();
            let event: NwebEvent = serde_json::from_value(arr.get(2)?.clone()).ok()?;
            Some(RelayFrame::Event { sub_id, event })
        }
        "EOSE" => {
            let sub_id = arr.get(1)?.as_str()?.to_string();
            Some(RelayFrame::Eose { sub_id })
        }
        _ => None,
    }
}

/// A cheap-to-clone handle to one relay's connection task: cloning
/// shares the same outbound queue and status cell rather than spawning
/// a second connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    pub url: String,
    outbound: mpsc::UnboundedSender<String>,
    status: Arc<Mutex<RelayStatus>>,
}

impl ConnectionHandle {
    /// Spawns the background task that owns this relay's socket and
    /// returns a handle to it. Outbound frames sent while the socket is
    /// still `Connecting` queue in the channel buffer and are drained
    /// as soon as the task reaches its read/write loop — no separate
    /// queuing path is needed.
    pub fn spawn(
        url: String,
        incoming_tx: broadcast::Sender<(String, RelayFrame)>,
        config: Config,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let status = Arc::new(Mutex::new(RelayStatus::Connecting));

        tokio::spawn(run_connection(
            url.clone(),
            outbound_rx,
            incoming_tx,
            status.clone(),
            config,
        ));

        ConnectionHandle {
            url,
            outbound: outbound_tx,
            status,
        }
    }

    /// Enqueues a frame for send; silently dropped if the connection
    /// task has already ended (pool is shutting this relay down).
    pub fn send(&self, text: String) {
        let _ = self.outbound.send(text);
    }

    pub fn status(&self) -> RelayStatus {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn run_connection(
    url: String,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    incoming_tx: broadcast::Sender<(String, RelayFrame)>,
    status: Arc<Mutex<RelayStatus>>,
    config: Config,
) {
    loop {
        *status.lock().unwrap_or_else(|e| e.into_inner()) = RelayStatus::Connecting;

        match tokio_tungstenite::connect_async(&url).await {
            Ok((ws_stream, _response)) => {
                *status.lock().unwrap_or_else(|e| e.into_inner()) = RelayStatus::Open;
                let (mut write, mut read) = ws_stream.split();

                loop {
                    tokio::select! {
                        outgoing = outbound_rx.recv() => {
                            match outgoing {
                                Some(text) => {
                                    if write.send(Message::Text(text)).await.is_err() {
                                        break;
                                    }
                                }
                                None => {
                                    *status.lock().unwrap_or_else(|e| e.into_inner()) = RelayStatus::Closing;
                                    let _ = write.close().await;
                                    *status.lock().unwrap_or_else(|e| e.into_inner()) = RelayStatus::Closed;
                                    return;
                                }
                            }
                        }
                        incoming = read.next() => {
                            match incoming {
                                Some(Ok(Message::Text(text))) => {
                                    if let Some(frame) = parse_frame(&text) {
                                        let _ = incoming_tx.send((url.clone(), frame));
                                    }
                                }
                                Some(Ok(_other)) => {}
                                Some(Err(e)) => {
                                    warn!(%url, "relay socket error: {e}");
                                    break;
                                }
                                None => break,
                            }
                        }
                    }
                }
            }
            Err(e) => {
                debug!(%url, "relay connect failed: {e}");
            }
        }

        *status.lock().unwrap_or_else(|e| e.into_inner()) = RelayStatus::Closed;
        tokio::time::sleep(config.ws_reconnect).await;
    }
}
