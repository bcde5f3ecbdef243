//! RPC surface (C8): the six core operations exposed as named,
//! correlation-id'd request/response pairs over an in-process channel.
//!
//! No host browser runtime exists in this crate, so the surface is an
//! async `Handler` over a `tokio::sync::mpsc` request queue and a
//! `tokio::sync::oneshot` reply per call, rather than any assumption
//! about `postMessage` or a specific extension transport. An embedder
//! wires its real transport to this channel. Every method but the two
//! pure-function ones (`verifySRI`, `assembleDocument`) is answered by
//! driving the same `Resolver` an embedder would use directly — this
//! handler is a thin dispatch layer, not a second implementation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use crate::assemble;
use crate::config::Config;
use crate::doh::Bootstrap;
use crate::error::Error;
use crate::event::{Manifest, NwebEvent};
use crate::offline::{InMemoryOfflineStore, OfflineStore};
use crate::resolver::{categorize_assets, Resolver};
use crate::verify;
use std::collections::HashMap;

const METHOD_WHITELIST: [&str; 6] = [
    "dnsBootstrap",
    "fetchSiteIndex",
    "fetchManifestForRoute",
    "fetchAssets",
    "verifySRI",
    "assembleDocument",
];

/// A caller-supplied request: a method name on the whitelist, a
/// correlation id, and arbitrary JSON params, validated per-method
/// before being acted on.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    pub id: String,
    pub method: String,
    pub params: Value,
}

/// Responds exactly once, either with a result or an error string —
/// never both, never neither.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RpcResponse {
    Ok { id: String, result: Value },
    Err { id: String, error: String },
}

impl RpcResponse {
    fn ok(id: String, result: Value) -> Self {
        RpcResponse::Ok { id, result }
    }

    fn err(id: String, error: &Error) -> Self {
        RpcResponse::Err {
            id,
            error: error.code().to_string(),
        }
    }
}

type PendingCall = (RpcRequest, oneshot::Sender<RpcResponse>);

/// The client-facing handle: submits a request and awaits its reply.
#[derive(Clone)]
pub struct RpcClient {
    tx: mpsc::Sender<PendingCall>,
}

impl RpcClient {
    pub async fn call(&self, method: &str, id: String, params: Value) -> RpcResponse {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = RpcRequest {
            id: id.clone(),
            method: method.to_string(),
            params,
        };

        if self.tx.send((request, reply_tx)).await.is_err() {
            return RpcResponse::err(id, &Error::Internal("rpc handler gone".to_string()));
        }

        match reply_rx.await {
            Ok(response) => response,
            Err(_) => RpcResponse::err(id, &Error::Internal("rpc handler dropped reply".to_string())),
        }
    }
}

/// Owns the request queue, the config, and the `Resolver` every method
/// is dispatched against. Construction returns both the handler (to be
/// `.run()` on its own task) and the client handle used to submit calls.
pub struct RpcHandler<S: OfflineStore = InMemoryOfflineStore> {
    rx: mpsc::Receiver<PendingCall>,
    config: Config,
    resolver: Resolver<S>,
}

pub fn rpc_channel(config: Config, buffer: usize) -> (RpcHandler, RpcClient) {
    let (tx, rx) = mpsc::channel(buffer);
    let resolver = Resolver::new(config.clone());
    (
        RpcHandler {
            rx,
            config,
            resolver,
        },
        RpcClient { tx },
    )
}

/// As [`rpc_channel`], but backing the resolver's persistent offline
/// layer with a caller-supplied store instead of the in-memory default.
pub fn rpc_channel_with_offline_store<S: OfflineStore>(
    config: Config,
    offline: S,
    buffer: usize,
) -> (RpcHandler<S>, RpcClient) {
    let (tx, rx) = mpsc::channel(buffer);
    let resolver = Resolver::with_offline_store(config.clone(), offline);
    (
        RpcHandler {
            rx,
            config,
            resolver,
        },
        RpcClient { tx },
    )
}

impl<S: OfflineStore> RpcHandler<S> {
    /// Drives the handler loop until every client handle is dropped.
    /// Each call is validated against the method whitelist and argument
    /// shape, bounded by the RPC deadline, and answered exactly once.
    pub async fn run(mut self) {
        while let Some((request, reply_tx)) = self.rx.recv().await {
            let response = self.handle_one(request).await;
            let _ = reply_tx.send(response);
        }
    }

    async fn handle_one(&mut self, request: RpcRequest) -> RpcResponse {
        if !METHOD_WHITELIST.contains(&request.method.as_str()) {
            return RpcResponse::err(
                request.id,
                &Error::ProtocolError(format!("unknown method: {}", request.method)),
            );
        }

        let id = request.id.clone();
        let deadline = self.config.rpc_deadline;
        match timeout(deadline, self.dispatch(&request)).await {
            Ok(Ok(result)) => RpcResponse::ok(id, result),
            Ok(Err(e)) => {
                e.log();
                RpcResponse::err(id, &e)
            }
            Err(_) => {
                let e = Error::Timeout {
                    stage: crate::error::Stage::Rpc,
                };
                e.log();
                RpcResponse::err(id, &e)
            }
        }
    }

    /// Dispatches one already-whitelisted request to its handler. Each
    /// branch validates its own argument shape before doing anything
    /// else, then calls straight through to the matching `Resolver`
    /// stage (or, for the last two, the pure verify/assemble functions).
    async fn dispatch(&mut self, request: &RpcRequest) -> Result<Value, Error> {
        match request.method.as_str() {
            "dnsBootstrap" => {
                let host = param_str(&request.params, "host")?;
                let bootstrap = self.resolver.dns_bootstrap(host).await?;
                Ok(bootstrap_to_json(&bootstrap))
            }
            "fetchSiteIndex" => {
                let bootstrap = param_bootstrap(&request.params, "bootstrap")?;
                let event = self.resolver.fetch_site_index(&bootstrap).await?;
                Ok(serde_json::to_value(event)?)
            }
            "fetchManifestForRoute" => {
                let bootstrap = param_bootstrap(&request.params, "bootstrap")?;
                let site_index_event = param_event(&request.params, "siteIndex")?;
                let route = param_str(&request.params, "route")?;
                let manifest_event = self
                    .resolver
                    .fetch_manifest_for_route(&bootstrap, &site_index_event, route)
                    .await?;
                Ok(serde_json::to_value(manifest_event)?)
            }
            "fetchAssets" => {
                let bootstrap = param_bootstrap(&request.params, "bootstrap")?;
                let manifest_event = param_event(&request.params, "manifest")?;
                let site_index_id = param_str(&request.params, "siteIndexId")?;
                let assets = self
                    .resolver
                    .fetch_assets(&bootstrap, &manifest_event, site_index_id)
                    .await?;
                let manifest = Manifest::parse(&manifest_event)?;
                let categorized = categorize_assets(&assets, &manifest)?;
                Ok(categorized_assets_to_json(&categorized, &assets))
            }
            "verifySRI" => {
                let assets: Vec<NwebEvent> = serde_json::from_value(
                    request
                        .params
                        .get("assets")
                        .cloned()
                        .ok_or_else(|| Error::ProtocolError("verifySRI: missing assets".to_string()))?,
                )?;
                let pubkey = param_str(&request.params, "pubkey")?;
                verify::verify_assets(&assets, pubkey, &self.config).await?;
                Ok(serde_json::json!({ "ok": true }))
            }
            "assembleDocument" => {
                let manifest_event = param_event(&request.params, "manifest")?;
                let assets: Vec<NwebEvent> = serde_json::from_value(
                    request
                        .params
                        .get("assets")
                        .cloned()
                        .ok_or_else(|| Error::ProtocolError("assembleDocument: missing assets".to_string()))?,
                )?;
                let site_index_id = param_str(&request.params, "siteIndexId")?;

                let manifest = Manifest::parse(&manifest_event)?;
                let categorized = categorize_assets(&assets, &manifest)?;
                let bundle = assemble::assemble(&manifest, &categorized, &self.config)?;
                Ok(serde_json::json!({
                    "html": bundle.html,
                    "css": bundle.css,
                    "js": bundle.js,
                    "manifestMeta": bundle.manifest_meta,
                    "_siteIndexId": site_index_id,
                }))
            }
            other => Err(Error::ProtocolError(format!("unhandled method: {other}"))),
        }
    }
}

fn param_str<'a>(params: &'a Value, name: &str) -> Result<&'a str, Error> {
    params
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::ProtocolError(format!("missing or non-string param: {name}")))
}

fn param_event(params: &Value, name: &str) -> Result<NwebEvent, Error> {
    let value = params
        .get(name)
        .cloned()
        .ok_or_else(|| Error::ProtocolError(format!("missing param: {name}")))?;
    Ok(serde_json::from_value(value)?)
}

/// A caller-supplied `bootstrap` param arrives in the same shape
/// `dnsBootstrap` returns it in: `{ pubkey, relays }`.
fn param_bootstrap(params: &Value, name: &str) -> Result<Bootstrap, Error> {
    let value = params
        .get(name)
        .ok_or_else(|| Error::ProtocolError(format!("missing param: {name}")))?;
    let pubkey_hex = value
        .get("pubkey")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::ProtocolError(format!("{name}: missing pubkey")))?
        .to_string();
    let relays: Vec<String> = serde_json::from_value(
        value
            .get("relays")
            .cloned()
            .ok_or_else(|| Error::ProtocolError(format!("{name}: missing relays")))?,
    )?;
    Ok(Bootstrap {
        pubkey_hex,
        relays,
    })
}

fn bootstrap_to_json(bootstrap: &Bootstrap) -> Value {
    serde_json::json!({
        "pubkey": bootstrap.pubkey_hex,
        "relays": bootstrap.relays,
    })
}

/// Projects a fetched asset set into the spec's `fetchAssets` response
/// shape: ids bucketed by category plus a flat lookup table by id.
fn categorized_assets_to_json(
    categorized: &crate::event::CategorizedAssets<'_>,
    assets: &[NwebEvent],
) -> Value {
    let by_id: HashMap<&str, &NwebEvent> = assets.iter().map(|e| (e.id.as_str(), e)).collect();
    serde_json::json!({
        "html": categorized.html.id,
        "css": categorized.css.iter().map(|e| &e.id).collect::<Vec<_>>(),
        "js": categorized.js.iter().map(|e| &e.id).collect::<Vec<_>>(),
        "other": categorized.other.iter().map(|e| &e.id).collect::<Vec<_>>(),
        "byId": by_id,
    })
}
