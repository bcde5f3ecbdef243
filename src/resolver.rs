//! The seven-stage resolution pipeline (C5): DNS bootstrap →
//! entrypoint → site index → route → manifest → assets → (C6 verify)
//! → (C7 assemble), fail-fast with the first error at every stage.
//!
//! Each stage is also exposed as its own method so the RPC surface
//! (C8) can drive the pipeline one step at a time; `resolve` itself is
//! just these same methods run back to back.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tracing::debug;

use crate::assemble::{self, Bundle};
use crate::cache::BoundedCache;
use crate::config::Config;
use crate::doh::{Bootstrap, DohClient};
use crate::error::Error;
use crate::event::{
    CategorizedAssets, Entrypoint, Manifest, NwebEvent, SiteIndex, KIND_ENTRYPOINT,
    KIND_SITE_INDEX,
};
use crate::offline::{now_unix, FailureMemory, InMemoryOfflineStore, OfflineEntry, OfflineStore};
use crate::relay::{canonicalize_relay_url, Filter, RelayPool};
use crate::verify;

#[derive(Clone)]
struct CachedBundle {
    site_index_id: String,
    bundle: Bundle,
}

/// Resolves `(host, route)` pairs against the relay network. Owns the
/// per-relay-set pools and every layer of cache in front of them. One
/// instance per execution context per the concurrency model — never
/// shared between a service-worker-equivalent and a foreground one.
///
/// The assembled-document cache is two layers deep per the data model:
/// `bundle_cache` is the in-memory 5 minute "prefetch" layer, `offline`
/// is the persistent 24h layer an embedder can back with real storage
/// (the shipped default is an in-process `InMemoryOfflineStore`).
pub struct Resolver<S: OfflineStore = InMemoryOfflineStore> {
    config: Config,
    doh: DohClient,
    pools: HashMap<String, RelayPool>,
    event_cache: BoundedCache<String, NwebEvent>,
    event_set_cache: BoundedCache<String, Vec<NwebEvent>>,
    bundle_cache: BoundedCache<String, CachedBundle>,
    offline: S,
    failures: FailureMemory,
}

impl Resolver<InMemoryOfflineStore> {
    pub fn new(config: Config) -> Self {
        let offline = InMemoryOfflineStore::new(config.ttl_offline_bundle);
        Resolver::with_offline_store(config, offline)
    }
}

impl<S: OfflineStore> Resolver<S> {
    pub fn with_offline_store(config: Config, offline: S) -> Self {
        let doh = DohClient::new(&config);
        let event_cache = BoundedCache::new(config.cache_max_events);
        let event_set_cache = BoundedCache::new(config.cache_max_events);
        let bundle_cache = BoundedCache::new(config.prefetch_max);
        let failures = FailureMemory::new(config.failure_memory);

        Resolver {
            config,
            doh,
            pools: HashMap::new(),
            event_cache,
            event_set_cache,
            bundle_cache,
            offline,
            failures,
        }
    }

    /// Resolves the way a navigation interceptor would: consults the
    /// 60s failure memory before touching the network at all, and
    /// records a fresh failure on that window if this run fails too.
    pub async fn resolve_for_navigation(&mut self, host: &str, route: &str) -> Result<Bundle, Error> {
        let key = format!("{host}{route}");

        if self.failures.is_remembered(&key) {
            return Err(Error::Internal(format!(
                "resolution for {key} failed recently, not retrying yet"
            )));
        }

        match self.resolve(host, route).await {
            Ok(bundle) => Ok(bundle),
            Err(e) => {
                e.log();
                self.failures.record(&key);
                Err(e)
            }
        }
    }

    pub async fn resolve(&mut self, host: &str, route: &str) -> Result<Bundle, Error> {
        debug!(%host, %route, "resolving");
        validate_host_route(host, route)?;

        let bootstrap = self.dns_bootstrap(host).await?;
        let site_index_event = self.fetch_site_index(&bootstrap).await?;

        // Assembled-document cache: both layers carry the site-index id
        // they were built from, so a matching id here means the route's
        // bundle is still current; a mismatch (the publisher replaced
        // the entrypoint mid-session) falls through to a full refetch.
        let bundle_key = format!("{host}{route}");
        if let Some(cached) = self.bundle_cache.get(&bundle_key) {
            if cached.site_index_id == site_index_event.id {
                return Ok(cached.bundle.clone());
            }
        }
        if let Some(offline_entry) = self.offline.get(&bundle_key).await {
            if offline_entry.site_index_id == site_index_event.id {
                self.bundle_cache.set(
                    bundle_key,
                    CachedBundle {
                        site_index_id: offline_entry.site_index_id,
                        bundle: offline_entry.bundle.clone(),
                    },
                    Duration::from_secs(5 * 60),
                );
                return Ok(offline_entry.bundle);
            }
        }

        let manifest_event = self
            .fetch_manifest_for_route(&bootstrap, &site_index_event, route)
            .await?;
        let asset_events = self
            .fetch_assets(&bootstrap, &manifest_event, &site_index_event.id)
            .await?;

        verify::verify_assets(&asset_events, &bootstrap.pubkey_hex, &self.config).await?;

        let manifest = Manifest::parse(&manifest_event)?;
        let categorized = categorize_assets(&asset_events, &manifest)?;
        let bundle = assemble::assemble(&manifest, &categorized, &self.config)?;

        self.bundle_cache.set(
            bundle_key.clone(),
            CachedBundle {
                site_index_id: site_index_event.id.clone(),
                bundle: bundle.clone(),
            },
            Duration::from_secs(5 * 60),
        );
        self.offline
            .set(
                bundle_key,
                OfflineEntry {
                    bundle: bundle.clone(),
                    site_index_id: site_index_event.id.clone(),
                    cached_at_unix: now_unix(),
                },
            )
            .await;

        Ok(bundle)
    }

    /// Stage 1: DNS TXT bootstrap lookup, normalizing the publisher key.
    pub async fn dns_bootstrap(&mut self, host: &str) -> Result<Bootstrap, Error> {
        self.doh.resolve(host, &self.config).await
    }

    /// Stages 2-3: the freshest entrypoint (TTL=0) for `bootstrap.pk`,
    /// then its site index (30s cache).
    pub async fn fetch_site_index(&mut self, bootstrap: &Bootstrap) -> Result<NwebEvent, Error> {
        let pool_key = relay_set_key(&bootstrap.relays);
        self.ensure_pool(&pool_key, &bootstrap.relays);

        let entrypoint_event = {
            let pool = self.pools.get(&pool_key).expect("pool just ensured");
            let events = pool
                .query(
                    Filter::kinds(vec![KIND_ENTRYPOINT])
                        .authors(vec![bootstrap.pubkey_hex.clone()])
                        .limit(1),
                )
                .await;
            events
                .into_iter()
                .max_by_key(|e| e.created_at)
                .ok_or_else(|| Error::NotPublished("no entrypoint event returned".to_string()))?
        };
        let d_tag = Entrypoint::parse(&entrypoint_event)?.d_tag;

        let cache_key = format!("idx:{}:{}", bootstrap.pubkey_hex, d_tag);
        if let Some(cached) = self.event_cache.get(&cache_key) {
            return Ok(cached.clone());
        }

        let pool = self.pools.get(&pool_key).expect("pool just ensured");
        let events = pool
            .query(
                Filter::kinds(vec![KIND_SITE_INDEX])
                    .authors(vec![bootstrap.pubkey_hex.clone()])
                    .d_tag(vec![d_tag.clone()]),
            )
            .await;
        let event = events
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotPublished("no site index event returned".to_string()))?;
        self.event_cache.set(cache_key, event.clone(), self.config.ttl_site_index);
        Ok(event)
    }

    /// Stages 4-5: route lookup in the site index, then the manifest
    /// it names (immutable by id, 7d cache).
    pub async fn fetch_manifest_for_route(
        &mut self,
        bootstrap: &Bootstrap,
        site_index_event: &NwebEvent,
        route: &str,
    ) -> Result<NwebEvent, Error> {
        let site_index = SiteIndex::parse(site_index_event)?;
        let manifest_id = site_index
            .manifest_id_for(route)
            .ok_or_else(|| Error::RouteNotFound {
                route: route.to_string(),
                available: site_index.available_routes(),
            })?
            .to_string();

        let cache_key = format!("man:{manifest_id}");
        if let Some(cached) = self.event_cache.get(&cache_key) {
            return Ok(cached.clone());
        }

        let pool_key = relay_set_key(&bootstrap.relays);
        self.ensure_pool(&pool_key, &bootstrap.relays);
        let pool = self.pools.get(&pool_key).expect("pool just ensured");
        let events = pool.query(Filter::by_ids(vec![manifest_id.clone()])).await;
        let event = events
            .into_iter()
            .next()
            .ok_or_else(|| Error::ManifestMissing(manifest_id.clone()))?;
        self.event_cache.set(cache_key, event.clone(), self.config.ttl_immutable);
        Ok(event)
    }

    /// Stages 6-7: asset id extraction from the manifest's `e`-tags,
    /// then fetching the set (immutable by id, 7d cache, keyed by the
    /// site index id so a site update invalidates it automatically).
    pub async fn fetch_assets(
        &mut self,
        bootstrap: &Bootstrap,
        manifest_event: &NwebEvent,
        site_index_id: &str,
    ) -> Result<Vec<NwebEvent>, Error> {
        let manifest = Manifest::parse(manifest_event)?;
        let asset_ids = manifest.asset_ids();
        if asset_ids.is_empty() {
            return Err(Error::AssetsMissing { missing: vec![] });
        }

        let cache_key = format!("site:{}:assets:{}", site_index_id, asset_ids.join(","));
        if let Some(cached) = self.event_set_cache.get(&cache_key) {
            return Ok(cached.clone());
        }

        let pool_key = relay_set_key(&bootstrap.relays);
        self.ensure_pool(&pool_key, &bootstrap.relays);
        let pool = self.pools.get(&pool_key).expect("pool just ensured");
        let events = pool.query(Filter::by_ids(asset_ids.clone())).await;

        let returned_ids: HashSet<&str> = events.iter().map(|e| e.id.as_str()).collect();
        let missing: Vec<String> = asset_ids
            .iter()
            .filter(|id| !returned_ids.contains(id.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(Error::AssetsMissing { missing });
        }

        self.event_set_cache.set(cache_key, events.clone(), self.config.ttl_immutable);
        Ok(events)
    }

    fn ensure_pool(&mut self, key: &str, relays: &[String]) {
        self.pools.entry(key.to_string()).or_insert_with(|| {
            let canon: Vec<String> = relays.iter().map(|r| canonicalize_relay_url(r)).collect();
            RelayPool::new(canon, self.config.clone())
        });
    }
}

/// Categorizes a fetched asset set by MIME, in manifest order so that,
/// per spec, two HTML assets resolve deterministically to the last one.
pub fn categorize_assets<'a>(
    assets: &'a [NwebEvent],
    manifest: &Manifest<'a>,
) -> Result<CategorizedAssets<'a>, Error> {
    let mut by_id: HashMap<&str, &NwebEvent> = HashMap::new();
    for asset in assets {
        by_id.insert(asset.id.as_str(), asset);
    }

    let mut html: Option<&NwebEvent> = None;
    let mut css = Vec::new();
    let mut js = Vec::new();
    let mut other = Vec::new();

    for asset_id in manifest.asset_ids() {
        let Some(event) = by_id.get(asset_id.as_str()) else {
            continue;
        };
        match crate::event::asset_mime(event) {
            Some("text/html") => html = Some(event),
            Some("text/css") => css.push(*event),
            Some("application/javascript") | Some("text/javascript") => js.push(*event),
            _ => other.push(*event),
        }
    }

    let html = html.ok_or(Error::NoHtml)?;

    Ok(CategorizedAssets {
        html,
        css,
        js,
        other,
    })
}

fn relay_set_key(relays: &[String]) -> String {
    let mut canon: Vec<String> = relays.iter().map(|r| canonicalize_relay_url(r)).collect();
    canon.sort_unstable();
    canon.dedup();
    canon.join(",")
}

fn validate_host_route(host: &str, route: &str) -> Result<(), Error> {
    if host.is_empty() || host.len() > 253 {
        return Err(Error::BadInput(format!(
            "host length {} out of range",
            host.len()
        )));
    }
    if !route.starts_with('/') || route.len() > 1024 {
        return Err(Error::BadInput(
            "route must start with '/' and be at most 1024 characters".to_string(),
        ));
    }
    if route.contains("..") {
        return Err(Error::BadInput("route must not contain '..'".to_string()));
    }
    if route.chars().any(|c| matches!(c, '<' | '>' | '\'' | '"')) {
        return Err(Error::BadInput(
            "route contains a forbidden character".to_string(),
        ));
    }
    if !route
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '/'))
    {
        return Err(Error::BadInput(
            "route contains characters outside [\\w\\-./]".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_normal_host_route() {
        validate_host_route("example.test", "/a/b.html").unwrap();
    }

    #[test]
    fn validate_rejects_route_without_leading_slash() {
        assert!(validate_host_route("example.test", "a/b").is_err());
    }

    #[test]
    fn validate_rejects_dot_dot() {
        assert!(validate_host_route("example.test", "/../etc").is_err());
    }

    #[test]
    fn validate_rejects_forbidden_characters() {
        assert!(validate_host_route("example.test", "/<script>").is_err());
    }

    #[test]
    fn validate_rejects_oversized_host() {
        let host = "a".repeat(300);
        assert!(validate_host_route(&host, "/").is_err());
    }

    #[test]
    fn relay_set_key_is_order_independent() {
        let a = relay_set_key(&["wss://b".to_string(), "wss://a".to_string()]);
        let b = relay_set_key(&["wss://a".to_string(), "wss://b".to_string()]);
        assert_eq!(a, b);
    }

    fn asset_ev(id: &str, mime: &str) -> NwebEvent {
        NwebEvent {
            id: id.to_string(),
            pubkey: "pk".to_string(),
            kind: crate::event::KIND_ASSET,
            created_at: 0,
            tags: vec![vec!["m".to_string(), mime.to_string()]],
            content: String::new(),
        }
    }

    #[test]
    fn categorize_picks_last_html_in_manifest_order_deterministically() {
        let manifest_event = NwebEvent {
            id: "man1".to_string(),
            pubkey: "pk".to_string(),
            kind: crate::event::KIND_MANIFEST,
            created_at: 0,
            tags: vec![
                vec!["e".to_string(), "h1".to_string()],
                vec!["e".to_string(), "h2".to_string()],
            ],
            content: "{}".to_string(),
        };
        let manifest = Manifest::parse(&manifest_event).unwrap();
        let assets = vec![asset_ev("h1", "text/html"), asset_ev("h2", "text/html")];

        let categorized = categorize_assets(&assets, &manifest).unwrap();
        assert_eq!(categorized.html.id, "h2");
    }

    #[test]
    fn categorize_fails_with_no_html_asset() {
        let manifest_event = NwebEvent {
            id: "man1".to_string(),
            pubkey: "pk".to_string(),
            kind: crate::event::KIND_MANIFEST,
            created_at: 0,
            tags: vec![vec!["e".to_string(), "c1".to_string()]],
            content: "{}".to_string(),
        };
        let manifest = Manifest::parse(&manifest_event).unwrap();
        let assets = vec![asset_ev("c1", "text/css")];

        assert!(matches!(
            categorize_assets(&assets, &manifest),
            Err(Error::NoHtml)
        ));
    }
}
