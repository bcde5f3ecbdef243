//! DNS-over-HTTPS bootstrap lookup (C3).
//!
//! Transport mirrors the reference NIP-11 fetcher: a `hyper` + `hyper-rustls`
//! client built per call rather than a hand-rolled socket client, with the
//! response body bounded by `http_body_util::Limited`.

use http_body_util::{BodyExt, Empty, Limited};
use hyper::body::Bytes;
use hyper::header::{self, HeaderValue};
use hyper::{Request, Uri};
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::cache::{BoundedCache, RateLimiter};
use crate::config::Config;
use crate::error::Error;
use crate::keys::parse_pubkey;

const DOH_BODY_LIMIT: usize = 16 * 1024;
const GLOBAL_RATE_LIMIT_KEY: &str = "*";

/// The resolved bootstrap record: the publisher's key, normalized to
/// raw bytes, and its ordered relay set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bootstrap {
    pub pubkey_hex: String,
    pub relays: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DnsAnswerEntry {
    #[serde(rename = "type")]
    rtype: u32,
    data: String,
}

#[derive(Debug, Deserialize)]
struct DnsJsonResponse {
    #[serde(default, rename = "Answer")]
    answer: Vec<DnsAnswerEntry>,
}

#[derive(Debug, Deserialize)]
struct BootstrapPayload {
    pk: String,
    relays: Vec<String>,
}

/// Caches resolved bootstraps by host for 24h fallback use and looks
/// them up fresh on every call otherwise (the cache is bypassed on
/// success, consulted only when every upstream attempt is exhausted).
///
/// Two independent windowed limiters guard upstream volume: one keyed
/// per-host, one global under a single `"*"` key, matching the cache
/// design's "aggregate query volume" guard.
pub struct DohClient {
    cache: BoundedCache<String, Bootstrap>,
    per_host_limiter: RateLimiter,
    global_limiter: RateLimiter,
}

impl DohClient {
    pub fn new(config: &Config) -> Self {
        DohClient {
            cache: BoundedCache::new(config.dns_cache_max),
            per_host_limiter: RateLimiter::new(
                config.dns_per_host,
                std::time::Duration::from_secs(60),
                config.dns_cache_max,
            ),
            global_limiter: RateLimiter::new(config.dns_global, std::time::Duration::from_secs(60), 1),
        }
    }

    pub async fn resolve(&mut self, host: &str, config: &Config) -> Result<Bootstrap, Error> {
        if !self.global_limiter.check(GLOBAL_RATE_LIMIT_KEY) {
            return Err(Error::RateLimited {
                key: GLOBAL_RATE_LIMIT_KEY.to_string(),
            });
        }
        if !self.per_host_limiter.check(host) {
            return Err(Error::RateLimited {
                key: host.to_string(),
            });
        }

        match resolve_with_retries(host, config).await {
            Ok(bootstrap) => {
                self.cache
                    .set(host.to_string(), bootstrap.clone(), config.ttl_dns_fallback);
                Ok(bootstrap)
            }
            Err(e) => {
                if let Some(cached) = self.cache.get(&host.to_string()) {
                    debug!(%host, "doh exhausted, using offline fallback");
                    return Ok(cached.clone());
                }
                Err(e)
            }
        }
    }
}

/// Retries only on the transient failure classes spec.md §4.3 names
/// (`timeout`, `network`, `connection`, `fetch`). Permanently-fatal
/// failures — malformed dns-json, a malformed TXT payload, a bad key,
/// a TLS init failure, a bad DoH URL — fail fast on the first attempt
/// instead of paying the full backoff schedule for no benefit.
async fn resolve_with_retries(host: &str, config: &Config) -> Result<Bootstrap, Error> {
    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        match resolve_once(host, config).await {
            Ok(b) => return Ok(b),
            Err(e) => {
                warn!(%host, attempt, "doh attempt failed: {e}");
                let transient = is_transient(&e);
                last_err = Some(e);
                if !transient {
                    break;
                }
                if attempt < config.max_retries {
                    let backoff = config.retry_base * config.retry_backoff.pow(attempt);
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    Err(last_err.unwrap_or_else(|| Error::DnsError(format!("no attempts made for {host}"))))
}

/// Classifies a DoH failure as transient (worth retrying) or permanent
/// (retrying changes nothing). `Error::Timeout` is always transient;
/// everything else is judged by which failure class its message names.
fn is_transient(e: &Error) -> bool {
    match e {
        Error::Timeout { .. } => true,
        Error::DnsError(msg) => {
            let lower = msg.to_lowercase();
            ["timeout", "network", "connection", "fetch"]
                .iter()
                .any(|class| lower.contains(class))
        }
        _ => false,
    }
}

/// Queries every configured upstream endpoint in order for one TXT
/// record under `_nweb.<host>`, returning the first successfully
/// parsed bootstrap.
async fn resolve_once(host: &str, config: &Config) -> Result<Bootstrap, Error> {
    let mut last_err = None;

    for endpoint in &config.doh_endpoints {
        match query_endpoint(endpoint, host).await {
            Ok(b) => return Ok(b),
            Err(e) => {
                debug!(%endpoint, %host, "doh endpoint failed: {e}");
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| Error::DnsError("no doh endpoints configured".to_string())))
}

async fn query_endpoint(endpoint: &str, host: &str) -> Result<Bootstrap, Error> {
    let name = format!("_nweb.{host}");
    let url = format!("{endpoint}?name={name}&type=TXT");
    let uri: Uri = url
        .parse()
        .map_err(|e| Error::DnsError(format!("bad doh url {url}: {e}")))?;

    let https = HttpsConnectorBuilder::new()
        .with_native_roots()
        .map_err(|e| Error::DnsError(format!("tls init failed: {e}")))?
        .https_or_http()
        .enable_http1()
        .build();

    let client: Client<_, Empty<Bytes>> = Client::builder(TokioExecutor::new()).build(https);

    let authority = uri
        .authority()
        .ok_or_else(|| Error::DnsError(format!("doh url has no authority: {url}")))?
        .clone();

    let req = Request::builder()
        .uri(&uri)
        .header(header::HOST, authority.as_str())
        .header(
            header::ACCEPT,
            HeaderValue::from_static("application/dns-json"),
        )
        .body(Empty::<Bytes>::new())
        .map_err(|e| Error::DnsError(format!("request build failed: {e}")))?;

    let res = tokio::time::timeout(Duration::from_secs(10), client.request(req))
        .await
        .map_err(|_| Error::Timeout {
            stage: crate::error::Stage::Dns,
        })?
        .map_err(|e| Error::DnsError(format!("fetch failed (connection): {e}")))?;

    if !res.status().is_success() {
        return Err(Error::DnsError(format!(
            "doh endpoint returned status {}",
            res.status()
        )));
    }

    let limited = Limited::new(res.into_body(), DOH_BODY_LIMIT);
    let collected = BodyExt::collect(limited)
        .await
        .map_err(|e| Error::DnsError(format!("network read failed: {e}")))?;
    let bytes = collected.to_bytes();

    let parsed: DnsJsonResponse = serde_json::from_slice(&bytes)
        .map_err(|e| Error::DnsError(format!("dns-json parse failed: {e}")))?;

    let entry = parsed
        .answer
        .iter()
        .find(|a| a.rtype == 16)
        .ok_or_else(|| Error::DnsError(format!("no TXT answer for {name}")))?;

    parse_txt_data(&entry.data)
}

/// Strips the enclosing quotes DNS-JSON wraps TXT record data in and
/// unescapes `\"`, then JSON-parses the remainder into a bootstrap.
fn parse_txt_data(data: &str) -> Result<Bootstrap, Error> {
    let inner = data
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(data);
    let unescaped = inner.replace("\\\"", "\"");

    let payload: BootstrapPayload = serde_json::from_str(&unescaped)
        .map_err(|e| Error::DnsError(format!("txt payload malformed: {e}")))?;

    if payload.relays.is_empty() {
        return Err(Error::DnsError(
            "bootstrap record has no relays".to_string(),
        ));
    }

    let pubkey_bytes = parse_pubkey(&payload.pk)?;

    Ok(Bootstrap {
        pubkey_hex: hex::encode(pubkey_bytes),
        relays: payload.relays,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_escaped_txt_payload() {
        let pk = "3bf0c63fcb93463407af97a5e5ee64fa883d107ef9e558472c4eb9aaaefa459";
        let raw = format!(r#"{{\"pk\":\"{pk}\",\"relays\":[\"wss://r1\"]}}"#);
        let quoted = format!("\"{raw}\"");
        let bootstrap = parse_txt_data(&quoted).unwrap();
        assert_eq!(bootstrap.pubkey_hex, pk);
        assert_eq!(bootstrap.relays, vec!["wss://r1".to_string()]);
    }

    #[test]
    fn rejects_payload_with_no_relays() {
        let pk = "3bf0c63fcb93463407af97a5e5ee64fa883d107ef9e558472c4eb9aaaefa459";
        let raw = format!(r#"{{"pk":"{pk}","relays":[]}}"#);
        assert!(parse_txt_data(&raw).is_err());
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(parse_txt_data("not json").is_err());
    }

    #[test]
    fn timeout_is_transient() {
        assert!(is_transient(&Error::Timeout {
            stage: crate::error::Stage::Dns,
        }));
    }

    #[test]
    fn fetch_and_network_failures_are_transient() {
        assert!(is_transient(&Error::DnsError(
            "fetch failed (connection): broken pipe".to_string()
        )));
        assert!(is_transient(&Error::DnsError(
            "network read failed: reset".to_string()
        )));
    }

    #[test]
    fn malformed_payload_and_bad_key_are_not_transient() {
        assert!(!is_transient(&Error::DnsError(
            "dns-json parse failed: expected value".to_string()
        )));
        assert!(!is_transient(&Error::DnsError(
            "txt payload malformed: missing field".to_string()
        )));
        assert!(!is_transient(&Error::BadKey("bad npub".to_string())));
    }

    #[tokio::test]
    async fn resolve_with_retries_fails_fast_on_permanent_error() {
        let mut config = Config::default();
        config.doh_endpoints = vec![];
        config.max_retries = 5;
        config.retry_base = Duration::from_secs(5);

        let start = tokio::time::Instant::now();
        let err = resolve_with_retries("example.test", &config).await.unwrap_err();
        assert!(matches!(err, Error::DnsError(_)));
        // a permanent failure ("no doh endpoints configured") must not
        // pay any backoff sleep, even though max_retries allows 5 more
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn resolve_denies_once_per_host_limit_is_exhausted() {
        let mut config = Config::default();
        config.dns_per_host = 1;
        config.doh_endpoints = vec![];
        let mut client = DohClient::new(&config);

        // first call exhausts the per-host window and fails on the
        // (empty) endpoint list, with nothing cached to fall back to
        assert!(matches!(
            client.resolve("example.test", &config).await,
            Err(Error::DnsError(_))
        ));
        // second call within the same window is denied before any
        // upstream attempt, not a DNS_ERROR
        assert!(matches!(
            client.resolve("example.test", &config).await,
            Err(Error::RateLimited { .. })
        ));
    }
}
