use std::time::Duration;

/// Every tunable enumerated in the external interfaces section,
/// collected into one immutable struct passed by reference to each
/// component at construction. No globals.
#[derive(Debug, Clone)]
pub struct Config {
    pub ttl_immutable: Duration,
    pub ttl_site_index: Duration,
    pub ttl_entrypoint: Duration,
    pub ttl_dns_fallback: Duration,
    /// TTL of the persistent offline bundle layer (§3 Lifecycles: 24h,
    /// same figure as `ttl_dns_fallback` but a logically distinct knob).
    pub ttl_offline_bundle: Duration,

    pub cache_max_events: usize,
    pub dns_cache_max: usize,
    pub prefetch_max: usize,

    pub ws_reconnect: Duration,
    pub ws_eose_grace: Duration,
    pub ws_query_deadline: Duration,

    pub sri_deadline: Duration,
    pub rpc_deadline: Duration,

    pub max_retries: u32,
    pub retry_base: Duration,
    pub retry_backoff: u32,

    pub max_relays: usize,
    pub max_content_size: usize,

    pub dns_per_host: u32,
    pub dns_global: u32,

    pub idle_relay_close: Duration,

    /// Not in the enumerated list directly, but named by the design
    /// notes: how long a failed navigation-time resolve is remembered
    /// so the navigation interceptor doesn't retry it on every load.
    pub failure_memory: Duration,

    pub doh_endpoints: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ttl_immutable: Duration::from_secs(7 * 24 * 60 * 60),
            ttl_site_index: Duration::from_secs(30),
            ttl_entrypoint: Duration::from_secs(0),
            ttl_dns_fallback: Duration::from_secs(24 * 60 * 60),
            ttl_offline_bundle: Duration::from_secs(24 * 60 * 60),

            cache_max_events: 500,
            dns_cache_max: 100,
            prefetch_max: 50,

            ws_reconnect: Duration::from_millis(1500),
            ws_eose_grace: Duration::from_millis(200),
            ws_query_deadline: Duration::from_secs(6),

            sri_deadline: Duration::from_secs(10),
            rpc_deadline: Duration::from_secs(30),

            max_retries: 2,
            retry_base: Duration::from_secs(1),
            retry_backoff: 2,

            max_relays: 10,
            max_content_size: 5 * 1024 * 1024,

            dns_per_host: 10,
            dns_global: 50,

            idle_relay_close: Duration::from_secs(5 * 60),

            failure_memory: Duration::from_secs(60),

            doh_endpoints: vec![
                "https://cloudflare-dns.com/dns-query".to_string(),
                "https://dns.google/resolve".to_string(),
            ],
        }
    }
}
