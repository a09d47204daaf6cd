use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{OnceLock, RwLock};
use std::time::Duration;

use crate::lock_utils::{read_recover, write_recover};

static RUNTIME_CONFIG_LOADED: OnceLock<()> = OnceLock::new();
static BACKENDS: OnceLock<RwLock<Vec<String>>> = OnceLock::new();
static DNS_ROOT: OnceLock<RwLock<String>> = OnceLock::new();
static CACHE_PROXY: OnceLock<RwLock<Option<String>>> = OnceLock::new();
static CACHE_STATUS_HEADER: OnceLock<RwLock<String>> = OnceLock::new();
static COUNTRY_HEADER: OnceLock<RwLock<String>> = OnceLock::new();
static CACHE_TTL_SECS: AtomicU64 = AtomicU64::new(DEFAULT_CACHE_TTL_SECS);
static RACE_WIDTH: AtomicUsize = AtomicUsize::new(DEFAULT_RACE_WIDTH);
static ATTEMPT_TIMEOUT_MS: AtomicU64 = AtomicU64::new(DEFAULT_ATTEMPT_TIMEOUT_MS);
static UPSTREAM_CONNECT_TIMEOUT_SECS: AtomicU64 =
    AtomicU64::new(DEFAULT_UPSTREAM_CONNECT_TIMEOUT_SECS);
static UPSTREAM_READ_TIMEOUT_SECS: AtomicU64 = AtomicU64::new(DEFAULT_UPSTREAM_READ_TIMEOUT_SECS);

pub(crate) const DEFAULT_BACKENDS: &str = "https://agg.walrus.eosusa.io";
pub(crate) const DEFAULT_CACHE_TTL_SECS: u64 = 86_400;
pub(crate) const DEFAULT_DNS_ROOT: &str = ".walcdn.io";
pub(crate) const DEFAULT_RACE_WIDTH: usize = 1;
pub(crate) const DEFAULT_CACHE_STATUS_HEADER: &str = "cf-cache-status";
pub(crate) const DEFAULT_COUNTRY_HEADER: &str = "cf-ipcountry";
const DEFAULT_ATTEMPT_TIMEOUT_MS: u64 = 0;
const DEFAULT_UPSTREAM_CONNECT_TIMEOUT_SECS: u64 = 15;
const DEFAULT_UPSTREAM_READ_TIMEOUT_SECS: u64 = 60;

const ENV_BACKENDS: &str = "RETRIEVER_BACKENDS";
const ENV_CACHE_TTL: &str = "RETRIEVER_CACHE_TTL";
const ENV_DNS_ROOT: &str = "RETRIEVER_DNS_ROOT";
const ENV_RACE_WIDTH: &str = "RETRIEVER_RACE_WIDTH";
const ENV_ATTEMPT_TIMEOUT_MS: &str = "RETRIEVER_ATTEMPT_TIMEOUT_MS";
const ENV_UPSTREAM_CONNECT_TIMEOUT_SECS: &str = "RETRIEVER_UPSTREAM_CONNECT_TIMEOUT_SECS";
const ENV_UPSTREAM_READ_TIMEOUT_SECS: &str = "RETRIEVER_UPSTREAM_READ_TIMEOUT_SECS";
const ENV_CACHE_PROXY: &str = "RETRIEVER_CACHE_PROXY";
const ENV_CACHE_STATUS_HEADER: &str = "RETRIEVER_CACHE_STATUS_HEADER";
const ENV_COUNTRY_HEADER: &str = "RETRIEVER_COUNTRY_HEADER";

/// Per-request view of the retrieval settings.
///
/// Handlers hold a snapshot so a concurrent `reload_from_env` never changes the
/// candidate list in the middle of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrieverConfig {
    pub backends: Vec<String>,
    pub cache_ttl_secs: u64,
    pub dns_root: String,
    pub race_width: usize,
    pub attempt_timeout: Option<Duration>,
    /// Empty disables cache observation (`cache_miss` stays null).
    pub cache_status_header: String,
    pub country_header: String,
}

impl RetrieverConfig {
    pub fn new(backends: Vec<String>) -> Self {
        Self {
            backends,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            dns_root: DEFAULT_DNS_ROOT.to_string(),
            race_width: DEFAULT_RACE_WIDTH,
            attempt_timeout: None,
            cache_status_header: DEFAULT_CACHE_STATUS_HEADER.to_string(),
            country_header: DEFAULT_COUNTRY_HEADER.to_string(),
        }
    }
}

pub(crate) fn current_config() -> RetrieverConfig {
    ensure_runtime_config_loaded();
    RetrieverConfig {
        backends: read_recover(backends_cell(), "runtime_backends").clone(),
        cache_ttl_secs: CACHE_TTL_SECS.load(Ordering::Relaxed),
        dns_root: read_recover(dns_root_cell(), "runtime_dns_root").clone(),
        race_width: RACE_WIDTH.load(Ordering::Relaxed),
        attempt_timeout: attempt_timeout(),
        cache_status_header: read_recover(cache_status_header_cell(), "runtime_cache_status_header")
            .clone(),
        country_header: read_recover(country_header_cell(), "runtime_country_header").clone(),
    }
}

fn attempt_timeout() -> Option<Duration> {
    let timeout_ms = ATTEMPT_TIMEOUT_MS.load(Ordering::Relaxed);
    if timeout_ms == 0 {
        None
    } else {
        Some(Duration::from_millis(timeout_ms))
    }
}

pub(crate) fn upstream_connect_timeout() -> Duration {
    ensure_runtime_config_loaded();
    Duration::from_secs(UPSTREAM_CONNECT_TIMEOUT_SECS.load(Ordering::Relaxed))
}

/// Longest silence tolerated between two reads of a backend response; `None`
/// when set to 0.
pub(crate) fn upstream_read_timeout() -> Option<Duration> {
    ensure_runtime_config_loaded();
    match UPSTREAM_READ_TIMEOUT_SECS.load(Ordering::Relaxed) {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    }
}

pub(crate) fn cache_proxy() -> Option<String> {
    ensure_runtime_config_loaded();
    read_recover(cache_proxy_cell(), "runtime_cache_proxy").clone()
}

/// Splits on commas and whitespace, drops anything that is not an http(s) URL,
/// trims trailing slashes and removes case-insensitive duplicates.
pub(crate) fn parse_backend_list(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in raw.split(|ch: char| ch == ',' || ch.is_whitespace()) {
        let item = item.trim().trim_end_matches('/');
        if item.is_empty() {
            continue;
        }
        let valid = url::Url::parse(item)
            .map(|parsed| matches!(parsed.scheme(), "http" | "https") && parsed.host().is_some())
            .unwrap_or(false);
        if !valid {
            log::warn!("event=backend_rejected backend={} reason=invalid_url", item);
            continue;
        }
        if out.iter().any(|existing| existing.eq_ignore_ascii_case(item)) {
            continue;
        }
        out.push(item.to_string());
    }
    out
}

fn normalize_dns_root(raw: &str) -> String {
    let trimmed = raw.trim().to_ascii_lowercase();
    if trimmed.starts_with('.') {
        trimmed
    } else {
        format!(".{trimmed}")
    }
}

pub(super) fn reload_from_env() {
    let backends = parse_backend_list(
        &env_non_empty(ENV_BACKENDS).unwrap_or_else(|| DEFAULT_BACKENDS.to_string()),
    );
    *write_recover(backends_cell(), "runtime_backends") = backends;

    CACHE_TTL_SECS.store(
        env_u64_or(ENV_CACHE_TTL, DEFAULT_CACHE_TTL_SECS),
        Ordering::Relaxed,
    );
    RACE_WIDTH.store(
        env_usize_or(ENV_RACE_WIDTH, DEFAULT_RACE_WIDTH).max(1),
        Ordering::Relaxed,
    );
    ATTEMPT_TIMEOUT_MS.store(
        env_u64_or(ENV_ATTEMPT_TIMEOUT_MS, DEFAULT_ATTEMPT_TIMEOUT_MS),
        Ordering::Relaxed,
    );
    UPSTREAM_CONNECT_TIMEOUT_SECS.store(
        env_u64_or(
            ENV_UPSTREAM_CONNECT_TIMEOUT_SECS,
            DEFAULT_UPSTREAM_CONNECT_TIMEOUT_SECS,
        ),
        Ordering::Relaxed,
    );
    UPSTREAM_READ_TIMEOUT_SECS.store(
        env_u64_or(
            ENV_UPSTREAM_READ_TIMEOUT_SECS,
            DEFAULT_UPSTREAM_READ_TIMEOUT_SECS,
        ),
        Ordering::Relaxed,
    );

    let dns_root = env_non_empty(ENV_DNS_ROOT)
        .map(|value| normalize_dns_root(&value))
        .unwrap_or_else(|| DEFAULT_DNS_ROOT.to_string());
    *write_recover(dns_root_cell(), "runtime_dns_root") = dns_root;

    *write_recover(cache_proxy_cell(), "runtime_cache_proxy") = env_non_empty(ENV_CACHE_PROXY);

    // 中文注释：显式设置为空字符串表示关闭缓存命中观测，因此这里不能用 env_non_empty。
    let cache_status_header = std::env::var(ENV_CACHE_STATUS_HEADER)
        .map(|value| value.trim().to_ascii_lowercase())
        .unwrap_or_else(|_| DEFAULT_CACHE_STATUS_HEADER.to_string());
    *write_recover(cache_status_header_cell(), "runtime_cache_status_header") = cache_status_header;

    let country_header = env_non_empty(ENV_COUNTRY_HEADER)
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_else(|| DEFAULT_COUNTRY_HEADER.to_string());
    *write_recover(country_header_cell(), "runtime_country_header") = country_header;
}

fn ensure_runtime_config_loaded() {
    let _ = RUNTIME_CONFIG_LOADED.get_or_init(reload_from_env);
}

fn backends_cell() -> &'static RwLock<Vec<String>> {
    BACKENDS.get_or_init(|| RwLock::new(parse_backend_list(DEFAULT_BACKENDS)))
}

fn dns_root_cell() -> &'static RwLock<String> {
    DNS_ROOT.get_or_init(|| RwLock::new(DEFAULT_DNS_ROOT.to_string()))
}

fn cache_proxy_cell() -> &'static RwLock<Option<String>> {
    CACHE_PROXY.get_or_init(|| RwLock::new(None))
}

fn cache_status_header_cell() -> &'static RwLock<String> {
    CACHE_STATUS_HEADER.get_or_init(|| RwLock::new(DEFAULT_CACHE_STATUS_HEADER.to_string()))
}

fn country_header_cell() -> &'static RwLock<String> {
    COUNTRY_HEADER.get_or_init(|| RwLock::new(DEFAULT_COUNTRY_HEADER.to_string()))
}

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_u64_or(name: &str, default: u64) -> u64 {
    env_non_empty(name)
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize_or(name: &str, default: usize) -> usize {
    env_non_empty(name)
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}
