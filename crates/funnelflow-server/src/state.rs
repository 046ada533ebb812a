use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, RwLock};
use tracing::error;

use funnelflow_core::{config::Config, FunnelBackend};
use funnelflow_duckdb::DuckDbBackend;
use funnelflow_metadata::MetadataStore;

/// Shared application state injected into every Axum handler via
/// [`axum::extract::State`].
///
/// All fields are safe to clone cheaply — heavy resources are wrapped in
/// `Arc` or `Arc<Mutex<_>>`.
pub struct AppState {
    /// The DuckDB backend. Internally uses `Arc<tokio::sync::Mutex<Connection>>`
    /// so it is already cheap to clone and async-safe.
    pub db: Arc<DuckDbBackend>,

    /// Funnel definitions, gating state and results, behind the storage trait.
    pub funnels: Arc<dyn FunnelBackend>,

    /// Website registry and settings, behind the metadata trait.
    pub metadata: Arc<dyn MetadataStore>,

    /// Parsed configuration, loaded once at startup from environment variables.
    pub config: Arc<Config>,

    /// Fast in-process cache of known-valid `website_id` values.
    ///
    /// Populated lazily: the first tracking request for a site triggers a DB
    /// lookup; subsequent requests hit the cache. Deleting a website evicts
    /// its entry.
    pub website_cache: Arc<RwLock<HashSet<String>>>,

    /// Per-client sliding-window rate limiter for the tracking endpoints.
    ///
    /// Key: client IP (or session fallback). Value: deque of request
    /// timestamps within the last 60 seconds. Limit: 60 requests per key
    /// per 60-second window.
    rate_limiter: Arc<Mutex<HashMap<String, VecDeque<Instant>>>>,
}

impl AppState {
    /// Construct a new `AppState` wrapping the given backend and config.
    pub fn new(db: DuckDbBackend, config: Config) -> Self {
        let db = Arc::new(db);
        Self {
            funnels: Arc::clone(&db) as Arc<dyn FunnelBackend>,
            metadata: Arc::clone(&db) as Arc<dyn MetadataStore>,
            db,
            config: Arc::new(config),
            website_cache: Arc::new(RwLock::new(HashSet::new())),
            rate_limiter: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Check whether `key` is within the 60 req/min rate limit.
    ///
    /// Returns `true` if the request should proceed, `false` if it should be
    /// rejected with 429. Slides the window on every call.
    pub async fn check_rate_limit(&self, key: &str) -> bool {
        let mut map = self.rate_limiter.lock().await;
        let window = map.entry(key.to_string()).or_default();
        let cutoff = Instant::now() - std::time::Duration::from_secs(60);
        // Drop timestamps older than the 60-second window.
        while window.front().is_some_and(|t| *t < cutoff) {
            window.pop_front();
        }
        if window.len() >= 60 {
            return false; // limit reached
        }
        window.push_back(Instant::now());
        true
    }

    /// Return `true` if the `website_id` is known to exist.
    ///
    /// Checks the in-process cache first; on a cache miss falls back to a
    /// DuckDB query and populates the cache on success.
    pub async fn is_valid_website(&self, website_id: &str) -> bool {
        // Fast path: cache hit.
        {
            let cache = self.website_cache.read().await;
            if cache.contains(website_id) {
                return true;
            }
        }

        // Slow path: DB lookup.
        match self.metadata.website_exists(website_id).await {
            Ok(true) => {
                let mut cache = self.website_cache.write().await;
                cache.insert(website_id.to_string());
                true
            }
            Ok(false) => false,
            Err(e) => {
                error!(website_id, error = %e, "website_exists DB lookup failed");
                false
            }
        }
    }
}
