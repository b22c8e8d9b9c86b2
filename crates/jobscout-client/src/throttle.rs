//! Per-domain request throttling for polite scraping.
//!
//! Wraps any [`PageFetcher`] with a minimum per-domain delay plus random
//! jitter, so a batch of organizations hosted on the same careers site
//! doesn't get hammered. Different domains are never delayed against
//! each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jobscout_core::error::AppError;
use jobscout_core::traits::{FetchedPage, PageFetcher};
use tokio::sync::Mutex;
use url::Url;

/// Configuration for the throttled fetcher.
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// Minimum delay between consecutive requests to the same domain.
    pub delay: Duration,

    /// Maximum random jitter added on top of `delay` (uniform [0, jitter]).
    ///
    /// Set to `Duration::ZERO` to disable.
    pub jitter: Duration,
}

impl ThrottleConfig {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            jitter: Duration::ZERO,
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Effective delay for a single wait (delay + random jitter).
    fn effective_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.delay;
        }
        let jitter_ms = rand_jitter_ms(self.jitter.as_millis() as u64);
        self.delay + Duration::from_millis(jitter_ms)
    }
}

impl Default for ThrottleConfig {
    /// 1 second delay, 500ms jitter.
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            jitter: Duration::from_millis(500),
        }
    }
}

/// A [`PageFetcher`] wrapper that enforces per-domain throttling.
///
/// Tracks the last request time for each domain (scheme + host + port)
/// and sleeps before making a new request if the minimum delay hasn't
/// elapsed. Thread-safe: concurrent fetches serialize per domain.
#[derive(Clone)]
pub struct ThrottledPageFetcher<F> {
    inner: F,
    config: ThrottleConfig,
    /// Last request time per domain key.
    last_request: Arc<Mutex<HashMap<String, Instant>>>,
}

impl<F: PageFetcher> ThrottledPageFetcher<F> {
    pub fn new(inner: F, config: ThrottleConfig) -> Self {
        Self {
            inner,
            config,
            last_request: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Extract the domain key from a URL (scheme://host:port).
    fn domain_key(url_str: &str) -> Option<String> {
        let url = Url::parse(url_str).ok()?;
        let host = url.host_str()?;
        let port = url
            .port_or_known_default()
            .map(|p| format!(":{p}"))
            .unwrap_or_default();
        Some(format!("{}://{}{}", url.scheme(), host, port))
    }

    /// Wait until the per-domain delay has elapsed, then record the
    /// current time as the last request for this domain.
    async fn wait_for_domain(&self, domain: &str) {
        let mut map = self.last_request.lock().await;

        if let Some(&last) = map.get(domain) {
            let elapsed = last.elapsed();
            let required = self.config.effective_delay();
            if elapsed < required {
                let sleep_duration = required - elapsed;
                // Drop the lock while sleeping so other domains aren't blocked.
                drop(map);
                tracing::debug!(
                    domain = %domain,
                    sleep_ms = %sleep_duration.as_millis(),
                    "Throttling request"
                );
                tokio::time::sleep(sleep_duration).await;
                let mut map = self.last_request.lock().await;
                map.insert(domain.to_string(), Instant::now());
            } else {
                map.insert(domain.to_string(), Instant::now());
            }
        } else {
            map.insert(domain.to_string(), Instant::now());
        }
    }
}

impl<F: PageFetcher> PageFetcher for ThrottledPageFetcher<F> {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, AppError> {
        if let Some(domain) = Self::domain_key(url) {
            self.wait_for_domain(&domain).await;
        }
        self.inner.fetch(url).await
    }
}

// ---------------------------------------------------------------------------
// Deterministic jitter based on std — avoids pulling in the `rand` crate.
// Uses a simple xorshift seeded from the current time.
// ---------------------------------------------------------------------------

fn rand_jitter_ms(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }
    let mut x = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    // xorshift64
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    x % max_ms
}
