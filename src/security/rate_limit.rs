//! Per-client rate limiting.
//!
//! Every client identity gets its own token bucket. Buckets are created on
//! first sight and evicted by a periodic sweep once the client has been idle
//! longer than the eviction threshold.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::RateLimitConfig;
use crate::http::error::ApiError;
use crate::observability::metrics;
use crate::security::identity::client_identity;

/// A token bucket holding at most `capacity` tokens, refilled continuously.
#[derive(Debug, Clone)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_update: Instant,
}

impl TokenBucket {
    /// A full bucket.
    fn new(capacity: f64, refill_rate: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            capacity,
            refill_rate,
            last_update: now,
        }
    }

    fn try_acquire(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();

        // Refill tokens, saturating at capacity
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_update = self.last_update.max(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
struct ClientEntry {
    bucket: TokenBucket,
    last_seen: Instant,
}

impl ClientEntry {
    fn check(&mut self, now: Instant) -> bool {
        self.last_seen = self.last_seen.max(now);
        self.bucket.try_acquire(now)
    }
}

/// Runtime limiter settings, derived from [`RateLimitConfig`].
#[derive(Debug, Clone)]
pub struct LimiterSettings {
    pub enabled: bool,
    pub requests_per_second: f64,
    pub burst: u32,
    pub idle_threshold: Duration,
    pub sweep_interval: Duration,
    pub trust_forwarded_headers: bool,
}

impl From<&RateLimitConfig> for LimiterSettings {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            requests_per_second: config.requests_per_second,
            burst: config.burst_size,
            idle_threshold: config.idle_eviction(),
            sweep_interval: config.sweep_interval(),
            trust_forwarded_headers: config.trust_forwarded_headers,
        }
    }
}

/// Owns every client's limiter state.
///
/// A single mutex guards the identity map; it is held only for the lookup
/// and the bucket update, never across I/O.
#[derive(Debug)]
pub struct ClientLimiterRegistry {
    clients: Mutex<HashMap<String, ClientEntry>>,
    settings: LimiterSettings,
}

impl ClientLimiterRegistry {
    pub fn new(settings: LimiterSettings) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            settings,
        }
    }

    pub fn settings(&self) -> &LimiterSettings {
        &self.settings
    }

    pub fn enabled(&self) -> bool {
        self.settings.enabled
    }

    /// Whether a request from `identity` may proceed now.
    pub fn admit(&self, identity: &str) -> bool {
        self.admit_at(identity, Instant::now())
    }

    /// [`admit`](Self::admit) against an explicit clock reading.
    pub fn admit_at(&self, identity: &str, now: Instant) -> bool {
        if !self.settings.enabled {
            return true;
        }

        let mut clients = self.lock();
        match clients.get_mut(identity) {
            Some(entry) => entry.check(now),
            None => {
                let mut entry = ClientEntry {
                    bucket: TokenBucket::new(
                        f64::from(self.settings.burst),
                        self.settings.requests_per_second,
                        now,
                    ),
                    last_seen: now,
                };
                let admitted = entry.check(now);
                clients.insert(identity.to_owned(), entry);
                metrics::record_tracked_clients(clients.len());
                admitted
            }
        }
    }

    /// Evict clients idle longer than the threshold. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let idle_threshold = self.settings.idle_threshold;
        let mut clients = self.lock();
        let before = clients.len();
        clients.retain(|_, entry| now.saturating_duration_since(entry.last_seen) <= idle_threshold);
        let evicted = before - clients.len();

        metrics::record_tracked_clients(clients.len());
        if evicted > 0 {
            metrics::record_clients_evicted(evicted);
        }
        evicted
    }

    /// Number of identities currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.lock().len()
    }

    /// Run [`sweep`](Self::sweep) every sweep interval until `shutdown` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let period = registry.settings.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = registry.sweep();
                        tracing::debug!(
                            evicted,
                            remaining = registry.tracked_clients(),
                            "Swept idle rate limit clients"
                        );
                    }
                    _ = shutdown.recv() => {
                        tracing::debug!("Rate limit sweeper received shutdown signal");
                        break;
                    }
                }
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ClientEntry>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Admission middleware: throttle per client before the handler chain runs.
pub async fn rate_limit_middleware(
    State(registry): State<Arc<ClientLimiterRegistry>>,
    request: Request,
    next: Next,
) -> Response {
    if !registry.enabled() {
        return next.run(request).await;
    }

    let identity = match client_identity(&request, registry.settings().trust_forwarded_headers) {
        Ok(identity) => identity,
        Err(e) => {
            tracing::error!(
                error = %e,
                method = %request.method(),
                uri = %request.uri(),
                "Could not resolve client identity"
            );
            metrics::record_identity_fault();
            return ApiError::ServerFault.into_response();
        }
    };

    if registry.admit(&identity) {
        next.run(request).await
    } else {
        tracing::debug!(client = %identity, "Rate limit exceeded");
        metrics::record_rate_limited();
        ApiError::RateLimited.into_response()
    }
}
