mod cache;
pub mod provider;

pub use provider::{ChatMessage, GenericProvider, LlmProvider, ProviderError};

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};
use tracing::{info, warn};

use crate::core::config::GatewayConfig;
use crate::core::lifecycle::LifecycleComponent;
use cache::ResponseCache;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("generation service unavailable")]
    Unavailable,
    #[error("generation service rate limited, backing off")]
    RateLimited,
    #[error("invalid generation request: {0}")]
    Invalid(String),
}

impl From<ProviderError> for GatewayError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Unavailable(_) => GatewayError::Unavailable,
            ProviderError::RateLimited => GatewayError::RateLimited,
            ProviderError::Invalid(msg) => GatewayError::Invalid(msg),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub template_id: String,
    pub messages: Vec<ChatMessage>,
}

/// Pacing and health state. One lock for the whole pair, per the rule that
/// the last-call timestamp and degraded flag are process-wide.
struct Shared {
    last_call_at: Option<Instant>,
    degraded: bool,
    cooldown_until: Option<Instant>,
    consecutive_rate_limits: u32,
}

const COOLDOWN_BASE: Duration = Duration::from_secs(1);
const COOLDOWN_CAP: Duration = Duration::from_secs(60);

/// Sole choke point to the external generation service: enforces the
/// inter-call spacing floor across all callers, caches responses, and holds
/// the degraded flag cleared by health probes.
pub struct GenerationGateway {
    provider: Arc<dyn LlmProvider>,
    model: String,
    config: GatewayConfig,
    shared: Mutex<Shared>,
    // Tokio clock, not the wall clock, so idle time follows the runtime's
    // notion of time in tests.
    last_activity: Mutex<tokio::time::Instant>,
    cache: ResponseCache,
    inflight: Mutex<HashMap<String, Arc<OnceCell<String>>>>,
}

impl GenerationGateway {
    pub fn new(provider: Arc<dyn LlmProvider>, model: String, config: GatewayConfig) -> Arc<Self> {
        let cache = ResponseCache::new(config.cache_ttl(), config.cache_max_entries);
        Arc::new(Self {
            provider,
            model,
            config,
            shared: Mutex::new(Shared {
                last_call_at: None,
                degraded: false,
                cooldown_until: None,
                consecutive_rate_limits: 0,
            }),
            last_activity: Mutex::new(tokio::time::Instant::now()),
            cache,
            inflight: Mutex::new(HashMap::new()),
        })
    }

    /// Called by the router for every user-initiated event. Keeps the idle
    /// health check from burning quota during active use.
    pub async fn touch_activity(&self) {
        *self.last_activity.lock().await = tokio::time::Instant::now();
    }

    pub async fn is_degraded(&self) -> bool {
        self.shared.lock().await.degraded
    }

    pub async fn generate(&self, req: GenerateRequest) -> Result<String, GatewayError> {
        let key = cache::cache_key(&self.model, &req.template_id, &req.messages);
        if let Some(hit) = self.cache.get(&key) {
            return Ok(hit);
        }

        // Single-flight: concurrent misses for one key share the first call.
        let cell = {
            let mut inflight = self.inflight.lock().await;
            inflight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };
        let result = cell
            .get_or_try_init(|| self.generate_uncached(&key, &req))
            .await
            .map(|text| text.clone());
        self.inflight.lock().await.remove(&key);
        result
    }

    async fn generate_uncached(&self, key: &str, req: &GenerateRequest) -> Result<String, GatewayError> {
        self.ensure_healthy().await?;
        self.reserve_call_slot().await?;

        match self.provider.generate(&self.model, &req.messages).await {
            Ok(text) => {
                self.shared.lock().await.consecutive_rate_limits = 0;
                self.cache.insert(key.to_string(), text.clone());
                Ok(text)
            }
            Err(ProviderError::RateLimited) => {
                let mut shared = self.shared.lock().await;
                shared.consecutive_rate_limits += 1;
                let cooldown = COOLDOWN_BASE
                    .saturating_mul(1u32 << shared.consecutive_rate_limits.min(6))
                    .min(COOLDOWN_CAP);
                shared.cooldown_until = Some(Instant::now() + cooldown);
                warn!("Provider rate limited; cooling down for {:?}", cooldown);
                Err(GatewayError::RateLimited)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// While degraded, issue exactly one probe before giving up on a request.
    /// A success clears the flag and lets the call proceed; a failure keeps
    /// failing fast without touching the real generation path.
    async fn ensure_healthy(&self) -> Result<(), GatewayError> {
        if !self.shared.lock().await.degraded {
            return Ok(());
        }
        match self.provider.probe(&self.model).await {
            Ok(()) => {
                let mut shared = self.shared.lock().await;
                shared.degraded = false;
                shared.last_call_at = Some(Instant::now());
                info!("Gateway health restored");
                Ok(())
            }
            Err(_) => Err(GatewayError::Unavailable),
        }
    }

    /// Enforces the pacing floor. The lock is held across the sleep so two
    /// callers can never stamp call slots closer than the configured spacing;
    /// an early arrival sleeps only its remaining delta.
    async fn reserve_call_slot(&self) -> Result<(), GatewayError> {
        let mut shared = self.shared.lock().await;
        if let Some(until) = shared.cooldown_until {
            if until > Instant::now() {
                return Err(GatewayError::RateLimited);
            }
            shared.cooldown_until = None;
        }
        if let Some(last) = shared.last_call_at {
            let elapsed = last.elapsed();
            let pacing = self.config.pacing();
            if elapsed < pacing {
                tokio::time::sleep(pacing - elapsed).await;
            }
        }
        shared.last_call_at = Some(Instant::now());
        Ok(())
    }

    /// One probe round-trip, updating the degraded flag either way. Returns
    /// true when the service is reachable.
    pub async fn probe_now(&self) -> bool {
        match self.provider.probe(&self.model).await {
            Ok(()) => {
                let mut shared = self.shared.lock().await;
                if shared.degraded {
                    info!("Gateway health probe succeeded; leaving degraded mode");
                }
                shared.degraded = false;
                shared.last_call_at = Some(Instant::now());
                true
            }
            Err(e) => {
                let mut shared = self.shared.lock().await;
                if !shared.degraded {
                    warn!("Gateway health probe failed, entering degraded mode: {}", e);
                }
                shared.degraded = true;
                false
            }
        }
    }

    /// Timer-driven health check. Probes only when the system has been idle
    /// beyond the threshold, or on every tick while degraded so the flag
    /// clears itself once the service recovers.
    pub fn spawn_probe_loop(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let gateway = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(gateway.config.probe_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let degraded = gateway.shared.lock().await.degraded;
                let idle_for = gateway.last_activity.lock().await.elapsed();
                if !degraded && idle_for < gateway.config.idle_threshold() {
                    continue;
                }
                gateway.probe_now().await;
            }
        })
    }

    #[cfg(test)]
    pub async fn set_degraded(&self, degraded: bool) {
        self.shared.lock().await.degraded = degraded;
    }
}

#[async_trait]
impl LifecycleComponent for Arc<GenerationGateway> {
    async fn on_start(&mut self) -> Result<()> {
        self.spawn_probe_loop();
        info!("Generation Gateway online (model: {})", self.model);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct MockProvider {
        calls: std::sync::Mutex<Vec<Instant>>,
        probes: AtomicUsize,
        healthy: AtomicBool,
        rate_limited: AtomicBool,
    }

    impl MockProvider {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: std::sync::Mutex::new(Vec::new()),
                probes: AtomicUsize::new(0),
                healthy: AtomicBool::new(true),
                rate_limited: AtomicBool::new(false),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LlmProvider for MockProvider {
        async fn generate(
            &self,
            _model_id: &str,
            messages: &[ChatMessage],
        ) -> Result<String, ProviderError> {
            if self.rate_limited.load(Ordering::SeqCst) {
                return Err(ProviderError::RateLimited);
            }
            self.calls.lock().unwrap().push(Instant::now());
            Ok(format!("echo: {}", messages.last().unwrap().content))
        }

        async fn probe(&self, _model_id: &str) -> Result<(), ProviderError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(ProviderError::Unavailable("probe failed".to_string()))
            }
        }
    }

    fn test_config(pacing_ms: u64, ttl_secs: u64) -> GatewayConfig {
        GatewayConfig {
            pacing_ms,
            cache_ttl_secs: ttl_secs,
            cache_max_entries: 64,
            idle_threshold_secs: 1800,
            probe_interval_secs: 60,
        }
    }

    fn request(text: &str) -> GenerateRequest {
        GenerateRequest {
            template_id: "system/chat".to_string(),
            messages: vec![ChatMessage::new("user", text)],
        }
    }

    #[tokio::test]
    async fn back_to_back_calls_respect_pacing_floor_across_callers() {
        let provider = MockProvider::new();
        let gateway =
            GenerationGateway::new(provider.clone(), "m".to_string(), test_config(40, 300));

        let mut handles = Vec::new();
        for i in 0..3 {
            let gateway = gateway.clone();
            handles.push(tokio::spawn(async move {
                gateway.generate(request(&format!("q{}", i))).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let calls = provider.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        for pair in calls.windows(2) {
            let gap = pair[1].duration_since(pair[0]);
            assert!(gap >= Duration::from_millis(38), "gap was {:?}", gap);
        }
    }

    #[tokio::test]
    async fn identical_request_is_served_from_cache() {
        let provider = MockProvider::new();
        let gateway = GenerationGateway::new(provider.clone(), "m".to_string(), test_config(1, 300));

        let first = gateway.generate(request("hello")).await.unwrap();
        let second = gateway.generate(request("hello")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn expired_entry_triggers_exactly_one_new_call() {
        let provider = MockProvider::new();
        let mut config = test_config(1, 300);
        config.cache_ttl_secs = 0; // entries expire immediately
        let gateway = GenerationGateway::new(provider.clone(), "m".to_string(), config);

        gateway.generate(request("hello")).await.unwrap();
        gateway.generate(request("hello")).await.unwrap();
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn degraded_gateway_fails_fast_after_one_failed_probe() {
        let provider = MockProvider::new();
        provider.healthy.store(false, Ordering::SeqCst);
        let gateway = GenerationGateway::new(provider.clone(), "m".to_string(), test_config(1, 300));
        gateway.set_degraded(true).await;

        let err = gateway.generate(request("hello")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable));
        assert_eq!(provider.probes.load(Ordering::SeqCst), 1);
        assert_eq!(provider.call_count(), 0, "real call must not be attempted");
    }

    #[tokio::test]
    async fn degraded_gateway_recovers_through_probe_then_serves() {
        let provider = MockProvider::new();
        let gateway = GenerationGateway::new(provider.clone(), "m".to_string(), test_config(1, 300));
        gateway.set_degraded(true).await;

        let text = gateway.generate(request("hello")).await.unwrap();
        assert_eq!(text, "echo: hello");
        assert_eq!(provider.probes.load(Ordering::SeqCst), 1);
        assert!(!gateway.is_degraded().await);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_loop_waits_for_idle_and_ticks_while_degraded() {
        let provider = MockProvider::new();
        let gateway =
            GenerationGateway::new(provider.clone(), "m".to_string(), test_config(1, 300));
        let probe_loop = gateway.spawn_probe_loop();

        // Recently active and healthy: ticks come and go without probing.
        gateway.touch_activity().await;
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(provider.probes.load(Ordering::SeqCst), 0);

        // Past the idle threshold the ticks start probing.
        tokio::time::sleep(Duration::from_secs(1300)).await;
        let after_idle = provider.probes.load(Ordering::SeqCst);
        assert!(after_idle >= 1, "expected an idle probe, saw {}", after_idle);

        // Fresh activity resets the idle clock and probing stops.
        gateway.touch_activity().await;
        let before = provider.probes.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(provider.probes.load(Ordering::SeqCst), before);

        // While degraded, every tick probes regardless of activity.
        gateway.set_degraded(true).await;
        provider.healthy.store(false, Ordering::SeqCst);
        gateway.touch_activity().await;
        tokio::time::sleep(Duration::from_secs(180)).await;
        assert!(provider.probes.load(Ordering::SeqCst) > before);
        assert!(gateway.is_degraded().await);

        probe_loop.abort();
    }

    #[tokio::test]
    async fn rate_limit_starts_cooldown_that_rejects_next_call() {
        let provider = MockProvider::new();
        provider.rate_limited.store(true, Ordering::SeqCst);
        let gateway = GenerationGateway::new(provider.clone(), "m".to_string(), test_config(1, 300));

        let err = gateway.generate(request("a")).await.unwrap_err();
        assert!(matches!(err, GatewayError::RateLimited));

        // Provider recovered, but the local cooldown still gates the call.
        provider.rate_limited.store(false, Ordering::SeqCst);
        let err = gateway.generate(request("b")).await.unwrap_err();
        assert!(matches!(err, GatewayError::RateLimited));
        assert_eq!(provider.call_count(), 0);
    }
}
