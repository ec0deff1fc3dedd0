use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_u32(key: &str, default: u32) -> u32 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub upstream: UpstreamConfig,
    pub fetch: FetchConfig,
    pub driver: DriverConfig,
    pub notify: NotifyConfig,
    pub store: StoreConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    pub fn from_env() -> Self {
        Self {
            upstream: UpstreamConfig::from_env(),
            fetch: FetchConfig::from_env(),
            driver: DriverConfig::from_env(),
            notify: NotifyConfig::from_env(),
            store: StoreConfig::from_env(),
        }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!(
            "  upstream:  base_url={}, timeout={}s",
            self.upstream.base_url,
            self.upstream.request_timeout_secs
        );
        tracing::info!(
            "  fetch:     min_interval={}ms, cache_ttl={}s",
            self.fetch.min_interval_ms,
            self.fetch.cache_ttl_secs
        );
        tracing::info!(
            "  driver:    catch_up={}h, floor={}s, cooldown={}s, attempts={}, sweep={}s",
            self.driver.catch_up_window_hours,
            self.driver.reschedule_floor_secs,
            self.driver.suspend_cooldown_secs,
            self.driver.fire_max_attempts,
            self.driver.sweep_interval_secs
        );
        tracing::info!(
            "  notify:    webhook={}",
            if self.notify.is_configured() { "configured" } else { "(none)" }
        );
        tracing::info!("  store:     data_file={}", self.store.data_file.display());
    }
}

// ── Upstream info API ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl UpstreamConfig {
    fn from_env() -> Self {
        Self {
            base_url: env_or("AIRTIME_UPSTREAM_BASE_URL", "http://localhost:8080"),
            request_timeout_secs: env_u64("AIRTIME_UPSTREAM_TIMEOUT_SECS", 10),
        }
    }
}

// ── Fetch pipeline ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Minimum spacing between successive upstream dispatches.
    pub min_interval_ms: u64,
    /// Lifetime of a cached upstream payload.
    pub cache_ttl_secs: u64,
}

impl FetchConfig {
    fn from_env() -> Self {
        Self {
            min_interval_ms: env_u64("AIRTIME_FETCH_MIN_INTERVAL_MS", 350),
            cache_ttl_secs: env_u64("AIRTIME_CACHE_TTL_SECS", 60),
        }
    }
}

// ── Recurrence driver ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Maximum lateness before a missed occurrence is skipped instead of fired.
    pub catch_up_window_hours: u64,
    /// Lower bound on any rescheduled delay.
    pub reschedule_floor_secs: u64,
    /// Wait before re-validating a suspended entity.
    pub suspend_cooldown_secs: u64,
    /// Fire-cycle attempts before giving up until the next slot.
    pub fire_max_attempts: u32,
    pub fire_retry_backoff_secs: u64,
    /// Reconcile-sweep cadence; 0 disables the periodic sweep.
    pub sweep_interval_secs: u64,
}

impl DriverConfig {
    fn from_env() -> Self {
        Self {
            catch_up_window_hours: env_u64("AIRTIME_CATCH_UP_WINDOW_HOURS", 72),
            reschedule_floor_secs: env_u64("AIRTIME_RESCHEDULE_FLOOR_SECS", 60),
            suspend_cooldown_secs: env_u64("AIRTIME_SUSPEND_COOLDOWN_SECS", 3600),
            fire_max_attempts: env_u32("AIRTIME_FIRE_MAX_ATTEMPTS", 3),
            fire_retry_backoff_secs: env_u64("AIRTIME_FIRE_RETRY_BACKOFF_SECS", 30),
            sweep_interval_secs: env_u64("AIRTIME_SWEEP_INTERVAL_SECS", 1800),
        }
    }
}

// ── Notification transport ────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    pub webhook_url: Option<String>,
    pub request_timeout_secs: u64,
}

impl NotifyConfig {
    fn from_env() -> Self {
        Self {
            webhook_url: env_opt("AIRTIME_WEBHOOK_URL"),
            request_timeout_secs: env_u64("AIRTIME_NOTIFY_TIMEOUT_SECS", 10),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.webhook_url.is_some()
    }
}

// ── Store ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub data_file: PathBuf,
}

impl StoreConfig {
    fn from_env() -> Self {
        Self {
            data_file: PathBuf::from(env_or("AIRTIME_DATA_FILE", "data/tracked.json")),
        }
    }
}
