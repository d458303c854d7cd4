//! Environment configuration.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use pointer_store::default_pointer_path;
use runs_api::{RunsApiConfig, DEFAULT_BASE_URL};

use crate::backoff::BackoffPolicy;

pub const DEFAULT_REMOTE_INTERVAL: Duration = Duration::from_millis(4_000);
pub const DEFAULT_REMOTE_FRESHNESS: Duration = Duration::from_millis(1_500);
pub const DEFAULT_LOG_FILTER: &str = "info";
pub const MAX_PROMPT_CHARS: usize = 4_000;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub base_url: String,
    pub backoff: BackoffPolicy,
    pub remote_interval: Duration,
    pub remote_freshness: Duration,
    pub pointer_path: Option<PathBuf>,
    pub request_timeout: Option<Duration>,
    pub log_filter: String,
    pub max_prompt_chars: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            backoff: BackoffPolicy::default(),
            remote_interval: DEFAULT_REMOTE_INTERVAL,
            remote_freshness: DEFAULT_REMOTE_FRESHNESS,
            pointer_path: env::var_os("HOME").map(|home| default_pointer_path(home.as_ref())),
            request_timeout: None,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            max_prompt_chars: MAX_PROMPT_CHARS,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let backoff = BackoffPolicy {
            base: env_millis("STREAM_RECONCILE_POLL_BASE_MS").unwrap_or(defaults.backoff.base),
            max: env_millis("STREAM_RECONCILE_POLL_MAX_MS").unwrap_or(defaults.backoff.max),
            cap: env_u32("STREAM_RECONCILE_BACKOFF_CAP").unwrap_or(defaults.backoff.cap),
        };

        Self {
            base_url: env_string_opt("STREAM_RECONCILE_BASE_URL").unwrap_or(defaults.base_url),
            backoff,
            remote_interval: env_millis("STREAM_RECONCILE_REMOTE_INTERVAL_MS")
                .unwrap_or(defaults.remote_interval),
            remote_freshness: env_millis("STREAM_RECONCILE_REMOTE_FRESHNESS_MS")
                .unwrap_or(defaults.remote_freshness),
            pointer_path: env_string_opt("STREAM_RECONCILE_POINTER_PATH")
                .map(PathBuf::from)
                .or(defaults.pointer_path),
            request_timeout: env_u64("STREAM_RECONCILE_TIMEOUT_SEC")
                .filter(|seconds| *seconds > 0)
                .map(Duration::from_secs),
            log_filter: env_string_opt("STREAM_RECONCILE_LOG").unwrap_or(defaults.log_filter),
            max_prompt_chars: defaults.max_prompt_chars,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_remote_interval(mut self, interval: Duration) -> Self {
        self.remote_interval = interval;
        self
    }

    pub fn with_remote_freshness(mut self, freshness: Duration) -> Self {
        self.remote_freshness = freshness;
        self
    }

    pub fn with_pointer_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.pointer_path = Some(path.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Transport settings derived from this configuration.
    pub fn runs_api_config(&self) -> RunsApiConfig {
        let config = RunsApiConfig::new(&self.base_url);
        match self.request_timeout {
            Some(timeout) => config.with_timeout(timeout),
            None => config,
        }
    }
}

fn env_string_opt(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        if value.trim().is_empty() {
            None
        } else {
            Some(value.trim().to_string())
        }
    })
}

fn env_u64(key: &str) -> Option<u64> {
    env_string_opt(key).and_then(|value| value.parse().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_string_opt(key).and_then(|value| value.parse().ok())
}

fn env_millis(key: &str) -> Option<Duration> {
    env_u64(key)
        .filter(|millis| *millis > 0)
        .map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::EngineConfig;
    use std::env;
    use std::path::PathBuf;
    use std::sync::{Mutex, OnceLock};
    use std::time::Duration;

    const KEYS: [&str; 8] = [
        "STREAM_RECONCILE_BASE_URL",
        "STREAM_RECONCILE_POLL_BASE_MS",
        "STREAM_RECONCILE_POLL_MAX_MS",
        "STREAM_RECONCILE_BACKOFF_CAP",
        "STREAM_RECONCILE_REMOTE_INTERVAL_MS",
        "STREAM_RECONCILE_REMOTE_FRESHNESS_MS",
        "STREAM_RECONCILE_TIMEOUT_SEC",
        "STREAM_RECONCILE_LOG",
    ];

    struct EnvGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            if let Some(value) = &self.previous {
                env::set_var(self.key, value);
            } else {
                env::remove_var(self.key);
            }
        }
    }

    fn env_lock() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
            .lock()
            .expect("env lock poisoned")
    }

    fn set_env_guard(key: &'static str, value: Option<&str>) -> EnvGuard {
        let previous = env::var(key).ok();
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
        EnvGuard { key, previous }
    }

    fn clear_all() -> Vec<EnvGuard> {
        KEYS.iter().map(|key| set_env_guard(key, None)).collect()
    }

    #[test]
    fn unset_env_uses_defaults() {
        let _lock = env_lock();
        let _guards = clear_all();

        let config = EngineConfig::from_env();
        assert_eq!(config.base_url, "http://127.0.0.1:5000/api/codex");
        assert_eq!(config.backoff.base, Duration::from_millis(800));
        assert_eq!(config.backoff.max, Duration::from_millis(15_000));
        assert_eq!(config.backoff.cap, 5);
        assert_eq!(config.remote_interval, Duration::from_millis(4_000));
        assert_eq!(config.remote_freshness, Duration::from_millis(1_500));
        assert!(config.request_timeout.is_none());
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn env_values_override_defaults() {
        let _lock = env_lock();
        let _guards = clear_all();
        let _g1 = set_env_guard("STREAM_RECONCILE_BASE_URL", Some("http://host:9/api"));
        let _g2 = set_env_guard("STREAM_RECONCILE_POLL_BASE_MS", Some("100"));
        let _g3 = set_env_guard("STREAM_RECONCILE_BACKOFF_CAP", Some("3"));
        let _g4 = set_env_guard("STREAM_RECONCILE_TIMEOUT_SEC", Some("30"));
        let _g5 = set_env_guard("STREAM_RECONCILE_LOG", Some("debug"));
        let _g6 = set_env_guard("STREAM_RECONCILE_POINTER_PATH", Some("/tmp/pointers.json"));

        let config = EngineConfig::from_env();
        assert_eq!(config.base_url, "http://host:9/api");
        assert_eq!(config.backoff.base, Duration::from_millis(100));
        assert_eq!(config.backoff.cap, 3);
        assert_eq!(config.request_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.log_filter, "debug");
        assert_eq!(
            config.pointer_path,
            Some(PathBuf::from("/tmp/pointers.json"))
        );
        assert_eq!(
            config.runs_api_config().timeout,
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn invalid_and_blank_values_fall_back() {
        let _lock = env_lock();
        let _guards = clear_all();
        let _g1 = set_env_guard("STREAM_RECONCILE_POLL_MAX_MS", Some("soon"));
        let _g2 = set_env_guard("STREAM_RECONCILE_BASE_URL", Some("   "));
        let _g3 = set_env_guard("STREAM_RECONCILE_REMOTE_INTERVAL_MS", Some("0"));

        let config = EngineConfig::from_env();
        assert_eq!(config.backoff.max, Duration::from_millis(15_000));
        assert_eq!(config.base_url, "http://127.0.0.1:5000/api/codex");
        assert_eq!(config.remote_interval, Duration::from_millis(4_000));
    }
}
