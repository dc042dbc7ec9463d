use std::env;
use std::time::Duration;

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_duration_millis(key: &str, default_millis: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(default_millis))
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub const DEFAULT_MAX_BATCH_SIZE: usize = 500;

/// Exponential backoff schedule for whole-batch retries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound for a single HTTP attempt.
    pub request_timeout: Duration,
    /// Upper bound for the whole dispatch including sleeps. `None` derives
    /// the worst case from the other fields.
    pub overall_timeout: Option<Duration>,
}

impl RetryPolicy {
    /// Delay to wait after failed attempt `attempt` (1-based):
    /// `min(initial_delay * 2^(attempt-1), max_delay)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Deadline for the entire dispatch call.
    pub fn overall_timeout(&self) -> Duration {
        self.overall_timeout.unwrap_or_else(|| {
            let attempts = self.max_attempts.max(1);
            let sleeps = (1..attempts).map(|attempt| self.delay_for(attempt)).sum::<Duration>();
            self.request_timeout.saturating_mul(attempts) + sleeps
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            request_timeout: Duration::from_secs(60),
            overall_timeout: None,
        }
    }
}

/// Configuration for the normalization backend client and import limits.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub normalizer_url: String,
    pub normalizer_auth_token: Option<String>,
    pub max_batch_size: usize,
    pub retry: RetryPolicy,
}

impl ImportConfig {
    pub fn from_env() -> Self {
        let defaults = RetryPolicy::default();
        let overall_timeout = env::var("IMPORT_OVERALL_TIMEOUT_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map(Duration::from_millis);

        Self {
            normalizer_url: env_string(
                "NORMALIZER_URL",
                "http://normalizer:5678/webhook/lead-import",
            ),
            normalizer_auth_token: env_optional("NORMALIZER_AUTH_TOKEN"),
            max_batch_size: env_usize("IMPORT_MAX_BATCH_SIZE", DEFAULT_MAX_BATCH_SIZE).max(1),
            retry: RetryPolicy {
                max_attempts: env_u32("IMPORT_RETRY_MAX_ATTEMPTS", defaults.max_attempts).max(1),
                initial_delay: env_duration_millis(
                    "IMPORT_RETRY_INITIAL_DELAY_MS",
                    defaults.initial_delay.as_millis() as u64,
                ),
                max_delay: env_duration_millis(
                    "IMPORT_RETRY_MAX_DELAY_MS",
                    defaults.max_delay.as_millis() as u64,
                ),
                request_timeout: env_duration_millis(
                    "IMPORT_REQUEST_TIMEOUT_MS",
                    defaults.request_timeout.as_millis() as u64,
                ),
                overall_timeout,
            },
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
