use std::env;
use std::time::Duration;

/// Retry/backoff settings for the AI text-generation client.
#[derive(Debug, Clone)]
pub struct AiConfig {
    /// OpenRouter API key. `None` disables the AI jobs.
    pub api_key: Option<String>,
    /// Chat completions endpoint.
    pub base_url: String,
    /// Model identifier sent with every request.
    pub model: String,
    /// Per-request timeout.
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            model: "deepseek/deepseek-r1-0528:free".to_string(),
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

/// Exponential backoff: attempt `n` (1-based) waits `min(base * 2^(n-1), max) + jitter`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one (retries + 1).
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the uniform random jitter added to each delay.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows failed attempt `attempt` (1-based), without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

/// Broker and worker pool settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of worker loops pulling from the broker.
    pub workers: usize,
    /// Redis list used as the job queue.
    pub queue: String,
    /// Retention window for task status entries.
    pub result_ttl: Duration,
    /// Interval of the portfolio snapshot fan-out. Zero disables it.
    pub snapshot_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue: "holdview:jobs".to_string(),
            result_ttl: Duration::from_secs(86_400),
            snapshot_interval: Duration::from_secs(86_400),
        }
    }
}

/// Client-side polling contract.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2000),
            max_attempts: 30,
        }
    }
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// SQLite file holding portfolios, transactions, snapshots and watchlists.
    pub database_path: String,
    /// Redis connection string for the broker and task status store.
    /// Without it the pipeline runs in-process.
    pub redis_url: Option<String>,
    /// Market data provider host.
    pub market_data_base_url: String,
    /// Optional credential sent to the market data provider as `X-API-KEY`.
    pub market_data_api_key: Option<String>,
    pub quote_cache_ttl: Duration,
    /// Retries of transient provider failures inside market data calls.
    pub market_data_retry: RetryPolicy,
    pub ai: AiConfig,
    pub worker: WorkerConfig,
    pub poll: PollConfig,
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let ai_defaults = AiConfig::default();
        let retry_defaults = RetryPolicy::default();
        let worker_defaults = WorkerConfig::default();
        let poll_defaults = PollConfig::default();

        let retry = RetryPolicy {
            max_attempts: parse_env::<u32>("AI_MAX_RETRIES")
                .map(|retries| retries.saturating_add(1))
                .unwrap_or(retry_defaults.max_attempts),
            base_delay: parse_env("AI_BACKOFF_BASE_MS")
                .map(Duration::from_millis)
                .unwrap_or(retry_defaults.base_delay),
            max_delay: parse_env("AI_BACKOFF_MAX_MS")
                .map(Duration::from_millis)
                .unwrap_or(retry_defaults.max_delay),
            jitter: parse_env("AI_BACKOFF_JITTER_MS")
                .map(Duration::from_millis)
                .unwrap_or(retry_defaults.jitter),
        };

        Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_env("PORT").unwrap_or(8000),
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "holdview.db".to_string()),
            redis_url: non_empty_env("REDIS_URL"),
            market_data_base_url: env::var("MARKET_DATA_BASE_URL")
                .unwrap_or_else(|_| "https://query1.finance.yahoo.com".to_string()),
            market_data_api_key: non_empty_env("MARKET_DATA_API_KEY"),
            quote_cache_ttl: Duration::from_secs(parse_env("QUOTE_CACHE_TTL_SECS").unwrap_or(60)),
            market_data_retry: RetryPolicy {
                max_attempts: parse_env::<u32>("MARKET_DATA_MAX_RETRIES")
                    .map(|retries| retries.saturating_add(1))
                    .unwrap_or(3),
                base_delay: Duration::from_millis(250),
                max_delay: Duration::from_secs(2),
                jitter: Duration::ZERO,
            },
            ai: AiConfig {
                api_key: non_empty_env("OPENROUTER_API_KEY"),
                base_url: env::var("AI_BASE_URL").unwrap_or(ai_defaults.base_url),
                model: env::var("AI_MODEL").unwrap_or(ai_defaults.model),
                timeout: parse_env("AI_TIMEOUT_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(ai_defaults.timeout),
                retry,
            },
            worker: WorkerConfig {
                workers: parse_env("WORKER_COUNT")
                    .unwrap_or(worker_defaults.workers)
                    .max(1),
                queue: env::var("BROKER_QUEUE").unwrap_or(worker_defaults.queue),
                result_ttl: parse_env("TASK_RESULT_TTL_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(worker_defaults.result_ttl),
                snapshot_interval: parse_env("SNAPSHOT_INTERVAL_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(worker_defaults.snapshot_interval),
            },
            poll: PollConfig {
                interval: parse_env("POLL_INTERVAL_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(poll_defaults.interval),
                max_attempts: parse_env("POLL_MAX_ATTEMPTS").unwrap_or(poll_defaults.max_attempts),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 6,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            jitter: Duration::ZERO,
        };

        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(500));
        assert_eq!(policy.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn test_defaults() {
        let worker = WorkerConfig::default();
        assert_eq!(worker.workers, 4);
        assert_eq!(worker.result_ttl, Duration::from_secs(86_400));

        let ai = AiConfig::default();
        assert!(ai.api_key.is_none());
        assert_eq!(ai.retry.max_attempts, 4);
    }
}
