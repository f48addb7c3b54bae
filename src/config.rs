use anyhow::{Result, anyhow};
use clap::Parser;
use std::time::Duration;

/// Runtime configuration, immutable after start-up.
#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub rate_api_url: String,
    pub rate_api_token: String,
    pub rate_api_quota: i64,
    pub http_host: String,
    pub http_port: u16,
    pub cache_ttl: Duration,
    pub refresh_interval: Duration,
    pub lock_ttl: Duration,
    pub lock_retries: u32,
    pub lock_retry_delay: Duration,
    pub upstream_timeout: Duration,
    pub log_level: String,
}

#[derive(Parser, Debug)]
#[command(
    name = "ratecache",
    about = "Rate-proxying cache for an upstream pricing API",
    long_about = "A caching proxy that serves hotel room rates from a shared Redis cache,\n\
        coalesces concurrent misses into single upstream calls, and keeps every\n\
        cached value fresh with a background revalidator, all while holding the\n\
        fleet under a daily upstream call quota.\n\n\
        Required settings (flag or environment variable): REDIS_URL, RATE_API_URL,\n\
        RATE_API_TOKEN, RATE_API_QUOTA. CLI arguments take precedence."
)]
pub struct Args {
    // Required external endpoints
    #[arg(long, value_name = "URL", help = "Redis connection URL", env = "REDIS_URL")]
    pub redis_url: String,
    #[arg(
        long,
        value_name = "URL",
        help = "Upstream pricing API base URL",
        env = "RATE_API_URL"
    )]
    pub rate_api_url: String,
    #[arg(
        long,
        value_name = "TOKEN",
        help = "Upstream pricing API token",
        env = "RATE_API_TOKEN",
        hide_env_values = true
    )]
    pub rate_api_token: String,
    #[arg(
        long,
        value_name = "N",
        help = "Upstream calls allowed per accounting window",
        env = "RATE_API_QUOTA"
    )]
    pub rate_api_quota: i64,

    // HTTP listener
    #[arg(
        long,
        value_name = "HOST",
        help = "HTTP host",
        default_value = "0.0.0.0",
        env = "RATECACHE_HTTP_HOST"
    )]
    pub http_host: String,
    #[arg(
        long,
        value_name = "PORT",
        help = "HTTP port",
        default_value_t = 8080,
        env = "RATECACHE_HTTP_PORT"
    )]
    pub http_port: u16,

    // Cache behavior
    #[arg(
        long,
        value_name = "SECS",
        help = "Cached rate lifetime",
        default_value_t = 300,
        env = "RATECACHE_CACHE_TTL"
    )]
    pub cache_ttl: u64,
    #[arg(
        long,
        value_name = "SECS",
        help = "Pause between revalidation cycles",
        default_value_t = 120,
        env = "RATECACHE_REFRESH_INTERVAL"
    )]
    pub refresh_interval: u64,
    #[arg(
        long,
        value_name = "SECS",
        help = "Per-key lock lifetime",
        default_value_t = 30,
        env = "RATECACHE_LOCK_TTL"
    )]
    pub lock_ttl: u64,
    #[arg(
        long,
        value_name = "N",
        help = "Extra lock attempts after the first",
        default_value_t = 2,
        env = "RATECACHE_LOCK_RETRIES"
    )]
    pub lock_retries: u32,
    #[arg(
        long,
        value_name = "MS",
        help = "Pause between lock attempts",
        default_value_t = 100,
        env = "RATECACHE_LOCK_RETRY_DELAY_MS"
    )]
    pub lock_retry_delay_ms: u64,
    #[arg(
        long,
        value_name = "SECS",
        help = "Upstream request deadline",
        default_value_t = 10,
        env = "RATECACHE_UPSTREAM_TIMEOUT"
    )]
    pub upstream_timeout: u64,

    // General options
    #[arg(
        long,
        value_name = "LEVEL",
        help = "Log level: error, warn, info, debug, trace",
        default_value = "info",
        env = "RATECACHE_LOG_LEVEL"
    )]
    pub log_level: String,
}

impl Config {
    pub fn from_env_and_args() -> Result<Self> {
        // Clap resolves precedence: CLI arguments, then environment
        // variables, then defaults. Missing required settings abort here
        // with a message naming the flag and variable.
        let args = Args::parse();
        Config::from_args(args)
    }

    fn from_args(args: Args) -> Result<Self> {
        let config = Config {
            redis_url: args.redis_url,
            rate_api_url: args.rate_api_url,
            rate_api_token: args.rate_api_token,
            rate_api_quota: args.rate_api_quota,
            http_host: args.http_host,
            http_port: args.http_port,
            cache_ttl: Duration::from_secs(args.cache_ttl),
            refresh_interval: Duration::from_secs(args.refresh_interval),
            lock_ttl: Duration::from_secs(args.lock_ttl),
            lock_retries: args.lock_retries,
            lock_retry_delay: Duration::from_millis(args.lock_retry_delay_ms),
            upstream_timeout: Duration::from_secs(args.upstream_timeout),
            log_level: args.log_level,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.redis_url.trim().is_empty() {
            return Err(anyhow!("REDIS_URL must not be blank"));
        }
        if self.rate_api_url.trim().is_empty() {
            return Err(anyhow!("RATE_API_URL must not be blank"));
        }
        if self.rate_api_token.trim().is_empty() {
            return Err(anyhow!("RATE_API_TOKEN must not be blank"));
        }
        if self.rate_api_quota <= 0 {
            return Err(anyhow!(
                "RATE_API_QUOTA must be a positive integer, got {}",
                self.rate_api_quota
            ));
        }
        if self.refresh_interval >= self.cache_ttl {
            return Err(anyhow!(
                "refresh interval ({:?}) must be shorter than the cache TTL ({:?}), \
                 otherwise entries expire between revalidation cycles",
                self.refresh_interval,
                self.cache_ttl
            ));
        }
        if self.upstream_timeout >= self.lock_ttl {
            return Err(anyhow!(
                "upstream timeout ({:?}) must be shorter than the lock TTL ({:?}), \
                 otherwise a slow upstream call can outlive its lock",
                self.upstream_timeout,
                self.lock_ttl
            ));
        }
        Ok(())
    }
}
