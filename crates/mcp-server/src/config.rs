//! Server configuration loaded from environment variables.

use std::time::Duration;

/// Immutable configuration, built once in `main` and shared by reference.
#[derive(Debug, Clone)]
pub struct Config {
    /// Object-store endpoint URL (path-style addressing).
    pub s3_endpoint: String,
    pub s3_access_key: String,
    pub s3_secret_key: String,
    pub s3_bucket: String,
    pub s3_region: String,

    /// Chat-completions base URL, including the version path segment
    /// (e.g. `https://llm.internal/v1`).
    pub llm_endpoint: String,
    pub llm_api_key: String,
    pub llm_model: String,
    pub llm_max_tokens: u32,
    pub llm_temperature: f32,

    /// Raw bootstrap admin credential. Requests presenting it bypass the
    /// token registry and act as a universal admin.
    pub bootstrap_token: String,

    /// Port the HTTP binding listens on. Unused by the stdio binding.
    pub port: u16,

    /// Hard wall-clock limit for one language-model call.
    pub consolidation_timeout: Duration,
    /// Oldest-first cap on notes consumed by one consolidation.
    pub consolidation_max_notes: usize,

    /// Snapshots kept per space after a successful backup.
    pub backup_retention: usize,
    /// Default orphan threshold for the garbage collector.
    pub gc_max_age_days: i64,
}

impl Config {
    /// Load configuration from `LIVE_MEMORY_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let llm_endpoint = require("LIVE_MEMORY_LLM_ENDPOINT")?;
        let trimmed = llm_endpoint.trim_end_matches('/');
        if !trimmed
            .rsplit('/')
            .next()
            .is_some_and(|seg| seg.starts_with('v') && seg[1..].chars().all(|c| c.is_ascii_digit()) && seg.len() > 1)
        {
            return Err(ConfigError::Invalid {
                var: "LIVE_MEMORY_LLM_ENDPOINT",
                reason: "must include the API version path segment (e.g. …/v1)".into(),
            });
        }

        Ok(Self {
            s3_endpoint: require("LIVE_MEMORY_S3_ENDPOINT")?,
            s3_access_key: require("LIVE_MEMORY_S3_ACCESS_KEY")?,
            s3_secret_key: require("LIVE_MEMORY_S3_SECRET_KEY")?,
            s3_bucket: require("LIVE_MEMORY_S3_BUCKET")?,
            s3_region: optional("LIVE_MEMORY_S3_REGION").unwrap_or_else(|| "us-east-1".into()),

            llm_endpoint: trimmed.to_string(),
            llm_api_key: require("LIVE_MEMORY_LLM_API_KEY")?,
            llm_model: require("LIVE_MEMORY_LLM_MODEL")?,
            llm_max_tokens: parse_or("LIVE_MEMORY_LLM_MAX_TOKENS", 100_000)?,
            llm_temperature: parse_or("LIVE_MEMORY_LLM_TEMPERATURE", 0.3)?,

            bootstrap_token: require("LIVE_MEMORY_BOOTSTRAP_TOKEN")?,

            port: parse_or("LIVE_MEMORY_PORT", 8787)?,

            consolidation_timeout: Duration::from_secs(parse_or(
                "LIVE_MEMORY_CONSOLIDATION_TIMEOUT_SECS",
                600u64,
            )?),
            consolidation_max_notes: parse_or("LIVE_MEMORY_CONSOLIDATION_MAX_NOTES", 500usize)?,

            backup_retention: parse_or("LIVE_MEMORY_BACKUP_RETENTION", 5usize)?,
            gc_max_age_days: parse_or("LIVE_MEMORY_GC_MAX_AGE_DAYS", 7i64)?,
        })
    }

    /// One-line startup banner; secrets stay out of the log.
    pub fn banner(&self) {
        tracing::info!(
            endpoint = %self.s3_endpoint,
            bucket = %self.s3_bucket,
            region = %self.s3_region,
            model = %self.llm_model,
            port = self.port,
            max_notes = self.consolidation_max_notes,
            timeout_secs = self.consolidation_timeout.as_secs(),
            "live-memory starting"
        );
    }
}

fn require(var: &'static str) -> Result<String, ConfigError> {
    match std::env::var(var) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing { var }),
    }
}

fn optional(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
        }),
        _ => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} environment variable not set")]
    Missing { var: &'static str },
    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}
