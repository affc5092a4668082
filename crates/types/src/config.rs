use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{DEFAULT_HISTORY_LIMIT, ModelId, ProviderId, Tenant};

pub const SUPPORTED_CONFIG_MAJOR_VERSION: u64 = 1;
pub const OPENAI_PROVIDER_ID: &str = "openai";
pub const OPENAI_DEFAULT_BASE_URL: &str = "https://api.openai.com";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_config_version")]
    pub config_version: String,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub latency: LatencyConfig,
    #[serde(default)]
    pub selection: ProviderSelection,
    #[serde(default)]
    pub providers: ProviderConfigs,
    #[serde(default)]
    pub tenants: Vec<Tenant>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            runtime: RuntimeConfig::default(),
            scheduler: SchedulerConfig::default(),
            session: SessionConfig::default(),
            rate_limit: RateLimitConfig::default(),
            latency: LatencyConfig::default(),
            selection: ProviderSelection::default(),
            providers: ProviderConfigs::default(),
            tenants: Vec::new(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_config_version(&self.config_version)?;

        let provider = self.selection.provider.0.as_str();
        if provider != OPENAI_PROVIDER_ID {
            return Err(ConfigError::UnsupportedProvider {
                provider: provider.to_owned(),
            });
        }

        if self.selection.model.0.trim().is_empty() {
            return Err(ConfigError::EmptyModelForProvider {
                provider: provider.to_owned(),
            });
        }

        self.runtime.validate()?;
        self.scheduler.validate()?;
        self.session.validate()?;
        self.rate_limit.validate()?;
        self.latency.validate()?;

        for tenant in &self.tenants {
            if tenant.id.trim().is_empty() {
                return Err(ConfigError::EmptyTenantId);
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_stream_buffer_size")]
    pub stream_buffer_size: usize,
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stream_buffer_size: default_stream_buffer_size(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

impl RuntimeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        require_positive("runtime.stream_buffer_size", self.stream_buffer_size as u64)?;
        require_positive("runtime.tool_timeout_secs", self.tool_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "default_drain_poll_interval_ms")]
    pub drain_poll_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            drain_poll_interval_ms: default_drain_poll_interval_ms(),
        }
    }
}

impl SchedulerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        require_positive(
            "scheduler.max_concurrent_jobs",
            self.max_concurrent_jobs as u64,
        )?;
        require_positive(
            "scheduler.drain_poll_interval_ms",
            self.drain_poll_interval_ms,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl_secs(),
            history_limit: default_history_limit(),
            lock_ttl_secs: default_lock_ttl_secs(),
        }
    }
}

impl SessionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        require_positive("session.ttl_secs", self.ttl_secs)?;
        require_positive("session.history_limit", self.history_limit as u64)?;
        // History is trimmed from the front, so an odd cap would cut a
        // user entry away from its assistant reply.
        if self.history_limit % 2 != 0 {
            return Err(ConfigError::OddHistoryLimit {
                value: self.history_limit,
            });
        }
        require_positive("session.lock_ttl_secs", self.lock_ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_rate_limit_window_secs")]
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_rate_limit_max_requests(),
            window_secs: default_rate_limit_window_secs(),
        }
    }
}

impl RateLimitConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        require_positive("rate_limit.max_requests", u64::from(self.max_requests))?;
        require_positive("rate_limit.window_secs", self.window_secs)
    }
}

/// Inclusive millisecond bounds for a simulated delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_stt_delay")]
    pub stt: DelayRange,
    #[serde(default = "default_token_delay")]
    pub token: DelayRange,
    #[serde(default = "default_tool_delay")]
    pub tool: DelayRange,
    #[serde(default = "default_jitter_delay")]
    pub jitter: DelayRange,
    #[serde(default = "default_jitter_probability")]
    pub jitter_probability: f64,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            stt: default_stt_delay(),
            token: default_token_delay(),
            tool: default_tool_delay(),
            jitter: default_jitter_delay(),
            jitter_probability: default_jitter_probability(),
        }
    }
}

impl LatencyConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for (field, range) in [
            ("latency.stt", self.stt),
            ("latency.token", self.token),
            ("latency.tool", self.tool),
            ("latency.jitter", self.jitter),
        ] {
            if range.min_ms > range.max_ms {
                return Err(ConfigError::InvalidDelayRange {
                    field,
                    min_ms: range.min_ms,
                    max_ms: range.max_ms,
                });
            }
        }
        if !is_ratio(self.jitter_probability) {
            return Err(ConfigError::InvalidJitterProbability {
                value: self.jitter_probability,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSelection {
    #[serde(default = "default_provider_id")]
    pub provider: ProviderId,
    #[serde(default = "default_model_id")]
    pub model: ModelId,
}

impl Default for ProviderSelection {
    fn default() -> Self {
        Self {
            provider: default_provider_id(),
            model: default_model_id(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderConfigs {
    #[serde(default)]
    pub openai: OpenAIProviderConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAIProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
}

impl Default for OpenAIProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_openai_base_url(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("unsupported config_version `{version}`; supported major is {supported_major}")]
    UnsupportedConfigVersion {
        version: String,
        supported_major: u64,
    },
    #[error("invalid config_version format `{version}`")]
    InvalidConfigVersionFormat { version: String },
    #[error("unsupported provider `{provider}` in provider selection")]
    UnsupportedProvider { provider: String },
    #[error("selected model is empty for provider `{provider}`")]
    EmptyModelForProvider { provider: String },
    #[error("limit `{field}` must be greater than zero; got {value}")]
    InvalidLimit { field: &'static str, value: u64 },
    #[error("session.history_limit must be even so user/assistant pairs stay together; got {value}")]
    OddHistoryLimit { value: usize },
    #[error("delay range `{field}` has min {min_ms}ms above max {max_ms}ms")]
    InvalidDelayRange {
        field: &'static str,
        min_ms: u64,
        max_ms: u64,
    },
    #[error("latency jitter_probability must be within [0.0, 1.0]; got {value}")]
    InvalidJitterProbability { value: f64 },
    #[error("tenant id must not be empty")]
    EmptyTenantId,
}

pub fn validate_config_version(config_version: &str) -> Result<(), ConfigError> {
    let major = parse_major_version(config_version)?;
    if major != SUPPORTED_CONFIG_MAJOR_VERSION {
        return Err(ConfigError::UnsupportedConfigVersion {
            version: config_version.trim().to_owned(),
            supported_major: SUPPORTED_CONFIG_MAJOR_VERSION,
        });
    }
    Ok(())
}

fn parse_major_version(config_version: &str) -> Result<u64, ConfigError> {
    let trimmed = config_version.trim();
    let invalid = || ConfigError::InvalidConfigVersionFormat {
        version: config_version.to_owned(),
    };
    if trimmed.is_empty()
        || trimmed
            .split('.')
            .any(|part| part.is_empty() || !part.chars().all(|ch| ch.is_ascii_digit()))
    {
        return Err(invalid());
    }
    trimmed
        .split('.')
        .next()
        .and_then(|major| major.parse::<u64>().ok())
        .ok_or_else(invalid)
}

fn require_positive(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidLimit { field, value });
    }
    Ok(())
}

fn default_config_version() -> String {
    "1.0.0".to_owned()
}

fn default_provider_id() -> ProviderId {
    ProviderId::from(OPENAI_PROVIDER_ID)
}

fn default_model_id() -> ModelId {
    ModelId::from("gpt-4o-mini")
}

fn default_openai_base_url() -> String {
    OPENAI_DEFAULT_BASE_URL.to_owned()
}

fn default_stream_buffer_size() -> usize {
    64
}

fn default_tool_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent_jobs() -> usize {
    5
}

fn default_drain_poll_interval_ms() -> u64 {
    100
}

fn default_session_ttl_secs() -> u64 {
    2 * 60 * 60
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

fn default_lock_ttl_secs() -> u64 {
    10
}

fn default_rate_limit_max_requests() -> u32 {
    60
}

fn default_rate_limit_window_secs() -> u64 {
    60
}

fn default_stt_delay() -> DelayRange {
    DelayRange::new(30, 120)
}

fn default_token_delay() -> DelayRange {
    DelayRange::new(10, 25)
}

fn default_tool_delay() -> DelayRange {
    DelayRange::new(80, 200)
}

fn default_jitter_delay() -> DelayRange {
    DelayRange::new(50, 150)
}

fn default_jitter_probability() -> f64 {
    0.05
}

fn is_ratio(value: f64) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}
