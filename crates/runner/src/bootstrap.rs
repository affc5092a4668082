use std::{
    env, io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use gateway::TurnGateway;
use memory::{
    FixedWindowRateLimiter, InMemoryConversationLog, InMemorySessionLock, InMemorySessionStore,
    InMemoryTenantDirectory,
};
use provider::OpenAIProvider;
use runtime::{
    InterruptSignal, LatencySimulator, MockSpeechToText, MockTextToSpeech, SessionMutex,
    SessionRepository, TenantPromptBuilder, TurnDependencies, TurnOrchestrator,
};
use serde::Serialize;
use thiserror::Error;
use tools::default_registry;
use types::{
    AgentConfig, ConfigError, DEFAULT_EVENT_BUS_CAPACITY, EventBus, OPENAI_PROVIDER_ID, Provider,
    ProviderError,
};

use crate::listeners::ActivityListener;

pub const AGENT_CONFIG_FILE_NAME: &str = "agent.toml";
const CONFIG_ENV_PREFIX: &str = "VOXTURN__";

/// Where configuration files are looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSources {
    pub working_dir: PathBuf,
    pub explicit_path: Option<PathBuf>,
}

impl ConfigSources {
    pub fn discover(explicit_path: Option<&Path>) -> Result<Self, BootstrapError> {
        Ok(Self {
            working_dir: env::current_dir()?,
            explicit_path: explicit_path.map(Path::to_path_buf),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CliOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<SelectionOverrides>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SelectionOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("failed to resolve configuration path: {0}")]
    Io(#[from] io::Error),
    #[error("configuration file `{}` does not exist", .path.display())]
    MissingConfigFile { path: PathBuf },
    #[error("failed to load configuration: {0}")]
    ConfigExtract(#[source] Box<figment::Error>),
    #[error(transparent)]
    ConfigValidation(#[from] ConfigError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("unsupported provider `{provider}` in provider selection")]
    UnsupportedProvider { provider: String },
}

impl From<figment::Error> for BootstrapError {
    fn from(value: figment::Error) -> Self {
        Self::ConfigExtract(Box::new(value))
    }
}

pub fn load_agent_config(
    explicit_path: Option<&Path>,
    cli_overrides: CliOverrides,
) -> Result<AgentConfig, BootstrapError> {
    let sources = ConfigSources::discover(explicit_path)?;
    load_agent_config_with_sources(&sources, cli_overrides)
}

/// Layers, lowest precedence first: built-in defaults, `agent.toml` in the
/// working directory, the explicit `--config` file, `VOXTURN__` environment
/// variables, then CLI overrides.
pub fn load_agent_config_with_sources(
    sources: &ConfigSources,
    cli_overrides: CliOverrides,
) -> Result<AgentConfig, BootstrapError> {
    let mut figment = Figment::from(Serialized::defaults(AgentConfig::default()));

    let workspace_file = sources.working_dir.join(AGENT_CONFIG_FILE_NAME);
    if workspace_file.is_file() {
        figment = figment.merge(Toml::file(workspace_file));
    }
    if let Some(path) = &sources.explicit_path {
        if !path.is_file() {
            return Err(BootstrapError::MissingConfigFile { path: path.clone() });
        }
        figment = figment.merge(Toml::file(path));
    }
    figment = figment.merge(Env::prefixed(CONFIG_ENV_PREFIX).split("__"));
    figment = figment.merge(Serialized::defaults(cli_overrides));

    let config: AgentConfig = figment.extract()?;
    config.validate()?;
    Ok(config)
}

pub fn build_provider(config: &AgentConfig) -> Result<Arc<dyn Provider>, BootstrapError> {
    let provider = config.selection.provider.0.as_str();
    if provider != OPENAI_PROVIDER_ID {
        return Err(BootstrapError::UnsupportedProvider {
            provider: provider.to_owned(),
        });
    }
    Ok(Arc::new(OpenAIProvider::from_config(&config.providers.openai)?))
}

/// Assembled process services sharing one event bus.
pub struct Services {
    pub gateway: TurnGateway,
    pub events: EventBus,
    pub listener: ActivityListener,
}

pub fn build_services(config: &AgentConfig) -> Result<Services, BootstrapError> {
    let provider = build_provider(config)?;
    Ok(build_services_with_provider(config, provider))
}

/// Spawns background tasks, so it must run inside a Tokio runtime.
pub fn build_services_with_provider(config: &AgentConfig, provider: Arc<dyn Provider>) -> Services {
    let events = EventBus::new(DEFAULT_EVENT_BUS_CAPACITY);
    let listener = ActivityListener::spawn(&events);
    let latency = LatencySimulator::new(config.latency.clone());
    let tools = Arc::new(default_registry(
        events.clone(),
        Duration::from_secs(config.runtime.tool_timeout_secs),
    ));
    let orchestrator = TurnOrchestrator::new(
        provider,
        tools,
        latency.clone(),
        config.selection.model.clone(),
        config.runtime.stream_buffer_size,
    );
    let tenants = InMemoryTenantDirectory::new(config.tenants.iter().cloned());

    let deps = Arc::new(TurnDependencies {
        interrupts: Arc::new(InterruptSignal::new(events.clone())),
        session_mutex: SessionMutex::new(
            Arc::new(InMemorySessionLock::new()),
            Duration::from_secs(config.session.lock_ttl_secs),
        ),
        sessions: SessionRepository::from_config(
            Arc::new(InMemorySessionStore::new()),
            &config.session,
        ),
        conversations: Arc::new(InMemoryConversationLog::new()),
        prompts: Arc::new(TenantPromptBuilder::new(Arc::new(tenants))),
        orchestrator: Arc::new(orchestrator),
        speech_to_text: Arc::new(MockSpeechToText::new(latency.clone())),
        text_to_speech: Arc::new(MockTextToSpeech::new(latency)),
        events: events.clone(),
    });
    let rate_limiter = Arc::new(FixedWindowRateLimiter::from_config(&config.rate_limit));

    tracing::info!(
        provider = %config.selection.provider,
        model = %config.selection.model,
        tenants = config.tenants.len(),
        max_concurrent_jobs = config.scheduler.max_concurrent_jobs,
        latency_enabled = config.latency.enabled,
        "turn gateway assembled"
    );

    Services {
        gateway: TurnGateway::new(deps, rate_limiter, &config.scheduler),
        events,
        listener,
    }
}
