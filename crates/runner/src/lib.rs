//! Composition root for the `voxturn` console: configuration loading,
//! collaborator wiring, the agent event listener and the line-oriented
//! console protocol.

pub mod bootstrap;
pub mod console;
pub mod listeners;

pub use bootstrap::{
    AGENT_CONFIG_FILE_NAME, BootstrapError, CliOverrides, ConfigSources, SelectionOverrides,
    Services, build_provider, build_services, build_services_with_provider, load_agent_config,
    load_agent_config_with_sources,
};
pub use console::{ConsoleCommand, INTERRUPT_COMMAND, parse_line, render_event, summarize};
pub use listeners::{ActivityListener, ActivityTally};
