use std::{
    io::{self, Write},
    path::PathBuf,
    process::ExitCode,
    sync::Arc,
};

use clap::Parser;
use gateway::{TurnGateway, TurnSubmission};
use runner::{
    BootstrapError, CliOverrides, ConsoleCommand, SelectionOverrides, build_services,
    load_agent_config, parse_line, render_event, summarize,
};
use runtime::TurnResult;
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast,
    task::JoinSet,
};
use types::{AgentConfig, RuntimeError, TurnEvent, TurnPhase, init_tracing};

#[derive(Debug, Clone, Parser, PartialEq, Eq)]
#[command(name = "voxturn", about = "Interactive console for the voxturn turn engine")]
struct CliArgs {
    #[arg(short = 'c', long = "config")]
    config_path: Option<PathBuf>,
    /// Tenant to converse as; defaults to the first configured tenant
    #[arg(short = 't', long = "tenant")]
    tenant_id: Option<String>,
    /// Resume an existing session instead of starting a new one
    #[arg(short = 's', long = "session")]
    session_id: Option<String>,
    /// Treat each input line as an audio payload
    #[arg(long = "audio")]
    audio: bool,
    #[arg(short = 'm', long = "model")]
    model: Option<String>,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    #[error("no tenants are configured; add a [[tenants]] entry to agent.toml")]
    NoTenants,
    #[error("tenant `{tenant_id}` is not configured")]
    UnknownTenant { tenant_id: String },
    #[error("console I/O failed: {0}")]
    Io(#[from] io::Error),
}

struct ConsoleSession {
    tenant_id: String,
    session_id: String,
    audio: bool,
}

fn main() -> ExitCode {
    if let Err(error) = run() {
        eprintln!("voxturn error: {error}");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn run() -> Result<(), CliError> {
    init_tracing();
    let args = CliArgs::parse();

    let overrides = CliOverrides {
        selection: args.model.map(|model| SelectionOverrides { model: Some(model) }),
    };
    let config = load_agent_config(args.config_path.as_deref(), overrides)?;
    let session = ConsoleSession {
        tenant_id: resolve_tenant(args.tenant_id, &config)?,
        session_id: args
            .session_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        audio: args.audio,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run_console(&config, session))
}

fn resolve_tenant(requested: Option<String>, config: &AgentConfig) -> Result<String, CliError> {
    match requested {
        Some(tenant_id) => {
            if config.tenants.iter().any(|tenant| tenant.id == tenant_id) {
                Ok(tenant_id)
            } else {
                Err(CliError::UnknownTenant { tenant_id })
            }
        }
        None => config
            .tenants
            .first()
            .map(|tenant| tenant.id.clone())
            .ok_or(CliError::NoTenants),
    }
}

async fn run_console(config: &AgentConfig, session: ConsoleSession) -> Result<(), CliError> {
    let services = build_services(config)?;
    let gateway = Arc::new(services.gateway);
    let printer = tokio::spawn(print_events(gateway.subscribe(&session.session_id)));

    println!("tenant={} session={}", session.tenant_id, session.session_id);
    tracing::info!(
        tenant_id = %session.tenant_id,
        session_id = %session.session_id,
        audio = session.audio,
        "console ready"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut turns = JoinSet::new();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match parse_line(&line, session.audio) {
                    ConsoleCommand::Skip => {}
                    ConsoleCommand::Interrupt => interrupt_current(&gateway, &session.session_id),
                    ConsoleCommand::Utterance(input) => {
                        let gateway = Arc::clone(&gateway);
                        let submission = TurnSubmission {
                            tenant_id: session.tenant_id.clone(),
                            session_id: Some(session.session_id.clone()),
                            input,
                        };
                        turns.spawn(async move { report(gateway.submit(submission).await) });
                    }
                }
            }
            signal = &mut ctrl_c => {
                signal?;
                tracing::info!("ctrl-c received; draining in-flight turns");
                break;
            }
            Some(_) = turns.join_next(), if !turns.is_empty() => {}
        }
    }

    gateway.shutdown().await;
    while turns.join_next().await.is_some() {}
    printer.abort();
    let tally = services.listener.tally();
    tracing::info!(
        sessions = tally.sessions_started,
        turns = tally.turns_processed,
        interrupted = tally.turns_interrupted,
        tours_booked = tally.tours_booked,
        notes_created = tally.notes_created,
        contacts_updated = tally.contacts_updated,
        "console session ended"
    );
    Ok(())
}

fn interrupt_current(gateway: &TurnGateway, session_id: &str) {
    if gateway.status(session_id) == TurnPhase::Idle {
        println!("[no turn in progress]");
        return;
    }
    gateway.interrupt(session_id, None);
}

async fn print_events(mut events: broadcast::Receiver<TurnEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                if let Some(text) = render_event(&event) {
                    let mut stdout = io::stdout().lock();
                    let _ = stdout.write_all(text.as_bytes());
                    let _ = stdout.flush();
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "console fell behind the turn event stream");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn report(outcome: Result<TurnResult, RuntimeError>) {
    match outcome {
        Ok(result) => println!("{}", summarize(&result)),
        Err(error) => tracing::warn!(
            %error,
            retryable = error.is_retryable(),
            retry_after = ?error.retry_after(),
            "turn did not complete"
        ),
    }
}
