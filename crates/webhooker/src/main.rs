mod cli;
mod config;
mod supervisor;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use event_log::{EventSink, EventWriter};
use ws_relay::{Forwarder, ForwarderConfig};

use crate::cli::{Command, ConnectArgs};
use crate::config::{Config, ForwardConfig};
use crate::supervisor::{Supervisor, SupervisorConfig};

/// How long in-flight forwards get to record their outcome after shutdown.
const EVENT_DRAIN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match cli::parse() {
        Ok(cli) => cli,
        Err(err) => {
            match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                    let _ = err.print();
                    return ExitCode::SUCCESS;
                }
                // Unknown command: full usage first, then the error.
                ErrorKind::InvalidSubcommand | ErrorKind::UnknownArgument => {
                    let _ = cli::command().print_help();
                }
                _ => {}
            }
            let _ = err.print();
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        None => {
            let _ = cli::command().print_help();
            return ExitCode::SUCCESS;
        }
        Some(Command::Version) => {
            println!("webhooker {}", env!("CARGO_PKG_VERSION"));
            return ExitCode::SUCCESS;
        }
        Some(Command::Connect(args)) => connect(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn connect(args: ConnectArgs) -> Result<()> {
    // 1. Load config, then merge CLI overrides.
    let file = match &args.config {
        Some(path) => config::load(path)?,
        None => Config::default(),
    };
    let settings = ForwardConfig::resolve(args, file)?;

    // 2. Diagnostics go to stderr; stdout carries the event stream.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!(server = %settings.server, "connecting to webhooker");
    info!(forward = %settings.forward, verbose = settings.verbose, "forwarding webhooks");

    // 3. Start the event stream.
    let writer = match &settings.event_log {
        Some(path) => EventWriter::append_to(path)
            .await
            .with_context(|| format!("failed to open event log {}", path.display()))?,
        None => EventWriter::stdout(),
    };
    let (events, events_handle) = EventSink::start(writer);

    // 4. Build the forwarder.
    let forwarder = Forwarder::new(
        ForwarderConfig {
            target_base: settings.forward.clone(),
            verbose: settings.verbose,
            timeout: settings.forward_timeout,
        },
        events.clone(),
    )
    .context("failed to build HTTP client")?;

    // 5. Cancel on ctrl-c or SIGTERM.
    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    // 6. Supervise relay sessions until cancelled.
    let mut supervisor = Supervisor::new(
        SupervisorConfig {
            upstream_url: settings.upstream_url(),
            backoff: settings.backoff,
        },
        Arc::new(forwarder),
        events,
        cancel,
    );
    supervisor.run().await;
    debug!(attempts = supervisor.attempts(), "supervisor exited");

    // 7. Forwards already in flight keep their sink clones; give them a moment.
    drop(supervisor);
    if tokio::time::timeout(EVENT_DRAIN_GRACE, events_handle).await.is_err() {
        warn!("forwards still in flight at exit; their events are lost");
    }

    Ok(())
}

async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("received SIGINT (ctrl-c)"),
                    _ = sigterm.recv() => info!("received SIGTERM"),
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler");
                let _ = ctrl_c.await;
                info!("received SIGINT (ctrl-c)");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("received SIGINT (ctrl-c)");
    }

    cancel.cancel();
}
