//! contactlog - contact form backend with live long-poll updates.

use std::{path::PathBuf, process::ExitCode};

use clap::{ArgAction, Parser};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use contactlog::{
    Result,
    config::Settings,
    http::{self, HttpContext},
    persist::{ContactSink, json_file::JsonFileSink},
    runtime::handle::spawn_contact_store,
    watch::{NotifySource, spawn_file_watcher},
};

#[derive(Debug, Parser)]
#[command(name = "contactlog", version, about = "Contact form backend with live long-poll updates")]
struct Cli {
    /// Settings file (TOML). Defaults to ./contactlog.toml when present.
    #[arg(short, long, env = "CONTACTLOG_CONFIG")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "contactlog stopped with an error");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref())?;

    let sink = JsonFileSink::open(&settings.store.path)?;
    let path = sink.path().to_path_buf();
    let store = sink.load_store()?;
    info!(
        path = %path.display(),
        contacts = store.current().contacts().len(),
        "contact store loaded"
    );

    let handle = spawn_contact_store(store, Some(Box::new(sink)), settings.store.runtime_config());
    let shutdown = CancellationToken::new();

    let watcher = settings.watcher.enabled.then(|| {
        spawn_file_watcher(
            NotifySource::new(path.clone()),
            path.clone(),
            handle.clone(),
            settings.watcher.watcher_config(),
            shutdown.child_token(),
        )
    });

    let routes = http::routes(
        HttpContext {
            handle: handle.clone(),
            long_poll: settings.long_poll.clone(),
            shutdown: shutdown.clone(),
        },
        &settings.http,
    );

    let server_shutdown = shutdown.clone();
    let (addr, server) = warp::serve(routes).try_bind_with_graceful_shutdown(settings.http.bind, async move {
        server_shutdown.cancelled().await;
    })?;
    info!(%addr, "listening");

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown requested");
                signal_shutdown.cancel();
            }
            Err(err) => warn!(error = %err, "could not listen for ctrl-c; stop the process to exit"),
        }
    });

    server.await;

    if let Some(watcher) = watcher {
        if let Err(err) = watcher.await {
            warn!(error = %err, "file watcher task failed");
        }
    }
    handle.shutdown().await?;
    info!("contactlog stopped");
    Ok(())
}

fn init_tracing(cli: &Cli) {
    let filter = match cli.verbose {
        0 => "warn,contactlog=info",
        1 => "info,contactlog=debug",
        2 => "debug,contactlog=trace",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
