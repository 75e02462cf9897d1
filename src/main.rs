use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;

use imessage_ai::channels::AppleScriptSender;
use imessage_ai::config::{self, Config, Paths, Settings};
use imessage_ai::error::{ConfigError, Error};
use imessage_ai::llm::{LlmConfig, create_responder, install_crypto_provider};
use imessage_ai::pipeline::{IngestState, Poller, PollerConfig, StopOutcome, spawn_poller, stop_poller};
use imessage_ai::store::{ChatDb, MessageSource};

const LOG_FILE: &str = "imessages-ai.log";

/// How long Ctrl-C waits for an in-flight cycle before aborting it.
const STOP_GRACE: Duration = Duration::from_secs(40);

#[tokio::main]
async fn main() {
    // Install rustls crypto provider before any TLS usage
    if let Err(e) = install_crypto_provider() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }

    let paths = Paths::from_env();

    let settings = match Settings::load(&paths.config_file) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: cannot read {}: {}", paths.config_file.display(), e);
            std::process::exit(1);
        }
    };

    let guard = init_logging(&config::resolve_log_dir(&settings, &paths));

    if let Err(e) = run(&settings, &paths).await {
        error!("{e}");
        if let Some(fix) = remediation(&e) {
            error!("Fix: {fix}");
        }
        drop(guard);
        std::process::exit(1);
    }
}

/// Log to stderr and to `<log_dir>/imessages-ai.log`.
///
/// The returned guard flushes the file writer on drop.
fn init_logging(log_dir: &Path) -> Option<WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let (file_layer, guard) = match std::fs::create_dir_all(log_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::never(log_dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        Err(e) => {
            eprintln!("Warning: cannot create log dir {}: {}", log_dir.display(), e);
            (None, None)
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

async fn run(settings: &Settings, paths: &Paths) -> Result<(), Error> {
    let config = Config::from_settings(settings, paths)?;

    info!("iMessages AI v{}", env!("CARGO_PKG_VERSION"));
    info!("  Trigger: {}", config.trigger_prefix);
    info!("  Model:   {}", config.model);
    info!("  Italic:  {}", config.italic);
    info!("  Config:  {}", paths.config_file.display());
    info!("  Logs:    {}", config.log_dir.join(LOG_FILE).display());

    // ── Messages database ──────────────────────────────────────────────
    let chat_db = ChatDb::new(&config.messages_db);
    let watermark = chat_db.latest_rowid()?;
    info!(db = %chat_db.path().display(), "Messages DB OK, starting from ROWID {watermark}");

    // ── LLM ────────────────────────────────────────────────────────────
    let responder = create_responder(&LlmConfig {
        api_key: config.api_key.clone(),
        model: config.model.clone(),
        max_tokens: config.max_tokens,
    })?;

    // ── Poller ─────────────────────────────────────────────────────────
    let poller = Poller::new(
        PollerConfig {
            poll_interval: config.poll_interval,
            italic: config.italic,
            ..PollerConfig::default()
        },
        Arc::new(chat_db),
        responder,
        Arc::new(AppleScriptSender::new()),
        IngestState::new(config.trigger_prefix.clone(), watermark),
    );

    let (mut handle, shutdown) = spawn_poller(poller);
    info!("Listening...");

    tokio::select! {
        result = &mut handle => {
            let reason = match result {
                Ok(()) => "task returned".to_string(),
                Err(e) => e.to_string(),
            };
            Err(Error::PollerStopped(reason))
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Stopping... (Ctrl-C again to force)");
            let force = async {
                if tokio::signal::ctrl_c().await.is_err() {
                    std::future::pending::<()>().await;
                }
            };
            match stop_poller(handle, &shutdown, STOP_GRACE, force).await {
                StopOutcome::Stopped => info!("Stopped."),
                StopOutcome::Aborted => info!("Stopped (in-flight reply abandoned)."),
            }
            Ok(())
        }
    }
}

/// What the user should do about a fatal start-up error.
fn remediation(e: &Error) -> Option<&'static str> {
    match e {
        Error::Config(ConfigError::MissingRequired { .. }) => {
            Some("add OPENAI_API_KEY=sk-... to ~/.config/imessages-ai/config")
        }
        Error::Store(_) => {
            Some("System Settings → Privacy & Security → Full Disk Access → enable your terminal")
        }
        _ => None,
    }
}
