use anyhow::{Context, Result};
use std::sync::Arc;
use superterminals::api::handler::CommandHandler;
use superterminals::api::server::serve_stdio;
use superterminals::config::Config;
use superterminals::supervisor::store::DefinitionStore;
use superterminals::supervisor::Supervisor;
use superterminals::utils::audit_logger::AuditLogger;
use tracing::Level;
use tracing_subscriber::{filter::EnvFilter, fmt::format::FmtSpan, FmtSubscriber};

fn setup_logging(log_level_str: &str) {
    let level = match log_level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("superterminals={}", level)));

    // stdout carries responses; diagnostics go to stderr.
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_span_events(FmtSpan::CLOSE)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    setup_logging(&config.log_level);

    tracing::info!(version = %env!("CARGO_PKG_VERSION"), data_dir = %config.data_dir.display(), "Starting superterminals supervisor");
    tracing::debug!("Loaded configuration: {:?}", config);

    let store = DefinitionStore::open(&config.store_file)
        .with_context(|| format!("Failed to open terminal store at {}", config.store_file.display()))?;
    let supervisor = Arc::new(Supervisor::new(
        store,
        config.shell_launcher(),
        config.supervisor_settings(),
    ));
    let audit_logger = Arc::new(AuditLogger::new(&config));
    let handler = CommandHandler::new(supervisor.clone(), Some(audit_logger));

    tokio::select! {
        served = serve_stdio(handler) => {
            if let Err(e) = served {
                tracing::error!(error = %e, "Command server stopped with an error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupt received");
        }
    }

    supervisor.shutdown().await;
    tracing::info!("Supervisor shutdown.");
    Ok(())
}
