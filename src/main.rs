//! access-guard - request access-decision service
//!
//! Loads configuration, opens the key and audit database, starts the audit
//! workers and serves the management API behind the request guard.

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use access_guard::{
    api,
    config::{self, LogFormat},
    db,
    models::{CreateApiKeyRequest, OwnerType},
    AppConfig, AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    // Check for --help flag
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        print_help();
        return Ok(());
    }

    // Check for --version flag
    if args.iter().any(|arg| arg == "--version" || arg == "-V") {
        println!("access-guard {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Check for --init-config flag
    if let Some(pos) = args.iter().position(|arg| arg == "--init-config") {
        let path = args
            .get(pos + 1)
            .map(std::path::PathBuf::from)
            .unwrap_or_else(|| "config.yaml".into());
        AppConfig::create_default_config(&path)?;
        println!("Wrote default configuration to {:?}", path);
        return Ok(());
    }

    // Load configuration first (before logging, so we know log format)
    let config = AppConfig::load().context("Failed to load configuration")?;

    // The guard must be kept alive for the duration of the program
    // to ensure log messages are flushed to files
    let _log_guard = init_logging(&config);

    info!("access-guard starting up");

    ensure_data_directory(&config)?;

    info!("Initializing database connection");
    let pool = db::init_pool(&config.database)
        .await
        .context("Failed to initialize database")?;

    let state = AppState::builder(config.clone())
        .key_store(Arc::new(db::SqliteKeyStore::new(pool.clone())))
        .audit_sink(Arc::new(db::SqliteAuditSink::new(pool)))
        .build()
        .context("Failed to initialize access guard")?;

    if let Some(pos) = args.iter().position(|arg| arg == "--bootstrap-key") {
        let name = args
            .get(pos + 1)
            .cloned()
            .unwrap_or_else(|| "bootstrap-admin".to_string());
        return bootstrap_key(&state, name).await;
    }

    let workers = match state.audit {
        Some(ref queue) => {
            info!(
                flush_interval_secs = config.audit.flush_interval_secs,
                retention_days = config.audit.traffic_retention_days,
                "Starting audit workers"
            );
            Some(queue.start())
        }
        None => {
            warn!("Audit logging disabled by configuration");
            None
        }
    };

    let app = api::router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address configuration")?;

    info!("Starting HTTP server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!("HTTP server is ready to accept connections");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("HTTP server error")?;

    if let Some(workers) = workers {
        info!("Flushing pending audit entries");
        workers.shutdown().await;
    }

    info!("access-guard stopped");
    Ok(())
}

/// Create an admin key able to manage keys and read audit logs, and print it
/// once. The plaintext is never stored.
async fn bootstrap_key(state: &AppState, name: String) -> Result<()> {
    let request = CreateApiKeyRequest {
        name,
        owner_type: OwnerType::Service,
        owner_id: "bootstrap".to_string(),
        scopes: vec![
            api::KEYS_ADMIN_SCOPE.to_string(),
            api::AUDIT_READ_SCOPE.to_string(),
        ],
        expires_at: None,
    };

    let created = state
        .api_keys
        .create(&request)
        .await
        .context("Failed to create bootstrap key")?;

    info!(key_id = %created.api_key.id, "Created bootstrap api key");
    println!("id:  {}", created.api_key.id);
    println!("key: {}", created.key);
    println!();
    println!("Store this key now; it cannot be shown again.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

/// Initialize the logging/tracing infrastructure
fn init_logging(config: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use config::LogTarget;
    use tracing_subscriber::{prelude::*, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let log_config = &config.logging;

    match &log_config.target {
        LogTarget::Console => {
            let subscriber = tracing_subscriber::registry().with(env_filter);
            init_console_logging(subscriber, &log_config.format);
            None
        }
        LogTarget::File => {
            let (writer, guard) = create_file_writer(log_config);
            let subscriber = tracing_subscriber::registry().with(env_filter);
            init_file_logging(subscriber, &log_config.format, writer);
            Some(guard)
        }
        LogTarget::Both => {
            let (writer, guard) = create_file_writer(log_config);
            let subscriber = tracing_subscriber::registry().with(env_filter);
            init_both_logging(subscriber, &log_config.format, writer);
            Some(guard)
        }
    }
}

/// Create a file writer with optional daily rotation
fn create_file_writer(
    log_config: &config::LoggingConfig,
) -> (
    tracing_appender::non_blocking::NonBlocking,
    tracing_appender::non_blocking::WorkerGuard,
) {
    if let Err(e) = std::fs::create_dir_all(&log_config.log_dir) {
        eprintln!(
            "Warning: Failed to create log directory {:?}: {}",
            log_config.log_dir, e
        );
    }

    let file_appender = if log_config.daily_rotation {
        tracing_appender::rolling::daily(&log_config.log_dir, &log_config.log_prefix)
    } else {
        tracing_appender::rolling::never(&log_config.log_dir, &log_config.log_prefix)
    };

    tracing_appender::non_blocking(file_appender)
}

fn init_console_logging<S>(subscriber: S, format: &LogFormat)
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a> + Send + Sync,
{
    use tracing_subscriber::{fmt, prelude::*};

    match format {
        LogFormat::Json => {
            subscriber
                .with(fmt::layer().json().with_target(true))
                .init();
        }
        LogFormat::Compact => {
            subscriber
                .with(fmt::layer().compact().with_target(false))
                .init();
        }
        LogFormat::Pretty => {
            subscriber
                .with(fmt::layer().with_target(true).with_thread_ids(false))
                .init();
        }
    }
}

fn init_file_logging<S>(
    subscriber: S,
    format: &LogFormat,
    writer: tracing_appender::non_blocking::NonBlocking,
) where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a> + Send + Sync,
{
    use tracing_subscriber::{fmt, prelude::*};

    match format {
        LogFormat::Json => {
            subscriber
                .with(fmt::layer().json().with_target(true).with_writer(writer))
                .init();
        }
        LogFormat::Compact => {
            subscriber
                .with(fmt::layer().compact().with_target(false).with_writer(writer))
                .init();
        }
        LogFormat::Pretty => {
            subscriber
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
        }
    }
}

/// Console and file at once; the file copy never carries ANSI colours
fn init_both_logging<S>(
    subscriber: S,
    format: &LogFormat,
    writer: tracing_appender::non_blocking::NonBlocking,
) where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a> + Send + Sync,
{
    use tracing_subscriber::{fmt, prelude::*};

    match format {
        LogFormat::Json => {
            subscriber
                .with(fmt::layer().json().with_target(true))
                .with(fmt::layer().json().with_target(true).with_writer(writer))
                .init();
        }
        LogFormat::Compact => {
            subscriber
                .with(fmt::layer().compact().with_target(false))
                .with(
                    fmt::layer()
                        .compact()
                        .with_target(false)
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
        }
        LogFormat::Pretty => {
            subscriber
                .with(fmt::layer().with_target(true))
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
        }
    }
}

/// Directory holding the SQLite file, if the URL names one
fn sqlite_data_dir(url: &str) -> Option<&std::path::Path> {
    let path = url.strip_prefix("sqlite://")?;
    let path = path.split('?').next().unwrap_or(path);
    if path.starts_with(":memory:") {
        return None;
    }
    std::path::Path::new(path)
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
}

fn ensure_data_directory(config: &AppConfig) -> Result<()> {
    if let Some(parent) = sqlite_data_dir(&config.database.url) {
        if !parent.exists() {
            std::fs::create_dir_all(parent).context("Failed to create data directory")?;
            info!("Created data directory: {:?}", parent);
        }
    }
    Ok(())
}

fn print_help() {
    println!(
        r#"access-guard {}

USAGE:
    access-guard [OPTIONS]

OPTIONS:
    -h, --help                  Print this help message
    -V, --version               Print version information
    --init-config [PATH]        Write a default configuration file
                                (default: config.yaml) and exit
    --bootstrap-key [NAME]      Create an api key with the keys:admin and
                                audit:read scopes, print it once and exit

ENVIRONMENT:
    ACCESS_GUARD_CONFIG         Path to configuration file
    ACCESS_GUARD_*              Per-option overrides (see config docs)
    RUST_LOG                    Log filter, overrides logging.level

CONFIGURATION:
    The application looks for configuration files in the following order:
    1. Path specified by ACCESS_GUARD_CONFIG environment variable
    2. ./config.yaml
    3. ./config/config.yaml
    4. /etc/access-guard/config.yaml
    5. $XDG_CONFIG_HOME/access-guard/config.yaml"#,
        env!("CARGO_PKG_VERSION")
    );
}
