use anyhow::{bail, Context};
use clap::Parser;
use cluster_signals::cli::{self, Cli, Commands};
use cluster_signals::config::{AppConfig, LoggingConfig, StoreBackend};
use cluster_signals::services::{DedupSink, EventIngestor, JsonLinesSink, SignalSink};
use cluster_signals::store::{InMemoryTtlStore, RedisTtlStore, TtlStore};
use cluster_signals::ClusterDetector;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config_dir)
        .with_context(|| format!("loading configuration from {}", cli.config_dir))?;
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("config: {e}");
        }
        bail!("invalid configuration ({} problems)", errors.len());
    }

    match cli.command {
        Commands::Keys {
            chain,
            token,
            timestamp_ms,
        } => {
            init_logging_simple();
            cli::print_keys(chain, &token, timestamp_ms, &config.cluster)?;
        }
        Commands::State {
            chain,
            token,
            at_ms,
        } => {
            init_logging_simple();
            if config.store.backend == StoreBackend::Memory {
                warn!("memory backend holds no state between runs; configure redis to inspect live state");
            }
            let store = connect_store(&config).await?;
            let detector = ClusterDetector::from_config(store, &config.store);
            let at_ms = at_ms.unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
            cli::show_token_state(&detector, chain, &token, at_ms, &config.cluster).await?;
        }
        Commands::Run { input } => {
            let _guard = init_logging(&config.logging);
            run_ingest(&config, &input).await?;
        }
    }

    Ok(())
}

async fn connect_store(config: &AppConfig) -> anyhow::Result<Arc<dyn TtlStore>> {
    let store: Arc<dyn TtlStore> = match config.store.backend {
        StoreBackend::Memory => Arc::new(InMemoryTtlStore::new()),
        StoreBackend::Redis => {
            let url = config
                .store
                .redis_url
                .as_deref()
                .context("store.redis_url is not set")?;
            Arc::new(RedisTtlStore::connect(url).await?)
        }
    };
    Ok(store)
}

async fn run_ingest(config: &AppConfig, input: &str) -> anyhow::Result<()> {
    let store = connect_store(config).await?;
    info!(
        backend = ?config.store.backend,
        consistency = ?config.store.consistency,
        "Starting cluster detection"
    );

    let sink: Box<dyn SignalSink> = if config.sink.dedup {
        Box::new(DedupSink::new(
            Arc::clone(&store),
            JsonLinesSink::stdout(),
            Duration::from_secs(config.sink.dedup_ttl_minutes * 60),
        ))
    } else {
        Box::new(JsonLinesSink::stdout())
    };

    let detector = ClusterDetector::from_config(store, &config.store);
    let ingestor = EventIngestor::new(detector, sink, config.cluster)
        .with_concurrency(config.ingest.concurrency);

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = if input == "-" {
        Box::new(BufReader::new(tokio::io::stdin()))
    } else {
        let file = tokio::fs::File::open(input)
            .await
            .with_context(|| format!("opening {input}"))?;
        Box::new(BufReader::new(file))
    };

    tokio::select! {
        result = ingestor.run(reader) => {
            let stats = result?;
            if stats.failed > 0 {
                warn!("{} events were not processed", stats.failed);
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown requested, stopping intake");
        }
    }

    Ok(())
}

/// Logs go to stderr; stdout carries the signal stream
fn init_logging(logging: &LoggingConfig) -> Option<WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},redis=warn", logging.level)));

    let text_layer = (!logging.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
    });
    let json_layer = logging
        .json
        .then(|| tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr));

    let mut guard = None;
    let file_layer = match logging.dir.as_deref().map(|dir| (dir, open_log_file(dir))) {
        Some((_, Ok(appender))) => {
            let (non_blocking, worker_guard) = tracing_appender::non_blocking(appender);
            guard = Some(worker_guard);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_target(true),
            )
        }
        Some((dir, Err(e))) => {
            eprintln!(
                "Warning: Could not open log file in {} ({:#}), file logging disabled",
                dir, e
            );
            None
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text_layer)
        .with(json_layer)
        .with(file_layer)
        .init();

    guard
}

/// Daily-rolling appender. `rolling::daily` panics when the first file can't
/// be created, and release builds abort on panic, so go through the builder.
fn open_log_file(dir: &str) -> anyhow::Result<RollingFileAppender> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {dir}"))?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("cluster-signals")
        .filename_suffix("log")
        .build(dir)?;
    Ok(appender)
}

fn init_logging_simple() {
    // Minimal logging for one-shot commands
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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
}
