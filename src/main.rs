use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use anomaly_detector::detection::detector;
use anomaly_detector::detection::trainer::Trainer;
use anomaly_detector::models::log::LogRecord;
use anomaly_detector::store::ModelStore;
use anomaly_detector::{api, config, AppState};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let cfg = config::load()?;

    // The guard flushes the file appender on drop; keep it for the whole run.
    let _log_guard = init_tracing(cfg.log_dir.as_deref());

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::Train { file, test_size }) => {
            let logs = read_logs(&file)?;
            let store = ModelStore::open(cfg.model_dir.clone()).await;
            let report = Trainer::from_config(&cfg)
                .train(&store, logs, test_size)
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Some(cli::Commands::Detect {
            file,
            threshold,
            only_anomalies,
        }) => {
            let logs = read_logs(&file)?;
            let store = ModelStore::open(cfg.model_dir.clone()).await;
            let mut report = detector::detect(&store, logs, threshold).await?;
            if only_anomalies {
                report.anomalies.retain(|a| a.is_anomaly);
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Some(cli::Commands::Status) => {
            let store = ModelStore::open(cfg.model_dir.clone()).await;
            println!("{}", serde_json::to_string_pretty(&store.status().await)?);
            Ok(())
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

fn init_tracing(log_dir: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // Export spans over OTLP only when a collector is configured.
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        match opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "anomaly-detector"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
        {
            Ok(tracer) => Some(tracing_opentelemetry::layer().with_tracer(tracer)),
            Err(e) => {
                eprintln!("failed to install OpenTelemetry tracer, continuing without it: {}", e);
                None
            }
        }
    } else {
        None
    };

    // Daily files, keeping the last 30 days.
    let appender = log_dir.and_then(|dir| {
        RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("anomaly_detection")
            .filename_suffix("log")
            .max_log_files(30)
            .build(dir)
            .map_err(|e| eprintln!("failed to open log directory {}: {}", dir.display(), e))
            .ok()
    });
    let (file_layer, guard) = match appender {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                ),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "anomaly_detector=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .with(telemetry_layer)
        .init();

    guard
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    tracing::info!(model_dir = %cfg.model_dir.display(), "Opening model store...");
    let state = Arc::new(AppState::new(cfg).await?);

    let app = api::router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    tracing::info!("Anomaly detector listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Read log records from a JSON file: either a bare array or `{"logs": [...]}`.
fn read_logs(path: &Path) -> anyhow::Result<Vec<LogRecord>> {
    let raw = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let value: serde_json::Value =
        serde_json::from_slice(&raw).with_context(|| format!("parsing {}", path.display()))?;

    let logs = match value {
        serde_json::Value::Array(_) => value,
        serde_json::Value::Object(mut obj) => obj
            .remove("logs")
            .ok_or_else(|| anyhow::anyhow!("{} has no `logs` array", path.display()))?,
        _ => anyhow::bail!("{} must hold a JSON array of log records", path.display()),
    };

    serde_json::from_value(logs)
        .with_context(|| format!("decoding log records in {}", path.display()))
}
