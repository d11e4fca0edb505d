//! API log anomaly detector: library crate.
//!
//! The binary in `main.rs` wires these modules into a server and CLI;
//! integration tests in `tests/` drive the router directly.

pub mod api;
pub mod config;
pub mod detection;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod store;

use detection::trainer::Trainer;
use middleware::metrics::PrometheusRecorder;
use store::ModelStore;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub config: config::Config,
    pub store: ModelStore,
    pub trainer: Trainer,
    pub metrics: PrometheusRecorder,
}

impl AppState {
    /// Build state from config, loading any persisted model.
    pub async fn new(config: config::Config) -> anyhow::Result<Self> {
        let store = ModelStore::open(config.model_dir.clone()).await;
        let metrics = PrometheusRecorder::new()
            .map_err(|e| anyhow::anyhow!("registering metrics: {}", e))?;
        metrics.set_model_trained(store.load().await.is_some());

        Ok(Self {
            trainer: Trainer::from_config(&config),
            config,
            store,
            metrics,
        })
    }
}
