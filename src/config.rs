use std::path::PathBuf;

/// Placeholder token shipped with the service. Refused in production.
pub const PLACEHOLDER_TOKEN: &str = "your-secret-token";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Shared bearer secret for the protected endpoints.
    pub api_token: String,
    /// Directory holding the persisted model generations and `CURRENT` manifest.
    pub model_dir: PathBuf,
    /// Smallest training batch accepted. Set via ANOMALY_MIN_TRAINING_SAMPLES. Default: 10.
    pub min_training_samples: usize,
    /// Largest batch accepted by `/train` and `/detect`. Bounds training time.
    pub max_batch_size: usize,
    pub n_estimators: usize,
    /// Sub-sample size per isolation tree.
    pub max_samples: usize,
    /// Expected share of outliers in training data, in (0, 0.5].
    pub contamination: f64,
    pub random_seed: u64,
    /// When set, logs are also written to a daily-rolling file in this directory.
    pub log_dir: Option<PathBuf>,
    pub dashboard_origin: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            api_token: PLACEHOLDER_TOKEN.to_string(),
            model_dir: PathBuf::from("models"),
            min_training_samples: 10,
            max_batch_size: 50_000,
            n_estimators: 100,
            max_samples: 256,
            contamination: 0.1,
            random_seed: 42,
            log_dir: None,
            dashboard_origin: "http://localhost:3000".to_string(),
        }
    }
}

impl Config {
    /// Reject settings the trainer cannot work with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            anyhow::bail!(
                "ANOMALY_CONTAMINATION must be in (0, 0.5], got {}",
                self.contamination
            );
        }
        if self.n_estimators == 0 {
            anyhow::bail!("ANOMALY_N_ESTIMATORS must be at least 1");
        }
        if self.max_samples < 2 {
            anyhow::bail!("ANOMALY_MAX_SAMPLES must be at least 2");
        }
        if self.min_training_samples < 3 {
            anyhow::bail!("ANOMALY_MIN_TRAINING_SAMPLES must be at least 3");
        }
        if self.max_batch_size < self.min_training_samples {
            anyhow::bail!("ANOMALY_MAX_BATCH_SIZE must not be below ANOMALY_MIN_TRAINING_SAMPLES");
        }
        if self.api_token.trim().is_empty() {
            anyhow::bail!("ANOMALY_API_TOKEN must not be empty");
        }
        Ok(())
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let defaults = Config::default();

    let api_token =
        std::env::var("ANOMALY_API_TOKEN").unwrap_or_else(|_| PLACEHOLDER_TOKEN.into());

    if api_token == PLACEHOLDER_TOKEN {
        let env_mode = std::env::var("ANOMALY_ENV")
            .or_else(|_| std::env::var("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "ANOMALY_API_TOKEN is still the insecure placeholder. \
                 Set a proper secret before running in production."
            );
        }
        eprintln!("⚠️  ANOMALY_API_TOKEN is not set, using insecure placeholder. Set a real secret for production.");
    }

    let cfg = Config {
        port: env_or("ANOMALY_PORT", defaults.port),
        api_token,
        model_dir: std::env::var("ANOMALY_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.model_dir),
        min_training_samples: env_or("ANOMALY_MIN_TRAINING_SAMPLES", defaults.min_training_samples),
        max_batch_size: env_or("ANOMALY_MAX_BATCH_SIZE", defaults.max_batch_size),
        n_estimators: env_or("ANOMALY_N_ESTIMATORS", defaults.n_estimators),
        max_samples: env_or("ANOMALY_MAX_SAMPLES", defaults.max_samples),
        contamination: env_or("ANOMALY_CONTAMINATION", defaults.contamination),
        random_seed: env_or("ANOMALY_RANDOM_SEED", defaults.random_seed),
        log_dir: std::env::var("ANOMALY_LOG_DIR")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from),
        dashboard_origin: std::env::var("DASHBOARD_ORIGIN")
            .unwrap_or(defaults.dashboard_origin),
    };

    cfg.validate()?;
    Ok(cfg)
}
