//! Trainer: fits the scaler and forest on a log batch and publishes the result.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::config::Config;
use crate::detection::features::{self, FeatureVector, FEATURE_COUNT};
use crate::detection::forest::{ForestParams, IsolationForest};
use crate::detection::scaler::StandardScaler;
use crate::detection::TrainedModel;
use crate::errors::AppError;
use crate::models::anomaly::{ModelMetadata, TrainingReport};
use crate::models::log::LogRecord;
use crate::store::ModelStore;

/// Default share of the batch held out for validation.
pub const DEFAULT_TEST_SIZE: f64 = 0.2;

/// Smallest partitions a fit is attempted on.
const MIN_TRAIN_PARTITION: usize = 2;
const MIN_VALIDATION_PARTITION: usize = 1;

#[derive(Debug, Clone)]
pub struct Trainer {
    min_samples: usize,
    forest: ForestParams,
}

impl Trainer {
    pub fn new(min_samples: usize, forest: ForestParams) -> Self {
        Self { min_samples, forest }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            cfg.min_training_samples,
            ForestParams {
                n_estimators: cfg.n_estimators,
                max_samples: cfg.max_samples,
                contamination: cfg.contamination,
                seed: cfg.random_seed,
            },
        )
    }

    pub fn min_samples(&self) -> usize {
        self.min_samples
    }

    /// Fit a model on `logs` and publish it through `store`.
    ///
    /// Holds the store's writer slot for the whole run, so concurrent calls
    /// fail with `TrainingInProgress`. The previous model stays current on
    /// any error.
    pub async fn train(
        &self,
        store: &ModelStore,
        logs: Vec<LogRecord>,
        test_size: f64,
    ) -> Result<TrainingReport, AppError> {
        let guard = store.try_write()?;

        tracing::info!(logs = logs.len(), test_size, "Starting model training");
        let trainer = self.clone();
        let (model, report) = tokio::task::spawn_blocking(move || trainer.fit(&logs, test_size))
            .await
            .map_err(anyhow::Error::from)??;

        let model = store.save(guard, model).await?;
        tracing::info!(
            accuracy = model.metadata.accuracy,
            training_samples = report.training_samples,
            "Model training completed successfully"
        );
        Ok(report)
    }

    /// Pure fitting step: no I/O, no shared state.
    pub fn fit(
        &self,
        logs: &[LogRecord],
        test_size: f64,
    ) -> Result<(TrainedModel, TrainingReport), AppError> {
        if !(test_size > 0.0 && test_size < 1.0) {
            return Err(AppError::validation(format!(
                "test_size must be between 0 and 1 (exclusive), got {}",
                test_size
            )));
        }
        if logs.len() < self.min_samples {
            return Err(AppError::InsufficientData {
                got: logs.len(),
                required: self.min_samples,
            });
        }

        let vectors = features::extract(logs)?;
        let (train, validation) = self.split(&vectors, test_size)?;

        let scaler = StandardScaler::fit(&train)?;
        let train_scaled = scaler.transform_batch(&train);
        let validation_scaled = scaler.transform_batch(&validation);

        let forest = IsolationForest::fit(&train_scaled, &self.forest)?;

        let train_anomalies = count_outliers(&forest, &train_scaled);
        let test_anomalies = count_outliers(&forest, &validation_scaled);
        let accuracy = 1.0 - test_anomalies as f64 / validation_scaled.len() as f64;

        let trained_at = Utc::now();
        let metadata = ModelMetadata {
            trained_at,
            feature_count: FEATURE_COUNT,
            accuracy,
            training_samples: logs.len(),
            train_partition_size: train.len(),
            validation_partition_size: validation.len(),
            contamination: forest.contamination(),
            n_estimators: forest.n_estimators(),
        };

        let report = TrainingReport {
            accuracy,
            training_samples: logs.len(),
            train_anomalies,
            test_anomalies,
            timestamp: trained_at,
        };

        Ok((
            TrainedModel {
                forest,
                scaler,
                metadata,
            },
            report,
        ))
    }

    /// Seeded shuffle, then hold out `ceil(test_size * n)` rows for validation.
    fn split(
        &self,
        vectors: &[FeatureVector],
        test_size: f64,
    ) -> Result<(Vec<FeatureVector>, Vec<FeatureVector>), AppError> {
        let n = vectors.len();
        let n_validation = (test_size * n as f64).ceil() as usize;
        let n_train = n.saturating_sub(n_validation);

        if n_train < MIN_TRAIN_PARTITION || n_validation < MIN_VALIDATION_PARTITION {
            return Err(AppError::InsufficientData {
                got: n_train,
                required: MIN_TRAIN_PARTITION,
            });
        }

        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut StdRng::seed_from_u64(self.forest.seed));

        let (validation_idx, train_idx) = order.split_at(n_validation);
        Ok((
            train_idx.iter().map(|&i| vectors[i]).collect(),
            validation_idx.iter().map(|&i| vectors[i]).collect(),
        ))
    }
}

impl Default for Trainer {
    fn default() -> Self {
        Self::new(10, ForestParams::default())
    }
}

fn count_outliers(forest: &IsolationForest, rows: &[Vec<f64>]) -> usize {
    rows.iter()
        .filter(|r| forest.decision_function(r) < 0.0)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::fixtures::synthetic_logs;

    #[test]
    fn test_fit_reports_accuracy_and_sample_count() {
        let trainer = Trainer::default();
        let (model, report) = trainer.fit(&synthetic_logs(100), 0.2).unwrap();

        assert_eq!(report.training_samples, 100);
        assert!((0.0..=1.0).contains(&report.accuracy));
        assert_eq!(model.metadata.train_partition_size, 80);
        assert_eq!(model.metadata.validation_partition_size, 20);
        assert_eq!(model.metadata.feature_count, FEATURE_COUNT);
        assert_eq!(model.scaler.feature_count(), FEATURE_COUNT);
    }

    #[test]
    fn test_empty_batch_is_insufficient() {
        let err = Trainer::default().fit(&[], 0.2).unwrap_err();
        assert!(matches!(err, AppError::InsufficientData { got: 0, required: 10 }));
    }

    #[test]
    fn test_single_log_is_insufficient() {
        let err = Trainer::default().fit(&synthetic_logs(1), 0.2).unwrap_err();
        assert!(matches!(err, AppError::InsufficientData { .. }));
    }

    #[test]
    fn test_oversized_holdout_is_insufficient() {
        // 10 logs with 0.95 held out leaves no training rows
        let err = Trainer::default().fit(&synthetic_logs(10), 0.95).unwrap_err();
        assert!(matches!(err, AppError::InsufficientData { .. }));
    }

    #[test]
    fn test_test_size_bounds() {
        let logs = synthetic_logs(20);
        for bad in [0.0, 1.0, -0.1, 1.5, f64::NAN] {
            assert!(matches!(
                Trainer::default().fit(&logs, bad),
                Err(AppError::Validation(_))
            ));
        }
    }

    #[test]
    fn test_fit_is_reproducible_for_a_seed() {
        let logs = synthetic_logs(60);
        let (a, _) = Trainer::default().fit(&logs, 0.25).unwrap();
        let (b, _) = Trainer::default().fit(&logs, 0.25).unwrap();
        assert_eq!(a.forest, b.forest);
        assert_eq!(a.scaler, b.scaler);
    }

    #[tokio::test]
    async fn test_failed_training_keeps_previous_model() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ModelStore::new(tmp.path());
        let trainer = Trainer::default();

        trainer.train(&store, synthetic_logs(50), 0.2).await.unwrap();
        let before = store.status().await;

        let err = trainer.train(&store, Vec::new(), 0.2).await.unwrap_err();
        assert!(matches!(err, AppError::InsufficientData { .. }));
        assert_eq!(store.status().await, before);
    }
}
