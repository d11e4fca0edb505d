use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Threshold applied by `/detect` when the caller does not supply one.
pub const DEFAULT_THRESHOLD: f64 = -0.5;

/// Coarse bucket for an anomalous score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn from_score(score: f64) -> Self {
        if score < -0.8 {
            Severity::High
        } else if score < -0.5 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

/// Score for one input record. `log_index` joins back to the request batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub log_index: usize,
    /// Lower (more negative) is more anomalous.
    pub anomaly_score: f64,
    pub is_anomaly: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

impl AnomalyResult {
    pub fn new(log_index: usize, anomaly_score: f64, threshold: f64) -> Self {
        let is_anomaly = anomaly_score <= threshold;
        Self {
            log_index,
            anomaly_score,
            is_anomaly,
            severity: is_anomaly.then(|| Severity::from_score(anomaly_score)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionReport {
    pub anomaly_count: usize,
    pub anomalies: Vec<AnomalyResult>,
    pub total_logs: usize,
    pub anomaly_rate: f64,
    /// Mean decision score across the batch.
    pub model_confidence: f64,
    pub timestamp: DateTime<Utc>,
}

impl DetectionReport {
    pub fn from_results(anomalies: Vec<AnomalyResult>) -> Self {
        let total_logs = anomalies.len();
        let anomaly_count = anomalies.iter().filter(|a| a.is_anomaly).count();
        let (anomaly_rate, model_confidence) = if total_logs == 0 {
            (0.0, 0.0)
        } else {
            let n = total_logs as f64;
            (
                anomaly_count as f64 / n,
                anomalies.iter().map(|a| a.anomaly_score).sum::<f64>() / n,
            )
        };
        Self {
            anomaly_count,
            anomalies,
            total_logs,
            anomaly_rate,
            model_confidence,
            timestamp: Utc::now(),
        }
    }
}

/// Outcome of a successful training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub accuracy: f64,
    pub training_samples: usize,
    pub train_anomalies: usize,
    pub test_anomalies: usize,
    pub timestamp: DateTime<Utc>,
}

/// Metadata persisted next to the model artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub trained_at: DateTime<Utc>,
    pub feature_count: usize,
    /// Share of the validation partition scored as normal.
    pub accuracy: f64,
    pub training_samples: usize,
    pub train_partition_size: usize,
    pub validation_partition_size: usize,
    pub contamination: f64,
    pub n_estimators: usize,
}

/// Read-only view over the current model, served by `/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub is_trained: bool,
    pub training_date: Option<DateTime<Utc>>,
    pub model_accuracy: Option<f64>,
    pub feature_count: usize,
}

impl ServiceStatus {
    pub fn untrained() -> Self {
        Self {
            is_trained: false,
            training_date: None,
            model_accuracy: None,
            feature_count: 0,
        }
    }
}

impl From<&ModelMetadata> for ServiceStatus {
    fn from(meta: &ModelMetadata) -> Self {
        Self {
            is_trained: true,
            training_date: Some(meta.trained_at),
            model_accuracy: Some(meta.accuracy),
            feature_count: meta.feature_count,
        }
    }
}
