//! Detector: scores log batches against the current model.

use crate::detection::features;
use crate::detection::TrainedModel;
use crate::errors::AppError;
use crate::models::anomaly::{AnomalyResult, DetectionReport};
use crate::models::log::LogRecord;
use crate::store::ModelStore;

/// Score `logs` against the store's current model.
///
/// The model snapshot is taken once up front, so a concurrent training run
/// cannot change it mid-batch.
pub async fn detect(
    store: &ModelStore,
    logs: Vec<LogRecord>,
    threshold: f64,
) -> Result<DetectionReport, AppError> {
    let model = store.load().await.ok_or(AppError::NotTrained)?;

    let report = tokio::task::spawn_blocking(move || score_batch(&model, &logs, threshold))
        .await
        .map_err(anyhow::Error::from)??;

    if report.anomaly_count > 0 {
        tracing::warn!(
            anomalies = report.anomaly_count,
            total = report.total_logs,
            threshold,
            "Anomalies detected"
        );
    } else {
        tracing::debug!(total = report.total_logs, "No anomalies detected");
    }
    Ok(report)
}

/// Score a batch with an explicit model. One result per record, in input order.
pub fn score_batch(
    model: &TrainedModel,
    logs: &[LogRecord],
    threshold: f64,
) -> Result<DetectionReport, AppError> {
    if !threshold.is_finite() {
        return Err(AppError::validation("threshold must be a finite number"));
    }

    let vectors = features::extract(logs)?;
    let scores = model.decision_scores(&vectors)?;

    let results = scores
        .into_iter()
        .enumerate()
        .map(|(idx, score)| AnomalyResult::new(idx, score, threshold))
        .collect();

    Ok(DetectionReport::from_results(results))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::fixtures::synthetic_logs;
    use crate::detection::trainer::Trainer;
    use crate::models::anomaly::DEFAULT_THRESHOLD;

    fn trained() -> TrainedModel {
        Trainer::default().fit(&synthetic_logs(200), 0.2).unwrap().0
    }

    #[test]
    fn test_results_are_index_aligned() {
        let model = trained();
        let logs = synthetic_logs(37);
        let report = score_batch(&model, &logs, DEFAULT_THRESHOLD).unwrap();

        assert_eq!(report.total_logs, logs.len());
        assert_eq!(report.anomalies.len(), logs.len());
        for (i, result) in report.anomalies.iter().enumerate() {
            assert_eq!(result.log_index, i);
            assert_eq!(result.is_anomaly, result.anomaly_score <= DEFAULT_THRESHOLD);
        }
    }

    #[test]
    fn test_extreme_record_scores_lower_than_typical() {
        let model = trained();
        let mut logs = synthetic_logs(30);
        let typical = logs[5].clone();
        let mut odd = typical.clone();
        odd.user_id = "SuspiciousBot".into();
        odd.endpoint = "/api/admin/export".into();
        odd.status_code = 500;
        odd.response_time = 45.0;
        odd.request_size = Some(5_000_000);
        odd.response_size = Some(90_000_000);
        logs.push(odd);

        let report = score_batch(&model, &logs, DEFAULT_THRESHOLD).unwrap();
        let odd_score = report.anomalies.last().unwrap().anomaly_score;
        assert!(odd_score < report.anomalies[5].anomaly_score);
        assert!(odd_score < 0.0);
    }

    #[test]
    fn test_threshold_zero_flags_every_negative_score() {
        let model = trained();
        let report = score_batch(&model, &synthetic_logs(50), 0.0).unwrap();
        let negatives = report
            .anomalies
            .iter()
            .filter(|a| a.anomaly_score <= 0.0)
            .count();
        assert_eq!(report.anomaly_count, negatives);
    }

    #[test]
    fn test_non_finite_threshold_is_rejected() {
        let model = trained();
        assert!(matches!(
            score_batch(&model, &synthetic_logs(3), f64::NAN),
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_detect_before_training_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ModelStore::new(tmp.path());
        let err = detect(&store, synthetic_logs(1), DEFAULT_THRESHOLD)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotTrained));
    }

    #[tokio::test]
    async fn test_empty_batch_against_trained_model() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ModelStore::new(tmp.path());
        Trainer::default()
            .train(&store, synthetic_logs(40), 0.2)
            .await
            .unwrap();

        let report = detect(&store, Vec::new(), DEFAULT_THRESHOLD).await.unwrap();
        assert_eq!(report.total_logs, 0);
        assert!(report.anomalies.is_empty());
    }
}
