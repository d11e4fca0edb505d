//! The anomaly-detection core: feature extraction, scaling, the isolation
//! forest, and the train/detect paths built on them.

pub mod detector;
pub mod features;
pub mod forest;
pub mod scaler;
pub mod trainer;

use crate::models::anomaly::ModelMetadata;
use forest::IsolationForest;
use scaler::StandardScaler;

/// A fitted detector: forest, the scaler it was trained behind, and metadata.
///
/// Immutable once built; the model store shares it behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainedModel {
    pub forest: IsolationForest,
    pub scaler: StandardScaler,
    pub metadata: ModelMetadata,
}

impl TrainedModel {
    /// Scale and score raw feature vectors. Lower is more anomalous.
    pub fn decision_scores<V: AsRef<[f64]>>(&self, vectors: &[V]) -> anyhow::Result<Vec<f64>> {
        let expected = self.scaler.feature_count();
        if let Some(bad) = vectors.iter().find(|v| v.as_ref().len() != expected) {
            anyhow::bail!(
                "feature layout mismatch: model expects {} features, got {}",
                expected,
                bad.as_ref().len()
            );
        }
        Ok(vectors
            .iter()
            .map(|v| self.forest.decision_function(&self.scaler.transform(v.as_ref())))
            .collect())
    }
}
