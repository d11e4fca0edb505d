use serde::{Deserialize, Serialize};

/// Per-column standardisation: `(x - mean) / std`.
///
/// Columns with zero variance keep a scale of 1 so they map to 0 instead of NaN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    pub fn fit<V: AsRef<[f64]>>(samples: &[V]) -> anyhow::Result<Self> {
        let first = samples
            .first()
            .ok_or_else(|| anyhow::anyhow!("cannot fit scaler on an empty sample set"))?;
        let width = first.as_ref().len();
        if samples.iter().any(|s| s.as_ref().len() != width) {
            anyhow::bail!("cannot fit scaler on rows of differing width");
        }

        let n = samples.len() as f64;
        let mut mean = vec![0.0; width];
        for sample in samples {
            for (m, v) in mean.iter_mut().zip(sample.as_ref()) {
                *m += v;
            }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut variance = vec![0.0; width];
        for sample in samples {
            for ((var, v), m) in variance.iter_mut().zip(sample.as_ref()).zip(&mean) {
                *var += (v - m).powi(2);
            }
        }

        let scale = variance
            .into_iter()
            .map(|var| {
                let std = (var / n).sqrt();
                if std > f64::EPSILON {
                    std
                } else {
                    1.0
                }
            })
            .collect();

        Ok(Self { mean, scale })
    }

    pub fn feature_count(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, sample: &[f64]) -> Vec<f64> {
        sample
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }

    pub fn transform_batch<V: AsRef<[f64]>>(&self, samples: &[V]) -> Vec<Vec<f64>> {
        samples.iter().map(|s| self.transform(s.as_ref())).collect()
    }
}
