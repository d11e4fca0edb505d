//! ModelStore: the single current model, in memory and on disk.
//!
//! ## Disk layout
//!
//! ```text
//! <model_dir>/
//!   CURRENT                          # manifest: generation id + artifact digests
//!   generations/<uuid>/isolation_forest.json
//!   generations/<uuid>/scaler.json
//!   generations/<uuid>/metadata.json
//! ```
//!
//! A save writes a complete new generation, then renames `CURRENT.tmp` over
//! `CURRENT`. Readers resolve the manifest first, so they only ever see a
//! fully written generation. In memory the current model is an
//! `Arc<TrainedModel>` swapped under a `RwLock`; readers clone the `Arc` and
//! keep a consistent snapshot for as long as they need it.
//!
//! Writes (train, reload) are serialised through [`WriteGuard`]; a second
//! writer is turned away instead of queued. A save runs as its own task that
//! owns the guard, so a caller going away mid-save cannot release the writer
//! slot early or leave disk and memory pointing at different models.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::detection::forest::IsolationForest;
use crate::detection::scaler::StandardScaler;
use crate::detection::TrainedModel;
use crate::errors::AppError;
use crate::models::anomaly::{ModelMetadata, ServiceStatus};

const CURRENT_MANIFEST: &str = "CURRENT";
const GENERATIONS_DIR: &str = "generations";
const FOREST_FILE: &str = "isolation_forest.json";
const SCALER_FILE: &str = "scaler.json";
const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    generation: Uuid,
    published_at: DateTime<Utc>,
    /// Artifact file name → SHA-256 hex digest.
    artifacts: BTreeMap<String, String>,
}

/// Proof that the caller is the only writer. Held for the whole train/reload.
pub struct WriteGuard {
    _lock: OwnedMutexGuard<()>,
}

/// Cheap to clone; clones share the same current model and writer slot.
#[derive(Clone)]
pub struct ModelStore {
    dir: PathBuf,
    current: Arc<RwLock<Option<Arc<TrainedModel>>>>,
    writer: Arc<Mutex<()>>,
}

impl ModelStore {
    /// An empty store rooted at `dir`. Nothing is read from disk.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            current: Arc::new(RwLock::new(None)),
            writer: Arc::new(Mutex::new(())),
        }
    }

    /// Open the store and load the persisted model, if any.
    ///
    /// A missing or unreadable model is not fatal: the store starts untrained.
    pub async fn open(dir: impl Into<PathBuf>) -> Self {
        let store = Self::new(dir);
        let dir = store.dir.clone();
        match tokio::task::spawn_blocking(move || read_current(&dir)).await {
            Ok(Ok(Some(model))) => {
                tracing::info!(
                    dir = %store.dir.display(),
                    trained_at = %model.metadata.trained_at,
                    "Loaded persisted model"
                );
                *store.current.write().await = Some(Arc::new(model));
            }
            Ok(Ok(None)) => {
                tracing::info!(
                    dir = %store.dir.display(),
                    "No persisted model; starting untrained"
                );
            }
            Ok(Err(e)) => {
                tracing::warn!("Failed to load persisted model, starting untrained: {:#}", e);
            }
            Err(e) => {
                tracing::warn!("Model load task failed, starting untrained: {}", e);
            }
        }
        store
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Claim the single writer slot, or fail fast if another write is running.
    pub fn try_write(&self) -> Result<WriteGuard, AppError> {
        Arc::clone(&self.writer)
            .try_lock_owned()
            .map(|lock| WriteGuard { _lock: lock })
            .map_err(|_| AppError::TrainingInProgress)
    }

    /// Persist `model` and make it current. On error nothing changes.
    ///
    /// Consumes the guard: the write, the `CURRENT` rename and the in-memory
    /// swap run to completion in a spawned task even if this future is
    /// dropped, and the writer slot is released only once they are done.
    pub async fn save(
        &self,
        guard: WriteGuard,
        model: TrainedModel,
    ) -> Result<Arc<TrainedModel>, AppError> {
        let store = self.clone();
        let model = Arc::new(model);

        let publish = tokio::spawn(async move {
            let _guard = guard;
            let dir = store.dir.clone();
            let to_write = Arc::clone(&model);
            let generation =
                tokio::task::spawn_blocking(move || write_generation(&dir, &to_write))
                    .await
                    .map_err(anyhow::Error::from)??;

            *store.current.write().await = Some(Arc::clone(&model));
            tracing::info!(%generation, "Published new model");
            Ok::<_, AppError>(model)
        });

        publish.await.map_err(anyhow::Error::from)?
    }

    /// The current model, if one has been published.
    pub async fn load(&self) -> Option<Arc<TrainedModel>> {
        self.current.read().await.clone()
    }

    pub async fn status(&self) -> ServiceStatus {
        match self.load().await {
            Some(model) => ServiceStatus::from(&model.metadata),
            None => ServiceStatus::untrained(),
        }
    }

    /// Replace the in-memory model with whatever `CURRENT` points at on disk.
    pub async fn reload_from_disk(
        &self,
        _guard: &WriteGuard,
    ) -> Result<Arc<TrainedModel>, AppError> {
        let dir = self.dir.clone();
        let loaded = tokio::task::spawn_blocking(move || read_current(&dir))
            .await
            .map_err(anyhow::Error::from)??;

        let model = Arc::new(loaded.ok_or(AppError::ModelNotFound)?);
        *self.current.write().await = Some(Arc::clone(&model));
        tracing::info!(trained_at = %model.metadata.trained_at, "Model reloaded from disk");
        Ok(model)
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file =
        File::create(path).with_context(|| format!("creating {}", path.display()))?;
    file.write_all(bytes)
        .with_context(|| format!("writing {}", path.display()))?;
    file.sync_all()
        .with_context(|| format!("syncing {}", path.display()))?;
    Ok(())
}

fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Write a new generation and publish it through `CURRENT`. Returns its id.
fn write_generation(root: &Path, model: &TrainedModel) -> Result<Uuid> {
    let generation = Uuid::new_v4();
    let gen_dir = root.join(GENERATIONS_DIR).join(generation.to_string());
    fs::create_dir_all(&gen_dir)
        .with_context(|| format!("creating {}", gen_dir.display()))?;

    if let Err(e) = publish_generation(root, &gen_dir, generation, model) {
        let _ = fs::remove_dir_all(&gen_dir);
        return Err(e);
    }

    prune_generations(root, generation);
    Ok(generation)
}

fn publish_generation(
    root: &Path,
    gen_dir: &Path,
    generation: Uuid,
    model: &TrainedModel,
) -> Result<()> {
    let artifacts = [
        (FOREST_FILE, serde_json::to_vec(&model.forest)?),
        (SCALER_FILE, serde_json::to_vec(&model.scaler)?),
        (METADATA_FILE, serde_json::to_vec_pretty(&model.metadata)?),
    ];

    let mut digests = BTreeMap::new();
    for (name, bytes) in &artifacts {
        write_synced(&gen_dir.join(name), bytes)?;
        digests.insert(name.to_string(), digest(bytes));
    }

    let manifest = Manifest {
        generation,
        published_at: Utc::now(),
        artifacts: digests,
    };
    let tmp = root.join(format!("{}.tmp", CURRENT_MANIFEST));
    write_synced(&tmp, &serde_json::to_vec_pretty(&manifest)?)?;
    fs::rename(&tmp, root.join(CURRENT_MANIFEST)).context("publishing CURRENT manifest")?;

    // make the rename durable; not every platform allows syncing a directory
    if let Ok(dir) = File::open(root) {
        let _ = dir.sync_all();
    }
    Ok(())
}

/// Best-effort removal of every generation except `keep`.
fn prune_generations(root: &Path, keep: Uuid) {
    let keep = keep.to_string();
    let entries = match fs::read_dir(root.join(GENERATIONS_DIR)) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Could not list model generations: {}", e);
            return;
        }
    };
    for entry in entries.flatten() {
        if entry.file_name().to_string_lossy() == keep {
            continue;
        }
        if let Err(e) = fs::remove_dir_all(entry.path()) {
            tracing::warn!(
                path = %entry.path().display(),
                "Could not prune old generation: {}",
                e
            );
        }
    }
}

fn read_artifact<T: DeserializeOwned>(
    gen_dir: &Path,
    name: &str,
    manifest: &Manifest,
) -> Result<T> {
    let path = gen_dir.join(name);
    let bytes = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
    let expected = manifest
        .artifacts
        .get(name)
        .with_context(|| format!("manifest has no digest for {}", name))?;
    if &digest(&bytes) != expected {
        anyhow::bail!("digest mismatch for {}", path.display());
    }
    serde_json::from_slice(&bytes).with_context(|| format!("decoding {}", path.display()))
}

/// Load the generation `CURRENT` points at. `Ok(None)` if nothing was ever saved.
fn read_current(root: &Path) -> Result<Option<TrainedModel>> {
    let manifest_path = root.join(CURRENT_MANIFEST);
    let raw = match fs::read(&manifest_path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("reading {}", manifest_path.display()))
        }
    };
    let manifest: Manifest =
        serde_json::from_slice(&raw).context("decoding CURRENT manifest")?;
    let gen_dir = root
        .join(GENERATIONS_DIR)
        .join(manifest.generation.to_string());

    let forest: IsolationForest = read_artifact(&gen_dir, FOREST_FILE, &manifest)?;
    let scaler: StandardScaler = read_artifact(&gen_dir, SCALER_FILE, &manifest)?;
    let metadata: ModelMetadata = read_artifact(&gen_dir, METADATA_FILE, &manifest)?;

    if forest.feature_count() != scaler.feature_count()
        || scaler.feature_count() != metadata.feature_count
    {
        anyhow::bail!(
            "inconsistent feature counts in generation {}: forest {}, scaler {}, metadata {}",
            manifest.generation,
            forest.feature_count(),
            scaler.feature_count(),
            metadata.feature_count
        );
    }

    Ok(Some(TrainedModel {
        forest,
        scaler,
        metadata,
    }))
}
