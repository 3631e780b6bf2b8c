//! Checkpoint persistence.
//!
//! A checkpoint is a directory holding the serialized model state and a
//! `meta.json` with the metrics at save time. Best-metric snapshots are
//! labelled copies of an already-saved step, so a step that is best under
//! several metrics is written once and labelled many times.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{checkpoint_error, IoResultExt, TrainResult};

const STATE_FILE: &str = "model.bin";
const META_FILE: &str = "meta.json";

/// Metrics and position recorded alongside a saved model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub step: usize,
    pub epoch: usize,
    pub valid_cross_entropy: f64,
    pub valid_bleu: f64,
    pub valid_perplexity: f64,
    pub saved_at: String,
}

impl CheckpointMeta {
    pub fn new(step: usize, epoch: usize) -> Self {
        CheckpointMeta {
            step,
            epoch,
            valid_cross_entropy: f64::NAN,
            valid_bleu: f64::NAN,
            valid_perplexity: f64::NAN,
            saved_at: Utc::now().to_rfc3339(),
        }
    }
}

/// Reference to one saved checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointHandle {
    pub dir: PathBuf,
    pub step: usize,
}

/// Where checkpoints go. The training loop saves through this seam so
/// tests can observe save behavior without touching a filesystem.
pub trait CheckpointStore {
    /// Persist model state and metadata for one step.
    fn save(&mut self, state: &[u8], meta: &CheckpointMeta) -> TrainResult<CheckpointHandle>;

    /// Label an already-saved checkpoint, e.g. `best_bleu`. Replaces any
    /// previous holder of the label.
    fn backup_as(&mut self, handle: &CheckpointHandle, label: &str) -> TrainResult<()>;

    /// The highest-step saved checkpoint, if any.
    fn load_latest(&self) -> TrainResult<Option<(Vec<u8>, CheckpointMeta)>>;
}

/// Directory-per-step store under a fixed root.
pub struct FsCheckpointStore {
    root: PathBuf,
}

impl FsCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsCheckpointStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn step_dir(&self, step: usize) -> PathBuf {
        self.root.join(format!("step_{step}"))
    }

    fn read_checkpoint(dir: &Path) -> TrainResult<(Vec<u8>, CheckpointMeta)> {
        let state = fs::read(dir.join(STATE_FILE)).with_path(dir)?;
        let meta_bytes = fs::read(dir.join(META_FILE)).with_path(dir)?;
        let meta: CheckpointMeta = serde_json::from_slice(&meta_bytes)
            .map_err(|e| checkpoint_error(format!("parsing {META_FILE}: {e}"), dir))?;
        Ok((state, meta))
    }
}

impl CheckpointStore for FsCheckpointStore {
    fn save(&mut self, state: &[u8], meta: &CheckpointMeta) -> TrainResult<CheckpointHandle> {
        let dir = self.step_dir(meta.step);
        fs::create_dir_all(&dir).with_path(&dir)?;
        fs::write(dir.join(STATE_FILE), state).with_path(&dir)?;
        let meta_json = serde_json::to_vec_pretty(meta)
            .map_err(|e| checkpoint_error(format!("serializing {META_FILE}: {e}"), &dir))?;
        fs::write(dir.join(META_FILE), meta_json).with_path(&dir)?;
        info!(step = meta.step, dir = %dir.display(), "saved checkpoint");
        Ok(CheckpointHandle {
            dir,
            step: meta.step,
        })
    }

    fn backup_as(&mut self, handle: &CheckpointHandle, label: &str) -> TrainResult<()> {
        let target = self.root.join(label);
        if target.exists() {
            fs::remove_dir_all(&target).with_path(&target)?;
        }
        fs::create_dir_all(&target).with_path(&target)?;
        for name in [STATE_FILE, META_FILE] {
            fs::copy(handle.dir.join(name), target.join(name)).with_path(&handle.dir)?;
        }
        info!(step = handle.step, label, "labelled checkpoint");
        Ok(())
    }

    fn load_latest(&self) -> TrainResult<Option<(Vec<u8>, CheckpointMeta)>> {
        if !self.root.exists() {
            return Ok(None);
        }
        let mut latest: Option<(usize, PathBuf)> = None;
        for entry in fs::read_dir(&self.root).with_path(&self.root)? {
            let entry = entry.with_path(&self.root)?;
            let name = entry.file_name();
            let Some(step) = name
                .to_str()
                .and_then(|n| n.strip_prefix("step_"))
                .and_then(|n| n.parse::<usize>().ok())
            else {
                continue;
            };
            if latest.as_ref().map_or(true, |(s, _)| step > *s) {
                latest = Some((step, entry.path()));
            }
        }
        match latest {
            Some((_, dir)) => Self::read_checkpoint(&dir).map(Some),
            None => Ok(None),
        }
    }
}
