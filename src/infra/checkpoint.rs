// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves and restores model weights together with the scalar
// training state needed to resume a run.
//
// What gets saved per checkpoint:
//   1. Model weights (.mpk.gz) — full precision Burn record
//   2. Training state (.json)  — current epoch, best epoch so far
//                                and its validation measure
//
// File naming convention:
//   saved_models/
//     train_model_0.mpk.gz       ← weights after epoch 0
//     train_model_0.json         ← state after epoch 0
//     ...
//     train_model_latest.mpk.gz  ← copy of the most recent epoch
//     train_model_latest.json
//     train_model_3_best.mpk.gz  ← best epoch, renamed after testing
//     train_model_3_best.json
//     train_config.json          ← how to rebuild the model
//
// Weights go through NamedMpkGzFileRecorder with full precision
// so a reload gives back exactly the parameters that were saved.

use anyhow::{Context, Result};
use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkGzFileRecorder, Recorder},
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::domain::settings::ResumeMode;

type CheckpointRecorder = NamedMpkGzFileRecorder<FullPrecisionSettings>;

const MODEL_PREFIX: &str = "train_model";
const RECORD_EXT:   &str = "mpk.gz";
const CONFIG_FILE:  &str = "train_config.json";

/// Scalar state stored next to every checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingState {
    pub current_epoch: usize,
    pub best_epoch:    usize,
    /// Best mean validation measure so far; None until one epoch has been validated.
    pub best_measure:  Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointTag {
    Epoch(usize),
    Latest,
    Best(usize),
}

impl CheckpointTag {
    fn stem(&self) -> String {
        match self {
            Self::Epoch(e) => format!("{MODEL_PREFIX}_{e}"),
            Self::Latest   => format!("{MODEL_PREFIX}_latest"),
            Self::Best(e)  => format!("{MODEL_PREFIX}_{e}_best"),
        }
    }
}

pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, tag: CheckpointTag) -> PathBuf {
        self.dir.join(tag.stem())
    }

    fn state_path(&self, tag: CheckpointTag) -> PathBuf {
        self.dir.join(format!("{}.json", tag.stem()))
    }

    /// True when both the weights and the state file for `tag` exist.
    pub fn exists(&self, tag: CheckpointTag) -> bool {
        self.record_path(tag).with_extension(RECORD_EXT).exists() && self.state_path(tag).exists()
    }

    pub fn save<B: Backend, M: Module<B>>(
        &self,
        model: &M,
        state: &TrainingState,
        tag:   CheckpointTag,
    ) -> Result<()> {
        let path = self.record_path(tag);
        CheckpointRecorder::new()
            .record(model.clone().into_record(), path.clone())
            .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;

        let state_path = self.state_path(tag);
        fs::write(&state_path, serde_json::to_string_pretty(state)?)
            .with_context(|| format!("Failed to write '{}'", state_path.display()))?;

        tracing::debug!("Saved checkpoint '{}'", tag.stem());
        Ok(())
    }

    pub fn load<B: Backend, M: Module<B>>(
        &self,
        model:  M,
        tag:    CheckpointTag,
        device: &B::Device,
    ) -> Result<(M, TrainingState)> {
        let path = self.record_path(tag);
        let record = CheckpointRecorder::new()
            .load(path.clone(), device)
            .with_context(|| format!("Cannot load checkpoint '{}'", path.display()))?;

        let state_path = self.state_path(tag);
        let json = fs::read_to_string(&state_path)
            .with_context(|| format!("Cannot read '{}'", state_path.display()))?;
        let state: TrainingState = serde_json::from_str(&json)
            .with_context(|| format!("Malformed training state in '{}'", state_path.display()))?;

        tracing::info!("Loaded checkpoint '{}' (epoch {})", tag.stem(), state.current_epoch);
        Ok((model.load_record(record), state))
    }

    /// Apply a resume mode: returns the (possibly restored) model and the
    /// state to continue from, or None for a fresh start.
    pub fn resume<B: Backend, M: Module<B>>(
        &self,
        model:  M,
        mode:   ResumeMode,
        device: &B::Device,
    ) -> Result<(M, Option<TrainingState>)> {
        match mode {
            ResumeMode::Fresh => Ok((model, None)),
            ResumeMode::Latest if !self.exists(CheckpointTag::Latest) => {
                tracing::warn!(
                    "No 'latest' checkpoint in '{}', starting from epoch 0",
                    self.dir.display()
                );
                Ok((model, None))
            }
            ResumeMode::Latest => {
                let (model, state) = self.load(model, CheckpointTag::Latest, device)?;
                Ok((model, Some(state)))
            }
            ResumeMode::FromEpoch(epoch) => {
                let (model, state) = self
                    .load(model, CheckpointTag::Epoch(epoch), device)
                    .with_context(|| format!("Cannot resume from epoch {epoch}"))?;
                Ok((model, Some(state)))
            }
        }
    }

    /// Rename an epoch's checkpoint pair to its `_best` name.
    pub fn mark_best(&self, epoch: usize) -> Result<()> {
        let from = CheckpointTag::Epoch(epoch);
        let to   = CheckpointTag::Best(epoch);
        let renames = [
            (self.record_path(from).with_extension(RECORD_EXT), self.record_path(to).with_extension(RECORD_EXT)),
            (self.state_path(from), self.state_path(to)),
        ];
        for (src, dst) in renames {
            fs::rename(&src, &dst).with_context(|| {
                format!("Cannot rename '{}' to '{}'", src.display(), dst.display())
            })?;
        }
        tracing::info!("Marked epoch {} as best", epoch);
        Ok(())
    }

    /// Epoch of the checkpoint carrying the `_best` suffix, if any.
    pub fn find_best(&self) -> Result<Option<usize>> {
        let suffix = "_best.json";
        let prefix = format!("{MODEL_PREFIX}_");
        let mut best = None;
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("Cannot read directory '{}'", self.dir.display()))?
        {
            let name = entry?.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(epoch) = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(suffix))
                .and_then(|e| e.parse::<usize>().ok())
            {
                best = Some(best.map_or(epoch, |b: usize| b.max(epoch)));
            }
        }
        Ok(best)
    }

    pub fn save_config<T: Serialize>(&self, cfg: &T) -> Result<()> {
        let path = self.dir.join(CONFIG_FILE);
        fs::write(&path, serde_json::to_string_pretty(cfg)?)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(())
    }

    pub fn load_config<T: DeserializeOwned>(&self) -> Result<T> {
        let path = self.dir.join(CONFIG_FILE);
        let json = fs::read_to_string(&path).with_context(|| {
            format!(
                "Cannot read config from '{}'. Make sure you have run 'train' before 'detect'.",
                path.display()
            )
        })?;
        Ok(serde_json::from_str(&json)?)
    }
}
