// ============================================================
// Layer 6 — Run Directory Layout
// ============================================================
// Where a training run and a detection run keep their files:
//
//   <results>/<experiment>/
//     result_outputs/   summary.csv, test_summary.csv
//     saved_models/     train_model_<epoch>.{mpk.gz,json}, train_config.json
//
//   <results>/anomaly_detection/<experiment>___<detection>/
//     tables/           val_summary.csv, test_summary.csv
//     anomaly_maps/
//       val/            <image name>.mpk.gz
//       test/
//
// Building a layout only computes paths; nothing touches the
// disk until `create_dirs()` is called.

use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone)]
pub struct ExperimentLayout {
    root:    PathBuf,
    outputs: PathBuf,
    models:  PathBuf,
}

impl ExperimentLayout {
    pub fn new(results_dir: impl AsRef<Path>, experiment_name: &str) -> Self {
        let root = results_dir.as_ref().join(experiment_name);
        Self {
            outputs: root.join("result_outputs"),
            models:  root.join("saved_models"),
            root,
        }
    }

    pub fn create_dirs(&self) -> Result<()> {
        for dir in [&self.outputs, &self.models] {
            fs::create_dir_all(dir)
                .with_context(|| format!("Cannot create directory '{}'", dir.display()))?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn saved_models_dir(&self) -> &Path {
        &self.models
    }

    pub fn summary_csv(&self) -> PathBuf {
        self.outputs.join("summary.csv")
    }

    pub fn test_summary_csv(&self) -> PathBuf {
        self.outputs.join("test_summary.csv")
    }
}

#[derive(Debug, Clone)]
pub struct DetectionLayout {
    root:   PathBuf,
    tables: PathBuf,
    maps:   PathBuf,
}

impl DetectionLayout {
    pub fn new(results_dir: impl AsRef<Path>, experiment_name: &str, detection_name: &str) -> Self {
        let root = results_dir
            .as_ref()
            .join("anomaly_detection")
            .join(format!("{experiment_name}___{detection_name}"));
        Self {
            tables: root.join("tables"),
            maps:   root.join("anomaly_maps"),
            root,
        }
    }

    /// Create the tables directory and one map directory per split.
    pub fn create_dirs(&self, splits: &[&str]) -> Result<()> {
        let dirs = std::iter::once(self.tables.clone())
            .chain(splits.iter().map(|split| self.maps_dir(split)));
        for dir in dirs {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Cannot create directory '{}'", dir.display()))?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn maps_dir(&self, split: &str) -> PathBuf {
        self.maps.join(split)
    }

    pub fn table_csv(&self, split: &str) -> PathBuf {
        self.tables.join(format!("{split}_summary.csv"))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_experiment_paths() {
        let layout = ExperimentLayout::new("results", "ce_mean");
        assert_eq!(layout.saved_models_dir(), Path::new("results/ce_mean/saved_models"));
        assert_eq!(layout.summary_csv(), PathBuf::from("results/ce_mean/result_outputs/summary.csv"));
        assert_eq!(
            layout.test_summary_csv(),
            PathBuf::from("results/ce_mean/result_outputs/test_summary.csv")
        );
    }

    #[test]
    fn test_detection_paths() {
        let layout = DetectionLayout::new("results", "ce_mean", "margin8");
        assert_eq!(layout.root(), Path::new("results/anomaly_detection/ce_mean___margin8"));
        assert_eq!(
            layout.maps_dir("val"),
            PathBuf::from("results/anomaly_detection/ce_mean___margin8/anomaly_maps/val")
        );
        assert_eq!(
            layout.table_csv("test"),
            PathBuf::from("results/anomaly_detection/ce_mean___margin8/tables/test_summary.csv")
        );
    }

    #[test]
    fn test_create_dirs_is_explicit() {
        let tmp = tempfile::tempdir().unwrap();
        let exp = ExperimentLayout::new(tmp.path(), "exp");
        assert!(!exp.root().exists());
        exp.create_dirs().unwrap();
        assert!(exp.saved_models_dir().is_dir());

        let det = DetectionLayout::new(tmp.path(), "exp", "det");
        det.create_dirs(&["val", "test"]).unwrap();
        assert!(det.maps_dir("val").is_dir());
        assert!(det.maps_dir("test").is_dir());
        assert!(det.table_csv("val").parent().unwrap().is_dir());
    }
}
