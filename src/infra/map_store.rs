// ============================================================
// Layer 6 — Anomaly Map Store
// ============================================================
// Persists finished anomaly maps, one file per image, named
// after the image's full file name:
//
//   anomaly_maps/val/scan_001.png.mpk.gz   ← map for images/scan_001.png
//
// Maps are stored as full-precision Burn records so they load
// back bit-identical.

use anyhow::{Context, Result};
use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkGzFileRecorder, Recorder},
};
use std::{
    fs,
    path::{Path, PathBuf},
};

type MapRecorder = NamedMpkGzFileRecorder<FullPrecisionSettings>;

pub struct MapStore {
    dir: PathBuf,
}

impl MapStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create anomaly map directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path for an image name. The recorder replaces the trailing
    /// `.map` with its own extension: `scan.png` → `scan.png.mpk.gz`.
    pub fn path_for(&self, image_name: &str) -> PathBuf {
        self.dir.join(format!("{image_name}.map"))
    }

    pub fn save<B: Backend>(&self, image_name: &str, map: Tensor<B, 3>) -> Result<()> {
        let path = self.path_for(image_name);
        MapRecorder::new()
            .record(map, path.clone())
            .with_context(|| format!("Failed to save anomaly map to '{}'", path.display()))?;
        tracing::debug!("Saved anomaly map '{}'", path.display());
        Ok(())
    }

    #[cfg(test)]
    pub fn load<B: Backend>(&self, image_name: &str, device: &B::Device) -> Result<Tensor<B, 3>> {
        let path = self.path_for(image_name);
        MapRecorder::new()
            .load(path.clone(), device)
            .with_context(|| format!("Cannot load anomaly map '{}'", path.display()))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_named_after_full_image_name() {
        let tmp   = tempfile::tempdir().unwrap();
        let store = MapStore::new(tmp.path().join("val")).unwrap();
        assert_ne!(store.path_for("scan.png"), store.path_for("scan.jpg"));
        assert_eq!(store.path_for("scan_001.png"), tmp.path().join("val").join("scan_001.png.map"));
    }

    #[test]
    fn test_same_stem_different_extension_kept_apart() {
        let tmp    = tempfile::tempdir().unwrap();
        let store  = MapStore::new(tmp.path()).unwrap();
        let device = Default::default();
        let ones   = Tensor::<TestBackend, 3>::ones([1, 2, 2], &device);
        let zeros  = Tensor::<TestBackend, 3>::zeros([1, 2, 2], &device);

        store.save("scan.png", ones).unwrap();
        store.save("scan.jpg", zeros).unwrap();
        assert!(tmp.path().join("scan.png.mpk.gz").exists());
        assert!(tmp.path().join("scan.jpg.mpk.gz").exists());

        let loaded: Tensor<TestBackend, 3> = store.load("scan.png", &device).unwrap();
        assert_eq!(loaded.into_data().to_vec::<f32>().unwrap(), vec![1.0; 4]);
    }

    #[test]
    fn test_save_and_load() {
        let tmp    = tempfile::tempdir().unwrap();
        let store  = MapStore::new(tmp.path()).unwrap();
        let device = Default::default();
        let map = Tensor::<TestBackend, 3>::from_data(
            TensorData::new(vec![0.1f32, 0.25, 3.5, 0.0, 1e-4, 7.0], [1, 2, 3]),
            &device,
        );

        store.save("img_000.png", map.clone()).unwrap();
        assert!(tmp.path().join("img_000.png.mpk.gz").exists());

        let loaded: Tensor<TestBackend, 3> = store.load("img_000.png", &device).unwrap();
        assert_eq!(loaded.dims(), [1, 2, 3]);
        assert_eq!(
            loaded.into_data().to_vec::<f32>().unwrap(),
            map.into_data().to_vec::<f32>().unwrap()
        );
    }
}
