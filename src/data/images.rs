// ============================================================
// Layer 4 — Image Folder
// ============================================================
// One dataset split on disk:
//
//   <split>/
//     images/   scan_001.png, scan_002.png, ...
//     labels/   scan_001.png, scan_002.png, ...   (same names)
//
// Images are decoded once, optionally rescaled, and kept as
// channel-major u8 buffers. Labels are only read when a
// finished anomaly map needs to be scored, and always at
// their native resolution.

use anyhow::{bail, Context, Result};
use image::{imageops::FilterType, DynamicImage};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::domain::patch::{ImageSize, LabelImage};
use crate::domain::traits::ImageRepository;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

/// A decoded image, C x H x W, intensities 0..=255.
#[derive(Debug, Clone)]
pub struct ImageData {
    pub channels: usize,
    pub size:     ImageSize,
    pub pixels:   Vec<u8>,
}

impl ImageData {
    pub fn pixel(&self, channel: usize, row: usize, col: usize) -> u8 {
        self.pixels[(channel * self.size.height + row) * self.size.width + col]
    }
}

pub struct ImageFolder {
    labels_dir: PathBuf,
    names:      Vec<String>,
    images:     Vec<ImageData>,
}

impl ImageFolder {
    /// Load every image under `<root>/images`, sorted by file name.
    ///
    /// `channels` must be 1 (grayscale) or 3 (RGB). `scale` resizes images
    /// (not labels) by the given factor.
    pub fn open(root: impl AsRef<Path>, channels: usize, scale: Option<f32>) -> Result<Self> {
        if channels != 1 && channels != 3 {
            bail!("unsupported channel count {channels}: expected 1 or 3");
        }
        let root       = root.as_ref();
        let images_dir = root.join("images");
        let labels_dir = root.join("labels");

        if !images_dir.exists() {
            tracing::warn!("Image directory '{}' does not exist, treating split as empty", images_dir.display());
            return Ok(Self { labels_dir, names: Vec::new(), images: Vec::new() });
        }

        let mut names: Vec<String> = fs::read_dir(&images_dir)
            .with_context(|| format!("Cannot read directory '{}'", images_dir.display()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| has_image_extension(path))
            .filter_map(|path| path.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .collect();
        names.sort();

        let images = names
            .iter()
            .map(|name| load_image(&images_dir.join(name), channels, scale))
            .collect::<Result<Vec<_>>>()?;

        tracing::info!("Loaded {} images from '{}'", images.len(), images_dir.display());
        Ok(Self { labels_dir, names, images })
    }

    pub fn image(&self, index: usize) -> Option<&ImageData> {
        self.images.get(index)
    }

    pub fn images(&self) -> &[ImageData] {
        &self.images
    }
}

impl ImageRepository for ImageFolder {
    fn len(&self) -> usize {
        self.names.len()
    }

    fn image_name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    fn image_size(&self, index: usize) -> Option<ImageSize> {
        self.images.get(index).map(|img| img.size)
    }

    fn label_image(&self, index: usize) -> Result<LabelImage> {
        let name = self
            .image_name(index)
            .with_context(|| format!("No image with index {index}"))?;
        let path = self.labels_dir.join(name);
        let label = image::open(&path)
            .with_context(|| format!("Cannot open label image '{}'", path.display()))?;
        let (width, height) = (label.width(), label.height());

        // colour masks keep their channels; they are reduced by channel max later
        let (channels, raw) = if label.color().has_color() {
            (3, channel_major(label.to_rgb8().into_raw()))
        } else {
            (1, label.to_luma8().into_raw())
        };

        // 0/1 masks are used as-is, 0/255 masks are rescaled to 0..1
        let max = raw.iter().copied().max().unwrap_or(0);
        let divisor = if max > 1 { 255.0 } else { 1.0 };
        let values = raw.into_iter().map(|v| v as f32 / divisor).collect();

        Ok(LabelImage::new(channels, ImageSize::new(height as usize, width as usize), values))
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn load_image(path: &Path, channels: usize, scale: Option<f32>) -> Result<ImageData> {
    let img = image::open(path)
        .with_context(|| format!("Cannot open image '{}'", path.display()))?;
    let img = match scale {
        Some(factor) => rescale(img, factor),
        None => img,
    };

    let (width, height) = (img.width() as usize, img.height() as usize);
    let pixels = if channels == 1 {
        img.to_luma8().into_raw()
    } else {
        channel_major(img.to_rgb8().into_raw())
    };

    Ok(ImageData { channels, size: ImageSize::new(height, width), pixels })
}

/// Interleaved RGB → channel-major.
fn channel_major(rgb: Vec<u8>) -> Vec<u8> {
    (0..3)
        .flat_map(|c| rgb.iter().skip(c).step_by(3).copied().collect::<Vec<u8>>())
        .collect()
}

fn rescale(img: DynamicImage, factor: f32) -> DynamicImage {
    let width  = ((img.width()  as f32 * factor).round() as u32).max(1);
    let height = ((img.height() as f32 * factor).round() as u32).max(1);
    img.resize_exact(width, height, FilterType::Triangle)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Write `count` small grayscale images and matching 0/255 labels.
    pub(crate) fn write_split(root: &Path, count: usize, height: u32, width: u32) {
        fs::create_dir_all(root.join("images")).unwrap();
        fs::create_dir_all(root.join("labels")).unwrap();
        for i in 0..count {
            let name = format!("img_{i:03}.png");
            let img = image::GrayImage::from_fn(width, height, |x, y| {
                image::Luma([((x * 7 + y * 13 + i as u32 * 31) % 256) as u8])
            });
            img.save(root.join("images").join(&name)).unwrap();
            let label = image::GrayImage::from_fn(width, height, |x, _| {
                image::Luma([if x < width / 2 { 0 } else { 255 }])
            });
            label.save(root.join("labels").join(&name)).unwrap();
        }
    }

    #[test]
    fn test_images_sorted_and_sized() {
        let tmp = tempfile::tempdir().unwrap();
        write_split(tmp.path(), 3, 6, 8);
        fs::write(tmp.path().join("images").join("notes.txt"), "ignored").unwrap();

        let folder = ImageFolder::open(tmp.path(), 1, None).unwrap();
        assert_eq!(folder.len(), 3);
        assert_eq!(folder.image_name(0), Some("img_000.png"));
        assert_eq!(folder.image_name(2), Some("img_002.png"));
        assert_eq!(folder.image_size(1), Some(ImageSize::new(6, 8)));
        assert_eq!(folder.image(0).unwrap().pixels.len(), 48);
    }

    #[test]
    fn test_scaled_images_keep_native_labels() {
        let tmp = tempfile::tempdir().unwrap();
        write_split(tmp.path(), 1, 8, 8);

        let folder = ImageFolder::open(tmp.path(), 1, Some(0.5)).unwrap();
        assert_eq!(folder.image_size(0), Some(ImageSize::new(4, 4)));

        let label = folder.label_image(0).unwrap();
        assert_eq!(label.size, ImageSize::new(8, 8));
        assert_eq!(label.values[0], 0.0);
        assert_eq!(label.values[7], 1.0);
    }

    #[test]
    fn test_rgb_is_channel_major() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("images")).unwrap();
        let img = image::RgbImage::from_fn(2, 1, |x, _| image::Rgb([10 + x as u8, 20, 30]));
        img.save(tmp.path().join("images").join("a.png")).unwrap();

        let folder = ImageFolder::open(tmp.path(), 3, None).unwrap();
        let data = folder.image(0).unwrap();
        assert_eq!(data.pixels, vec![10, 11, 20, 20, 30, 30]);
        assert_eq!(data.pixel(0, 0, 1), 11);
        assert_eq!(data.pixel(2, 0, 0), 30);
    }

    #[test]
    fn test_colour_label_keeps_channels() {
        let tmp = tempfile::tempdir().unwrap();
        write_split(tmp.path(), 1, 1, 2);
        // pure red marks the anomalous pixel
        let label = image::RgbImage::from_fn(2, 1, |x, _| image::Rgb([if x == 1 { 255 } else { 0 }, 0, 0]));
        label.save(tmp.path().join("labels").join("img_000.png")).unwrap();

        let folder = ImageFolder::open(tmp.path(), 1, None).unwrap();
        let label  = folder.label_image(0).unwrap();
        assert_eq!(label.channels, 3);
        assert_eq!(label.values, vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_missing_split_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let folder = ImageFolder::open(tmp.path().join("nope"), 1, None).unwrap();
        assert!(folder.is_empty());
    }
}
