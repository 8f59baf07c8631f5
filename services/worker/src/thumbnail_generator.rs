use common::storage::{BlobStorage, derivative_path};
use image::{DynamicImage, ImageFormat, imageops::FilterType};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::ThumbnailError;

/// Renders resized copies of an image next to its blob
#[derive(Clone)]
pub struct ThumbnailGenerator {
    storage: BlobStorage,
    widths: Vec<u32>,
}

impl ThumbnailGenerator {
    pub fn new(storage: BlobStorage, widths: Vec<u32>) -> Self {
        Self { storage, widths }
    }

    pub fn widths(&self) -> &[u32] {
        &self.widths
    }

    /// Write one derivative per configured width, returning their paths
    ///
    /// Existing derivatives are overwritten.
    pub async fn generate(&self, source: &Path) -> Result<Vec<PathBuf>, ThumbnailError> {
        info!("Generating thumbnails for: {}", source.display());

        let bytes = self.storage.read(source).await?;
        let source = source.to_path_buf();
        let widths = self.widths.clone();

        tokio::task::spawn_blocking(move || render(&bytes, &source, &widths)).await?
    }
}

fn render(bytes: &[u8], source: &Path, widths: &[u32]) -> Result<Vec<PathBuf>, ThumbnailError> {
    let format = image::guess_format(bytes).map_err(|_| ThumbnailError::UnknownFormat)?;
    let img = image::load_from_memory_with_format(bytes, format)?;

    widths
        .iter()
        .map(|&width| {
            let path = derivative_path(source, width);
            resize_to_width(&img, width)?.save_with_format(&path, save_format(format))?;
            debug!(width, "Wrote thumbnail {}", path.display());
            Ok(path)
        })
        .collect()
}

/// Scale to `width`, keeping the aspect ratio
fn resize_to_width(img: &DynamicImage, width: u32) -> Result<DynamicImage, ThumbnailError> {
    let height = scaled_height(img.width(), img.height(), width)?;
    Ok(img.resize_exact(width, height, FilterType::Lanczos3))
}

/// Height matching `width` at the source aspect ratio, at least one pixel
fn scaled_height(src_width: u32, src_height: u32, width: u32) -> Result<u32, ThumbnailError> {
    let height = (u64::from(src_height) * u64::from(width) / u64::from(src_width.max(1))).max(1);
    u32::try_from(height).map_err(|_| ThumbnailError::TooTall { width })
}

/// Formats without an encoder fall back to PNG
fn save_format(format: ImageFormat) -> ImageFormat {
    if format.writing_enabled() {
        format
    } else {
        ImageFormat::Png
    }
}
