//! JPEG previews of raster tiles.

use std::path::{Path, PathBuf};

use image::ImageFormat;
use tracing::debug;

use crate::error::{unreadable, Result, StacError};

/// Decode a raster and write it as an 8-bit RGB JPEG at full size.
///
/// Extra bands (NIR) are dropped. Blocking; call from `spawn_blocking`.
pub fn render_jpeg(raster_path: &Path, dest: &Path) -> Result<()> {
    let img = image::open(raster_path).map_err(|e| unreadable(raster_path.display(), e))?;
    let rgb = img.to_rgb8();
    rgb.save_with_format(dest, ImageFormat::Jpeg)
        .map_err(|e| StacError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

    debug!(
        src = %raster_path.display(),
        dest = %dest.display(),
        width = rgb.width(),
        height = rgb.height(),
        "Rendered preview"
    );
    Ok(())
}

/// Async wrapper around [`render_jpeg`].
pub async fn render_jpeg_blocking(raster_path: PathBuf, dest: PathBuf) -> Result<PathBuf> {
    tokio::task::spawn_blocking(move || render_jpeg(&raster_path, &dest).map(|_| dest))
        .await
        .map_err(|e| StacError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_render_drops_alpha_band() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("tile.png");
        let dest = dir.path().join("tile.jpg");

        RgbaImage::from_pixel(16, 8, Rgba([200, 100, 50, 255]))
            .save(&src)
            .unwrap();
        render_jpeg(&src, &dest).unwrap();

        let out = image::open(&dest).unwrap();
        assert_eq!((out.width(), out.height()), (16, 8));
        assert_eq!(out.color(), image::ColorType::Rgb8);
    }

    #[test]
    fn test_unreadable_source() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("broken.tif");
        std::fs::write(&src, b"not a tiff").unwrap();
        let err = render_jpeg(&src, &dir.path().join("out.jpg")).unwrap_err();
        assert!(matches!(err, StacError::AssetUnreadable(_)));
    }
}
