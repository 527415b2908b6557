use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine};
use image::ImageReader;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use crate::core::types::SourceImage;

/// Sniff the format and dimensions of an encoded image without decoding pixels.
pub fn probe_image(bytes: Vec<u8>) -> Result<SourceImage> {
    let reader = ImageReader::new(Cursor::new(&bytes))
        .with_guessed_format()
        .context("Failed to read image header")?;

    let format = reader
        .format()
        .context("Unrecognized image format")?;

    let (width, height) = reader
        .into_dimensions()
        .context("Failed to read image dimensions")?;

    Ok(SourceImage {
        mime_type: format.to_mime_type().to_string(),
        bytes: Arc::new(bytes),
        width,
        height,
    })
}

/// Asynchronously read and probe an image file using spawn_blocking for the header parse.
pub async fn load_source_image_async(path: &Path) -> Result<SourceImage> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;

    tokio::task::spawn_blocking(move || probe_image(bytes))
        .await
        .context("Failed to spawn blocking task for image probing")?
}

/// Embed an image as a `data:` URL
pub fn to_data_url(image: &SourceImage) -> String {
    format!(
        "data:{};base64,{}",
        image.mime_type,
        general_purpose::STANDARD.encode(image.bytes.as_slice())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, RgbImage};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::new(width, height);
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_probe_png() {
        let image = probe_image(png_bytes(12, 7)).unwrap();
        assert_eq!((image.width, image.height), (12, 7));
        assert_eq!(image.mime_type, "image/png");
    }

    #[test]
    fn test_probe_rejects_garbage() {
        assert!(probe_image(b"definitely not an image".to_vec()).is_err());
    }

    #[test]
    fn test_data_url() {
        let image = SourceImage {
            bytes: Arc::new(b"abc".to_vec()),
            mime_type: "image/png".to_string(),
            width: 1,
            height: 1,
        };
        assert_eq!(to_data_url(&image), "data:image/png;base64,YWJj");
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.png");
        std::fs::write(&path, png_bytes(3, 4)).unwrap();

        let image = load_source_image_async(&path).await.unwrap();
        assert_eq!((image.width, image.height), (3, 4));
    }
}
