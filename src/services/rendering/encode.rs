use tracing::{debug, warn};

use crate::core::errors::{RenderingError, RenderingResult};
use crate::core::types::{EncodedOutput, OutputFormat, RenderedDocument};

/// Encode a rendered document into the requested format.
///
/// Never fails: an encoder that is unavailable or errors out is reported on
/// the result and the native SVG markup is returned instead.
pub fn encode(document: &RenderedDocument, requested: OutputFormat) -> EncodedOutput {
    let attempt = match requested {
        OutputFormat::Svg => Ok(document.svg.as_bytes().to_vec()),
        OutputFormat::Png => rasterize(document),
        OutputFormat::Pdf => Err(RenderingError::UnsupportedOutputEncoding {
            format: OutputFormat::Pdf,
            reason: "no PDF encoder is available".to_string(),
        }),
    };

    match attempt {
        Ok(bytes) => {
            debug!("Encoded {} ({} bytes)", requested, bytes.len());
            EncodedOutput {
                requested,
                format: requested,
                bytes,
                fallback_reason: None,
            }
        }
        Err(e) => {
            warn!("{}; falling back to SVG", e);
            EncodedOutput {
                requested,
                format: OutputFormat::Svg,
                bytes: document.svg.as_bytes().to_vec(),
                fallback_reason: Some(e.to_string()),
            }
        }
    }
}

/// Whether this build can produce the given format without falling back
pub fn is_supported(format: OutputFormat) -> bool {
    match format {
        OutputFormat::Svg => true,
        OutputFormat::Png => cfg!(feature = "raster"),
        OutputFormat::Pdf => false,
    }
}

#[cfg(feature = "raster")]
fn rasterize(document: &RenderedDocument) -> RenderingResult<Vec<u8>> {
    use resvg::{tiny_skia, usvg};

    let mut options = usvg::Options::default();
    options.fontdb_mut().load_system_fonts();

    let tree = usvg::Tree::from_str(&document.svg, &options)
        .map_err(|e| RenderingError::RasterizationFailed(format!("invalid SVG: {}", e)))?;

    let size = tree.size().to_int_size();
    let mut pixmap = tiny_skia::Pixmap::new(size.width(), size.height()).ok_or_else(|| {
        RenderingError::RasterizationFailed(format!(
            "cannot allocate a {}x{} pixmap",
            size.width(),
            size.height()
        ))
    })?;

    resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());

    pixmap
        .encode_png()
        .map_err(|e| RenderingError::RasterizationFailed(e.to_string()))
}

#[cfg(not(feature = "raster"))]
fn rasterize(_document: &RenderedDocument) -> RenderingResult<Vec<u8>> {
    Err(RenderingError::UnsupportedOutputEncoding {
        format: OutputFormat::Png,
        reason: "built without the `raster` feature".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document() -> RenderedDocument {
        RenderedDocument {
            svg: r##"<svg xmlns="http://www.w3.org/2000/svg" width="4" height="4" viewBox="0 0 4 4"><rect width="4" height="4" fill="#ff0000"/></svg>"##.to_string(),
            width: 4.0,
            height: 4.0,
        }
    }

    #[test]
    fn test_svg_passthrough() {
        let doc = document();
        let out = encode(&doc, OutputFormat::Svg);
        assert_eq!(out.format, OutputFormat::Svg);
        assert!(!out.substituted());
        assert_eq!(out.bytes, doc.svg.as_bytes());
    }

    #[test]
    fn test_pdf_falls_back_to_svg() {
        let doc = document();
        let out = encode(&doc, OutputFormat::Pdf);
        assert_eq!(out.requested, OutputFormat::Pdf);
        assert_eq!(out.format, OutputFormat::Svg);
        assert!(out.substituted());
        assert!(out.fallback_reason.unwrap().contains("PDF"));
        assert_eq!(out.bytes, doc.svg.as_bytes());
    }

    #[test]
    fn test_png_matches_build_support() {
        let out = encode(&document(), OutputFormat::Png);
        if is_supported(OutputFormat::Png) {
            assert_eq!(out.format, OutputFormat::Png);
            assert_eq!(&out.bytes[..4], b"\x89PNG");
        } else {
            assert_eq!(out.format, OutputFormat::Svg);
            assert!(out.fallback_reason.is_some());
        }
    }
}
