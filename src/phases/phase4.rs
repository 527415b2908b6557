// Phase 4: Rendering and output encoding

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument};

use crate::core::config::{LayoutConfig, RenderingConfig};
use crate::core::types::{OutputFormat, Phase3Output, Phase4Output, SourceImage};
use crate::services::rendering::{encode, SvgRenderer};
use crate::utils::{Metrics, Stage};

/// Phase 4 pipeline: SVG rendering plus optional rasterization
pub struct Phase4Pipeline {
    renderer: Arc<SvgRenderer>,
    metrics: Metrics,
}

impl Phase4Pipeline {
    pub fn new(rendering: RenderingConfig, layout: &LayoutConfig, metrics: Metrics) -> Self {
        Self {
            renderer: Arc::new(SvgRenderer::new(rendering, layout)),
            metrics,
        }
    }

    /// Execute Phase 4 for one page
    ///
    /// An unavailable encoder is not an error: the output falls back to SVG
    /// and the substitution is reported on `encoded`.
    #[instrument(skip(self, phase3, image), fields(page_index = phase3.page_index))]
    pub async fn execute(
        &self,
        phase3: Phase3Output,
        image: SourceImage,
        format: OutputFormat,
    ) -> Result<Phase4Output> {
        let start = Instant::now();
        let renderer = Arc::clone(&self.renderer);
        let page_index = phase3.page_index;

        let (document, encoded) = tokio::task::spawn_blocking(move || {
            let document = renderer.render(&image, &phase3.canvas, &phase3.placements);
            let encoded = encode(&document, format);
            (document, encoded)
        })
        .await
        .context("Rendering task panicked")?;

        if encoded.substituted() {
            self.metrics.record_encoding_fallback();
        }
        self.metrics.record_stage_duration(Stage::Render, start.elapsed());

        debug!(
            "✓ Phase 4: {}x{} document encoded as {} ({} bytes) in {:.2}ms",
            document.width,
            document.height,
            encoded.format,
            encoded.bytes.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );

        Ok(Phase4Output {
            page_index,
            document,
            encoded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Canvas;

    fn image() -> SourceImage {
        SourceImage {
            bytes: Arc::new(b"fake".to_vec()),
            mime_type: "image/png".to_string(),
            width: 100,
            height: 50,
        }
    }

    fn phase3() -> Phase3Output {
        Phase3Output {
            page_index: 1,
            canvas: Canvas::empty(100.0, 50.0, None),
            placements: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_svg_output() {
        let phase4 = Phase4Pipeline::new(RenderingConfig::default(), &LayoutConfig::default(), Metrics::new());
        let output = phase4.execute(phase3(), image(), OutputFormat::Svg).await.unwrap();

        assert_eq!(output.page_index, 1);
        assert_eq!(output.encoded.format, OutputFormat::Svg);
        assert_eq!(output.encoded.bytes, output.document.svg.as_bytes());
    }

    #[tokio::test]
    async fn test_fallback_is_counted() {
        let metrics = Metrics::new();
        let phase4 = Phase4Pipeline::new(RenderingConfig::default(), &LayoutConfig::default(), metrics.clone());
        let output = phase4.execute(phase3(), image(), OutputFormat::Pdf).await.unwrap();

        assert!(output.encoded.substituted());
        assert_eq!(metrics.snapshot().encoding_fallbacks, 1);
    }
}
