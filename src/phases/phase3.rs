// Phase 3: Label layout

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument};

use crate::core::config::LayoutConfig;
use crate::core::types::{Phase2Output, Phase3Output, SourceImage};
use crate::services::layout::{ApproximateMetrics, FontMetrics, LayoutEngine};
use crate::utils::{Metrics, Stage};

/// Phase 3 pipeline: place labels around the image
pub struct Phase3Pipeline {
    engine: Arc<LayoutEngine>,
    font_metrics: Arc<dyn FontMetrics + Send + Sync>,
    metrics: Metrics,
}

impl Phase3Pipeline {
    pub fn new(config: LayoutConfig, metrics: Metrics) -> Self {
        Self::with_font_metrics(config, Arc::new(ApproximateMetrics::default()), metrics)
    }

    pub fn with_font_metrics(
        config: LayoutConfig,
        font_metrics: Arc<dyn FontMetrics + Send + Sync>,
        metrics: Metrics,
    ) -> Self {
        Self {
            engine: Arc::new(LayoutEngine::new(config)),
            font_metrics,
            metrics,
        }
    }

    /// Execute Phase 3 for one page (CPU-bound, runs on the blocking pool)
    #[instrument(skip(self, phase2, image), fields(page_index = phase2.page_index))]
    pub async fn execute(
        &self,
        phase2: Phase2Output,
        image: &SourceImage,
        title: Option<String>,
    ) -> Result<Phase3Output> {
        let start = Instant::now();
        let engine = Arc::clone(&self.engine);
        let font_metrics = Arc::clone(&self.font_metrics);
        let (width, height) = (image.width as f64, image.height as f64);
        let page_index = phase2.page_index;

        let (canvas, placements) = tokio::task::spawn_blocking(move || {
            engine.layout_titled(
                &phase2.regions,
                width,
                height,
                title.as_deref(),
                font_metrics.as_ref(),
            )
        })
        .await
        .context("Layout task panicked")?;

        self.metrics.record_stage_duration(Stage::Layout, start.elapsed());
        debug!(
            "✓ Phase 3: {} placements, margins {:.0}/{:.0}px",
            placements.len(),
            canvas.left_margin,
            canvas.right_margin
        );

        Ok(Phase3Output {
            page_index,
            canvas,
            placements,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{BoundingBox, Region};

    fn image() -> SourceImage {
        SourceImage {
            bytes: Arc::new(Vec::new()),
            mime_type: "image/png".to_string(),
            width: 600,
            height: 400,
        }
    }

    #[tokio::test]
    async fn test_layout_runs_with_injected_metrics() {
        let fixed = |text: &str, size: f64| text.chars().count() as f64 * size;
        let phase3 = Phase3Pipeline::with_font_metrics(
            LayoutConfig::default(),
            Arc::new(fixed),
            Metrics::new(),
        );

        let phase2 = Phase2Output {
            page_index: 2,
            regions: vec![Region {
                id: 0,
                bbox: Some(BoundingBox::new(10.0, 10.0, 50.0, 20.0)),
                source_text: "OK".to_string(),
                translated_text: "Valider".to_string(),
                confidence: None,
            }],
            matched: 1,
            unmatched_geometry: 0,
            unmatched_translation: 0,
            dropped: 0,
        };

        let output = phase3.execute(phase2, &image(), None).await.unwrap();
        let config = LayoutConfig::default();
        let expected = config.marker_radius * 2.0 + config.marker_gap + 7.0 * config.font_size;

        assert_eq!(output.page_index, 2);
        assert_eq!(output.placements.len(), 1);
        assert_eq!(output.canvas.left_margin, expected + config.label_padding);
        assert_eq!(output.canvas.right_margin, 0.0);
    }

    #[tokio::test]
    async fn test_empty_page_layout() {
        let phase3 = Phase3Pipeline::new(LayoutConfig::default(), Metrics::new());
        let phase2 = Phase2Output {
            page_index: 0,
            regions: Vec::new(),
            matched: 0,
            unmatched_geometry: 0,
            unmatched_translation: 0,
            dropped: 0,
        };

        let output = phase3
            .execute(phase2, &image(), Some("Empty".to_string()))
            .await
            .unwrap();
        assert!(output.placements.is_empty());
        assert_eq!(output.canvas.width(), 600.0);
        assert_eq!(output.canvas.title.as_deref(), Some("Empty"));
    }
}
