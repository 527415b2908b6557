// Phase 2: Result merging

use std::time::Instant;
use tracing::{debug, info, instrument};

use crate::core::types::{Phase1Output, Phase2Output};
use crate::services::merge::merge_detailed;
use crate::utils::{Metrics, Stage};

/// Phase 2 pipeline: reconcile geometry with translations
pub struct Phase2Pipeline {
    metrics: Metrics,
}

impl Phase2Pipeline {
    pub fn new(metrics: Metrics) -> Self {
        Self { metrics }
    }

    /// Execute Phase 2 on one page's detections
    ///
    /// Never fails: malformed detections are dropped by the merger and an
    /// empty result is a valid page with nothing to annotate.
    #[instrument(skip(self, phase1), fields(page_index = phase1.page_index))]
    pub fn execute(&self, phase1: &Phase1Output) -> Phase2Output {
        let start = Instant::now();
        let outcome = merge_detailed(&phase1.geometry, &phase1.translations);
        let stats = outcome.stats;

        self.metrics.record_merge(
            outcome.regions.len(),
            stats.dropped,
            stats.unmatched_geometry,
            stats.unmatched_translation,
        );
        self.metrics.record_stage_duration(Stage::Merge, start.elapsed());

        if outcome.regions.is_empty() {
            self.metrics.record_empty_image();
            info!("No text regions on page {}, output stays unannotated", phase1.page_index);
        } else {
            debug!(
                "✓ Phase 2: {} regions on page {} in {:.2}ms",
                outcome.regions.len(),
                phase1.page_index,
                start.elapsed().as_secs_f64() * 1000.0
            );
        }

        Phase2Output {
            page_index: phase1.page_index,
            regions: outcome.regions,
            matched: stats.matched,
            unmatched_geometry: stats.unmatched_geometry,
            unmatched_translation: stats.unmatched_translation,
            dropped: stats.dropped,
        }
    }
}
