use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Pipeline stages tracked for timing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Analysis,
    Merge,
    Layout,
    Render,
}

/// Metrics collector for a process.
///
/// Tracks cache performance, merge outcomes and stage durations.
/// Cheap to clone; every clone shares the same counters.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // Cache
    cache_hits: AtomicUsize,
    cache_misses: AtomicUsize,
    cache_size: AtomicUsize,

    // Images
    images_processed: AtomicUsize,
    images_failed: AtomicUsize,
    images_without_regions: AtomicUsize,

    // Merge
    regions_merged: AtomicUsize,
    regions_dropped: AtomicUsize,
    unmatched_geometry: AtomicUsize,
    unmatched_translation: AtomicUsize,

    // Rendering
    encoding_fallbacks: AtomicUsize,

    stage_durations_ms: DashMap<Stage, RwLock<Vec<u64>>>,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                cache_hits: AtomicUsize::new(0),
                cache_misses: AtomicUsize::new(0),
                cache_size: AtomicUsize::new(0),
                images_processed: AtomicUsize::new(0),
                images_failed: AtomicUsize::new(0),
                images_without_regions: AtomicUsize::new(0),
                regions_merged: AtomicUsize::new(0),
                regions_dropped: AtomicUsize::new(0),
                unmatched_geometry: AtomicUsize::new(0),
                unmatched_translation: AtomicUsize::new(0),
                encoding_fallbacks: AtomicUsize::new(0),
                stage_durations_ms: DashMap::new(),
                start_time: Instant::now(),
            }),
        }
    }

    // Cache Metrics
    pub fn record_cache_hit(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.inner.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn update_cache_size(&self, size: usize) {
        self.inner.cache_size.store(size, Ordering::Relaxed);
    }

    // Image Metrics
    pub fn record_image(&self, success: bool) {
        if success {
            self.inner.images_processed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.images_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_empty_image(&self) {
        self.inner.images_without_regions.fetch_add(1, Ordering::Relaxed);
    }

    // Merge Metrics
    pub fn record_merge(&self, merged: usize, dropped: usize, unmatched_geometry: usize, unmatched_translation: usize) {
        self.inner.regions_merged.fetch_add(merged, Ordering::Relaxed);
        self.inner.regions_dropped.fetch_add(dropped, Ordering::Relaxed);
        self.inner.unmatched_geometry.fetch_add(unmatched_geometry, Ordering::Relaxed);
        self.inner.unmatched_translation.fetch_add(unmatched_translation, Ordering::Relaxed);
    }

    pub fn record_encoding_fallback(&self) {
        self.inner.encoding_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stage_duration(&self, stage: Stage, duration: Duration) {
        self.inner
            .stage_durations_ms
            .entry(stage)
            .or_insert_with(|| RwLock::new(Vec::new()))
            .write()
            .push(duration.as_millis() as u64);
    }

    fn stage_avg(&self, stage: Stage) -> u64 {
        self.inner
            .stage_durations_ms
            .get(&stage)
            .map(|durations| avg(&durations.read()))
            .unwrap_or(0)
    }

    // Get snapshot for reporting
    pub fn snapshot(&self) -> MetricsSnapshot {
        let cache_hits = self.inner.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.inner.cache_misses.load(Ordering::Relaxed);
        let cache_total = cache_hits + cache_misses;
        let cache_hit_rate = if cache_total > 0 {
            cache_hits as f64 / cache_total as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            cache_hits,
            cache_misses,
            cache_hit_rate,
            cache_size: self.inner.cache_size.load(Ordering::Relaxed),
            images_processed: self.inner.images_processed.load(Ordering::Relaxed),
            images_failed: self.inner.images_failed.load(Ordering::Relaxed),
            images_without_regions: self.inner.images_without_regions.load(Ordering::Relaxed),
            regions_merged: self.inner.regions_merged.load(Ordering::Relaxed),
            regions_dropped: self.inner.regions_dropped.load(Ordering::Relaxed),
            unmatched_geometry: self.inner.unmatched_geometry.load(Ordering::Relaxed),
            unmatched_translation: self.inner.unmatched_translation.load(Ordering::Relaxed),
            encoding_fallbacks: self.inner.encoding_fallbacks.load(Ordering::Relaxed),
            analysis_avg_ms: self.stage_avg(Stage::Analysis),
            merge_avg_ms: self.stage_avg(Stage::Merge),
            layout_avg_ms: self.stage_avg(Stage::Layout),
            render_avg_ms: self.stage_avg(Stage::Render),
            uptime_seconds: self.inner.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub cache_hit_rate: f64,
    pub cache_size: usize,
    pub images_processed: usize,
    pub images_failed: usize,
    pub images_without_regions: usize,
    pub regions_merged: usize,
    pub regions_dropped: usize,
    pub unmatched_geometry: usize,
    pub unmatched_translation: usize,
    pub encoding_fallbacks: usize,
    pub analysis_avg_ms: u64,
    pub merge_avg_ms: u64,
    pub layout_avg_ms: u64,
    pub render_avg_ms: u64,
    pub uptime_seconds: u64,
}

fn avg(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.iter().sum::<u64>() / values.len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = Metrics::new();

        metrics.record_cache_hit();
        metrics.record_cache_miss();
        metrics.record_image(true);
        metrics.record_image(false);
        metrics.record_merge(5, 1, 2, 0);
        metrics.record_encoding_fallback();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_misses, 1);
        assert_eq!(snapshot.cache_hit_rate, 0.5);
        assert_eq!(snapshot.images_processed, 1);
        assert_eq!(snapshot.images_failed, 1);
        assert_eq!(snapshot.regions_merged, 5);
        assert_eq!(snapshot.regions_dropped, 1);
        assert_eq!(snapshot.unmatched_geometry, 2);
        assert_eq!(snapshot.encoding_fallbacks, 1);
    }

    #[test]
    fn test_stage_averages() {
        let metrics = Metrics::new();
        metrics.record_stage_duration(Stage::Layout, Duration::from_millis(10));
        metrics.record_stage_duration(Stage::Layout, Duration::from_millis(30));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.layout_avg_ms, 20);
        assert_eq!(snapshot.render_avg_ms, 0);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = Metrics::new();
        let clone = metrics.clone();
        clone.record_cache_hit();
        assert_eq!(metrics.snapshot().cache_hits, 1);
    }
}
