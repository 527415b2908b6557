// Batch Orchestrator: Main workflow coordinator

use anyhow::{Context, Result};
use futures::future::join_all;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{error, info, instrument, warn};

use crate::core::config::Config;
use crate::core::errors::PipelineError;
use crate::core::types::{
    BatchResult, ImageData, ImageJob, OutputFormat, PageResult, PerformanceMetrics,
    ProcessingConfig,
};
use crate::phases::{Phase1Pipeline, Phase2Pipeline, Phase3Pipeline, Phase4Pipeline};
use crate::services::analysis::Providers;
use crate::services::cache::ResponseCache;
use crate::utils::{load_source_image_async, Metrics};

/// Phase pipelines shared by every page task
struct Pipelines {
    phase1: Phase1Pipeline,
    phase2: Phase2Pipeline,
    phase3: Phase3Pipeline,
    phase4: Phase4Pipeline,
}

/// Per-batch settings after applying request overrides
#[derive(Debug, Clone)]
struct RunSettings {
    format: OutputFormat,
    title: Option<String>,
    target_language: String,
    use_cache: bool,
}

/// Main batch orchestrator
pub struct BatchOrchestrator {
    config: Arc<Config>,
    pipelines: Arc<Pipelines>,
    cache: ResponseCache,
    metrics: Metrics,
    semaphore: Arc<Semaphore>,
}

impl BatchOrchestrator {
    /// Create new batch orchestrator
    ///
    /// The cache is owned by the caller: open it before, flush it after (this
    /// orchestrator also flushes at the end of every batch).
    #[instrument(skip_all)]
    pub fn new(config: Arc<Config>, providers: Providers, cache: ResponseCache, metrics: Metrics) -> Self {
        info!("Initializing pipelines...");

        let pipelines = Arc::new(Pipelines {
            phase1: Phase1Pipeline::new(providers, cache.clone(), metrics.clone()),
            phase2: Phase2Pipeline::new(metrics.clone()),
            phase3: Phase3Pipeline::new(config.layout.clone(), metrics.clone()),
            phase4: Phase4Pipeline::new(config.rendering.clone(), &config.layout, metrics.clone()),
        });

        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_images()));

        info!(
            "✓ Ready (concurrent images: {}, cache: {})",
            config.max_concurrent_images(),
            if !cache.is_enabled() {
                "disabled"
            } else if cache.is_persistent() {
                "persistent"
            } else {
                "in-memory"
            }
        );

        Self {
            config,
            pipelines,
            cache,
            metrics,
            semaphore,
        }
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Annotate every job; one failing image never aborts the others.
    ///
    /// Results come back sorted by job index. The returned error is reserved
    /// for the batch machinery itself, per-image failures are reported in
    /// [`BatchResult::results`].
    #[instrument(skip(self, jobs, processing), fields(total_images = jobs.len()))]
    pub async fn process_batch(
        &self,
        jobs: Vec<ImageJob>,
        processing: &ProcessingConfig,
    ) -> Result<BatchResult> {
        let start_time = Instant::now();
        let total = jobs.len();
        let settings = self.resolve_settings(processing);

        info!(
            "Processing {} images (format: {}, language: {}, cache: {})",
            total,
            settings.format,
            settings.target_language,
            if settings.use_cache { "on" } else { "off" }
        );

        let tasks: Vec<_> = jobs
            .into_iter()
            .map(|job| {
                let pipelines = Arc::clone(&self.pipelines);
                let semaphore = Arc::clone(&self.semaphore);
                let metrics = self.metrics.clone();
                let settings = settings.clone();
                let (index, filename) = (job.index, display_name(&job.input_path));

                let handle = tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .context("Batch semaphore closed")?;
                    let page_start = Instant::now();

                    let outcome = process_image(&pipelines, &job, &settings).await;
                    let elapsed_ms = page_start.elapsed().as_secs_f64() * 1000.0;

                    let result = match outcome {
                        Ok((mut page, timings)) => {
                            page.processing_time_ms = elapsed_ms;
                            metrics.record_image(true);
                            (page, timings)
                        }
                        Err(e) => {
                            error!("Page {} ({}) failed: {:#}", job.index, display_name(&job.input_path), e);
                            metrics.record_image(false);
                            (
                                failed_page(job.index, display_name(&job.input_path), elapsed_ms, format!("{:#}", e)),
                                PerformanceMetrics::default(),
                            )
                        }
                    };
                    Ok::<_, anyhow::Error>(result)
                });

                (index, filename, handle)
            })
            .collect();

        let (meta, handles): (Vec<_>, Vec<_>) = tasks
            .into_iter()
            .map(|(index, filename, handle)| ((index, filename), handle))
            .unzip();

        let mut results = Vec::with_capacity(total);
        let mut timings = PerformanceMetrics::default();

        for ((index, filename), joined) in meta.into_iter().zip(join_all(handles).await) {
            let failure = match joined {
                Ok(Ok((page, page_timings))) => {
                    timings.merge(&page_timings);
                    results.push(page);
                    continue;
                }
                Ok(Err(e)) => format!("{:#}", e),
                Err(e) => PipelineError::TaskJoinFailed(e.to_string()).to_string(),
            };

            error!("Page {} ({}) aborted: {}", index, filename, failure);
            self.metrics.record_image(false);
            results.push(failed_page(index, filename, 0.0, failure));
        }

        results.sort_by_key(|r| r.index);

        if let Err(e) = self.cache.flush().await {
            warn!("Failed to persist response cache: {}", e);
        }

        let successful = results.iter().filter(|r| r.success).count();
        let failed = results.len() - successful;
        let processing_time_ms = start_time.elapsed().as_secs_f64() * 1000.0;

        info!(
            "✓ Batch complete: {}/{} succeeded in {:.2}ms (analysis {:.0}ms, merge {:.0}ms, layout {:.0}ms, render {:.0}ms)",
            successful,
            total,
            processing_time_ms,
            timings.analysis_time.as_secs_f64() * 1000.0,
            timings.merge_time.as_secs_f64() * 1000.0,
            timings.layout_time.as_secs_f64() * 1000.0,
            timings.render_time.as_secs_f64() * 1000.0,
        );

        Ok(BatchResult {
            total,
            successful,
            failed,
            processing_time_ms,
            results,
        })
    }

    fn resolve_settings(&self, processing: &ProcessingConfig) -> RunSettings {
        RunSettings {
            format: processing
                .output_format
                .unwrap_or_else(|| self.config.output_format()),
            title: processing.title.clone(),
            target_language: processing
                .target_language
                .clone()
                .unwrap_or_else(|| self.config.target_language().to_string()),
            use_cache: processing
                .cache_enabled
                .unwrap_or_else(|| self.config.cache_enabled()),
        }
    }
}

/// Full pipeline for one image: load → analyze → merge → layout → render → write
async fn process_image(
    pipelines: &Pipelines,
    job: &ImageJob,
    settings: &RunSettings,
) -> Result<(PageResult, PerformanceMetrics)> {
    let mut timings = PerformanceMetrics::default();

    let image = load_source_image_async(&job.input_path)
        .await
        .map_err(|e| PipelineError::ImageLoadFailed {
            page_index: job.index,
            reason: format!("{:#}", e),
        })?;

    let image_data = ImageData {
        index: job.index,
        filename: display_name(&job.input_path),
        path: job.input_path.clone(),
        image,
    };

    let stage = Instant::now();
    let phase1 = pipelines
        .phase1
        .execute(&image_data, &settings.target_language, settings.use_cache)
        .await?;
    timings.analysis_time = stage.elapsed();

    let stage = Instant::now();
    let phase2 = pipelines.phase2.execute(&phase1);
    let region_count = phase2.regions.len();
    timings.merge_time = stage.elapsed();

    let stage = Instant::now();
    let phase3 = pipelines
        .phase3
        .execute(phase2, &image_data.image, settings.title.clone())
        .await?;
    timings.layout_time = stage.elapsed();

    let stage = Instant::now();
    let phase4 = pipelines
        .phase4
        .execute(phase3, image_data.image.clone(), settings.format)
        .await?;
    timings.render_time = stage.elapsed();

    let encoded = phase4.encoded;
    let output_path = if encoded.substituted() {
        // Keep the extension honest about the bytes inside
        job.output_path.with_extension(encoded.format.extension())
    } else {
        job.output_path.clone()
    };

    write_output(job.index, &output_path, &encoded.bytes).await?;
    info!(
        "✓ {} → {} ({} regions)",
        image_data.filename,
        output_path.display(),
        region_count
    );

    Ok((
        PageResult {
            index: job.index,
            filename: image_data.filename,
            success: true,
            processing_time_ms: 0.0,
            regions: region_count,
            output_path: Some(output_path),
            format: Some(encoded.format),
            fallback_reason: encoded.fallback_reason,
            error: None,
        },
        timings,
    ))
}

async fn write_output(page_index: usize, path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    let to_error = |source| PipelineError::WriteFailed {
        page_index,
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(to_error)?;
    }
    tokio::fs::write(path, bytes).await.map_err(to_error)
}

fn failed_page(index: usize, filename: String, elapsed_ms: f64, error: String) -> PageResult {
    PageResult {
        index,
        filename,
        success: false,
        processing_time_ms: elapsed_ms,
        regions: 0,
        output_path: None,
        format: None,
        fallback_reason: None,
        error: Some(error),
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{BoundingBox, GeometryDetection, TranslationDetection};
    use crate::services::analysis::{PrecomputedProvider, StaticProvider};
    use image::{ImageFormat, RgbImage};
    use std::io::Cursor;

    fn config() -> Arc<Config> {
        let mut config = Config::from_lookup(|_| None).unwrap();
        config.batch.max_concurrent_images = 2;
        config.analysis.target_language = "fr".to_string();
        Arc::new(config)
    }

    fn write_png(path: &Path, width: u32, height: u32) {
        let mut bytes = Vec::new();
        RgbImage::new(width, height)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    fn job(index: usize, dir: &Path, name: &str) -> ImageJob {
        ImageJob {
            index,
            input_path: dir.join(name),
            output_path: dir.join("out").join(format!("{}-annotated.svg", name)),
        }
    }

    fn sidecar_orchestrator() -> BatchOrchestrator {
        let provider = Arc::new(PrecomputedProvider::new());
        BatchOrchestrator::new(
            config(),
            Providers::new(provider.clone(), provider),
            ResponseCache::in_memory(None),
            Metrics::new(),
        )
    }

    #[tokio::test]
    async fn test_batch_annotates_from_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("dialog.png"), 600, 400);
        std::fs::write(
            dir.path().join("dialog.ocr.json"),
            r#"[{"text": "OK", "bbox": {"x": 10, "y": 10, "width": 50, "height": 20}},
                {"text": "Cancel", "bbox": {"x": 500, "y": 10, "width": 60, "height": 20}}]"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("dialog.translations.json"),
            r#"[{"text": "Cancel", "translated_text": "Annuler"},
                {"text": "Loading...", "translated_text": "Chargement..."}]"#,
        )
        .unwrap();

        let result = sidecar_orchestrator()
            .process_batch(vec![job(0, dir.path(), "dialog.png")], &ProcessingConfig::default())
            .await
            .unwrap();

        assert_eq!(result.successful, 1);
        let page = &result.results[0];
        assert_eq!(page.regions, 3);
        assert_eq!(page.format, Some(OutputFormat::Svg));

        let svg = std::fs::read_to_string(page.output_path.as_ref().unwrap()).unwrap();
        assert!(svg.contains("Annuler"));
        assert!(svg.contains("Chargement..."));
        assert_eq!(svg.matches("class=\"connector\"").count(), 2);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_abort_batch() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("a.png"), 40, 30);
        write_png(&dir.path().join("c.png"), 40, 30);
        std::fs::write(dir.path().join("b.png"), b"not an image").unwrap();

        let orchestrator = sidecar_orchestrator();
        let jobs = vec![
            job(2, dir.path(), "c.png"),
            job(0, dir.path(), "a.png"),
            job(1, dir.path(), "b.png"),
        ];
        let result = orchestrator
            .process_batch(jobs, &ProcessingConfig::default())
            .await
            .unwrap();

        assert_eq!((result.total, result.successful, result.failed), (3, 2, 1));
        assert!(result.has_failures());
        let indices: Vec<_> = result.results.iter().map(|r| r.index).collect();
        assert_eq!(indices, [0, 1, 2]);
        assert!(!result.results[1].success);
        assert!(result.results[1].error.as_ref().unwrap().contains("page 1"));

        // Pages without sidecars still render an unannotated document
        assert_eq!(result.results[0].regions, 0);
        assert!(result.results[0].output_path.as_ref().unwrap().exists());

        let snapshot = orchestrator.metrics().snapshot();
        assert_eq!(snapshot.images_processed, 2);
        assert_eq!(snapshot.images_failed, 1);
    }

    #[tokio::test]
    async fn test_cache_reused_across_batches() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("shot.png"), 100, 80);

        let provider = Arc::new(StaticProvider::new(
            vec![GeometryDetection {
                text: "Save".to_string(),
                bbox: Some(BoundingBox::new(5.0, 5.0, 30.0, 10.0)),
                confidence: None,
            }],
            vec![TranslationDetection {
                text: "Save".to_string(),
                translated_text: "Enregistrer".to_string(),
                bbox: None,
            }],
        ));
        let cache_dir = dir.path().join("cache");
        let cache = ResponseCache::open(&cache_dir, None).await;
        let orchestrator = BatchOrchestrator::new(
            config(),
            Providers::new(provider.clone(), provider.clone()),
            cache,
            Metrics::new(),
        );

        let processing = ProcessingConfig::default();
        orchestrator
            .process_batch(vec![job(0, dir.path(), "shot.png")], &processing)
            .await
            .unwrap();
        orchestrator
            .process_batch(vec![job(0, dir.path(), "shot.png")], &processing)
            .await
            .unwrap();
        assert_eq!(provider.calls(), 2);

        // Flushed at the end of each batch
        assert!(cache_dir.join(ResponseCache::FILE_NAME).exists());

        let bypass = ProcessingConfig {
            cache_enabled: Some(false),
            ..ProcessingConfig::default()
        };
        orchestrator
            .process_batch(vec![job(0, dir.path(), "shot.png")], &bypass)
            .await
            .unwrap();
        assert_eq!(provider.calls(), 4);
    }

    #[tokio::test]
    async fn test_sidecars_added_later_are_not_masked_by_cache() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("dialog.png"), 200, 100);

        let provider = Arc::new(PrecomputedProvider::new());
        let orchestrator = BatchOrchestrator::new(
            config(),
            Providers::new(provider.clone(), provider),
            ResponseCache::open(dir.path().join("cache"), None).await,
            Metrics::new(),
        );
        let processing = ProcessingConfig::default();

        let first = orchestrator
            .process_batch(vec![job(0, dir.path(), "dialog.png")], &processing)
            .await
            .unwrap();
        assert_eq!(first.results[0].regions, 0);

        std::fs::write(
            dir.path().join("dialog.ocr.json"),
            r#"[{"text": "OK", "bbox": {"x": 10, "y": 10, "width": 50, "height": 20}}]"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("dialog.translations.json"),
            r#"[{"text": "OK", "translated_text": "Valider"}]"#,
        )
        .unwrap();

        let second = orchestrator
            .process_batch(vec![job(0, dir.path(), "dialog.png")], &processing)
            .await
            .unwrap();
        assert_eq!(second.results[0].regions, 1);
        let svg = std::fs::read_to_string(second.results[0].output_path.as_ref().unwrap()).unwrap();
        assert!(svg.contains("Valider"));

        // Unchanged sidecars are served from the cache
        let cached = orchestrator.cache().len();
        orchestrator
            .process_batch(vec![job(0, dir.path(), "dialog.png")], &processing)
            .await
            .unwrap();
        assert_eq!(orchestrator.cache().len(), cached);
    }

    #[tokio::test]
    async fn test_unavailable_format_falls_back_to_svg_file() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("shot.png"), 20, 20);

        let processing = ProcessingConfig {
            output_format: Some(OutputFormat::Pdf),
            title: Some("Preferences".to_string()),
            ..ProcessingConfig::default()
        };
        let mut pdf_job = job(0, dir.path(), "shot.png");
        pdf_job.output_path = dir.path().join("shot-annotated.pdf");

        let result = sidecar_orchestrator()
            .process_batch(vec![pdf_job], &processing)
            .await
            .unwrap();

        let page = &result.results[0];
        assert!(page.success);
        assert_eq!(page.format, Some(OutputFormat::Svg));
        assert!(page.fallback_reason.is_some());
        assert_eq!(page.output_path.as_deref(), Some(dir.path().join("shot-annotated.svg").as_path()));

        let svg = std::fs::read_to_string(dir.path().join("shot-annotated.svg")).unwrap();
        assert!(svg.contains("<title>Preferences</title>"));
        assert!(!dir.path().join("shot-annotated.pdf").exists());
    }
}
