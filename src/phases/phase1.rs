// Phase 1: Cached analysis (OCR geometry + translations)

use anyhow::{Context, Result};
use std::time::Instant;
use tracing::{debug, instrument};

use crate::core::errors::ErrorContext;
use crate::core::types::{GeometryDetection, ImageData, Phase1Output, TranslationDetection};
use crate::services::analysis::Providers;
use crate::services::cache::{fingerprint, params, ResponseCache};
use crate::utils::{Metrics, Stage};

/// Shape of cached OCR payloads; bump when `GeometryDetection` changes
pub const OCR_SCHEMA_VERSION: &str = "geometry-v1";

/// Shape of cached translation payloads; bump when `TranslationDetection` changes
pub const TRANSLATION_SCHEMA_VERSION: &str = "translation-v1";

/// Phase 1 pipeline: collaborator calls wrapped by the response cache
pub struct Phase1Pipeline {
    providers: Providers,
    cache: ResponseCache,
    metrics: Metrics,
}

impl Phase1Pipeline {
    pub fn new(providers: Providers, cache: ResponseCache, metrics: Metrics) -> Self {
        Self {
            providers,
            cache,
            metrics,
        }
    }

    /// Execute Phase 1 on a single image
    ///
    /// OCR and translation run concurrently. Each call is keyed by the image
    /// bytes, the backend identity, any provider-declared inputs and (for
    /// translation) the target language.
    /// With `use_cache = false` both collaborators are called directly.
    #[instrument(skip(self, image_data), fields(
        page_index = image_data.index,
        filename = %image_data.filename
    ))]
    pub async fn execute(
        &self,
        image_data: &ImageData,
        target_language: &str,
        use_cache: bool,
    ) -> Result<Phase1Output> {
        debug!("Phase 1: Analyzing page {} ({})", image_data.index, image_data.filename);
        let start = Instant::now();

        let cache = if use_cache {
            self.cache.clone()
        } else {
            ResponseCache::disabled()
        };

        let (geometry, translations) = tokio::join!(
            self.detect(image_data, &cache),
            self.translate(image_data, target_language, &cache)
        );
        let geometry = geometry?;
        let translations = translations?;

        self.metrics.record_stage_duration(Stage::Analysis, start.elapsed());
        debug!(
            "✓ Phase 1 complete in {:.2}ms: {} OCR detections, {} translations",
            start.elapsed().as_secs_f64() * 1000.0,
            geometry.len(),
            translations.len()
        );

        Ok(Phase1Output {
            page_index: image_data.index,
            geometry,
            translations,
        })
    }

    async fn detect(
        &self,
        image_data: &ImageData,
        cache: &ResponseCache,
    ) -> Result<Vec<GeometryDetection>> {
        let detector = &self.providers.detector;
        let mut key_params = detector
            .cache_params(image_data)
            .await
            .with_page_context(image_data.index)?;
        key_params.extend(params([
            ("backend", detector.name()),
            ("backend_version", detector.version()),
        ]));
        let key = fingerprint(
            &image_data.image.bytes,
            "ocr",
            &key_params,
            OCR_SCHEMA_VERSION,
        );

        let lookup = cache
            .get_or_insert_with(&key, || async {
                detector
                    .detect_text(image_data)
                    .await
                    .with_page_context(image_data.index)
                    .map_err(anyhow::Error::from)
            })
            .await
            .with_context(|| format!("OCR failed for {}", image_data.filename))?;

        if lookup.from_cache {
            debug!("OCR result for {} served from cache ({})", image_data.filename, key);
        }
        Ok(lookup.value)
    }

    async fn translate(
        &self,
        image_data: &ImageData,
        target_language: &str,
        cache: &ResponseCache,
    ) -> Result<Vec<TranslationDetection>> {
        let translator = &self.providers.translator;
        let mut key_params = translator
            .cache_params(image_data, target_language)
            .await
            .with_page_context(image_data.index)?;
        key_params.extend(params([
            ("backend", translator.name()),
            ("backend_version", translator.version()),
            ("target_language", target_language),
        ]));
        let key = fingerprint(
            &image_data.image.bytes,
            "translate",
            &key_params,
            TRANSLATION_SCHEMA_VERSION,
        );

        let lookup = cache
            .get_or_insert_with(&key, || async {
                translator
                    .translate(image_data, target_language)
                    .await
                    .with_page_context(image_data.index)
                    .map_err(anyhow::Error::from)
            })
            .await
            .with_context(|| format!("Translation failed for {}", image_data.filename))?;

        if lookup.from_cache {
            debug!("Translations for {} served from cache ({})", image_data.filename, key);
        }
        Ok(lookup.value)
    }
}
