// Analysis collaborators: OCR geometry and translation sources
//
// The pipeline only sees these traits. Concrete backends are picked once
// from configuration when the providers are built.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

use crate::core::config::AnalysisConfig;
use crate::core::errors::{ProviderError, ProviderResult};
use crate::core::types::{GeometryDetection, ImageData, TranslationDetection};
use crate::services::cache::OperationParams;

/// Source of located text for one image
#[async_trait]
pub trait TextDetector: Send + Sync {
    fn name(&self) -> &str;

    /// Bumped when the backend's output for the same image may change
    fn version(&self) -> &str;

    /// Inputs besides the image bytes that the detections depend on.
    /// They become part of the cache key.
    async fn cache_params(&self, _image: &ImageData) -> ProviderResult<OperationParams> {
        Ok(OperationParams::new())
    }

    async fn detect_text(&self, image: &ImageData) -> ProviderResult<Vec<GeometryDetection>>;
}

/// Source of translated text for one image
#[async_trait]
pub trait Translator: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    /// Inputs besides the image bytes and target language that the
    /// translations depend on. They become part of the cache key.
    async fn cache_params(
        &self,
        _image: &ImageData,
        _target_language: &str,
    ) -> ProviderResult<OperationParams> {
        Ok(OperationParams::new())
    }

    async fn translate(
        &self,
        image: &ImageData,
        target_language: &str,
    ) -> ProviderResult<Vec<TranslationDetection>>;
}

/// Configured backend variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisBackend {
    /// Collaborator output stored as JSON next to each image
    Precomputed,
}

impl fmt::Display for AnalysisBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisBackend::Precomputed => f.write_str("precomputed"),
        }
    }
}

impl FromStr for AnalysisBackend {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "precomputed" | "sidecar" => Ok(AnalysisBackend::Precomputed),
            other => Err(ProviderError::UnknownBackend(other.to_string())),
        }
    }
}

/// The detector/translator pair used by a pipeline
#[derive(Clone)]
pub struct Providers {
    pub detector: Arc<dyn TextDetector>,
    pub translator: Arc<dyn Translator>,
}

impl Providers {
    pub fn new(detector: Arc<dyn TextDetector>, translator: Arc<dyn Translator>) -> Self {
        Self {
            detector,
            translator,
        }
    }
}

pub fn build_providers(config: &AnalysisConfig) -> Providers {
    let detector: Arc<dyn TextDetector> = match config.ocr_backend {
        AnalysisBackend::Precomputed => Arc::new(PrecomputedProvider::new()),
    };
    let translator: Arc<dyn Translator> = match config.translation_backend {
        AnalysisBackend::Precomputed => Arc::new(PrecomputedProvider::new()),
    };

    debug!(
        "Analysis providers: ocr={} translation={} target={}",
        detector.name(),
        translator.name(),
        config.target_language
    );

    Providers::new(detector, translator)
}

/// Reads collaborator output from sidecar files.
///
/// For `shot.png` the geometry is read from `shot.ocr.json` and translations
/// from `shot.translations.<lang>.json`, falling back to
/// `shot.translations.json`. Each file holds either a bare array or an object
/// with an `elements` array. A missing file means nothing was detected.
#[derive(Debug, Default, Clone)]
pub struct PrecomputedProvider;

impl PrecomputedProvider {
    pub fn new() -> Self {
        Self
    }

    pub fn geometry_path(image_path: &Path) -> PathBuf {
        image_path.with_extension("ocr.json")
    }

    pub fn translation_paths(image_path: &Path, target_language: &str) -> [PathBuf; 2] {
        [
            image_path.with_extension(format!("translations.{}.json", target_language)),
            image_path.with_extension("translations.json"),
        ]
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Sidecar<T> {
    List(Vec<T>),
    Document { elements: Vec<T> },
}

impl<T> Sidecar<T> {
    fn into_elements(self) -> Vec<T> {
        match self {
            Sidecar::List(elements) | Sidecar::Document { elements } => elements,
        }
    }
}

/// Parse a sidecar file; `None` when it does not exist
async fn read_sidecar<T: DeserializeOwned>(path: &Path) -> ProviderResult<Option<Vec<T>>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ProviderError::Io {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    let sidecar: Sidecar<T> =
        serde_json::from_str(&content).map_err(|e| ProviderError::InvalidInput {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    Ok(Some(sidecar.into_elements()))
}

/// Content hash of a sidecar file, or "absent"
async fn sidecar_digest(path: &Path) -> ProviderResult<String> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(format!("{:016x}", xxh3_64(&bytes))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok("absent".to_string()),
        Err(e) => Err(ProviderError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

#[async_trait]
impl TextDetector for PrecomputedProvider {
    fn name(&self) -> &str {
        "precomputed"
    }

    fn version(&self) -> &str {
        "1"
    }

    async fn cache_params(&self, image: &ImageData) -> ProviderResult<OperationParams> {
        let digest = sidecar_digest(&Self::geometry_path(&image.path)).await?;
        Ok(OperationParams::from([("sidecar".to_string(), digest)]))
    }

    async fn detect_text(&self, image: &ImageData) -> ProviderResult<Vec<GeometryDetection>> {
        let path = Self::geometry_path(&image.path);
        match read_sidecar(&path).await? {
            Some(detections) => {
                debug!("Read {} OCR detections from {}", detections.len(), path.display());
                Ok(detections)
            }
            None => {
                debug!("No OCR sidecar at {}", path.display());
                Ok(Vec::new())
            }
        }
    }
}

#[async_trait]
impl Translator for PrecomputedProvider {
    fn name(&self) -> &str {
        "precomputed"
    }

    fn version(&self) -> &str {
        "1"
    }

    async fn cache_params(
        &self,
        image: &ImageData,
        target_language: &str,
    ) -> ProviderResult<OperationParams> {
        let [specific, generic] = Self::translation_paths(&image.path, target_language);
        Ok(OperationParams::from([
            ("sidecar".to_string(), sidecar_digest(&specific).await?),
            ("sidecar_fallback".to_string(), sidecar_digest(&generic).await?),
        ]))
    }

    async fn translate(
        &self,
        image: &ImageData,
        target_language: &str,
    ) -> ProviderResult<Vec<TranslationDetection>> {
        for path in Self::translation_paths(&image.path, target_language) {
            if let Some(detections) = read_sidecar(&path).await? {
                debug!("Read {} translations from {}", detections.len(), path.display());
                return Ok(detections);
            }
        }

        debug!("No translation sidecar for {}", image.filename);
        Ok(Vec::new())
    }
}

/// Fixed detections, for embedding callers that already hold collaborator output.
pub struct StaticProvider {
    geometry: Vec<GeometryDetection>,
    translations: Vec<TranslationDetection>,
    calls: AtomicUsize,
}

impl StaticProvider {
    pub fn new(geometry: Vec<GeometryDetection>, translations: Vec<TranslationDetection>) -> Self {
        Self {
            geometry,
            translations,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of detect/translate calls answered so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextDetector for StaticProvider {
    fn name(&self) -> &str {
        "static"
    }

    fn version(&self) -> &str {
        "1"
    }

    async fn detect_text(&self, _image: &ImageData) -> ProviderResult<Vec<GeometryDetection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.geometry.clone())
    }
}

#[async_trait]
impl Translator for StaticProvider {
    fn name(&self) -> &str {
        "static"
    }

    fn version(&self) -> &str {
        "1"
    }

    async fn translate(
        &self,
        _image: &ImageData,
        _target_language: &str,
    ) -> ProviderResult<Vec<TranslationDetection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.translations.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::SourceImage;

    fn image_at(path: PathBuf) -> ImageData {
        ImageData {
            index: 0,
            filename: "shot.png".to_string(),
            path,
            image: SourceImage {
                bytes: Arc::new(Vec::new()),
                mime_type: "image/png".to_string(),
                width: 10,
                height: 10,
            },
        }
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!("Precomputed".parse::<AnalysisBackend>().unwrap(), AnalysisBackend::Precomputed);
        assert!(matches!(
            "tesseract".parse::<AnalysisBackend>(),
            Err(ProviderError::UnknownBackend(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_sidecars_mean_no_detections() {
        let dir = tempfile::tempdir().unwrap();
        let image = image_at(dir.path().join("shot.png"));
        let provider = PrecomputedProvider::new();

        assert!(provider.detect_text(&image).await.unwrap().is_empty());
        assert!(provider.translate(&image, "fr").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reads_both_sidecar_shapes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("shot.ocr.json"),
            r#"[{"text": "OK", "bbox": [10, 10, 60, 30], "confidence": 0.98}]"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("shot.translations.json"),
            r#"{"source_language": "en", "elements": [{"text": "OK", "translation": "D'accord"}]}"#,
        )
        .unwrap();

        let image = image_at(dir.path().join("shot.png"));
        let provider = PrecomputedProvider::new();

        let geometry = provider.detect_text(&image).await.unwrap();
        assert_eq!(geometry.len(), 1);
        assert_eq!(geometry[0].bbox.unwrap().width, 50.0);

        let translations = provider.translate(&image, "fr").await.unwrap();
        assert_eq!(translations[0].translated_text, "D'accord");
    }

    #[tokio::test]
    async fn test_language_specific_sidecar_preferred() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("shot.translations.json"),
            r#"[{"text": "OK", "translated_text": "generic"}]"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("shot.translations.de.json"),
            r#"[{"text": "OK", "translated_text": "Okay"}]"#,
        )
        .unwrap();

        let image = image_at(dir.path().join("shot.png"));
        let provider = PrecomputedProvider::new();

        let german = provider.translate(&image, "de").await.unwrap();
        assert_eq!(german[0].translated_text, "Okay");
        let french = provider.translate(&image, "fr").await.unwrap();
        assert_eq!(french[0].translated_text, "generic");
    }

    #[tokio::test]
    async fn test_malformed_sidecar_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("shot.ocr.json"), "{not json").unwrap();

        let image = image_at(dir.path().join("shot.png"));
        let err = PrecomputedProvider::new().detect_text(&image).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_cache_params_follow_sidecar_content() {
        let dir = tempfile::tempdir().unwrap();
        let image = image_at(dir.path().join("shot.png"));
        let provider = PrecomputedProvider::new();

        let before = TextDetector::cache_params(&provider, &image).await.unwrap();
        assert_eq!(before["sidecar"], "absent");

        std::fs::write(dir.path().join("shot.ocr.json"), r#"[{"text": "OK"}]"#).unwrap();
        let written = TextDetector::cache_params(&provider, &image).await.unwrap();
        assert_ne!(before, written);

        std::fs::write(dir.path().join("shot.ocr.json"), r#"[{"text": "Cancel"}]"#).unwrap();
        let edited = TextDetector::cache_params(&provider, &image).await.unwrap();
        assert_ne!(written, edited);

        let generic = Translator::cache_params(&provider, &image, "fr").await.unwrap();
        std::fs::write(dir.path().join("shot.translations.fr.json"), "[]").unwrap();
        let specific = Translator::cache_params(&provider, &image, "fr").await.unwrap();
        assert_ne!(generic, specific);
        assert_eq!(specific["sidecar_fallback"], "absent");
    }

    #[tokio::test]
    async fn test_static_provider_counts_calls() {
        let provider = StaticProvider::new(Vec::new(), Vec::new());
        let image = image_at(PathBuf::from("unused.png"));
        provider.detect_text(&image).await.unwrap();
        provider.translate(&image, "fr").await.unwrap();
        assert_eq!(provider.calls(), 2);
    }
}
