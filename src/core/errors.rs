// Error types for the annotation workflow
//
// Library-level errors are typed with thiserror; orchestration glue wraps
// them in anyhow with context.

use std::path::PathBuf;
use thiserror::Error;

use crate::core::types::OutputFormat;

/// Response cache errors. None of these are fatal to a pipeline run.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache storage unavailable at {path}: {source}")]
    Unavailable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to load cache from {path}: {source}")]
    LoadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to save cache to {path}: {source}")]
    SaveFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cache serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Merger errors. A malformed region is dropped, the rest of the image continues.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("Malformed {origin} region #{index}: {reason}")]
    MalformedRegion {
        origin: &'static str,
        index: usize,
        reason: String,
    },
}

/// Rendering and encoding errors
#[derive(Debug, Error)]
pub enum RenderingError {
    #[error("Output encoding {format} unavailable: {reason}")]
    UnsupportedOutputEncoding { format: OutputFormat, reason: String },

    #[error("Rasterization failed: {0}")]
    RasterizationFailed(String),
}

/// Analysis collaborator errors
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Failed to read detections from {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid detections in {path}: {reason}")]
    InvalidInput { path: PathBuf, reason: String },

    #[error("Unknown analysis backend '{0}' (available: precomputed)")]
    UnknownBackend(String),
}

/// Pipeline orchestration errors, scoped to one page
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Image loading failed for page {page_index}: {reason}")]
    ImageLoadFailed { page_index: usize, reason: String },

    #[error("Analysis failed on page {page_index}: {source}")]
    AnalysisFailed {
        page_index: usize,
        #[source]
        source: ProviderError,
    },

    #[error("Writing output for page {page_index} to {path} failed: {source}")]
    WriteFailed {
        page_index: usize,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Task join failed: {0}")]
    TaskJoinFailed(String),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid layout config: {0}")]
    InvalidLayoutConfig(String),

    #[error("Invalid rendering config: {0}")]
    InvalidRenderingConfig(String),

    #[error("Invalid cache path: {0}")]
    InvalidCachePath(String),

    #[error("Max concurrent images must be > 0, got {0}")]
    InvalidConcurrency(usize),

    #[error("Environment variable {name} is invalid: {reason}")]
    EnvVarError { name: &'static str, reason: String },
}

pub type CacheResult<T> = Result<T, CacheError>;
pub type MergeResult<T> = Result<T, MergeError>;
pub type RenderingResult<T> = Result<T, RenderingError>;
pub type ProviderResult<T> = Result<T, ProviderError>;
pub type PipelineResult<T> = Result<T, PipelineError>;
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Attach the page index to collaborator failures
pub trait ErrorContext<T> {
    fn with_page_context(self, page_index: usize) -> PipelineResult<T>;
}

impl<T> ErrorContext<T> for ProviderResult<T> {
    fn with_page_context(self, page_index: usize) -> PipelineResult<T> {
        self.map_err(|e| PipelineError::AnalysisFailed {
            page_index,
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_context_wraps_provider_error() {
        let result: ProviderResult<()> = Err(ProviderError::UnknownBackend("paddle".into()));
        let err = result.with_page_context(3).unwrap_err();
        assert!(matches!(err, PipelineError::AnalysisFailed { page_index: 3, .. }));
        assert!(err.to_string().contains("page 3"));
    }
}
