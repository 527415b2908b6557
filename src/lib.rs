// Library exports for the screenshot annotation workflow
//
// Analysis collaborators → response cache → merge → layout → render

// Core modules
pub mod cli;
pub mod core;
pub mod orchestration;
pub mod phases;
pub mod services;
pub mod utils;

// Re-export commonly used types and functions
pub use crate::core::{
    config::Config,
    errors::{CacheError, ConfigError, MergeError, PipelineError, ProviderError, RenderingError},
    types::{
        BatchResult, BoundingBox, Canvas, GeometryDetection, ImageData, ImageJob, LayoutPlacement,
        OutputFormat, PageResult, Phase1Output, Phase2Output, Phase3Output, Phase4Output,
        ProcessingConfig, Region, RenderedDocument, TranslationDetection,
    },
};

pub use orchestration::BatchOrchestrator;

pub use services::{
    encode, fingerprint, merge, ApproximateMetrics, FontMetrics, LayoutEngine, ResponseCache,
    SvgRenderer, MIN_SPACING,
};

pub use utils::Metrics;
