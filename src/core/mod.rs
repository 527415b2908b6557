pub mod config;
pub mod errors;
pub mod types;

// Re-export commonly used items for convenience
pub use config::{Config, LayoutConfig, RenderingConfig};
pub use errors::{
    CacheError, ConfigError, MergeError, PipelineError, ProviderError, RenderingError,
};
pub use types::{
    BoundingBox, Canvas, GeometryDetection, LayoutPlacement, OutputFormat, Region, Side,
    SourceImage, TranslationDetection,
};
