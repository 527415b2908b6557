pub mod image_ops;
pub mod metrics;

// Re-export commonly used items
pub use image_ops::{load_source_image_async, probe_image, to_data_url};
pub use metrics::{Metrics, MetricsSnapshot, Stage};
