pub mod analysis;
pub mod cache;
pub mod layout;
pub mod merge;
pub mod rendering;

// Re-export commonly used services
pub use analysis::{build_providers, AnalysisBackend, PrecomputedProvider, Providers, StaticProvider, TextDetector, Translator};
pub use cache::{fingerprint, Fingerprint, ResponseCache};
pub use layout::{ApproximateMetrics, FontMetrics, LayoutEngine, MIN_SPACING};
pub use merge::{merge, merge_detailed, MergeOutcome, MergeStats};
pub use rendering::{encode, SvgRenderer};
