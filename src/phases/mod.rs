pub mod phase1;
pub mod phase2;
pub mod phase3;
pub mod phase4;

pub use phase1::{Phase1Pipeline, OCR_SCHEMA_VERSION, TRANSLATION_SCHEMA_VERSION};
pub use phase2::Phase2Pipeline;
pub use phase3::Phase3Pipeline;
pub use phase4::Phase4Pipeline;
