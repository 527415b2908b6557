// Shared data model for the annotation workflow

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Axis-aligned box in source-image pixels.
///
/// Accepts either `{x, y, width, height}` or the `[x1, y1, x2, y2]` corner
/// form that OCR and vision collaborators commonly emit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "BoundingBoxRepr")]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BoundingBoxRepr {
    Rect { x: f64, y: f64, width: f64, height: f64 },
    Corners([f64; 4]),
}

impl From<BoundingBoxRepr> for BoundingBox {
    fn from(repr: BoundingBoxRepr) -> Self {
        match repr {
            BoundingBoxRepr::Rect { x, y, width, height } => Self { x, y, width, height },
            BoundingBoxRepr::Corners([x1, y1, x2, y2]) => Self {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
            },
        }
    }
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn center_x(&self) -> f64 {
        self.x + self.width / 2.0
    }

    pub fn center_y(&self) -> f64 {
        self.y + self.height / 2.0
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite()
    }

    /// Zero-area boxes are the "null bbox" convention for unlocated text.
    pub fn is_degenerate(&self) -> bool {
        self.width == 0.0 || self.height == 0.0
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
        }
    }

    pub fn center_distance(&self, other: &BoundingBox) -> f64 {
        let dx = self.center_x() - other.center_x();
        let dy = self.center_y() - other.center_y();
        (dx * dx + dy * dy).sqrt()
    }
}

/// Text located by an OCR collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryDetection {
    pub text: String,
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
    #[serde(default)]
    pub confidence: Option<f32>,
}

/// Text and translation produced by a translation collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationDetection {
    pub text: String,
    #[serde(alias = "translation")]
    pub translated_text: String,
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
}

/// One canonical annotated region, produced by the merger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: usize,
    pub bbox: Option<BoundingBox>,
    pub source_text: String,
    pub translated_text: String,
    pub confidence: Option<f32>,
}

impl Region {
    pub fn is_located(&self) -> bool {
        self.bbox.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

/// What is drawn in front of a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Marker {
    Index(u32),
    Bullet,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }
}

/// Cubic Bézier from a label to its region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConnectorPath {
    pub start: Point,
    pub control1: Point,
    pub control2: Point,
    pub end: Point,
}

/// Computed rendering position of one region. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayoutPlacement {
    pub region_id: usize,
    pub side: Side,
    pub order_index: usize,
    pub anchor_y: f64,
    pub label_box: Rect,
    pub connector: Option<ConnectorPath>,
    pub marker: Marker,
    pub label_text: String,
    /// Source bbox translated into canvas space
    pub highlight: Option<Rect>,
}

/// Height of the caption band drawn when the canvas has a title.
pub const TITLE_BAND_HEIGHT: f64 = 32.0;

/// Output page geometry: the (scaled) image plus label margins.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Canvas {
    pub image_width: f64,
    pub image_height: f64,
    pub left_margin: f64,
    pub right_margin: f64,
    pub title: Option<String>,
    /// Extra height below the image when packed labels overflow it
    pub bottom_overflow: f64,
}

impl Canvas {
    pub fn empty(image_width: f64, image_height: f64, title: Option<String>) -> Self {
        Self {
            image_width,
            image_height,
            left_margin: 0.0,
            right_margin: 0.0,
            title,
            bottom_overflow: 0.0,
        }
    }

    pub fn header_height(&self) -> f64 {
        if self.title.is_some() {
            TITLE_BAND_HEIGHT
        } else {
            0.0
        }
    }

    pub fn image_x(&self) -> f64 {
        self.left_margin
    }

    pub fn image_y(&self) -> f64 {
        self.header_height()
    }

    pub fn width(&self) -> f64 {
        self.left_margin + self.image_width + self.right_margin
    }

    pub fn height(&self) -> f64 {
        self.header_height() + self.image_height + self.bottom_overflow
    }
}

/// Encoded source image as handed to the renderer. Bytes are embedded, never decoded.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub bytes: Arc<Vec<u8>>,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Svg,
    Png,
    Pdf,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Svg => "svg",
            OutputFormat::Png => "png",
            OutputFormat::Pdf => "pdf",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "svg" => Ok(OutputFormat::Svg),
            "png" => Ok(OutputFormat::Png),
            "pdf" => Ok(OutputFormat::Pdf),
            other => Err(format!("unknown output format '{}' (expected svg, png or pdf)", other)),
        }
    }
}

/// Vector document produced by the renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedDocument {
    pub svg: String,
    pub width: f64,
    pub height: f64,
}

/// Final bytes for persistence, with the format actually produced.
#[derive(Debug, Clone)]
pub struct EncodedOutput {
    pub requested: OutputFormat,
    pub format: OutputFormat,
    pub bytes: Vec<u8>,
    pub fallback_reason: Option<String>,
}

impl EncodedOutput {
    pub fn substituted(&self) -> bool {
        self.requested != self.format
    }
}

/// Request-level overrides for one batch
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessingConfig {
    pub output_format: Option<OutputFormat>,
    pub title: Option<String>,
    pub target_language: Option<String>,
    pub cache_enabled: Option<bool>,
}

/// One image to annotate
#[derive(Debug, Clone)]
pub struct ImageJob {
    pub index: usize,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
}

/// Image data for processing
#[derive(Debug, Clone)]
pub struct ImageData {
    pub index: usize,
    pub filename: String,
    pub path: PathBuf,
    pub image: SourceImage,
}

/// Phase 1 output: raw collaborator detections
#[derive(Debug, Clone)]
pub struct Phase1Output {
    pub page_index: usize,
    pub geometry: Vec<GeometryDetection>,
    pub translations: Vec<TranslationDetection>,
}

/// Phase 2 output: merged regions
#[derive(Debug, Clone)]
pub struct Phase2Output {
    pub page_index: usize,
    pub regions: Vec<Region>,
    pub matched: usize,
    pub unmatched_geometry: usize,
    pub unmatched_translation: usize,
    pub dropped: usize,
}

/// Phase 3 output: computed layout
#[derive(Debug, Clone)]
pub struct Phase3Output {
    pub page_index: usize,
    pub canvas: Canvas,
    pub placements: Vec<LayoutPlacement>,
}

/// Phase 4 output: rendered and encoded document
#[derive(Debug, Clone)]
pub struct Phase4Output {
    pub page_index: usize,
    pub document: RenderedDocument,
    pub encoded: EncodedOutput,
}

/// Individual page result
#[derive(Debug, Clone, Serialize)]
pub struct PageResult {
    pub index: usize,
    pub filename: String,
    pub success: bool,
    pub processing_time_ms: f64,
    pub regions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<OutputFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Batch processing result
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub processing_time_ms: f64,
    pub results: Vec<PageResult>,
}

impl BatchResult {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Per-image stage timings
#[derive(Debug, Clone, Default)]
pub struct PerformanceMetrics {
    pub analysis_time: Duration,
    pub merge_time: Duration,
    pub layout_time: Duration,
    pub render_time: Duration,
}

impl PerformanceMetrics {
    pub fn merge(&mut self, other: &PerformanceMetrics) {
        self.analysis_time += other.analysis_time;
        self.merge_time += other.merge_time;
        self.layout_time += other.layout_time;
        self.render_time += other.render_time;
    }

    pub fn total(&self) -> Duration {
        self.analysis_time + self.merge_time + self.layout_time + self.render_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_accepts_corner_form() {
        let bbox: BoundingBox = serde_json::from_str("[10, 20, 60, 40]").unwrap();
        assert_eq!(bbox, BoundingBox::new(10.0, 20.0, 50.0, 20.0));

        let bbox: BoundingBox =
            serde_json::from_str(r#"{"x": 1, "y": 2, "width": 3, "height": 4}"#).unwrap();
        assert_eq!(bbox, BoundingBox::new(1.0, 2.0, 3.0, 4.0));
    }

    #[test]
    fn test_translation_accepts_short_field_name() {
        let t: TranslationDetection =
            serde_json::from_str(r#"{"text": "Cancel", "translation": "Annuler"}"#).unwrap();
        assert_eq!(t.translated_text, "Annuler");
        assert!(t.bbox.is_none());
    }

    #[test]
    fn test_canvas_dimensions() {
        let mut canvas = Canvas::empty(600.0, 400.0, Some("Settings".to_string()));
        canvas.left_margin = 100.0;
        canvas.right_margin = 50.0;
        assert_eq!(canvas.width(), 750.0);
        assert_eq!(canvas.height(), 400.0 + TITLE_BAND_HEIGHT);
        assert_eq!(canvas.image_y(), TITLE_BAND_HEIGHT);
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("PNG".parse::<OutputFormat>().unwrap(), OutputFormat::Png);
        assert!("tiff".parse::<OutputFormat>().is_err());
    }
}
