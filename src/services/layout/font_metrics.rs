use unicode_width::UnicodeWidthStr;

/// Glyph-width lookup used to size label margins.
///
/// Any `Fn(&str, f64) -> f64` taking the text and font size works, which keeps
/// the layout engine testable without a font engine.
pub trait FontMetrics {
    fn text_width(&self, text: &str, font_size: f64) -> f64;
}

impl<F> FontMetrics for F
where
    F: Fn(&str, f64) -> f64,
{
    fn text_width(&self, text: &str, font_size: f64) -> f64 {
        self(text, font_size)
    }
}

/// Width estimate from terminal column widths: wide (CJK) glyphs count double.
#[derive(Debug, Clone, Copy)]
pub struct ApproximateMetrics {
    /// Advance of a narrow glyph, as a fraction of the font size
    pub average_advance: f64,
}

impl Default for ApproximateMetrics {
    fn default() -> Self {
        Self {
            average_advance: 0.55,
        }
    }
}

impl FontMetrics for ApproximateMetrics {
    fn text_width(&self, text: &str, font_size: f64) -> f64 {
        text.width() as f64 * font_size * self.average_advance
    }
}
