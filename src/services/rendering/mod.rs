pub mod encode;

pub use encode::{encode, is_supported};

use std::fmt::Write;
use tracing::debug;

use crate::core::config::{LayoutConfig, RenderingConfig};
use crate::core::types::{
    Canvas, LayoutPlacement, Marker, RenderedDocument, Side, SourceImage, TITLE_BAND_HEIGHT,
};
use crate::utils::image_ops::to_data_url;

/// Annotated SVG renderer.
///
/// Pure: the document is a function of the image, canvas and placements only.
/// The source image is embedded as a data URL, never decoded.
pub struct SvgRenderer {
    rendering: RenderingConfig,
    font_size: f64,
    marker_radius: f64,
    marker_gap: f64,
}

impl SvgRenderer {
    pub fn new(rendering: RenderingConfig, layout: &LayoutConfig) -> Self {
        Self {
            rendering,
            font_size: layout.font_size,
            marker_radius: layout.marker_radius,
            marker_gap: layout.marker_gap,
        }
    }

    pub fn render(
        &self,
        image: &SourceImage,
        canvas: &Canvas,
        placements: &[LayoutPlacement],
    ) -> RenderedDocument {
        let width = canvas.width();
        let height = canvas.height();
        let mut svg = String::with_capacity(image.bytes.len() * 4 / 3 + 4096);

        svg.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        let _ = writeln!(
            svg,
            r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            w = num(width),
            h = num(height),
        );

        if let Some(title) = &canvas.title {
            let _ = writeln!(svg, "<title>{}</title>", escape_xml(title));
        }

        self.write_style(&mut svg);
        let _ = writeln!(svg, r##"<rect width="{}" height="{}" fill="#ffffff"/>"##, num(width), num(height));

        if let Some(title) = &canvas.title {
            let _ = writeln!(
                svg,
                r#"<text class="title" x="{}" y="{}" dominant-baseline="middle">{}</text>"#,
                num(width / 2.0),
                num(TITLE_BAND_HEIGHT / 2.0),
                escape_xml(title)
            );
        }

        let _ = writeln!(
            svg,
            r#"<image x="{}" y="{}" width="{}" height="{}" preserveAspectRatio="none" xlink:href="{}"/>"#,
            num(canvas.image_x()),
            num(canvas.image_y()),
            num(canvas.image_width),
            num(canvas.image_height),
            to_data_url(image)
        );

        svg.push_str("<g class=\"callouts\">\n");
        for placement in placements {
            self.write_callout(&mut svg, placement);
        }
        svg.push_str("</g>\n</svg>\n");

        debug!(
            "Rendered {} callouts into {}x{} SVG ({} bytes)",
            placements.len(),
            num(width),
            num(height),
            svg.len()
        );

        RenderedDocument { svg, width, height }
    }

    fn write_style(&self, svg: &mut String) {
        let font = escape_xml(&self.rendering.font_family);
        let accent = escape_xml(&self.rendering.accent_color);
        let _ = writeln!(
            svg,
            "<style>\
             .label{{font-family:{font};font-size:{size}px;fill:{label}}}\
             .title{{font-family:{font};font-size:{size}px;font-weight:bold;fill:{label};text-anchor:middle}}\
             .marker{{fill:{accent}}}\
             .marker-text{{font-family:{font};font-size:{marker}px;font-weight:bold;fill:#ffffff;text-anchor:middle}}\
             .highlight{{fill:none;stroke:{accent};stroke-width:2}}\
             .connector{{fill:none;stroke:{accent};stroke-width:1.5}}\
             </style>",
            font = font,
            size = num(self.font_size),
            label = escape_xml(&self.rendering.label_color),
            accent = accent,
            marker = num(self.font_size * 0.8),
        );
    }

    fn write_callout(&self, svg: &mut String, placement: &LayoutPlacement) {
        let _ = writeln!(
            svg,
            r#"<g class="callout" data-region="{}" data-side="{}">"#,
            placement.region_id,
            match placement.side {
                Side::Left => "left",
                Side::Right => "right",
            }
        );

        if let Some(area) = &placement.highlight {
            let _ = writeln!(
                svg,
                r#"<rect class="highlight" x="{}" y="{}" width="{}" height="{}" rx="3"/>"#,
                num(area.x),
                num(area.y),
                num(area.width),
                num(area.height)
            );
        }

        if let Some(path) = &placement.connector {
            let _ = writeln!(
                svg,
                r#"<path class="connector" d="M {} {} C {} {}, {} {}, {} {}"/>"#,
                num(path.start.x),
                num(path.start.y),
                num(path.control1.x),
                num(path.control1.y),
                num(path.control2.x),
                num(path.control2.y),
                num(path.end.x),
                num(path.end.y)
            );
        }

        let cx = placement.label_box.x + self.marker_radius;
        let cy = placement.anchor_y;
        match placement.marker {
            Marker::Index(index) => {
                let _ = writeln!(
                    svg,
                    r#"<circle class="marker" cx="{x}" cy="{y}" r="{r}"/><text class="marker-text" x="{x}" y="{y}" dominant-baseline="central">{i}</text>"#,
                    x = num(cx),
                    y = num(cy),
                    r = num(self.marker_radius),
                    i = index
                );
            }
            Marker::Bullet => {
                let _ = writeln!(
                    svg,
                    r#"<circle class="marker" cx="{}" cy="{}" r="{}"/>"#,
                    num(cx),
                    num(cy),
                    num(self.marker_radius / 3.0)
                );
            }
        }

        let _ = writeln!(
            svg,
            r#"<text class="label" x="{}" y="{}" dominant-baseline="central">{}</text>"#,
            num(placement.label_box.x + self.marker_radius * 2.0 + self.marker_gap),
            num(cy),
            escape_xml(&placement.label_text)
        );

        svg.push_str("</g>\n");
    }
}

/// Escape text for XML content and attribute values
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            // Control characters are not allowed in XML 1.0
            c if c.is_control() && !matches!(c, '\t' | '\n' | '\r') => {}
            c => out.push(c),
        }
    }
    out
}

/// Coordinates with at most two decimals and no trailing zeros
fn num(value: f64) -> String {
    let rounded = (value * 100.0).round() / 100.0;
    if rounded == 0.0 || !rounded.is_finite() {
        return "0".to_string();
    }
    let text = format!("{:.2}", rounded);
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}
