// Label layout: sides, margins, vertical packing and connector routing
//
// Coordinates in the output are canvas coordinates: the scaled source image
// sits at (left_margin, header_height) and labels live in the side margins.

pub mod font_metrics;

pub use font_metrics::{ApproximateMetrics, FontMetrics};

use std::cmp::Ordering;
use tracing::debug;

use crate::core::config::LayoutConfig;
use crate::core::types::{
    Canvas, ConnectorPath, LayoutPlacement, Marker, Point, Rect, Region, Side,
};

/// Minimum vertical distance between consecutive label anchors on one side.
///
/// Fixed so that the non-overlap guarantee holds for any label content.
pub const MIN_SPACING: f64 = 24.0;

/// A region queued on one side, with its position in merge order
struct Slot<'a> {
    region: &'a Region,
    position: usize,
}

pub struct LayoutEngine {
    config: LayoutConfig,
}

impl LayoutEngine {
    pub fn new(config: LayoutConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    /// Place every region around an image of the given source dimensions.
    pub fn layout<M>(
        &self,
        regions: &[Region],
        image_width: f64,
        image_height: f64,
        metrics: &M,
    ) -> (Canvas, Vec<LayoutPlacement>)
    where
        M: FontMetrics + ?Sized,
    {
        self.layout_titled(regions, image_width, image_height, None, metrics)
    }

    /// [`layout`](Self::layout) with a caption band above the image.
    pub fn layout_titled<M>(
        &self,
        regions: &[Region],
        image_width: f64,
        image_height: f64,
        title: Option<&str>,
        metrics: &M,
    ) -> (Canvas, Vec<LayoutPlacement>)
    where
        M: FontMetrics + ?Sized,
    {
        let scale = self.scale_for(image_width);
        let mut canvas = Canvas::empty(
            image_width * scale,
            image_height * scale,
            title.map(str::to_string),
        );

        if regions.is_empty() {
            debug!("No regions to place, canvas keeps zero margins");
            return (canvas, Vec::new());
        }

        let (left, right) = assign_sides(regions, image_width);
        canvas.left_margin = self.margin(&left, metrics);
        canvas.right_margin = self.margin(&right, metrics);

        let left_anchors = pack(&left, &canvas, scale);
        let right_anchors = pack(&right, &canvas, scale);

        let image_bottom = canvas.image_y() + canvas.image_height;
        canvas.bottom_overflow = [&left_anchors, &right_anchors]
            .iter()
            .filter_map(|anchors| anchors.last())
            .map(|last| last + MIN_SPACING / 2.0 - image_bottom)
            .fold(0.0, f64::max);

        let mut next_index = 1;
        let mut placements = Vec::with_capacity(regions.len());
        for (side, slots, anchors) in [
            (Side::Left, &left, &left_anchors),
            (Side::Right, &right, &right_anchors),
        ] {
            for (order_index, (slot, &anchor_y)) in slots.iter().zip(anchors.iter()).enumerate() {
                placements.push(self.place(
                    slot.region,
                    side,
                    order_index,
                    anchor_y,
                    &canvas,
                    scale,
                    metrics,
                    &mut next_index,
                ));
            }
        }

        debug!(
            "Laid out {} labels ({} left, {} right), canvas {:.0}x{:.0}",
            placements.len(),
            left.len(),
            right.len(),
            canvas.width(),
            canvas.height()
        );

        (canvas, placements)
    }

    fn scale_for(&self, image_width: f64) -> f64 {
        if image_width > self.config.max_image_width && image_width > 0.0 {
            self.config.max_image_width / image_width
        } else {
            1.0
        }
    }

    fn marker_width(&self) -> f64 {
        self.config.marker_radius * 2.0 + self.config.marker_gap
    }

    fn label_width<M>(&self, region: &Region, metrics: &M) -> f64
    where
        M: FontMetrics + ?Sized,
    {
        let text = metrics
            .text_width(&region.translated_text, self.config.font_size)
            .max(0.0);
        self.marker_width() + text
    }

    fn margin<M>(&self, slots: &[Slot], metrics: &M) -> f64
    where
        M: FontMetrics + ?Sized,
    {
        if slots.is_empty() {
            return 0.0;
        }
        let widest = slots
            .iter()
            .map(|slot| self.label_width(slot.region, metrics))
            .fold(0.0, f64::max);
        widest + self.config.label_padding
    }

    #[allow(clippy::too_many_arguments)]
    fn place<M>(
        &self,
        region: &Region,
        side: Side,
        order_index: usize,
        anchor_y: f64,
        canvas: &Canvas,
        scale: f64,
        metrics: &M,
        next_index: &mut u32,
    ) -> LayoutPlacement
    where
        M: FontMetrics + ?Sized,
    {
        let height = (self.config.font_size * 1.4).min(MIN_SPACING);
        let x = match side {
            Side::Left => self.config.label_padding / 2.0,
            Side::Right => canvas.image_x() + canvas.image_width + self.config.label_padding / 2.0,
        };
        let label_box = Rect {
            x,
            y: anchor_y - height / 2.0,
            width: self.label_width(region, metrics),
            height,
        };

        let highlight = region.bbox.map(|bbox| {
            let scaled = bbox.scaled(scale);
            Rect {
                x: canvas.image_x() + scaled.x,
                y: canvas.image_y() + scaled.y,
                width: scaled.width,
                height: scaled.height,
            }
        });

        let (marker, connector) = match highlight {
            Some(area) => {
                let marker = Marker::Index(*next_index);
                *next_index += 1;
                (marker, Some(self.connector(side, &label_box, anchor_y, &area)))
            }
            None => (Marker::Bullet, None),
        };

        LayoutPlacement {
            region_id: region.id,
            side,
            order_index,
            anchor_y,
            label_box,
            connector,
            marker,
            label_text: region.translated_text.clone(),
            highlight,
        }
    }

    fn connector(&self, side: Side, label_box: &Rect, anchor_y: f64, area: &Rect) -> ConnectorPath {
        let target_y = area.y + area.height / 2.0;
        let (start, end) = match side {
            Side::Left => (
                Point::new(label_box.right(), anchor_y),
                Point::new(area.x, target_y),
            ),
            Side::Right => (
                Point::new(label_box.x - self.config.connector_offset, anchor_y),
                Point::new(area.right(), target_y),
            ),
        };

        // Horizontal tangents at both ends give an S-curve
        let dx = (end.x - start.x) / 2.0;
        ConnectorPath {
            start,
            control1: Point::new(start.x + dx, start.y),
            control2: Point::new(end.x - dx, end.y),
            end,
        }
    }
}

/// Split regions into left and right columns, each in packing order.
fn assign_sides(regions: &[Region], image_width: f64) -> (Vec<Slot<'_>>, Vec<Slot<'_>>) {
    let centreline = image_width / 2.0;
    let mut left = Vec::new();
    let mut right = Vec::new();
    let mut next_unlocated = Side::Left;

    for (position, region) in regions.iter().enumerate() {
        let side = match region.bbox {
            Some(bbox) if bbox.center_x() > centreline => Side::Right,
            Some(_) => Side::Left,
            None => {
                let side = next_unlocated;
                next_unlocated = match side {
                    Side::Left => Side::Right,
                    Side::Right => Side::Left,
                };
                side
            }
        };

        let slot = Slot { region, position };
        match side {
            Side::Left => left.push(slot),
            Side::Right => right.push(slot),
        }
    }

    left.sort_by(packing_order);
    right.sort_by(packing_order);
    (left, right)
}

/// Located regions by centre y, then unlocated; merge order breaks ties.
fn packing_order(a: &Slot, b: &Slot) -> Ordering {
    match (a.region.bbox, b.region.bbox) {
        (Some(ab), Some(bb)) => ab
            .center_y()
            .total_cmp(&bb.center_y())
            .then(a.position.cmp(&b.position)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.position.cmp(&b.position),
    }
}

/// Anchor every slot at its natural height, pushed down to keep MIN_SPACING.
fn pack(slots: &[Slot], canvas: &Canvas, scale: f64) -> Vec<f64> {
    let top = canvas.image_y();
    let bottom = top + canvas.image_height;
    let pinned = slots.iter().filter(|slot| !slot.region.is_located()).count();

    let mut anchors = Vec::with_capacity(slots.len());
    let mut floor = top + MIN_SPACING / 2.0;
    let mut unlocated_seen = 0;

    for slot in slots {
        let natural = match slot.region.bbox {
            Some(bbox) => (top + bbox.center_y() * scale).max(top).min(bottom),
            None => {
                // Unlocated labels stack upward from the bottom edge
                let remaining = (pinned - unlocated_seen) as f64;
                unlocated_seen += 1;
                bottom - remaining * MIN_SPACING + MIN_SPACING / 2.0
            }
        };

        let anchor = natural.max(floor);
        anchors.push(anchor);
        floor = anchor + MIN_SPACING;
    }

    anchors
}
