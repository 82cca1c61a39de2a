// THEORY:
// Overlays are built in two steps. `compose` turns one frame's analysis results
// and the trail store into an `OverlayPlan`, a flat list of drawing operations
// with concrete coordinates, colors and text. `render` is the only code that
// touches pixels: it burns a plan into a frame with imageproc.
//
// Key architectural principles:
// 1.  **Plans Are Data**: A plan can be inspected and compared in tests without
//     rasterizing anything, and it does not depend on a font being available.
// 2.  **Draw Order Is Stable**: Vehicles come in detection order, each followed
//     by its lights. Trails come last, sorted by track id.
// 3.  **Never Out Of Bounds**: Every operation is clipped by the renderer.
//     Thick strokes shrink inward and vanish when nothing is left to draw.
// 4.  **Text Always Available**: DejaVu Sans Bold is compiled into the crate
//     and used unless a font file is configured. `render` still accepts no font
//     at all, which draws boxes and trails only.

use crate::config::PipelineConfig;
use crate::core_modules::candidate::Point;
use crate::core_modules::trail::TrailManager;
use crate::core_modules::vehicle_scan::VehicleAnalysis;
use crate::error::{Result, VisionError};
use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;

pub const VEHICLE_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
pub const LIGHT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const TRAIL_COLOR: Rgb<u8> = Rgb([255, 0, 255]);

const VEHICLE_THICKNESS: u32 = 1;
const LIGHT_THICKNESS: u32 = 2;
const TRAIL_THICKNESS: u32 = 2;

const VEHICLE_LABEL_PX: f32 = 18.0;
const LIGHT_LABEL_PX: f32 = 16.5;
/// Labels sit this many pixels above the box they describe.
const LABEL_GAP: u32 = 6;
const STOP_TEXT: &str = "STOP";

/// One drawing primitive. Coordinates are frame pixels; rectangle corners are
/// both inclusive.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Rect {
        x1: u32,
        y1: u32,
        x2: u32,
        y2: u32,
        thickness: u32,
        color: Rgb<u8>,
    },
    /// `(x, y)` is the left end of the text baseline.
    Label {
        x: u32,
        y: u32,
        text: String,
        font_px: f32,
        color: Rgb<u8>,
    },
    Polyline {
        points: Vec<Point>,
        thickness: u32,
        color: Rgb<u8>,
    },
}

/// Everything to draw on one frame, in drawing order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverlayPlan {
    pub ops: Vec<DrawOp>,
}

impl OverlayPlan {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// Label text for one vehicle, e.g. `car ID 17  0.84`.
pub fn vehicle_label(class_name: &str, track_id: i64, confidence: f32) -> String {
    format!("{class_name} ID {track_id}  {confidence:.2}")
}

pub fn compose(
    vehicles: &[VehicleAnalysis],
    trails: &TrailManager,
    config: &PipelineConfig,
) -> OverlayPlan {
    let mut ops = Vec::new();

    for analysis in vehicles {
        let vehicle = &analysis.vehicle;
        let detection = &analysis.detection;
        ops.push(DrawOp::Rect {
            x1: vehicle.x1,
            y1: vehicle.y1,
            x2: vehicle.x2,
            y2: vehicle.y2,
            thickness: VEHICLE_THICKNESS,
            color: VEHICLE_COLOR,
        });
        ops.push(DrawOp::Label {
            x: vehicle.x1,
            y: vehicle.y1.saturating_sub(LABEL_GAP),
            text: vehicle_label(
                &config.class_name(detection.class_id),
                detection.track_id,
                detection.confidence,
            ),
            font_px: VEHICLE_LABEL_PX,
            color: VEHICLE_COLOR,
        });

        for light in analysis.scan.lights() {
            ops.push(DrawOp::Rect {
                x1: light.x1,
                y1: light.y1,
                x2: light.x2,
                y2: light.y2,
                thickness: LIGHT_THICKNESS,
                color: LIGHT_COLOR,
            });
            ops.push(DrawOp::Label {
                x: light.x1,
                y: light.y1.saturating_sub(LABEL_GAP),
                text: STOP_TEXT.to_string(),
                font_px: LIGHT_LABEL_PX,
                color: LIGHT_COLOR,
            });
        }
    }

    if trails.is_enabled() {
        let mut stored: Vec<_> = trails
            .trails()
            .filter(|(_, points)| points.len() >= 2)
            .collect();
        stored.sort_by_key(|(id, _)| *id);

        for (_, points) in stored {
            ops.push(DrawOp::Polyline {
                points: points.iter().copied().collect(),
                thickness: TRAIL_THICKNESS,
                color: TRAIL_COLOR,
            });
        }
    }

    OverlayPlan { ops }
}

/// Burns `plan` into `frame`. Labels are skipped when `font` is `None`.
pub fn render(frame: &mut RgbImage, plan: &OverlayPlan, font: Option<&FontArc>) {
    for op in &plan.ops {
        match op {
            DrawOp::Rect { x1, y1, x2, y2, thickness, color } => {
                draw_thick_rect(frame, (*x1, *y1), (*x2, *y2), *thickness, *color);
            }
            DrawOp::Label { x, y, text, font_px, color } => {
                if let Some(font) = font {
                    // imageproc anchors text at its top-left corner.
                    let top = *y as i32 - font_px.round() as i32;
                    draw_text_mut(frame, *color, *x as i32, top, PxScale::from(*font_px), font, text);
                }
            }
            DrawOp::Polyline { points, thickness, color } => {
                for pair in points.windows(2) {
                    draw_thick_segment(frame, pair[0], pair[1], *thickness, *color);
                }
            }
        }
    }
}

fn draw_thick_rect(
    frame: &mut RgbImage,
    (x1, y1): (u32, u32),
    (x2, y2): (u32, u32),
    thickness: u32,
    color: Rgb<u8>,
) {
    for inset in 0..thickness.max(1) {
        let left = x1 + inset;
        let top = y1 + inset;
        let right = x2.saturating_sub(inset);
        let bottom = y2.saturating_sub(inset);
        if right < left || bottom < top {
            break;
        }
        let rect = Rect::at(left as i32, top as i32).of_size(right - left + 1, bottom - top + 1);
        draw_hollow_rect_mut(frame, rect, color);
    }
}

fn draw_thick_segment(frame: &mut RgbImage, from: Point, to: Point, thickness: u32, color: Rgb<u8>) {
    let thickness = thickness.max(1);
    for dy in 0..thickness {
        for dx in 0..thickness {
            let start = ((from.x + dx) as f32, (from.y + dy) as f32);
            let end = ((to.x + dx) as f32, (to.y + dy) as f32);
            draw_line_segment_mut(frame, start, end, color);
        }
    }
}

const EMBEDDED_FONT_NAME: &str = "DejaVuSans-Bold.ttf (embedded)";
static EMBEDDED_FONT: &[u8] = include_bytes!("../../assets/fonts/DejaVuSans-Bold.ttf");

/// The label font shipped with the crate.
pub fn embedded_font() -> Result<FontArc> {
    FontArc::try_from_slice(EMBEDDED_FONT).map_err(|source| VisionError::FontLoad {
        path: EMBEDDED_FONT_NAME.into(),
        source: Box::new(source),
    })
}

/// Loads a TrueType/OpenType font for labels.
pub fn load_font(path: impl AsRef<Path>) -> Result<FontArc> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|source| VisionError::FontLoad {
        path: path.to_path_buf(),
        source: Box::new(source),
    })?;
    FontArc::try_from_vec(bytes).map_err(|source| VisionError::FontLoad {
        path: path.to_path_buf(),
        source: Box::new(source),
    })
}
