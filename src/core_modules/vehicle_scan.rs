// THEORY:
// `vehicle_scan` runs the whole light search for ONE detection: clamp the box,
// decide whether it is worth searching, cut out the lower slice, build the red
// mask and extract lamp blobs. It is pure: it borrows the frame, owns nothing
// across frames and has no side effects besides trace logging. Both pipelines
// call it, the parallel one from worker threads.

use crate::config::PipelineConfig;
use crate::core_modules::blob_detector::blob_detector::{self, BlobFilter};
use crate::core_modules::candidate::StopLightBox;
use crate::core_modules::color_mask::color_mask;
use crate::core_modules::detection::{Detection, VehicleBox};
use image::{GenericImageView, GrayImage, RgbImage};
use tracing::trace;

/// Why a vehicle was drawn but not searched for lights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The clamped vehicle box is narrower or shorter than the minimum side.
    RoiTooSmall,
    /// The bottom fraction of the box rounds down to zero rows.
    EmptySubRegion,
}

/// Outcome of the light search for one vehicle.
#[derive(Debug, Clone, PartialEq)]
pub enum LightScan {
    Skipped(SkipReason),
    Scanned(Vec<StopLightBox>),
}

impl LightScan {
    pub fn lights(&self) -> &[StopLightBox] {
        match self {
            LightScan::Scanned(lights) => lights,
            LightScan::Skipped(_) => &[],
        }
    }
}

/// Everything the pipeline learned about one detection in one frame.
#[derive(Debug, Clone)]
pub struct VehicleAnalysis {
    pub detection: Detection,
    pub vehicle: VehicleBox,
    pub scan: LightScan,
    /// The cleaned red mask, kept only when debugging is enabled.
    pub mask: Option<GrayImage>,
}

/// The subset of `PipelineConfig` the per-vehicle search needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanSettings {
    pub bottom_frac: f64,
    pub s_min: u8,
    pub v_min: u8,
    pub filter: BlobFilter,
    pub keep_mask: bool,
}

impl ScanSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            bottom_frac: config.bottom_frac,
            s_min: config.s_min,
            v_min: config.v_min,
            filter: BlobFilter::from_config(config),
            keep_mask: config.keep_last_mask,
        }
    }
}

/// Analyzes one detection. Returns `None` when the box has no area inside
/// the frame; such detections are neither drawn nor tracked.
pub fn scan_vehicle(
    frame: &RgbImage,
    detection: &Detection,
    settings: &ScanSettings,
) -> Option<VehicleAnalysis> {
    let vehicle = detection.clamp_to(frame.width(), frame.height())?;

    let (scan, mask) = search_lights(frame, &vehicle, settings);
    if let LightScan::Skipped(reason) = &scan {
        trace!(track_id = detection.track_id, ?reason, "light search skipped");
    }

    Some(VehicleAnalysis {
        detection: *detection,
        vehicle,
        scan,
        mask,
    })
}

fn search_lights(
    frame: &RgbImage,
    vehicle: &VehicleBox,
    settings: &ScanSettings,
) -> (LightScan, Option<GrayImage>) {
    if !vehicle.is_searchable() {
        return (LightScan::Skipped(SkipReason::RoiTooSmall), None);
    }
    let Some(region) = vehicle.lower_region(settings.bottom_frac) else {
        return (LightScan::Skipped(SkipReason::EmptySubRegion), None);
    };

    let view = frame.view(region.x, region.y, region.width, region.height);
    let mask = color_mask::build_mask(&*view, settings.s_min, settings.v_min);
    let lights = blob_detector::extract(&mask, region.x, region.y, &settings.filter);

    let mask = settings.keep_mask.then_some(mask);
    (LightScan::Scanned(lights), mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    const ROAD: Rgb<u8> = Rgb([70, 70, 75]);
    const BODY: Rgb<u8> = Rgb([40, 40, 120]);
    const LAMP: Rgb<u8> = Rgb([230, 25, 20]);

    fn settings() -> ScanSettings {
        ScanSettings {
            keep_mask: true,
            ..ScanSettings::from_config(&PipelineConfig::default())
        }
    }

    fn detection(bbox: [f32; 4]) -> Detection {
        Detection { bbox, track_id: 4, class_id: 2, confidence: 0.91 }
    }

    /// A 640x480 frame with one blue car body at (200,200)-(360,320) and two
    /// 14x10 tail lamps near its bottom edge.
    fn car_frame() -> RgbImage {
        let mut frame = RgbImage::from_pixel(640, 480, ROAD);
        draw_filled_rect_mut(&mut frame, Rect::at(200, 200).of_size(160, 120), BODY);
        draw_filled_rect_mut(&mut frame, Rect::at(215, 290).of_size(14, 10), LAMP);
        draw_filled_rect_mut(&mut frame, Rect::at(330, 290).of_size(14, 10), LAMP);
        frame
    }

    #[test]
    fn finds_both_tail_lamps_in_frame_coordinates() {
        let frame = car_frame();
        let analysis = scan_vehicle(&frame, &detection([200.0, 200.0, 360.0, 320.0]), &settings())
            .expect("box inside frame");

        let lights = analysis.scan.lights();
        assert_eq!(lights.len(), 2);
        for light in lights {
            // Every lamp sits inside the lower slice of the vehicle box.
            assert!(light.y1 >= 200 + 66 && light.y2 <= 320);
            assert!(light.x1 >= 200 && light.x2 <= 360);
            assert!(light.width() >= 12 && light.width() <= 16);
        }
        let mask = analysis.mask.expect("mask kept for debugging");
        // y_start = floor(120 * 0.55) = 66
        assert_eq!(mask.dimensions(), (160, 54));
    }

    #[test]
    fn lamps_above_the_analyzed_slice_are_ignored() {
        let mut frame = RgbImage::from_pixel(640, 480, ROAD);
        draw_filled_rect_mut(&mut frame, Rect::at(200, 200).of_size(160, 120), BODY);
        draw_filled_rect_mut(&mut frame, Rect::at(260, 210).of_size(14, 10), LAMP);

        let analysis = scan_vehicle(&frame, &detection([200.0, 200.0, 360.0, 320.0]), &settings())
            .expect("box inside frame");
        assert_eq!(analysis.scan, LightScan::Scanned(Vec::new()));
    }

    #[test]
    fn tiny_roi_never_reaches_the_mask_builder() {
        let frame = car_frame();
        for bbox in [[200.0, 200.0, 207.0, 320.0], [200.0, 200.0, 360.0, 207.0]] {
            let analysis = scan_vehicle(&frame, &detection(bbox), &settings()).expect("non-degenerate");
            assert_eq!(analysis.scan, LightScan::Skipped(SkipReason::RoiTooSmall));
            assert!(analysis.mask.is_none());
        }
    }

    #[test]
    fn empty_slice_is_skipped() {
        let frame = car_frame();
        // 1.0 - 1e-17 rounds to 1.0, so the slice starts at the bottom edge.
        let no_slice = ScanSettings { bottom_frac: 1e-17, ..settings() };
        let analysis = scan_vehicle(&frame, &detection([200.0, 200.0, 360.0, 320.0]), &no_slice)
            .expect("non-degenerate");
        assert_eq!(analysis.scan, LightScan::Skipped(SkipReason::EmptySubRegion));
        assert!(analysis.mask.is_none());
    }

    #[test]
    fn thin_slice_keeps_its_last_row() {
        let frame = car_frame();
        // floor(120 * 0.999) = 119 leaves a single row to search.
        let thin = ScanSettings { bottom_frac: 0.001, ..settings() };
        let analysis = scan_vehicle(&frame, &detection([200.0, 200.0, 360.0, 320.0]), &thin)
            .expect("non-degenerate");
        assert_eq!(analysis.scan, LightScan::Scanned(Vec::new()));
        assert_eq!(analysis.mask.expect("mask kept").dimensions(), (160, 1));
    }

    #[test]
    fn degenerate_detection_is_dropped() {
        let frame = car_frame();
        assert!(scan_vehicle(&frame, &detection([700.0, 10.0, 800.0, 90.0]), &settings()).is_none());
    }
}
