// THEORY:
// The `BlobDetector` is the engine of the Spatial Grouping Layer of the stop light
// detector. It takes the binary red mask of one vehicle's lower region and turns
// it into a short list of lamp-shaped boxes in frame coordinates.
//
// Key architectural principles & algorithm steps:
// 1.  **Hole Filling**: Background pixels that cannot reach the mask border are
//     holes inside a blob. They are painted as foreground first, so a ring-shaped
//     lamp reflection counts as one solid region and anything nested inside a
//     blob is absorbed by it. Only the outermost regions survive, which is what
//     an external-contour search would report.
// 2.  **Region Labelling**: The filled mask is labelled with 8-connectivity. The
//     background is labelled with 4-connectivity in step 1, the usual dual pairing
//     that keeps diagonal gaps from leaking.
// 3.  **Data Aggregation**: One pass over the label image accumulates, per region,
//     the pixel count, bounding box and the horizontal extent of every row. The
//     row extents are enough to build the convex hull of the region's pixel
//     squares, from which the hull area follows.
// 4.  **Geometric Filtering**: Area bounds reject sensor noise and oversized
//     reflections, solidity rejects ragged shapes, aspect bounds reject streaks.
// 5.  **Stateless Utility**: Like every spatial layer, the detector keeps no
//     state. Output order follows label discovery order and carries no meaning.

use crate::config::PipelineConfig;
use crate::core_modules::candidate::{Candidate, StopLightBox};
use image::{GrayImage, Luma};
use imageproc::geometry::{contour_area, convex_hull};
use imageproc::point::Point;
use imageproc::region_labelling::{Connectivity, connected_components};
use std::collections::{BTreeMap, BTreeSet, HashSet};

pub mod blob_detector {
    use super::*; // Make structs from parent module available.
    use tracing::trace;

    pub const MIN_ASPECT: f64 = 0.3;
    pub const MAX_ASPECT: f64 = 10.0;

    /// Acceptance thresholds for candidate blobs.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct BlobFilter {
        pub min_area: u32,
        /// Upper area bound as a fraction of the mask's pixel count.
        pub max_area_frac: f64,
        pub min_solidity: f64,
    }

    impl BlobFilter {
        pub fn from_config(config: &PipelineConfig) -> Self {
            Self {
                min_area: config.min_area,
                max_area_frac: config.max_area_frac,
                min_solidity: config.min_solidity,
            }
        }

        /// Absolute area cap for a mask of `width` x `height` pixels.
        pub fn max_area(&self, width: u32, height: u32) -> u32 {
            (width as f64 * height as f64 * self.max_area_frac) as u32
        }

        /// Checks one candidate against every threshold.
        pub fn check(&self, candidate: &Candidate, max_area: u32) -> Result<(), Rejection> {
            if candidate.area < self.min_area {
                return Err(Rejection::TooSmall(candidate.area));
            }
            if candidate.area > max_area {
                return Err(Rejection::TooLarge(candidate.area));
            }
            // An empty hull leaves solidity undefined; such candidates pass.
            if let Some(solidity) = candidate.solidity() {
                if solidity < self.min_solidity {
                    return Err(Rejection::Ragged(solidity));
                }
            }
            if candidate.width == 0 || candidate.height == 0 {
                return Err(Rejection::EmptyBox);
            }
            let aspect = candidate.aspect();
            if !(MIN_ASPECT..=MAX_ASPECT).contains(&aspect) {
                return Err(Rejection::Aspect(aspect));
            }
            Ok(())
        }
    }

    /// Why a candidate was dropped. Only used for trace logging and tests.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub enum Rejection {
        TooSmall(u32),
        TooLarge(u32),
        Ragged(f64),
        EmptyBox,
        Aspect(f64),
    }

    /// The main function of the spatial analysis layer.
    /// Finds lamp-shaped blobs in `mask` and returns them in frame coordinates.
    pub fn extract(
        mask: &GrayImage,
        offset_x: u32,
        offset_y: u32,
        filter: &BlobFilter,
    ) -> Vec<StopLightBox> {
        let max_area = filter.max_area(mask.width(), mask.height());

        find_candidates(mask)
            .into_iter()
            .filter(|candidate| match filter.check(candidate, max_area) {
                Ok(()) => true,
                Err(reason) => {
                    trace!(?reason, area = candidate.area, "candidate rejected");
                    false
                }
            })
            .map(|candidate| candidate.to_global(offset_x, offset_y))
            .collect()
    }

    /// Lists every external connected region of `mask` with its shape metrics.
    /// Any non-zero pixel counts as foreground.
    pub fn find_candidates(mask: &GrayImage) -> Vec<Candidate> {
        // --- 1. Hole Filling ---
        let filled = fill_holes(mask);

        // --- 2. Region Labelling ---
        let labels = connected_components(&filled, Connectivity::Eight, Luma([0u8]));

        // --- 3. Data Aggregation ---
        let mut regions: BTreeMap<u32, RegionAccumulator> = BTreeMap::new();
        for (x, y, label) in labels.enumerate_pixels() {
            let label = label.0[0];
            if label == 0 {
                continue;
            }
            regions
                .entry(label)
                .or_insert_with(|| RegionAccumulator::new(x, y))
                .add_pixel(x, y);
        }

        regions.into_values().map(RegionAccumulator::into_candidate).collect()
    }

    /// Returns a binary copy of `mask` with enclosed background pixels set.
    fn fill_holes(mask: &GrayImage) -> GrayImage {
        let (width, height) = mask.dimensions();
        let mut filled = GrayImage::from_fn(width, height, |x, y| {
            if mask.get_pixel(x, y).0[0] > 0 {
                Luma([FOREGROUND])
            } else {
                Luma([0])
            }
        });

        // Label the background: everything that is not foreground.
        let background = connected_components(&filled, Connectivity::Four, Luma([FOREGROUND]));

        let mut reaches_border: HashSet<u32> = HashSet::new();
        for (x, y, label) in background.enumerate_pixels() {
            let on_border = x == 0 || y == 0 || x + 1 == width || y + 1 == height;
            if on_border && label.0[0] != 0 {
                reaches_border.insert(label.0[0]);
            }
        }

        for (x, y, label) in background.enumerate_pixels() {
            let label = label.0[0];
            if label != 0 && !reaches_border.contains(&label) {
                filled.put_pixel(x, y, Luma([FOREGROUND]));
            }
        }

        filled
    }

    const FOREGROUND: u8 = 255;

    /// Running totals for one labelled region.
    struct RegionAccumulator {
        area: u32,
        min_x: u32,
        min_y: u32,
        max_x: u32,
        max_y: u32,
        /// Leftmost and rightmost pixel column of every row the region touches.
        row_extents: BTreeMap<u32, (u32, u32)>,
    }

    impl RegionAccumulator {
        fn new(x: u32, y: u32) -> Self {
            Self {
                area: 0,
                min_x: x,
                min_y: y,
                max_x: x,
                max_y: y,
                row_extents: BTreeMap::new(),
            }
        }

        fn add_pixel(&mut self, x: u32, y: u32) {
            self.area += 1;
            self.min_x = self.min_x.min(x);
            self.min_y = self.min_y.min(y);
            self.max_x = self.max_x.max(x);
            self.max_y = self.max_y.max(y);

            let extent = self.row_extents.entry(y).or_insert((x, x));
            extent.0 = extent.0.min(x);
            extent.1 = extent.1.max(x);
        }

        fn into_candidate(self) -> Candidate {
            // The hull of a pixel region is spanned by the outer corners of the
            // extreme pixels in each row. Neighbouring rows share corners, and the
            // hull scan expects distinct points.
            let mut corners: BTreeSet<(i32, i32)> = BTreeSet::new();
            for (&y, &(left, right)) in &self.row_extents {
                let (y, left, right) = (y as i32, left as i32, right as i32 + 1);
                corners.insert((left, y));
                corners.insert((left, y + 1));
                corners.insert((right, y));
                corners.insert((right, y + 1));
            }
            let corners: Vec<Point<i32>> = corners.into_iter().map(|(x, y)| Point::new(x, y)).collect();
            let hull = convex_hull(corners);
            let hull_area = if hull.len() < 3 { 0.0 } else { contour_area(&hull) };

            Candidate {
                area: self.area,
                hull_area,
                x: self.min_x,
                y: self.min_y,
                width: self.max_x - self.min_x + 1,
                height: self.max_y - self.min_y + 1,
            }
        }
    }
}
