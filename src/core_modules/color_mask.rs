// THEORY:
// The `color_mask` module is the lowest layer of the stop light detector. It
// turns an RGB region (the bottom slice of a vehicle box) into a binary mask of
// "red enough" pixels.
//
// Key architectural principles:
// 1.  **HSV Lens**: Raw RGB is a poor space for "is this a lit red lamp?". The
//     module converts every pixel into 8-bit HSV on a 180-unit hue scale, which
//     separates hue (what color) from saturation (how pure) and value (how lit).
// 2.  **Wrapped Hue**: Red sits on both ends of the hue circle, so the red test
//     is the union of a low band `[0, 10]` and a high band `[170, 180]`, both
//     gated by minimum saturation and value.
// 3.  **Morphological Cleanup**: An opening with a 5x5 ellipse removes isolated
//     speckles (sensor noise, single red pixels in a reflection). A closing
//     applied twice (two dilations, then two erosions) bridges small gaps
//     inside a real lamp so it is extracted as one blob.
// 4.  **View In, Mask Out**: The builder reads any `GenericImageView` (usually a
//     `SubImage` borrowed from the frame) and never mutates it. The produced
//     mask always has the region's dimensions.

pub mod color_mask {
    use image::{GenericImageView, GrayImage, Luma, Rgb};
    use imageproc::morphology::{grayscale_dilate, grayscale_erode, grayscale_open, Mask};

    /// Pixel value used for "red candidate" in a mask.
    pub const MASK_ON: u8 = 255;

    /// The 5x5 elliptical structuring element, centred at (2, 2).
    const ELLIPSE_5X5: [[u8; 5]; 5] = [
        [0, 0, 1, 0, 0],
        [1, 1, 1, 1, 1],
        [1, 1, 1, 1, 1],
        [1, 1, 1, 1, 1],
        [0, 0, 1, 0, 0],
    ];
    /// The closing is applied twice: two dilations followed by two erosions.
    const CLOSE_ITERATIONS: usize = 2;

    const LOW_RED_HUE: (u8, u8) = (0, 10);
    const HIGH_RED_HUE: (u8, u8) = (170, 180);

    /// An 8-bit HSV triple with hue on a 0-180 scale.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Hsv {
        pub hue: u8,
        pub saturation: u8,
        pub value: u8,
    }

    impl Hsv {
        pub fn from_rgb(pixel: Rgb<u8>) -> Self {
            let [r, g, b] = pixel.0;
            let (r, g, b) = (r as f32, g as f32, b as f32);

            let max = r.max(g).max(b);
            let min = r.min(g).min(b);
            let delta = max - min;

            let saturation = if max == 0.0 { 0.0 } else { 255.0 * delta / max };

            let mut hue_degrees = if delta == 0.0 {
                0.0
            } else if max == r {
                60.0 * (g - b) / delta
            } else if max == g {
                120.0 + 60.0 * (b - r) / delta
            } else {
                240.0 + 60.0 * (r - g) / delta
            };
            if hue_degrees < 0.0 {
                hue_degrees += 360.0;
            }

            Self {
                hue: (hue_degrees / 2.0).round() as u8,
                saturation: saturation.round() as u8,
                value: max as u8,
            }
        }

        /// True when the pixel falls in either red band and is saturated and
        /// bright enough.
        pub fn is_red(&self, s_min: u8, v_min: u8) -> bool {
            if self.saturation < s_min || self.value < v_min {
                return false;
            }
            in_band(self.hue, LOW_RED_HUE) || in_band(self.hue, HIGH_RED_HUE)
        }
    }

    fn in_band(hue: u8, (lo, hi): (u8, u8)) -> bool {
        hue >= lo && hue <= hi
    }

    /// Builds the cleaned binary red mask for `region`.
    pub fn build_mask<I>(region: &I, s_min: u8, v_min: u8) -> GrayImage
    where
        I: GenericImageView<Pixel = Rgb<u8>>,
    {
        let (width, height) = region.dimensions();
        let mut mask = GrayImage::new(width, height);

        for (x, y, pixel) in region.pixels() {
            if Hsv::from_rgb(pixel).is_red(s_min, v_min) {
                mask.put_pixel(x, y, Luma([MASK_ON]));
            }
        }

        clean_mask(&mask)
    }

    pub fn ellipse_kernel() -> Mask {
        let footprint =
            GrayImage::from_fn(5, 5, |x, y| Luma([ELLIPSE_5X5[y as usize][x as usize]]));
        Mask::from_image(&footprint, 2, 2)
    }

    /// Opens `mask` once, then closes the result twice. Pixels outside the
    /// image never take part in a dilation or an erosion.
    pub fn clean_mask(mask: &GrayImage) -> GrayImage {
        let kernel = ellipse_kernel();
        let mut cleaned = grayscale_open(mask, &kernel);
        for _ in 0..CLOSE_ITERATIONS {
            cleaned = grayscale_dilate(&cleaned, &kernel);
        }
        for _ in 0..CLOSE_ITERATIONS {
            cleaned = grayscale_erode(&cleaned, &kernel);
        }
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::color_mask::*;
    use image::{GenericImageView, GrayImage, Luma, Rgb, RgbImage};
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    const GRAY: Rgb<u8> = Rgb([90, 90, 90]);
    const LAMP_RED: Rgb<u8> = Rgb([200, 20, 20]);

    fn gray_region(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, GRAY)
    }

    #[test]
    fn hsv_matches_the_180_unit_hue_scale() {
        assert_eq!(
            Hsv::from_rgb(Rgb([255, 0, 0])),
            Hsv { hue: 0, saturation: 255, value: 255 }
        );
        assert_eq!(Hsv::from_rgb(Rgb([0, 255, 0])).hue, 60);
        assert_eq!(Hsv::from_rgb(Rgb([0, 0, 255])).hue, 120);
        assert_eq!(
            Hsv::from_rgb(Rgb([0, 0, 0])),
            Hsv { hue: 0, saturation: 0, value: 0 }
        );
        assert_eq!(Hsv::from_rgb(Rgb([128, 128, 128])).saturation, 0);
    }

    #[test]
    fn both_ends_of_the_hue_circle_count_as_red() {
        // Orange-ish red, hue just above zero.
        assert!(Hsv::from_rgb(Rgb([220, 30, 10])).is_red(85, 70));
        // Crimson, hue wraps to the high band.
        let crimson = Hsv::from_rgb(Rgb([200, 20, 60]));
        assert!(crimson.hue >= 170);
        assert!(crimson.is_red(85, 70));
        // Yellow is not red.
        assert!(!Hsv::from_rgb(Rgb([220, 220, 20])).is_red(85, 70));
    }

    #[test]
    fn dim_or_washed_out_red_is_rejected() {
        let dark = Hsv::from_rgb(Rgb([60, 5, 5]));
        assert!(!dark.is_red(85, 70));
        let pale = Hsv::from_rgb(Rgb([230, 180, 180]));
        assert!(!pale.is_red(85, 70));
    }

    #[test]
    fn mask_has_region_dimensions_and_binary_values() {
        let mut region = gray_region(64, 40);
        draw_filled_rect_mut(&mut region, Rect::at(10, 10).of_size(15, 12), LAMP_RED);

        let mask = build_mask(&region, 85, 70);
        assert_eq!(mask.dimensions(), (64, 40));
        assert!(mask.pixels().all(|p| p.0[0] == 0 || p.0[0] == MASK_ON));
    }

    #[test]
    fn solid_lamp_survives_cleanup() {
        let mut region = gray_region(60, 60);
        draw_filled_rect_mut(&mut region, Rect::at(20, 20).of_size(20, 20), LAMP_RED);

        let mask = build_mask(&region, 85, 70);
        assert_eq!(mask.get_pixel(30, 30).0[0], MASK_ON);
        assert_eq!(mask.get_pixel(5, 5).0[0], 0);
        assert_eq!(mask.get_pixel(55, 55).0[0], 0);

        let lit = mask.pixels().filter(|p| p.0[0] == MASK_ON).count();
        assert!(lit > 300 && lit <= 400, "lit pixels: {lit}");
    }

    #[test]
    fn ellipse_opening_trims_rectangle_corners() {
        let mut region = gray_region(40, 30);
        draw_filled_rect_mut(&mut region, Rect::at(10, 10).of_size(20, 10), LAMP_RED);

        let mask = build_mask(&region, 85, 70);
        let lit = mask.pixels().filter(|p| p.0[0] == MASK_ON).count();
        // 200 lamp pixels minus two from each end of the top and bottom rows.
        assert_eq!(lit, 192);
        assert_eq!(mask.get_pixel(10, 10).0[0], 0);
        assert_eq!(mask.get_pixel(11, 10).0[0], 0);
        assert_eq!(mask.get_pixel(12, 10).0[0], MASK_ON);
        assert_eq!(mask.get_pixel(10, 11).0[0], MASK_ON);
        assert_eq!(mask.get_pixel(29, 19).0[0], 0);
    }

    #[test]
    fn kernel_shaped_blob_survives_opening() {
        let mut mask = GrayImage::new(15, 15);
        let kernel_pixels = [
            (2, 0),
            (0, 1), (1, 1), (2, 1), (3, 1), (4, 1),
            (0, 2), (1, 2), (2, 2), (3, 2), (4, 2),
            (0, 3), (1, 3), (2, 3), (3, 3), (4, 3),
            (2, 4),
        ];
        for &(dx, dy) in &kernel_pixels {
            mask.put_pixel(5 + dx, 5 + dy, Luma([MASK_ON]));
        }

        let cleaned = clean_mask(&mask);
        for &(dx, dy) in &kernel_pixels {
            assert_eq!(cleaned.get_pixel(5 + dx, 5 + dy).0[0], MASK_ON, "({dx}, {dy})");
        }
        let lit = cleaned.pixels().filter(|p| p.0[0] == MASK_ON).count();
        assert!(lit >= kernel_pixels.len(), "lit pixels: {lit}");
    }

    #[test]
    fn isolated_speckles_are_removed() {
        let mut region = gray_region(40, 40);
        region.put_pixel(10, 10, LAMP_RED);
        region.put_pixel(30, 25, LAMP_RED);
        region.put_pixel(31, 25, LAMP_RED);

        let mask = build_mask(&region, 85, 70);
        assert!(mask.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn works_on_a_borrowed_sub_view() {
        let mut frame = gray_region(100, 80);
        draw_filled_rect_mut(&mut frame, Rect::at(60, 50).of_size(12, 12), LAMP_RED);

        let view = frame.view(50, 40, 40, 30);
        let mask = build_mask(&*view, 85, 70);
        assert_eq!(mask.dimensions(), (40, 30));
        assert_eq!(mask.get_pixel(15, 15).0[0], MASK_ON);
    }

    #[test]
    fn blue_region_yields_an_empty_mask() {
        let region = RgbImage::from_pixel(30, 30, Rgb([20, 40, 220]));
        let mask = build_mask(&region, 85, 70);
        assert!(mask.pixels().all(|p| p.0[0] == 0));
    }
}
