//! Bright marker extraction from camera frames.

use image::{DynamicImage, GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{dilate, erode};

use super::contour::{compress_boundary, Moments};
use crate::points::PointSet;

/// Intensity a pixel must exceed to count as part of a marker.
pub const DEFAULT_THRESHOLD: u8 = 251;

/// Radius of the square neighborhood used by the noise-removing opening.
pub const DEFAULT_OPEN_RADIUS: u8 = 1;

/// Configuration for [`PointExtractor`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractorConfig {
    /// Pixels strictly brighter than this become foreground.
    pub threshold: u8,
    /// Erode/dilate radius. `0` skips the opening entirely.
    pub open_radius: u8,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            open_radius: DEFAULT_OPEN_RADIUS,
        }
    }
}

impl ExtractorConfig {
    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_open_radius(mut self, radius: u8) -> Self {
        self.open_radius = radius;
        self
    }
}

/// Turns a frame into the centroids of its bright blobs.
///
/// Stateless; one instance can be shared by any number of callers.
#[derive(Debug, Clone, Default)]
pub struct PointExtractor {
    config: ExtractorConfig,
}

impl PointExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Extract one point per marker visible in `frame`.
    pub fn extract(&self, frame: &DynamicImage) -> PointSet {
        self.extract_luma(&frame.to_luma8())
    }

    /// Same as [`extract`](Self::extract) for an already single-channel frame.
    pub fn extract_luma(&self, gray: &GrayImage) -> PointSet {
        let mask = self.open(self.binarize(gray));
        Self::points_from_mask(&mask)
    }

    /// Foreground (255) where intensity exceeds the threshold, 0 elsewhere.
    pub fn binarize(&self, gray: &GrayImage) -> GrayImage {
        let threshold = self.config.threshold;
        let mut mask = gray.clone();
        for pixel in mask.pixels_mut() {
            *pixel = if pixel.0[0] > threshold { Luma([255]) } else { Luma([0]) };
        }
        mask
    }

    fn open(&self, mask: GrayImage) -> GrayImage {
        let radius = self.config.open_radius;
        if radius == 0 {
            return mask;
        }
        dilate(&erode(&mask, Norm::LInf, radius), Norm::LInf, radius)
    }

    /// Centroids of every boundary (outer and hole) traced in a binary mask.
    ///
    /// Boundaries enclosing zero area have no centroid and are dropped.
    pub fn points_from_mask(mask: &GrayImage) -> PointSet {
        let contours = find_contours::<i32>(mask);
        let mut points = Vec::with_capacity(contours.len());

        for (index, contour) in contours.iter().enumerate() {
            let vertices = compress_boundary(&contour.points);
            match Moments::of_polygon(&vertices).centroid() {
                Some(centroid) => points.push(centroid),
                None => {
                    tracing::debug!(
                        "Dropping degenerate {} boundary #{} ({} vertices)",
                        match contour.border_type {
                            BorderType::Outer => "outer",
                            BorderType::Hole => "hole",
                        },
                        index,
                        vertices.len()
                    );
                }
            }
        }

        points
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    fn dark_frame(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |_, _| Rgb([20u8, 20u8, 20u8]))
    }

    fn white() -> Rgb<u8> {
        Rgb([255u8, 255u8, 255u8])
    }

    #[test]
    fn test_single_square_centroid() {
        let mut img = dark_frame(64, 48);
        draw_filled_rect_mut(&mut img, Rect::at(20, 10).of_size(10, 10), white());

        let points = PointExtractor::default().extract(&DynamicImage::ImageRgb8(img));
        assert_eq!(points.len(), 1);
        assert!((points[0].x - 24.5).abs() < 1e-9);
        assert!((points[0].y - 14.5).abs() < 1e-9);
    }

    #[test]
    fn test_two_markers_in_raster_order() {
        let mut img = dark_frame(80, 80);
        draw_filled_rect_mut(&mut img, Rect::at(50, 10).of_size(6, 6), white());
        draw_filled_rect_mut(&mut img, Rect::at(10, 40).of_size(8, 8), white());

        let points = PointExtractor::default().extract(&DynamicImage::ImageRgb8(img));
        assert_eq!(points.len(), 2);
        assert!((points[0].x - 52.5).abs() < 1e-9 && (points[0].y - 12.5).abs() < 1e-9);
        assert!((points[1].x - 13.5).abs() < 1e-9 && (points[1].y - 43.5).abs() < 1e-9);
    }

    #[test]
    fn test_dim_region_ignored() {
        let mut img = dark_frame(40, 40);
        draw_filled_rect_mut(&mut img, Rect::at(10, 10).of_size(8, 8), Rgb([251u8, 251u8, 251u8]));

        let points = PointExtractor::default().extract(&DynamicImage::ImageRgb8(img));
        assert!(points.is_empty());
    }

    #[test]
    fn test_opening_removes_speckle() {
        let mut img = dark_frame(40, 40);
        img.put_pixel(5, 5, white());
        draw_filled_rect_mut(&mut img, Rect::at(20, 20).of_size(5, 5), white());

        let points = PointExtractor::default().extract(&DynamicImage::ImageRgb8(img));
        assert_eq!(points.len(), 1);
        assert!((points[0].x - 22.0).abs() < 1e-9 && (points[0].y - 22.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_blobs_excluded() {
        let mut img = dark_frame(40, 40);
        // lone pixel and a one-pixel-wide line: both trace zero-area boundaries
        img.put_pixel(3, 3, white());
        for x in 10..20 {
            img.put_pixel(x, 30, white());
        }
        draw_filled_rect_mut(&mut img, Rect::at(20, 5).of_size(4, 4), white());

        let extractor = PointExtractor::new(ExtractorConfig::default().with_open_radius(0));
        let points = extractor.extract(&DynamicImage::ImageRgb8(img));

        assert_eq!(points.len(), 1);
        assert!(points.iter().all(|p| p.is_finite()));
        assert!((points[0].x - 21.5).abs() < 1e-9 && (points[0].y - 6.5).abs() < 1e-9);
    }

    #[test]
    fn test_points_from_mask_lone_pixel() {
        let mut mask = GrayImage::new(10, 10);
        mask.put_pixel(4, 4, Luma([255]));
        assert!(PointExtractor::points_from_mask(&mask).is_empty());
    }

    #[test]
    fn test_ring_reports_outer_and_hole() {
        let mut mask = GrayImage::new(30, 30);
        for y in 5..20 {
            for x in 5..20 {
                let inside_hole = (9..16).contains(&x) && (9..16).contains(&y);
                if !inside_hole {
                    mask.put_pixel(x, y, Luma([255]));
                }
            }
        }
        let points = PointExtractor::points_from_mask(&mask);
        assert_eq!(points.len(), 2);
        for p in &points {
            assert!((p.x - 12.0).abs() < 1e-9 && (p.y - 12.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_binarize_threshold_is_strict() {
        let gray = GrayImage::from_fn(3, 1, |x, _| Luma([250 + x as u8]));
        let mask = PointExtractor::default().binarize(&gray);
        assert_eq!(mask.as_raw(), &vec![0, 0, 255]);
    }
}
