//! Marker detection: threshold, opening, boundary tracing and centroids.

mod contour;
mod extractor;

pub use contour::{compress_boundary, Moments};
pub use extractor::{ExtractorConfig, PointExtractor, DEFAULT_OPEN_RADIUS, DEFAULT_THRESHOLD};
