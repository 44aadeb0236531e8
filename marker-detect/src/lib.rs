//! Detection of a single bright marker in a camera frame.
//!
//! The marker is the only region of the frame that is brighter than the threshold.
//! A frame is converted to intensity, binarized, and the outer border of each
//! connected bright region is traced. The centroid of every border polygon is a
//! candidate. Only a frame with exactly one candidate yields a usable point, see
//! [`Detection`].

mod moments;

pub use moments::*;

use image::{DynamicImage, GrayImage};
use imageproc::contours::{find_contours, BorderType};
use log::*;
use stereo_core::KeyPoint;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// The result of looking for the marker in one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Detection {
    /// No bright region was found.
    Empty,
    /// Exactly one bright region was found at this pixel position.
    Single(KeyPoint),
    /// This many bright regions were found. None of them is used.
    Ambiguous(usize),
}

impl Detection {
    /// Applies the exactly-one policy to the candidate centroids of a frame.
    pub fn from_candidates(candidates: Vec<KeyPoint>) -> Self {
        match candidates.as_slice() {
            [] => Self::Empty,
            &[point] => Self::Single(point),
            _ => Self::Ambiguous(candidates.len()),
        }
    }

    /// The marker position, if exactly one candidate was found.
    pub fn single(&self) -> Option<KeyPoint> {
        match *self {
            Self::Single(point) => Some(point),
            _ => None,
        }
    }

    pub fn is_single(&self) -> bool {
        matches!(self, Self::Single(_))
    }
}

impl Default for Detection {
    fn default() -> Self {
        Self::Empty
    }
}

/// Finds the centroids of bright regions.
///
/// ```
/// use image::{GrayImage, Luma};
/// use marker_detect::{Detection, MarkerDetector};
///
/// let mut frame = GrayImage::new(64, 48);
/// for y in 20..=24 {
///     for x in 30..=36 {
///         frame.put_pixel(x, y, Luma([255]));
///     }
/// }
/// let detection = MarkerDetector::new().classify_luma(&frame);
/// let marker = detection.single().unwrap();
/// assert_eq!((marker.x, marker.y), (33.0, 22.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct MarkerDetector {
    /// Pixels with an intensity strictly above this value belong to the marker.
    ///
    /// Default is `229`, 90% of the full 8-bit scale.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_brightness_threshold"))]
    pub brightness_threshold: u8,
}

#[cfg(feature = "serde-serialize")]
fn default_brightness_threshold() -> u8 {
    MarkerDetector::default().brightness_threshold
}

impl MarkerDetector {
    /// Creates a `MarkerDetector` with default values.
    ///
    /// Same as calling [`Default::default`].
    pub fn new() -> Self {
        Default::default()
    }

    #[must_use]
    pub fn brightness_threshold(self, brightness_threshold: u8) -> Self {
        Self {
            brightness_threshold,
        }
    }

    /// Returns the centroid of every bright region of a frame of any color type.
    pub fn detect(&self, image: &DynamicImage) -> Vec<KeyPoint> {
        self.detect_luma(&image.to_luma8())
    }

    /// Returns the centroid of every bright region of an intensity frame.
    ///
    /// Only outer borders are used, so a region with a hole still counts once.
    /// Regions without area (a single pixel or a one pixel wide line) are skipped.
    pub fn detect_luma(&self, image: &GrayImage) -> Vec<KeyPoint> {
        let binary = imageproc::contrast::threshold(image, self.brightness_threshold);
        find_contours::<i32>(&binary)
            .iter()
            .filter(|contour| contour.border_type == BorderType::Outer)
            .filter_map(|contour| {
                let centroid = Moments::from_contour(contour).centroid();
                if centroid.is_none() {
                    trace!(
                        "skipping a bright region without area at {:?}",
                        contour.points.first()
                    );
                }
                centroid
            })
            .collect()
    }

    /// Detects and applies the exactly-one policy.
    pub fn classify(&self, image: &DynamicImage) -> Detection {
        self.classify_luma(&image.to_luma8())
    }

    /// Same as [`MarkerDetector::classify`] for an intensity frame.
    pub fn classify_luma(&self, image: &GrayImage) -> Detection {
        let detection = Detection::from_candidates(self.detect_luma(image));
        match detection {
            Detection::Empty => debug!("no marker in frame"),
            Detection::Ambiguous(n) => debug!("{} marker candidates in frame, ignoring it", n),
            Detection::Single(_) => {}
        }
        detection
    }
}

impl Default for MarkerDetector {
    fn default() -> Self {
        Self {
            brightness_threshold: 229,
        }
    }
}
