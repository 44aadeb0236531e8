use crate::{ImagePoint, KeyPoint};
use core::fmt;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Identifies one of the two physical cameras of the rig.
///
/// The first camera defines the world frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum CameraId {
    First,
    Second,
}

impl CameraId {
    /// Both cameras, in index order.
    pub const BOTH: [CameraId; 2] = [CameraId::First, CameraId::Second];

    /// Index of the camera, `0` for the first camera and `1` for the second.
    pub fn index(self) -> usize {
        match self {
            CameraId::First => 0,
            CameraId::Second => 1,
        }
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "camera {}", self.index() + 1)
    }
}

/// Allows conversion between the point on an image and the internal projection
/// of a camera model, usually a point on the normalized image plane.
///
/// Calibration may fail for models that must be inverted numerically, so it
/// returns a `Result`. Models with a closed form inverse use
/// [`core::convert::Infallible`] as their error.
pub trait CameraModel {
    type Projection;
    type Error;

    /// Extracts a projection from a pixel location in an image.
    ///
    /// The projection X axis points right, Y axis points down, and Z axis points forwards.
    /// The image point uses the same coordiate frame. Its Y is down and its X is right.
    fn calibrate<P>(&self, point: P) -> Result<Self::Projection, Self::Error>
    where
        P: ImagePoint;

    /// Extracts the pixel location in the image from the projection.
    fn uncalibrate(&self, projection: Self::Projection) -> KeyPoint;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn camera_indices() {
        assert_eq!(CameraId::First.index(), 0);
        assert_eq!(CameraId::Second.index(), 1);
        assert_eq!(CameraId::BOTH.map(CameraId::index), [0, 1]);
        assert_eq!(CameraId::Second.to_string(), "camera 2");
    }
}
