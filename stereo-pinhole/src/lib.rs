//! This crate plugs into `stereo-core` and provides the pinhole camera models of the
//! stereo rig, with and without Brown-Conrady lens distortion.
//!
//! It converts image coordinates into normalized image coordinates (undistorted points on
//! the virtual image plane at `z = 1`) and back. [`StereoIntrinsics`] composes two physical
//! cameras with one shared, distortion free canonical camera, so that observations of two
//! different lenses can be handled as if both cameras had identical optics.
//!
//! It also holds the [`EssentialMatrix`] type used by the two-view solvers.

mod camera;
mod distortion;
mod essential;
mod stereo;

pub use camera::*;
pub use distortion::*;
pub use essential::*;
pub use stereo::*;

use core::convert::Infallible;
use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use stereo_core::nalgebra::{Matrix3, Point2, Point3, Vector2, Vector3};
use stereo_core::{CameraModel, ImagePoint, KeyPoint};
use thiserror::Error;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// A point in normalized image coordinates. This keypoint has been corrected
/// for distortion and normalized based on the camera intrinsic matrix.
/// The key points are represented by their position on the virtual image
/// plane, in units of the focal length of the camera.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct NormalizedKeyPoint(pub Point2<f64>);

impl NormalizedKeyPoint {
    /// The homogeneous vector `(x, y, 1)` of the keypoint.
    pub fn homogeneous(self) -> Vector3<f64> {
        self.coords.push(1.0)
    }

    /// Projects a 3d point expressed in camera coordinates onto the virtual image
    /// plane. Fails for points on the plane of the optical center.
    pub fn from_camera_point(point: Point3<f64>) -> Option<Self> {
        Point2::from_homogeneous(point.coords).map(Self)
    }
}

/// Raised when intrinsic parameters are not usable.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum IntrinsicsError {
    #[error("focal lengths must be positive, got ({fx}, {fy})")]
    NonPositiveFocal { fx: f64, fy: f64 },
    #[error("intrinsic parameters must be finite")]
    NonFinite,
}

/// This contains the linear intrinsic camera parameters as per
/// [this Wikipedia page](https://en.wikipedia.org/wiki/Camera_resectioning#Intrinsic_parameters).
///
/// Pixels are assumed to have no skew. This is also the model of the canonical
/// camera shared by both cameras of the rig.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct PinholeIntrinsics {
    pub focals: Vector2<f64>,
    pub principal_point: Point2<f64>,
}

impl PinholeIntrinsics {
    /// Creates camera intrinsics that would create an identity intrinsic matrix.
    /// This would imply that the pixel positions have an origin at `0,0`,
    /// the pixel distance unit is the focal length and pixels are square.
    pub fn identity() -> Self {
        Self {
            focals: Vector2::new(1.0, 1.0),
            principal_point: Point2::new(0.0, 0.0),
        }
    }

    /// Creates validated intrinsics from the focal lengths and the principal point in pixels.
    ///
    /// ```
    /// use stereo_pinhole::PinholeIntrinsics;
    /// assert!(PinholeIntrinsics::new(204.5, 204.5, 320.0, 240.0).is_ok());
    /// assert!(PinholeIntrinsics::new(0.0, 204.5, 320.0, 240.0).is_err());
    /// ```
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Result<Self, IntrinsicsError> {
        let intrinsics = Self::identity()
            .focals(Vector2::new(fx, fy))
            .principal_point(Point2::new(cx, cy));
        intrinsics.validate()?;
        Ok(intrinsics)
    }

    #[must_use]
    pub fn focals(self, focals: Vector2<f64>) -> Self {
        Self { focals, ..self }
    }

    #[must_use]
    pub fn focal(self, focal: f64) -> Self {
        Self {
            focals: Vector2::new(focal, focal),
            ..self
        }
    }

    #[must_use]
    pub fn principal_point(self, principal_point: Point2<f64>) -> Self {
        Self {
            principal_point,
            ..self
        }
    }

    /// Checks that all parameters are finite and both focal lengths are positive.
    pub fn validate(&self) -> Result<(), IntrinsicsError> {
        let finite = self
            .focals
            .iter()
            .chain(self.principal_point.coords.iter())
            .all(|n| n.is_finite());
        if !finite {
            return Err(IntrinsicsError::NonFinite);
        }
        if self.focals.x <= 0.0 || self.focals.y <= 0.0 {
            return Err(IntrinsicsError::NonPositiveFocal {
                fx: self.focals.x,
                fy: self.focals.y,
            });
        }
        Ok(())
    }

    /// The mean of both focal lengths, used to convert pixel distances into
    /// distances on the normalized image plane.
    pub fn mean_focal(&self) -> f64 {
        0.5 * (self.focals.x + self.focals.y)
    }

    #[rustfmt::skip]
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.focals.x,  0.0,            self.principal_point.x,
            0.0,            self.focals.y,  self.principal_point.y,
            0.0,            0.0,            1.0,
        )
    }

    /// Removes the perspective of the camera from a pixel point.
    pub fn normalize(&self, point: impl ImagePoint) -> NormalizedKeyPoint {
        let centered = point.image_point() - self.principal_point;
        NormalizedKeyPoint(Point2::new(
            centered.x / self.focals.x,
            centered.y / self.focals.y,
        ))
    }

    /// Applies the perspective of the camera to a point on the virtual image plane.
    pub fn project(&self, projection: NormalizedKeyPoint) -> KeyPoint {
        KeyPoint(self.principal_point + projection.coords.component_mul(&self.focals))
    }
}

impl CameraModel for PinholeIntrinsics {
    type Projection = NormalizedKeyPoint;
    type Error = Infallible;

    /// Takes in a point from an image in pixel coordinates and
    /// converts it to a [`NormalizedKeyPoint`].
    ///
    /// ```
    /// use stereo_core::{KeyPoint, CameraModel};
    /// use stereo_pinhole::PinholeIntrinsics;
    /// let intrinsics = PinholeIntrinsics::new(800.0, 900.0, 500.0, 600.0).unwrap();
    /// let kp = KeyPoint::new(471.0, 322.0);
    /// let nkp = intrinsics.calibrate(kp).unwrap();
    /// let distance = (kp.to_homogeneous() - intrinsics.matrix() * nkp.homogeneous()).norm();
    /// assert!(distance < 1e-9);
    /// ```
    fn calibrate<P>(&self, point: P) -> Result<NormalizedKeyPoint, Infallible>
    where
        P: ImagePoint,
    {
        Ok(self.normalize(point))
    }

    /// Converts a [`NormalizedKeyPoint`] back into pixel coordinates.
    fn uncalibrate(&self, projection: NormalizedKeyPoint) -> KeyPoint {
        self.project(projection)
    }
}
