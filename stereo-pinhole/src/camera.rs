use crate::{Distortion, IntrinsicsError, NormalizedKeyPoint, PinholeIntrinsics, UndistortCriteria, UndistortError};
use stereo_core::nalgebra::Point2;
use stereo_core::{CameraModel, ImagePoint, KeyPoint};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Intrinsics of a physical camera: the linear pinhole parameters and the
/// Brown-Conrady lens distortion, plus the criteria used when inverting the
/// distortion.
///
/// These are fixed, precomputed constants of the camera. They are never estimated here.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraIntrinsics {
    pub pinhole: PinholeIntrinsics,
    #[cfg_attr(feature = "serde-serialize", serde(default))]
    pub distortion: Distortion,
    #[cfg_attr(feature = "serde-serialize", serde(default))]
    pub criteria: UndistortCriteria,
}

impl CameraIntrinsics {
    /// Creates the camera intrinsics from the simple intrinsics and the distortion coefficients.
    pub fn new(pinhole: PinholeIntrinsics, distortion: Distortion) -> Self {
        Self {
            pinhole,
            distortion,
            criteria: UndistortCriteria::default(),
        }
    }

    #[must_use]
    pub fn criteria(self, criteria: UndistortCriteria) -> Self {
        Self { criteria, ..self }
    }

    /// Checks the pinhole parameters and that every distortion coefficient is finite.
    pub fn validate(&self) -> Result<(), IntrinsicsError> {
        self.pinhole.validate()?;
        if self.distortion.is_finite() {
            Ok(())
        } else {
            Err(IntrinsicsError::NonFinite)
        }
    }

    /// Removes perspective and lens distortion from a pixel point.
    ///
    /// ```
    /// use stereo_core::KeyPoint;
    /// use stereo_pinhole::{CameraIntrinsics, Distortion, PinholeIntrinsics};
    /// let camera = CameraIntrinsics::new(
    ///     PinholeIntrinsics::new(204.5, 204.5, 320.0, 240.0).unwrap(),
    ///     Distortion::new(0.23, -0.2, -0.0014, 0.0034, 0.044),
    /// );
    /// let kp = KeyPoint::new(20.0, 30.0);
    /// let ray = camera.undistort(kp).unwrap();
    /// assert!((camera.project(ray).0 - kp.0).norm() < 1e-6);
    /// ```
    pub fn undistort(&self, point: impl ImagePoint) -> Result<NormalizedKeyPoint, UndistortError> {
        let NormalizedKeyPoint(distorted) = self.pinhole.normalize(point);
        self.distortion
            .undistort(distorted.coords, self.criteria)
            .map(|undistorted| NormalizedKeyPoint(Point2::from(undistorted)))
    }

    /// Applies lens distortion and perspective to a point on the normalized image plane.
    pub fn project(&self, projection: NormalizedKeyPoint) -> KeyPoint {
        let distorted = self.distortion.distort(projection.coords);
        self.pinhole.project(NormalizedKeyPoint(distorted.into()))
    }
}

impl From<PinholeIntrinsics> for CameraIntrinsics {
    fn from(pinhole: PinholeIntrinsics) -> Self {
        Self::new(pinhole, Distortion::none())
    }
}

impl CameraModel for CameraIntrinsics {
    type Projection = NormalizedKeyPoint;
    type Error = UndistortError;

    fn calibrate<P>(&self, point: P) -> Result<NormalizedKeyPoint, UndistortError>
    where
        P: ImagePoint,
    {
        self.undistort(point)
    }

    fn uncalibrate(&self, projection: NormalizedKeyPoint) -> KeyPoint {
        self.project(projection)
    }
}
