use crate::{CameraIntrinsics, IntrinsicsError, NormalizedKeyPoint, PinholeIntrinsics, UndistortError};
use log::*;
use stereo_core::{CameraId, CameraModel, FeatureMatch, ImagePoint, KeyPoint, PointSample};

/// The intrinsics of both cameras of the rig together with the canonical camera.
///
/// The canonical camera is an ideal pinhole (no distortion) shared by both cameras.
/// Every observation is undistorted with the intrinsics of the camera that made it and
/// then reprojected with the canonical intrinsics. After that the two-view geometry can
/// be solved as if both cameras had identical optics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StereoIntrinsics {
    cameras: [CameraIntrinsics; 2],
    canonical: PinholeIntrinsics,
}

impl StereoIntrinsics {
    /// Validates and combines the intrinsics of both cameras and the canonical camera.
    pub fn new(
        first: CameraIntrinsics,
        second: CameraIntrinsics,
        canonical: PinholeIntrinsics,
    ) -> Result<Self, IntrinsicsError> {
        first.validate()?;
        second.validate()?;
        canonical.validate()?;
        Ok(Self {
            cameras: [first, second],
            canonical,
        })
    }

    /// The intrinsics of one of the physical cameras.
    pub fn camera(&self, camera: CameraId) -> &CameraIntrinsics {
        &self.cameras[camera.index()]
    }

    /// The shared canonical intrinsics.
    pub fn canonical(&self) -> &PinholeIntrinsics {
        &self.canonical
    }

    /// Removes lens distortion and perspective from a pixel point using the intrinsics
    /// of the camera that observed it, giving normalized image coordinates.
    pub fn pixel_to_ray(
        &self,
        camera: CameraId,
        point: impl ImagePoint,
    ) -> Result<NormalizedKeyPoint, UndistortError> {
        self.camera(camera).calibrate(point).map_err(|e| {
            debug!("failed to undistort a point of {}: {}", camera, e);
            e
        })
    }

    /// Projects normalized image coordinates into the canonical pixel frame.
    pub fn ray_to_canonical_pixel(&self, ray: NormalizedKeyPoint) -> KeyPoint {
        self.canonical.project(ray)
    }

    /// Maps a pixel point of a physical camera into the canonical pixel frame.
    ///
    /// ```
    /// use stereo_core::{CameraId, KeyPoint};
    /// use stereo_pinhole::{CameraIntrinsics, PinholeIntrinsics, StereoIntrinsics};
    /// let pinhole = PinholeIntrinsics::new(204.5, 204.5, 320.0, 240.0).unwrap();
    /// let stereo = StereoIntrinsics::new(pinhole.into(), pinhole.into(), pinhole).unwrap();
    /// let canonical = stereo.to_canonical(CameraId::First, KeyPoint::new(320.0, 240.0)).unwrap();
    /// assert_eq!(canonical, KeyPoint::new(320.0, 240.0));
    /// ```
    pub fn to_canonical(
        &self,
        camera: CameraId,
        point: impl ImagePoint,
    ) -> Result<KeyPoint, UndistortError> {
        self.pixel_to_ray(camera, point)
            .map(|ray| self.ray_to_canonical_pixel(ray))
    }

    /// Maps a pixel point into the canonical pixel frame and then onto the normalized
    /// image plane of the canonical camera, which is where the two-view geometry is solved.
    pub fn canonical_ray(
        &self,
        camera: CameraId,
        point: impl ImagePoint,
    ) -> Result<NormalizedKeyPoint, UndistortError> {
        self.to_canonical(camera, point)
            .map(|canonical| self.canonical.normalize(canonical))
    }

    /// Applies [`StereoIntrinsics::canonical_ray`] to both points of a sample.
    pub fn canonical_match(
        &self,
        sample: PointSample,
    ) -> Result<FeatureMatch<NormalizedKeyPoint>, UndistortError> {
        sample.try_map(|camera, point| self.canonical_ray(camera, point))
    }
}
