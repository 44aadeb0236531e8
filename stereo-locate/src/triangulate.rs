use crate::CalibrationState;
use log::*;
use stereo_core::{nalgebra::Point3, CameraId, FeatureMatch, KeyPoint, Projective};
use stereo_geom::DltTriangulator;
use stereo_pinhole::{StereoIntrinsics, UndistortError};
use thiserror::Error;

/// Raised when a pair of points can not be triangulated.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum TriangulationError {
    #[error("the cameras are not calibrated")]
    NotCalibrated,
    #[error("the rays do not intersect at a finite point")]
    Degenerate,
    #[error("unable to undistort a point: {0}")]
    Undistort(#[from] UndistortError),
}

/// Localizes the marker from the points where both cameras see it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Triangulator {
    dlt: DltTriangulator,
}

impl Triangulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Triangulates a pair of pixel points with the current calibration.
    ///
    /// The result is in the frame of the first camera, in units of the baseline between the
    /// two cameras.
    pub fn triangulate(
        &self,
        state: &CalibrationState,
        intrinsics: &StereoIntrinsics,
        first: KeyPoint,
        second: KeyPoint,
    ) -> Result<Point3<f64>, TriangulationError> {
        if !state.is_calibrated() {
            return Err(TriangulationError::NotCalibrated);
        }
        let FeatureMatch(a, b) = intrinsics.canonical_match(FeatureMatch(first, second))?;
        let point = self
            .dlt
            .triangulate(
                state.projection(CameraId::First),
                state.projection(CameraId::Second),
                a,
                b,
            )
            .and_then(|point| point.point())
            .ok_or(TriangulationError::Degenerate)?;
        debug!("triangulated ({}, {}, {})", point.x, point.y, point.z);
        Ok(point)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::synthetic::{scene_points, Scene};
    use crate::CalibrationReport;
    use approx::assert_relative_eq;

    fn calibrated(scene: &Scene) -> CalibrationState {
        let report: CalibrationReport = scene
            .solver()
            .solve(&scene.samples(&scene_points(4, 3)))
            .unwrap();
        CalibrationState::from_report(&report)
    }

    #[test]
    fn not_calibrated() {
        let scene = Scene::new();
        let result = Triangulator::new().triangulate(
            &CalibrationState::default(),
            &scene.intrinsics,
            KeyPoint::new(320.0, 240.0),
            KeyPoint::new(300.0, 240.0),
        );
        assert_eq!(result, Err(TriangulationError::NotCalibrated));
    }

    #[test]
    fn recovers_points_up_to_the_baseline() {
        let scene = Scene::new();
        let state = calibrated(&scene);
        for &(x, y, z) in &[(0.1, -0.2, 2.2), (-0.4, 0.3, 1.9), (0.5, 0.1, 2.7)] {
            let point = Point3::new(x, y, z);
            let sample = scene.sample(point);
            let triangulated = Triangulator::new()
                .triangulate(&state, &scene.intrinsics, sample.0, sample.1)
                .unwrap();
            assert_relative_eq!(triangulated * scene.baseline(), point, epsilon = 1e-6);
        }
    }

    #[test]
    fn bad_points_are_reported() {
        let scene = Scene::new();
        let state = calibrated(&scene);
        let result = Triangulator::new().triangulate(
            &state,
            &scene.intrinsics,
            KeyPoint::new(f64::NAN, 240.0),
            KeyPoint::new(300.0, 240.0),
        );
        assert_eq!(
            result,
            Err(TriangulationError::Undistort(UndistortError::NonFinite))
        );
    }
}
