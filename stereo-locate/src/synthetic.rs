//! A noise free stereo scene used by the unit tests.

use crate::{CalibrationSolver, LocatorSettings};
use stereo_core::{
    nalgebra::{Point3, Rotation3, Vector3},
    CameraId, CameraToCamera, FeatureMatch, KeyPoint, Pose, PointSample, WorldToCamera,
};
use stereo_pinhole::{NormalizedKeyPoint, StereoIntrinsics};

/// Points spread over `x` in `[-0.7, 0.7]`, `y` in `[-0.5, 0.5]` and an uneven depth in `[1.6, 3.0]`.
pub fn scene_points(nx: usize, ny: usize) -> Vec<Point3<f64>> {
    let spread = |ix: usize, n: usize| {
        if n > 1 {
            ix as f64 / (n - 1) as f64
        } else {
            0.5
        }
    };
    let mut points = vec![];
    for i in 0..nx {
        for j in 0..ny {
            let depth = ((3 * i + 5 * j + i * j) % 7) as f64 / 6.0;
            points.push(Point3::new(
                -0.7 + 1.4 * spread(i, nx),
                -0.5 + 1.0 * spread(j, ny),
                1.6 + 1.4 * depth,
            ));
        }
    }
    points
}

pub struct Scene {
    pub intrinsics: StereoIntrinsics,
    pub pose: CameraToCamera,
}

impl Scene {
    /// The cameras of the default settings, the second one 0.8 to the right of the first
    /// and turned towards it.
    pub fn new() -> Self {
        let rotation = Rotation3::from_euler_angles(0.01, 0.33, -0.02);
        let center = Vector3::new(0.8, 0.05, -0.05);
        Self {
            intrinsics: LocatorSettings::default().intrinsics().unwrap(),
            pose: CameraToCamera::from_parts(-(rotation * center), rotation),
        }
    }

    pub fn solver(&self) -> CalibrationSolver {
        CalibrationSolver::new(self.intrinsics, Default::default())
    }

    /// Where a camera sees a point given in the frame of the first camera.
    pub fn observe(&self, camera: CameraId, point: Point3<f64>) -> KeyPoint {
        let local = match camera {
            CameraId::First => point,
            CameraId::Second => self.pose.rotation() * point + self.pose.translation(),
        };
        let ray = NormalizedKeyPoint::from_camera_point(local).unwrap();
        self.intrinsics.camera(camera).project(ray)
    }

    pub fn sample(&self, point: Point3<f64>) -> PointSample {
        FeatureMatch(
            self.observe(CameraId::First, point),
            self.observe(CameraId::Second, point),
        )
    }

    pub fn samples(&self, points: &[Point3<f64>]) -> Vec<PointSample> {
        points.iter().map(|&p| self.sample(p)).collect()
    }

    /// The length of the baseline, which calibration scales to one.
    pub fn baseline(&self) -> f64 {
        self.pose.translation().norm()
    }

    pub fn assert_close(&self, extrinsics: WorldToCamera, tolerance: f64) {
        let angle = extrinsics.rotation_angle_to(self.pose.extrinsics());
        assert!(angle < tolerance, "rotation is off by {}", angle);
        let direction = (extrinsics.translation() - self.pose.translation().normalize()).norm();
        assert!(direction < tolerance, "translation is off by {}", direction);
    }
}
