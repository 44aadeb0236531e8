use stereo_core::{
    nalgebra::{Matrix3x4, Matrix4, RowVector4},
    CameraToCamera, Pose, Projective, WorldPoint, WorldToCamera,
};
use stereo_pinhole::NormalizedKeyPoint;

/// Linear triangulation of one point seen by two cameras, known as the DLT (direct linear
/// transform) method in "Multiple View Geometry" by Hartley and Zisserman.
///
/// Each observation `(x, y)` with projection matrix `P` contributes the two rows
/// `x * P[2] - P[0]` and `y * P[2] - P[1]` of a 4x4 system `A * X = 0`. The homogeneous
/// point `X` is the right singular vector of `A` with the smallest singular value.
///
/// The projection matrices act on normalized image coordinates, so they are just the
/// extrinsics of the cameras.
///
/// ```
/// use stereo_core::nalgebra::{Point3, Rotation3, Vector3};
/// use stereo_core::{CameraToCamera, Pose, Projective};
/// use stereo_geom::DltTriangulator;
/// use stereo_pinhole::NormalizedKeyPoint;
///
/// let point = Point3::new(0.3, 0.1, 2.0);
/// let pose = CameraToCamera::from_parts(Vector3::new(-0.5, 0.0, 0.1), Rotation3::new(Vector3::new(0.0, 0.2, 0.0)));
/// let a = NormalizedKeyPoint::from_camera_point(point).unwrap();
/// let b = NormalizedKeyPoint::from_camera_point(pose.rotation() * point + pose.translation()).unwrap();
/// let triangulated = DltTriangulator::new().triangulate_relative(pose, a, b).unwrap();
/// let distance = (point.coords - triangulated.point().unwrap().coords).norm();
/// assert!(distance < 1e-9);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd)]
pub struct DltTriangulator {
    epsilon: f64,
    max_iterations: usize,
    infinity_threshold: f64,
}

impl DltTriangulator {
    /// Creates a `DltTriangulator` with default values.
    ///
    /// Same as calling [`Default::default`].
    pub fn new() -> Self {
        Default::default()
    }

    /// Set the epsilon used in the singular value decomposition.
    ///
    /// Default is `1e-12`.
    #[must_use]
    pub fn epsilon(self, epsilon: f64) -> Self {
        Self { epsilon, ..self }
    }

    /// Set the maximum number of iterations for the singular value decomposition.
    ///
    /// Default is `1000`.
    #[must_use]
    pub fn max_iterations(self, max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..self
        }
    }

    /// Set the bound on `|w|` relative to the norm of the homogeneous solution below
    /// which the point is treated as being at infinity.
    ///
    /// Default is `1e-12`.
    #[must_use]
    pub fn infinity_threshold(self, infinity_threshold: f64) -> Self {
        Self {
            infinity_threshold,
            ..self
        }
    }

    /// Triangulates a point from two projection matrices and the two observations.
    ///
    /// Returns `None` if the decomposition fails, the solution is at infinity (parallel
    /// rays) or it is not finite. The returned point has `w = 1`.
    pub fn triangulate(
        &self,
        first: &Matrix3x4<f64>,
        second: &Matrix3x4<f64>,
        a: NormalizedKeyPoint,
        b: NormalizedKeyPoint,
    ) -> Option<WorldPoint> {
        let mut design = Matrix4::<f64>::zeros();
        for (k, (projection, observation)) in [(first, a), (second, b)].into_iter().enumerate() {
            let depth_row: RowVector4<f64> = projection.row(2).into_owned();
            design
                .row_mut(2 * k)
                .copy_from(&(observation.x * depth_row - projection.row(0)));
            design
                .row_mut(2 * k + 1)
                .copy_from(&(observation.y * depth_row - projection.row(1)));
        }
        if design.iter().any(|n| !n.is_finite()) {
            return None;
        }

        let svd = design.try_svd(false, true, self.epsilon, self.max_iterations)?;
        let v_t = svd.v_t?;
        svd.singular_values
            .iter()
            .enumerate()
            .min_by_key(|&(_, &n)| float_ord::FloatOrd(n))
            .map(|(ix, _)| WorldPoint(v_t.row(ix).transpose()))
            .and_then(|point| point.point_checked(self.infinity_threshold))
            .map(WorldPoint::from_point)
    }

    /// Triangulates with the first camera at the world origin and the second camera
    /// placed by `extrinsics`.
    pub fn triangulate_stereo(
        &self,
        extrinsics: WorldToCamera,
        a: NormalizedKeyPoint,
        b: NormalizedKeyPoint,
    ) -> Option<WorldPoint> {
        self.triangulate(
            &WorldToCamera::identity().projection_matrix(),
            &extrinsics.projection_matrix(),
            a,
            b,
        )
    }

    /// Same as [`DltTriangulator::triangulate_stereo`] for a relative pose that maps
    /// points of the first camera into the second.
    pub fn triangulate_relative(
        &self,
        pose: CameraToCamera,
        a: NormalizedKeyPoint,
        b: NormalizedKeyPoint,
    ) -> Option<WorldPoint> {
        self.triangulate_stereo(pose.extrinsics(), a, b)
    }
}

impl Default for DltTriangulator {
    fn default() -> Self {
        Self {
            epsilon: 1e-12,
            max_iterations: 1000,
            infinity_threshold: 1e-12,
        }
    }
}
