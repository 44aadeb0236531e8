use crate::NormalizedKeyPoint;
use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use num_traits::Float;
use stereo_core::{
    nalgebra::{Matrix3, Rotation3, Vector3, SVD},
    sample_consensus::Model,
    CameraToCamera, FeatureMatch, Pose,
};

/// This stores an essential matrix, which is satisfied by the following constraint:
///
/// transpose(x') * E * x = 0
///
/// Where `x'` and `x` are homogeneous normalized image coordinates of the second and
/// first camera respectively. You can get a homogeneous normalized image coordinate by
/// appending `1.0` to a [`NormalizedKeyPoint`].
///
/// The essential matrix embodies the epipolar constraint between two images. For any
/// point on the sensor of the first camera, the light came from somewhere along the
/// ray through the optical center and that point. Projected into the second camera, that
/// ray forms the epipolar line. `E * x` is the line on the normalized image plane of the
/// second camera on which `x'` must lie, which is written as:
///
/// ```text
/// dot(E * x, x') = 0
/// ```
///
/// For a relative pose which maps points of the first camera `X` into points of the
/// second camera as `R * X + t`, the essential matrix is `[t]x * R`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
pub struct EssentialMatrix(pub Matrix3<f64>);

impl EssentialMatrix {
    /// Can be used to enforce the constraints of an essential matrix to fix it.
    ///
    /// This finds the closest essential matrix in frobenius form. This just means
    /// that the two singular values are averaged and the null singular value is
    /// forced to zero.
    pub fn recondition(self, epsilon: f64, max_iterations: usize) -> Option<Self> {
        let mut svd = self.try_svd(true, true, epsilon, max_iterations)?;
        // The singular values are sorted in decreasing order.
        svd.singular_values[2] = 0.0;
        let new_singular = (svd.singular_values[0] + svd.singular_values[1]) / 2.0;
        svd.singular_values[0] = new_singular;
        svd.singular_values[1] = new_singular;
        svd.recompose().ok().map(Self)
    }

    /// Scales the matrix to unit frobenius norm.
    ///
    /// The essential matrix is only defined up to scale, so this does not change
    /// the constraint it encodes. Fails for the zero matrix.
    pub fn normalize(self) -> Option<Self> {
        let norm = self.0.norm();
        if norm.is_finite() && norm > 0.0 {
            Some(Self(self.0 / norm))
        } else {
            None
        }
    }

    /// The algebraic epipolar error `transpose(x') * E * x` of a match.
    pub fn epipolar_error(&self, data: &FeatureMatch<NormalizedKeyPoint>) -> f64 {
        let &FeatureMatch(a, b) = data;
        b.homogeneous().dot(&(self.0 * a.homogeneous()))
    }

    /// The signed Sampson distance of a match. Its magnitude is the [`Model`] residual.
    ///
    /// The sign follows the algebraic error, which keeps the distance differentiable
    /// across the epipolar line. Returns infinity when both epipolar lines vanish.
    pub fn sampson_distance(&self, data: &FeatureMatch<NormalizedKeyPoint>) -> f64 {
        let &FeatureMatch(a, b) = data;
        let epipolar_line_b = self.0 * a.homogeneous();
        let epipolar_line_a = self.0.transpose() * b.homogeneous();
        let denominator = epipolar_line_b.xy().norm_squared() + epipolar_line_a.xy().norm_squared();
        if denominator > 0.0 {
            self.epipolar_error(data) / denominator.sqrt()
        } else {
            f64::INFINITY
        }
    }

    /// Returns two possible rotations for the essential matrix along with a unit
    /// translation bearing of unknown sign.
    ///
    /// `epsilon` is the threshold by which the singular value decomposition is considered
    /// complete. It is recommended to set this to no higher than `1e-6`.
    ///
    /// `max_iterations` is the maximum number of iterations that singular value decomposition
    /// will run on this matrix.
    ///
    /// ```
    /// use stereo_core::{CameraToCamera, Pose};
    /// use stereo_core::nalgebra::{Rotation3, Vector3};
    /// use stereo_pinhole::EssentialMatrix;
    /// let pose = CameraToCamera::from_parts(
    ///     Vector3::new(-0.8, 0.4, 0.5),
    ///     Rotation3::from_euler_angles(0.2, 0.3, 0.4),
    /// );
    /// let (rot_a, rot_b, t) = EssentialMatrix::from(pose)
    ///     .possible_rotations_unscaled_translation(1e-12, 1000)
    ///     .unwrap();
    /// let a_res = (rot_a.matrix() - pose.rotation().matrix()).norm();
    /// let b_res = (rot_b.matrix() - pose.rotation().matrix()).norm();
    /// // At least one rotation is correct.
    /// assert!(a_res < 1e-6 || b_res < 1e-6);
    /// // The translation points in the same (or reverse) direction
    /// let t_res = 1.0 - t.dot(&pose.translation().normalize()).abs();
    /// assert!(t_res < 1e-6);
    /// ```
    pub fn possible_rotations_unscaled_translation(
        &self,
        epsilon: f64,
        max_iterations: usize,
    ) -> Option<(Rotation3<f64>, Rotation3<f64>, Vector3<f64>)> {
        let Self(essential) = *self;

        // `W` from https://en.wikipedia.org/wiki/Essential_matrix#Finding_one_solution.
        let w = Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
        let wt = w.transpose();

        let (mut u, mut v_t) = match SVD::try_new(essential, true, true, epsilon, max_iterations)? {
            SVD {
                u: Some(u),
                v_t: Some(v_t),
                ..
            } => (u, v_t),
            _ => return None,
        };
        // Force the determinants to be positive so the products are proper rotations.
        // Last column of U is undetermined since d = (a a 0).
        if u.determinant() < 0.0 {
            for n in u.column_mut(2).iter_mut() {
                *n *= -1.0;
            }
        }
        // Last row of Vt is undetermined since d = (a a 0).
        if v_t.determinant() < 0.0 {
            for n in v_t.row_mut(2).iter_mut() {
                *n *= -1.0;
            }
        }
        Some((
            Rotation3::from_matrix_unchecked(u * w * v_t),
            Rotation3::from_matrix_unchecked(u * wt * v_t),
            u.column(2).into_owned(),
        ))
    }

    /// See [`EssentialMatrix::possible_rotations_unscaled_translation`].
    ///
    /// This returns the four algebraic decompositions of the essential matrix. Exactly one
    /// of them places observed points in front of both cameras, which is decided with
    /// triangulation.
    ///
    /// ```
    /// use stereo_core::{CameraToCamera, Pose};
    /// use stereo_core::nalgebra::{Rotation3, Vector3};
    /// use stereo_pinhole::EssentialMatrix;
    /// let pose = CameraToCamera::from_parts(
    ///     Vector3::new(-0.8, 0.4, 0.5),
    ///     Rotation3::from_euler_angles(0.2, 0.3, 0.4),
    /// );
    /// let poses = EssentialMatrix::from(pose).possible_unscaled_poses(1e-12, 1000).unwrap();
    /// let one_correct = poses.iter().any(|&upose| {
    ///     let angle_residual = (upose.rotation().matrix() - pose.rotation().matrix()).norm();
    ///     let translation_residual =
    ///         1.0 - upose.translation().dot(&pose.translation().normalize());
    ///     angle_residual < 1e-6 && translation_residual < 1e-6
    /// });
    /// assert!(one_correct);
    /// ```
    pub fn possible_unscaled_poses(
        &self,
        epsilon: f64,
        max_iterations: usize,
    ) -> Option<[CameraToCamera; 4]> {
        self.possible_rotations_unscaled_translation(epsilon, max_iterations)
            .map(|(rot_a, rot_b, t)| {
                [
                    CameraToCamera::from_parts(t, rot_a),
                    CameraToCamera::from_parts(t, rot_b),
                    CameraToCamera::from_parts(-t, rot_a),
                    CameraToCamera::from_parts(-t, rot_b),
                ]
            })
    }
}

/// Generates an essential matrix corresponding to this relative camera pose.
///
/// If a point `a` is transformed using [`Pose::transform`] into
/// a point `b`, then the essential matrix returned by this method will
/// give a residual of approximately `0.0` when you call
/// `essential.residual(&FeatureMatch(a, b))` with their projections.
impl From<CameraToCamera> for EssentialMatrix {
    fn from(pose: CameraToCamera) -> Self {
        Self(pose.translation().cross_matrix() * *pose.rotation().matrix())
    }
}

/// The residual is the Sampson distance of the match, which is the first order
/// approximation of the distance on the normalized image plane between the match
/// and the closest pair of points which satisfies the epipolar constraint.
///
/// Unlike the algebraic error it does not depend on the scale of the matrix, so one
/// inlier threshold works for every hypothesis.
impl Model<FeatureMatch<NormalizedKeyPoint>> for EssentialMatrix {
    fn residual(&self, data: &FeatureMatch<NormalizedKeyPoint>) -> f64 {
        Float::abs(self.sampson_distance(data))
    }
}
