use core::f64::consts::SQRT_2;
use stereo_core::{
    nalgebra::{Matrix3, SMatrix, SVector, Vector2},
    sample_consensus::Estimator,
    FeatureMatch,
};
use stereo_pinhole::{EssentialMatrix, NormalizedKeyPoint};

/// Point sets with a smaller mean distance to their centroid, relative to its distance to
/// the origin, are treated as a single point.
const SPREAD_EPSILON: f64 = 1e-12;

/// Similarity moving the centroid of the points to the origin and scaling their mean
/// distance to the origin to `sqrt(2)`.
fn hartley_normalization(points: impl Iterator<Item = Vector2<f64>> + Clone) -> Option<Matrix3<f64>> {
    let (count, sum) = points
        .clone()
        .fold((0usize, Vector2::zeros()), |(count, sum), p| (count + 1, sum + p));
    if count == 0 {
        return None;
    }
    let centroid = sum / count as f64;
    let mean_distance = points.map(|p| (p - centroid).norm()).sum::<f64>() / count as f64;
    // Averaging coincident points leaves a spread of a few ulps rather than zero.
    if !mean_distance.is_finite() || mean_distance <= SPREAD_EPSILON * (1.0 + centroid.norm()) {
        return None;
    }
    let scale = SQRT_2 / mean_distance;
    #[rustfmt::skip]
    let transform = Matrix3::new(
        scale,  0.0,    -scale * centroid.x,
        0.0,    scale,  -scale * centroid.y,
        0.0,    0.0,    1.0,
    );
    Some(transform)
}

/// Forces the smallest singular value to zero.
///
/// In Hartley-normalized coordinates the estimate is a fundamental matrix, so only its rank
/// is constrained. The two equal singular values only hold again after denormalization.
fn enforce_rank_two(matrix: Matrix3<f64>, epsilon: f64, max_iterations: usize) -> Option<Matrix3<f64>> {
    let mut svd = matrix.try_svd(true, true, epsilon, max_iterations)?;
    svd.singular_values[2] = 0.0;
    svd.recompose().ok()
}

/// Accumulates the normal equations `A^T * A` of the epipolar constraints of every match.
fn encode_epipolar_equation(
    matches: impl Iterator<Item = FeatureMatch<NormalizedKeyPoint>>,
    transform_a: &Matrix3<f64>,
    transform_b: &Matrix3<f64>,
) -> SMatrix<f64, 9, 9> {
    let mut normal = SMatrix::<f64, 9, 9>::zeros();
    for FeatureMatch(a, b) in matches {
        let ap = transform_a * a.homogeneous();
        let bp = transform_b * b.homogeneous();
        let mut row = SVector::<f64, 9>::zeros();
        for j in 0..3 {
            let v = ap[j] * bp;
            row.fixed_rows_mut::<3>(3 * j).copy_from(&v);
        }
        normal += row * row.transpose();
    }
    normal
}

/// Performs the normalized
/// [eight-point algorithm](https://en.wikipedia.org/wiki/Eight-point_algorithm)
/// by Richard Hartley and Andrew Zisserman.
///
/// Any number of matches of at least eight can be passed. With more than eight the
/// result is the linear least squares fit over all of them, which is how the
/// consensus set of a robust estimate is refit. The returned matrix already has
/// the two equal singular values and the null singular value of an essential
/// matrix, and unit frobenius norm.
#[derive(Copy, Clone, Debug)]
pub struct EightPoint {
    pub epsilon: f64,
    pub iterations: usize,
}

impl EightPoint {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn from_matches<I>(&self, data: I) -> Option<EssentialMatrix>
    where
        I: Iterator<Item = FeatureMatch<NormalizedKeyPoint>> + Clone,
    {
        if data.clone().count() < <Self as Estimator<FeatureMatch<NormalizedKeyPoint>>>::MIN_SAMPLES {
            return None;
        }
        let transform_a = hartley_normalization(data.clone().map(|FeatureMatch(a, _)| a.coords))?;
        let transform_b = hartley_normalization(data.clone().map(|FeatureMatch(_, b)| b.coords))?;
        let normal = encode_epipolar_equation(data, &transform_a, &transform_b);
        let eigens = normal.try_symmetric_eigen(self.epsilon, self.iterations)?;
        let eigenvector = eigens
            .eigenvalues
            .iter()
            .enumerate()
            .min_by_key(|&(_, &n)| float_ord::FloatOrd(n))
            .map(|(ix, _)| eigens.eigenvectors.column(ix).into_owned())?;
        let normalized = enforce_rank_two(
            Matrix3::from_iterator(eigenvector.iter().copied()),
            self.epsilon,
            self.iterations,
        )?;
        EssentialMatrix(transform_b.transpose() * normalized * transform_a)
            .recondition(self.epsilon, self.iterations)?
            .normalize()
    }
}

impl Default for EightPoint {
    fn default() -> Self {
        Self {
            epsilon: 1e-12,
            iterations: 1000,
        }
    }
}

impl Estimator<FeatureMatch<NormalizedKeyPoint>> for EightPoint {
    type Model = EssentialMatrix;
    type ModelIter = Option<EssentialMatrix>;
    const MIN_SAMPLES: usize = 8;

    fn estimate<I>(&self, data: I) -> Self::ModelIter
    where
        I: Iterator<Item = FeatureMatch<NormalizedKeyPoint>> + Clone,
    {
        self.from_matches(data)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use stereo_core::{
        nalgebra::{Point2, Point3, Rotation3, Vector3},
        CameraToCamera, Pose,
    };

    #[test]
    fn normalization_centers_and_scales() {
        let points = [Vector2::new(1.0, 1.0), Vector2::new(3.0, 1.0), Vector2::new(2.0, 4.0)];
        let transform = hartley_normalization(points.iter().copied()).unwrap();
        let moved: Vec<Vector2<f64>> = points
            .iter()
            .map(|p| (transform * p.push(1.0)).xy())
            .collect();
        let centroid = moved.iter().sum::<Vector2<f64>>() / 3.0;
        assert!(centroid.norm() < 1e-12);
        let mean = moved.iter().map(|p| p.norm()).sum::<f64>() / 3.0;
        assert!((mean - SQRT_2).abs() < 1e-12);
    }

    #[test]
    fn coincident_points_are_rejected() {
        let p = NormalizedKeyPoint(Point2::new(0.1, 0.2));
        let matches = vec![FeatureMatch(p, p); 8];
        assert!(EightPoint::new().from_matches(matches.into_iter()).is_none());
    }

    #[test]
    fn nearly_coincident_points_are_rejected() {
        // Neither coordinate is exact in binary, so the centroid leaves a residual spread.
        let p = NormalizedKeyPoint(Point2::new(0.1, 0.7));
        let matches = vec![FeatureMatch(p, p); 20];
        assert!(EightPoint::new().from_matches(matches.into_iter()).is_none());

        let jittered = (0..12).map(|i| {
            let q = NormalizedKeyPoint(Point2::new(0.3 + 1e-15 * i as f64, -0.2 + 2e-15 * (i % 3) as f64));
            FeatureMatch(q, q)
        });
        assert!(EightPoint::new().from_matches(jittered).is_none());
    }

    #[test]
    fn exact_matches_give_the_true_essential_matrix() {
        let pose = CameraToCamera::from_parts(
            Vector3::new(-0.8, 0.05, 0.1),
            Rotation3::from_euler_angles(0.02, 0.35, -0.04),
        );
        let matches = (0..12).map(|i| {
            let point = Point3::new(
                -0.6 + 0.1 * i as f64,
                0.4 * ((i * 5) % 7) as f64 / 6.0 - 0.2,
                1.6 + 0.15 * ((i * 3) % 8) as f64,
            );
            FeatureMatch(
                NormalizedKeyPoint::from_camera_point(point).unwrap(),
                NormalizedKeyPoint::from_camera_point(pose.rotation() * point + pose.translation()).unwrap(),
            )
        });
        let estimated = EightPoint::new().from_matches(matches).unwrap().0;
        let truth = EssentialMatrix::from(pose).normalize().unwrap().0;
        let residual = (estimated - truth).norm().min((estimated + truth).norm());
        assert!(residual < 1e-8, "off by {}", residual);
        let singular = estimated.singular_values();
        assert!((singular[0] - singular[1]).abs() < 1e-8 && singular[2].abs() < 1e-8);
    }

    #[test]
    fn too_few_matches_are_rejected() {
        let matches = (0..7).map(|i| {
            let p = NormalizedKeyPoint(Point2::new(i as f64 * 0.1, 0.3));
            FeatureMatch(p, p)
        });
        assert!(EightPoint::new().from_matches(matches).is_none());
    }
}
