use crate::DltTriangulator;
use log::*;
use stereo_core::{
    nalgebra::Point3, CameraToCamera, FeatureMatch, Pose, Projective, WorldToCamera,
};
use stereo_pinhole::{EssentialMatrix, NormalizedKeyPoint};

/// The pose selected by [`PoseRecovery`] and the matches that support it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveredPose {
    /// Maps points of the first camera into the second camera. The translation has unit length.
    pub pose: CameraToCamera,
    /// Indices of the matches whose triangulated point lies within the distance threshold
    /// in front of both cameras.
    pub inliers: Vec<usize>,
    /// The triangulated points of the inliers in the frame of the first camera.
    pub points: Vec<Point3<f64>>,
}

/// Chooses the physically valid decomposition of an essential matrix.
///
/// Each of the four candidate poses triangulates every match. A match counts for a
/// candidate when its point has positive depth below `distance_threshold` in both cameras.
/// The threshold is expressed in units of the baseline, since the recovered translation
/// has unit length, and removes points that are nearly at infinity.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PoseRecovery {
    pub distance_threshold: f64,
    pub epsilon: f64,
    pub max_iterations: usize,
    pub triangulator: DltTriangulator,
}

impl PoseRecovery {
    pub fn new() -> Self {
        Default::default()
    }

    #[must_use]
    pub fn distance_threshold(self, distance_threshold: f64) -> Self {
        Self {
            distance_threshold,
            ..self
        }
    }

    /// Recovers the relative pose from an essential matrix and the matches it was estimated from.
    ///
    /// Returns `None` if the essential matrix cannot be decomposed or no candidate puts a single
    /// point in front of both cameras.
    pub fn recover(
        &self,
        essential: &EssentialMatrix,
        matches: &[FeatureMatch<NormalizedKeyPoint>],
    ) -> Option<RecoveredPose> {
        let candidates = essential.possible_unscaled_poses(self.epsilon, self.max_iterations)?;
        let best = candidates
            .iter()
            .map(|&pose| self.score(pose, matches))
            .enumerate()
            .inspect(|(ix, recovered)| {
                trace!("pose candidate {} has {} points in front", ix, recovered.inliers.len())
            })
            .map(|(_, recovered)| recovered)
            .fold(None, |best: Option<RecoveredPose>, recovered| match best {
                Some(best) if best.inliers.len() >= recovered.inliers.len() => Some(best),
                _ => Some(recovered),
            })?;
        if best.inliers.is_empty() {
            debug!("no pose candidate places a point in front of both cameras");
            return None;
        }
        Some(best)
    }

    /// Triangulates every match under a candidate pose and keeps the ones in front of both cameras.
    pub fn score(&self, pose: CameraToCamera, matches: &[FeatureMatch<NormalizedKeyPoint>]) -> RecoveredPose {
        let first = WorldToCamera::identity().projection_matrix();
        let second = pose.projection_matrix();
        let mut inliers = vec![];
        let mut points = vec![];
        for (ix, &FeatureMatch(a, b)) in matches.iter().enumerate() {
            let point = match self
                .triangulator
                .triangulate(&first, &second, a, b)
                .and_then(|p| p.point())
            {
                Some(point) => point,
                None => continue,
            };
            let depth_first = point.z;
            let depth_second = (pose.rotation() * point + pose.translation()).z;
            if self.within_range(depth_first) && self.within_range(depth_second) {
                inliers.push(ix);
                points.push(point);
            }
        }
        RecoveredPose {
            pose,
            inliers,
            points,
        }
    }

    fn within_range(&self, depth: f64) -> bool {
        depth > 0.0 && depth < self.distance_threshold
    }
}

impl Default for PoseRecovery {
    fn default() -> Self {
        Self {
            distance_threshold: 5.0,
            epsilon: 1e-12,
            max_iterations: 1000,
            triangulator: DltTriangulator::new(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use stereo_core::nalgebra::{Rotation3, Vector3};

    fn pose() -> CameraToCamera {
        CameraToCamera::from_parts(
            Vector3::new(-0.8, 0.05, 0.05),
            Rotation3::from_euler_angles(0.01, 0.33, -0.02),
        )
    }

    fn matches(pose: CameraToCamera) -> Vec<FeatureMatch<NormalizedKeyPoint>> {
        let mut out = vec![];
        for i in 0..4 {
            for j in 0..3 {
                let point = Point3::new(-0.6 + 0.4 * i as f64, -0.4 + 0.4 * j as f64, 1.8 + 0.2 * (i + j) as f64);
                out.push(FeatureMatch(
                    NormalizedKeyPoint::from_camera_point(point).unwrap(),
                    NormalizedKeyPoint::from_camera_point(pose.rotation() * point + pose.translation()).unwrap(),
                ));
            }
        }
        out
    }

    #[test]
    fn picks_the_true_decomposition() {
        let truth = pose();
        let matches = matches(truth);
        let recovered = PoseRecovery::new()
            .recover(&EssentialMatrix::from(truth), &matches)
            .unwrap();
        assert_eq!(recovered.inliers, (0..matches.len()).collect::<Vec<_>>());
        assert!((recovered.pose.rotation().matrix() - truth.rotation().matrix()).norm() < 1e-9);
        let direction = truth.translation().normalize();
        assert!((recovered.pose.translation() - direction).norm() < 1e-9);
        assert!((recovered.pose.translation().norm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn the_sign_of_the_essential_matrix_does_not_matter() {
        let truth = pose();
        let matches = matches(truth);
        let negated = EssentialMatrix(-EssentialMatrix::from(truth).0);
        let recovered = PoseRecovery::new().recover(&negated, &matches).unwrap();
        assert!((recovered.pose.rotation().matrix() - truth.rotation().matrix()).norm() < 1e-9);
    }

    #[test]
    fn points_beyond_the_threshold_are_not_counted() {
        let truth = pose();
        let matches = matches(truth);
        // Depths span about 2.2 to 3.5 baselines once the translation has unit length.
        let recovered = PoseRecovery::new()
            .distance_threshold(3.0)
            .recover(&EssentialMatrix::from(truth), &matches)
            .unwrap();
        assert!(!recovered.inliers.is_empty());
        assert!(recovered.inliers.len() < matches.len());
    }

    #[test]
    fn no_matches_means_no_pose() {
        assert!(PoseRecovery::new()
            .recover(&EssentialMatrix::from(pose()), &[])
            .is_none());
    }
}
