use log::*;
use stereo_core::{
    nalgebra::{Matrix5, Rotation3, Vector3, Vector5},
    CameraToCamera, FeatureMatch, Pose,
};
use stereo_pinhole::{EssentialMatrix, NormalizedKeyPoint};

/// The outcome of [`PoseRefinement::refine`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefinedPose {
    /// The refined pose. The translation has unit length.
    pub pose: CameraToCamera,
    /// Sum of squared Sampson distances under the initial pose.
    pub initial_cost: f64,
    /// Sum of squared Sampson distances under the refined pose.
    pub cost: f64,
    pub iterations: usize,
}

/// Refines a relative pose by minimizing the Sampson distances of its matches with
/// Levenberg-Marquardt.
///
/// A linear essential matrix minimizes an algebraic error, which weights matches
/// unevenly. This pass minimizes the geometric error instead. The pose has five
/// degrees of freedom: a rotation increment and a step on the sphere of unit
/// translations. The Jacobian is taken with central differences.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PoseRefinement {
    pub max_iterations: usize,
    pub initial_lambda: f64,
    pub gradient_tolerance: f64,
    pub step_tolerance: f64,
    pub difference_step: f64,
}

impl PoseRefinement {
    pub fn new() -> Self {
        Default::default()
    }

    #[must_use]
    pub fn max_iterations(self, max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..self
        }
    }

    /// Returns `None` with fewer than five matches, for a pose without translation, or
    /// when a match has no defined Sampson distance under the initial pose.
    pub fn refine(
        &self,
        pose: CameraToCamera,
        matches: &[FeatureMatch<NormalizedKeyPoint>],
    ) -> Option<RefinedPose> {
        if matches.len() < 5 {
            return None;
        }
        let translation = pose.translation().try_normalize(f64::EPSILON)?;
        let mut current = CameraToCamera::from_parts(translation, pose.rotation());
        let initial_cost = cost(current, matches)?;
        let mut current_cost = initial_cost;
        let mut lambda = self.initial_lambda;
        let mut iterations = 0;

        for iteration in 0..self.max_iterations {
            iterations = iteration + 1;
            let (jtj, gradient) = self.normal_equations(current, matches)?;
            if gradient.norm() < self.gradient_tolerance {
                break;
            }

            let mut damped = jtj;
            for i in 0..5 {
                damped[(i, i)] += lambda * jtj[(i, i)].max(1e-6);
            }
            let delta = match damped.lu().solve(&-gradient) {
                Some(delta) => delta,
                None => break,
            };
            if delta.norm() < self.step_tolerance {
                break;
            }

            let trial = retract(current, &delta);
            match cost(trial, matches) {
                Some(trial_cost) if trial_cost < current_cost => {
                    current = trial;
                    current_cost = trial_cost;
                    lambda = (lambda * 0.1).max(1e-10);
                }
                _ => {
                    lambda *= 10.0;
                    if lambda > 1e10 {
                        break;
                    }
                }
            }
        }
        debug!(
            "refined pose over {} matches in {} iterations, cost {:e} -> {:e}",
            matches.len(),
            iterations,
            initial_cost,
            current_cost
        );
        Some(RefinedPose {
            pose: current,
            initial_cost,
            cost: current_cost,
            iterations,
        })
    }

    /// Accumulates `J^T J` and `J^T r` one match at a time.
    fn normal_equations(
        &self,
        pose: CameraToCamera,
        matches: &[FeatureMatch<NormalizedKeyPoint>],
    ) -> Option<(Matrix5<f64>, Vector5<f64>)> {
        let essential = EssentialMatrix::from(pose);
        let h = self.difference_step;
        let mut shifted = [(essential, essential); 5];
        for (k, pair) in shifted.iter_mut().enumerate() {
            let mut delta = Vector5::zeros();
            delta[k] = h;
            *pair = (
                EssentialMatrix::from(retract(pose, &delta)),
                EssentialMatrix::from(retract(pose, &-delta)),
            );
        }

        let mut jtj = Matrix5::zeros();
        let mut gradient = Vector5::zeros();
        for m in matches {
            let residual = essential.sampson_distance(m);
            let mut row = Vector5::zeros();
            for (k, (plus, minus)) in shifted.iter().enumerate() {
                row[k] = (plus.sampson_distance(m) - minus.sampson_distance(m)) / (2.0 * h);
            }
            if !residual.is_finite() || !row.iter().all(|n| n.is_finite()) {
                return None;
            }
            jtj += row * row.transpose();
            gradient += row * residual;
        }
        Some((jtj, gradient))
    }
}

impl Default for PoseRefinement {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            initial_lambda: 1e-3,
            gradient_tolerance: 1e-14,
            step_tolerance: 1e-12,
            difference_step: 1e-7,
        }
    }
}

fn cost(pose: CameraToCamera, matches: &[FeatureMatch<NormalizedKeyPoint>]) -> Option<f64> {
    let essential = EssentialMatrix::from(pose);
    let total: f64 = matches
        .iter()
        .map(|m| essential.sampson_distance(m).powi(2))
        .sum();
    if total.is_finite() {
        Some(total)
    } else {
        None
    }
}

/// Applies a step of the five pose parameters. The first three rotate the pose and the
/// last two move the translation along the tangent plane of the unit sphere.
fn retract(pose: CameraToCamera, delta: &Vector5<f64>) -> CameraToCamera {
    let translation = pose.translation();
    let (u, v) = tangent_basis(&translation);
    let moved = translation + u * delta[3] + v * delta[4];
    let rotation = Rotation3::new(Vector3::new(delta[0], delta[1], delta[2])) * pose.rotation();
    CameraToCamera::from_parts(moved.normalize(), rotation)
}

fn tangent_basis(direction: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
    let axis = if direction.x.abs() < 0.9 {
        Vector3::x()
    } else {
        Vector3::y()
    };
    let u = direction.cross(&axis).normalize();
    let v = direction.cross(&u);
    (u, v)
}
