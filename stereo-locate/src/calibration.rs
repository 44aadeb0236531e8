use crate::SolverSettings;
use arrsac::Arrsac;
use core::fmt;
use eight_point::EightPoint;
use float_ord::FloatOrd;
use itertools::Itertools;
use log::*;
use nister_stewenius::NisterStewenius;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use stereo_core::{
    nalgebra::{Matrix3x4, Point3, Rotation3, Vector3},
    sample_consensus::{Consensus, Estimator, Model},
    CameraId, FeatureMatch, Pose, PointSample, WorldToCamera,
};
use stereo_geom::{PoseRecovery, PoseRefinement, RecoveredPose};
use stereo_pinhole::{EssentialMatrix, NormalizedKeyPoint, StereoIntrinsics, UndistortError};
use thiserror::Error;

type Match = FeatureMatch<NormalizedKeyPoint>;

/// The fewest samples from which the relative pose can be estimated.
pub const MIN_CALIBRATION_SAMPLES: usize = <NisterStewenius as Estimator<Match>>::MIN_SAMPLES;

const EIGHT_POINT_SAMPLES: usize = <EightPoint as Estimator<Match>>::MIN_SAMPLES;

/// Raised when calibration fails. The calibration state is never modified when this happens.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum CalibrationError {
    #[error("calibration needs at least {required} samples, got {got}")]
    InsufficientData { got: usize, required: usize },
    #[error("calibration is degenerate: {0}")]
    Degenerate(&'static str),
    #[error("unable to undistort a sample: {0}")]
    Undistort(#[from] UndistortError),
}

/// The algorithm that generated the essential matrix hypotheses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EssentialSolver {
    FivePoint,
    EightPoint,
}

impl EssentialSolver {
    /// The five-point solver handles small sample sets, the eight-point solver everything else.
    pub fn for_samples(samples: usize) -> Self {
        if samples >= EIGHT_POINT_SAMPLES {
            Self::EightPoint
        } else {
            Self::FivePoint
        }
    }
}

impl fmt::Display for EssentialSolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FivePoint => write!(f, "five-point"),
            Self::EightPoint => write!(f, "eight-point"),
        }
    }
}

/// Informational figures about a successful calibration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationDiagnostics {
    pub samples: usize,
    pub solver: EssentialSolver,
    /// Whether the essential matrix was refit over the whole consensus set.
    pub refit: bool,
    /// Whether the pose was refined by minimizing the Sampson distances.
    pub refined: bool,
    pub essential_inliers: usize,
    pub essential_inlier_ratio: f64,
    /// Samples whose triangulated point lies in front of both cameras, counted over all samples.
    pub pose_inliers: usize,
    pub pose_inlier_ratio: f64,
    /// RMS Sampson distance of the consensus samples supporting the final pose, in pixels
    /// of the canonical camera.
    pub sampson_rms: f64,
    /// The linear estimate that the pose was decomposed from.
    pub essential: EssentialMatrix,
    pub rotation: Rotation3<f64>,
    /// The direction of the translation of the second camera, with unit length.
    pub translation: Vector3<f64>,
}

impl CalibrationDiagnostics {
    fn log(&self) {
        info!(
            "essential matrix from {} samples by the {} solver: {} inliers (ratio {}){}",
            self.samples,
            self.solver,
            self.essential_inliers,
            self.essential_inlier_ratio,
            if self.refit { ", refit over inliers" } else { "" }
        );
        info!("essential matrix: {}", self.essential.0);
        info!(
            "pose supported by {} samples (ratio {}), rms sampson distance {} px{}",
            self.pose_inliers,
            self.pose_inlier_ratio,
            self.sampson_rms,
            if self.refined { " after refinement" } else { "" }
        );
        info!("rotation: {}", self.rotation.matrix());
        info!("translation: {}", self.translation);
    }
}

/// The outcome of a successful calibration.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationReport {
    /// The pose of the second camera in the frame of the first camera. The translation has
    /// unit length.
    pub extrinsics: WorldToCamera,
    pub diagnostics: CalibrationDiagnostics,
    /// The samples that support the pose, triangulated in the frame of the first camera.
    pub points: Vec<Point3<f64>>,
}

/// The extrinsics of both cameras and their projection matrices on the normalized image plane.
///
/// Until the first successful calibration both cameras are at the origin and the state is
/// not calibrated. It only changes as a whole, from a [`CalibrationReport`].
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationState {
    extrinsics: [WorldToCamera; 2],
    projections: [Matrix3x4<f64>; 2],
    calibrated: bool,
    diagnostics: Option<CalibrationDiagnostics>,
}

impl CalibrationState {
    pub fn from_report(report: &CalibrationReport) -> Self {
        let extrinsics = [WorldToCamera::identity(), report.extrinsics];
        Self {
            projections: extrinsics.map(|pose| pose.projection_matrix()),
            extrinsics,
            calibrated: true,
            diagnostics: Some(report.diagnostics),
        }
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    pub fn extrinsics(&self, camera: CameraId) -> WorldToCamera {
        self.extrinsics[camera.index()]
    }

    /// The matrix `[R | t]` that projects world points onto the normalized image plane of a camera.
    pub fn projection(&self, camera: CameraId) -> &Matrix3x4<f64> {
        &self.projections[camera.index()]
    }

    /// The diagnostics of the calibration that produced this state.
    pub fn diagnostics(&self) -> Option<&CalibrationDiagnostics> {
        self.diagnostics.as_ref()
    }
}

impl Default for CalibrationState {
    fn default() -> Self {
        let extrinsics = [WorldToCamera::identity(); 2];
        Self {
            projections: extrinsics.map(|pose| pose.projection_matrix()),
            extrinsics,
            calibrated: false,
            diagnostics: None,
        }
    }
}

/// Estimates the pose of the second camera relative to the first from corresponding points.
///
/// The points of both cameras are reprojected into the canonical camera, an essential matrix
/// is estimated with ARRSAC and decomposed into the pose that puts the most samples in front
/// of both cameras. The pose is then refined over the consensus samples that support it.
/// The scale of the translation can not be observed, so it has unit length.
#[derive(Debug, Clone)]
pub struct CalibrationSolver {
    intrinsics: StereoIntrinsics,
    settings: SolverSettings,
    five_point: NisterStewenius,
    eight_point: EightPoint,
    recovery: PoseRecovery,
    refinement: PoseRefinement,
}

impl CalibrationSolver {
    pub fn new(intrinsics: StereoIntrinsics, settings: SolverSettings) -> Self {
        Self {
            intrinsics,
            settings,
            five_point: NisterStewenius::new(),
            eight_point: EightPoint::new(),
            recovery: PoseRecovery::new().distance_threshold(settings.pose_distance_threshold),
            refinement: PoseRefinement::new(),
        }
    }

    pub fn intrinsics(&self) -> &StereoIntrinsics {
        &self.intrinsics
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    /// The consensus threshold on the normalized image plane of the canonical camera.
    pub fn normalized_threshold(&self) -> f64 {
        self.settings.essential_threshold / self.intrinsics.canonical().mean_focal()
    }

    /// Computes the calibration from the samples without modifying any state.
    pub fn solve(&self, samples: &[PointSample]) -> Result<CalibrationReport, CalibrationError> {
        if samples.len() < MIN_CALIBRATION_SAMPLES {
            return Err(CalibrationError::InsufficientData {
                got: samples.len(),
                required: MIN_CALIBRATION_SAMPLES,
            });
        }

        let matches = samples
            .iter()
            .map(|&sample| self.intrinsics.canonical_match(sample))
            .collect::<Result<Vec<_>, _>>()?;

        let solver = EssentialSolver::for_samples(matches.len());
        info!("estimate essential on {} samples with the {} solver", matches.len(), solver);
        let (essential, inliers) = match solver {
            EssentialSolver::EightPoint => self.consensus(&self.eight_point, &matches),
            EssentialSolver::FivePoint => self.consensus(&self.five_point, &matches),
        }
        .ok_or(CalibrationError::Degenerate(
            "no essential matrix agrees with the samples",
        ))?;
        let inlier_matches: Vec<Match> = inliers.iter().map(|&ix| matches[ix]).collect();

        let (essential, refit) = if inlier_matches.len() >= EIGHT_POINT_SAMPLES {
            match self.eight_point.from_matches(inlier_matches.iter().copied()) {
                Some(refit) => (refit, true),
                None => {
                    debug!("refit over {} inliers failed, keeping the consensus model", inlier_matches.len());
                    (essential, false)
                }
            }
        } else {
            (self.best_five_point(&inlier_matches).unwrap_or(essential), false)
        };

        info!("perform chirality test on {} samples", matches.len());
        let recovered = self.recovery.recover(&essential, &matches).ok_or(
            CalibrationError::Degenerate("no decomposition places a sample in front of both cameras"),
        )?;
        let (recovered, refined) = self.refine(recovered, &matches, &inliers);

        let supporting = supporting(&recovered, &matches, &inliers);
        let final_essential = EssentialMatrix::from(recovered.pose);
        let sampson_rms = if supporting.is_empty() {
            0.0
        } else {
            let squared: f64 = supporting.iter().map(|m| final_essential.residual(m).powi(2)).sum();
            (squared / supporting.len() as f64).sqrt() * self.intrinsics.canonical().mean_focal()
        };

        let diagnostics = CalibrationDiagnostics {
            samples: samples.len(),
            solver,
            refit,
            refined,
            essential_inliers: inliers.len(),
            essential_inlier_ratio: inliers.len() as f64 / samples.len() as f64,
            pose_inliers: recovered.inliers.len(),
            pose_inlier_ratio: recovered.inliers.len() as f64 / samples.len() as f64,
            sampson_rms,
            essential,
            rotation: recovered.pose.rotation(),
            translation: recovered.pose.translation(),
        };
        diagnostics.log();

        Ok(CalibrationReport {
            extrinsics: recovered.pose.extrinsics(),
            diagnostics,
            points: recovered.points,
        })
    }

    /// Solves every five-sample subset of the consensus set again and keeps the hypothesis
    /// that places the most of the set in front of both cameras. Ties go to the lowest
    /// truncated quadratic (MSAC) score.
    ///
    /// ARRSAC ranks hypotheses by their inlier count alone, and with few samples several of
    /// the up to ten five-point solutions agree with all of them.
    fn best_five_point(&self, matches: &[Match]) -> Option<EssentialMatrix> {
        let threshold = self.normalized_threshold().powi(2);
        matches
            .iter()
            .copied()
            .combinations(MIN_CALIBRATION_SAMPLES)
            .flat_map(|subset| self.five_point.estimate(subset.into_iter()))
            .filter_map(|essential| {
                let front = self.recovery.recover(&essential, matches)?.inliers.len();
                let score: f64 = matches
                    .iter()
                    .map(|m| essential.residual(m).powi(2).min(threshold))
                    .sum();
                trace!("five-point hypothesis with {} in front, score {:e}", front, score);
                Some((front, FloatOrd(-score), essential))
            })
            .max_by_key(|&(front, score, _)| (front, score))
            .map(|(_, _, essential)| essential)
    }

    /// Refines the pose over the consensus samples it places in front of both cameras and
    /// scores it again over all samples. The refined pose is kept unless it loses support.
    fn refine(
        &self,
        recovered: RecoveredPose,
        matches: &[Match],
        consensus: &[usize],
    ) -> (RecoveredPose, bool) {
        let supporting = supporting(&recovered, matches, consensus);
        let refined = match self.refinement.refine(recovered.pose, &supporting) {
            Some(refined) => refined,
            None => {
                debug!("pose refinement over {} samples failed", supporting.len());
                return (recovered, false);
            }
        };
        let rescored = self.recovery.score(refined.pose, matches);
        if rescored.inliers.len() < recovered.inliers.len() {
            debug!(
                "refined pose places {} samples in front instead of {}, keeping the linear pose",
                rescored.inliers.len(),
                recovered.inliers.len()
            );
            return (recovered, false);
        }
        (rescored, true)
    }

    fn consensus<E>(
        &self,
        estimator: &E,
        matches: &[Match],
    ) -> Option<(EssentialMatrix, Vec<usize>)>
    where
        E: Estimator<Match, Model = EssentialMatrix>,
    {
        let mut arrsac = Arrsac::new(
            self.normalized_threshold(),
            Xoshiro256PlusPlus::seed_from_u64(self.settings.consensus_seed),
        );
        arrsac.model_inliers(estimator, matches.iter().copied())
    }
}

/// The consensus members that the pose places in front of both cameras.
fn supporting(recovered: &RecoveredPose, matches: &[Match], consensus: &[usize]) -> Vec<Match> {
    recovered
        .inliers
        .iter()
        .filter(|&&ix| consensus.contains(&ix))
        .map(|&ix| matches[ix])
        .collect()
}
