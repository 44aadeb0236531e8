use log::*;
use marker_detect::MarkerDetector;
use serde::{Deserialize, Serialize};
use std::path::Path;
use stereo_pinhole::{
    CameraIntrinsics, Distortion, IntrinsicsError, PinholeIntrinsics, StereoIntrinsics,
};
use stereo_core::nalgebra::{Point2, Vector2};
use thiserror::Error;

/// Raised when the settings file can not be used.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("unable to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("unable to parse settings file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// The settings of the calibration solver.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverSettings {
    /// The sample consensus inlier threshold, in pixels of the canonical camera
    #[serde(default = "default_essential_threshold")]
    pub essential_threshold: f64,
    /// Triangulated points further than this from either camera do not support a pose,
    /// in units of the baseline
    #[serde(default = "default_pose_distance_threshold")]
    pub pose_distance_threshold: f64,
    /// The seed of the random number generator used by sample consensus
    #[serde(default = "default_consensus_seed")]
    pub consensus_seed: u64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            essential_threshold: default_essential_threshold(),
            pose_distance_threshold: default_pose_distance_threshold(),
            consensus_seed: default_consensus_seed(),
        }
    }
}

fn default_essential_threshold() -> f64 {
    2.0
}

fn default_pose_distance_threshold() -> f64 {
    5.0
}

fn default_consensus_seed() -> u64 {
    0
}

/// The settings of a [`StereoLocator`](crate::StereoLocator).
///
/// Every field can be left out of a settings file, in which case the default is used.
/// The default intrinsics are those of the two cameras the rig was built with.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocatorSettings {
    /// The intrinsics of the first camera, which defines the world frame
    #[serde(default = "default_first")]
    pub first: CameraIntrinsics,
    /// The intrinsics of the second camera
    #[serde(default = "default_second")]
    pub second: CameraIntrinsics,
    /// The ideal pinhole camera into which both cameras are reprojected
    #[serde(default = "default_canonical")]
    pub canonical: PinholeIntrinsics,
    #[serde(default)]
    pub solver: SolverSettings,
    #[serde(default)]
    pub detector: MarkerDetector,
    /// The number of detection reports each camera can queue before new ones are dropped
    #[serde(default = "default_report_capacity")]
    pub report_capacity: usize,
}

impl Default for LocatorSettings {
    fn default() -> Self {
        Self {
            first: default_first(),
            second: default_second(),
            canonical: default_canonical(),
            solver: SolverSettings::default(),
            detector: MarkerDetector::default(),
            report_capacity: default_report_capacity(),
        }
    }
}

#[rustfmt::skip]
fn default_first() -> CameraIntrinsics {
    CameraIntrinsics::new(
        PinholeIntrinsics::identity()
            .focals(Vector2::new(204.64863681, 204.47041377))
            .principal_point(Point2::new(308.78000754, 258.21809417)),
        Distortion::new(0.24406997, -0.22412072, -0.00079476, -0.00035923, 0.05262498),
    )
}

#[rustfmt::skip]
fn default_second() -> CameraIntrinsics {
    CameraIntrinsics::new(
        PinholeIntrinsics::identity()
            .focals(Vector2::new(204.42765186, 204.43521494))
            .principal_point(Point2::new(310.99781296, 257.91267286)),
        Distortion::new(0.2305133, -0.20287915, -0.00140612, 0.0033575, 0.04448097),
    )
}

fn default_canonical() -> PinholeIntrinsics {
    PinholeIntrinsics::identity()
        .focal(204.5)
        .principal_point(Point2::new(320.0, 240.0))
}

fn default_report_capacity() -> usize {
    4
}

impl LocatorSettings {
    /// Reads the settings from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }

    /// Reads the settings from a JSON file, or falls back to the defaults if the file is
    /// missing or invalid.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(settings) => {
                info!("loaded existing settings");
                settings
            }
            Err(e) => {
                info!("used default settings ({})", e);
                Self::default()
            }
        }
    }

    /// Validates the intrinsics and combines them.
    pub fn intrinsics(&self) -> Result<StereoIntrinsics, IntrinsicsError> {
        StereoIntrinsics::new(self.first, self.second, self.canonical)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let settings: LocatorSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, LocatorSettings::default());
        assert_eq!(settings.detector.brightness_threshold, 229);
        assert_eq!(settings.solver.essential_threshold, 2.0);
        assert_eq!(settings.solver.pose_distance_threshold, 5.0);
        assert_eq!(settings.report_capacity, 4);
        assert!(settings.intrinsics().is_ok());
    }

    #[test]
    fn partial_settings_keep_other_defaults() {
        let json = r#"{
            "canonical": { "focals": [300.0, 300.0], "principal_point": [320.0, 240.0] },
            "second": {
                "pinhole": { "focals": [210.0, 211.0], "principal_point": [300.0, 250.0] },
                "criteria": { "max_iterations": 50 }
            },
            "solver": { "essential_threshold": 1.5 }
        }"#;
        let settings: LocatorSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.canonical.focals, Vector2::new(300.0, 300.0));
        assert_eq!(settings.second.pinhole.focals, Vector2::new(210.0, 211.0));
        assert!(settings.second.distortion.is_none());
        assert_eq!(settings.second.criteria.max_iterations, 50);
        assert_eq!(settings.second.criteria.tolerance, 1e-12);
        assert_eq!(settings.first, default_first());
        assert_eq!(settings.solver.essential_threshold, 1.5);
        assert_eq!(settings.solver.pose_distance_threshold, 5.0);
    }

    #[test]
    fn invalid_intrinsics_are_reported() {
        let mut settings = LocatorSettings::default();
        settings.first.pinhole = settings.first.pinhole.focal(-1.0);
        assert!(matches!(
            settings.intrinsics(),
            Err(IntrinsicsError::NonPositiveFocal { .. })
        ));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        assert!(matches!(
            LocatorSettings::load("this-file-does-not-exist.json"),
            Err(SettingsError::Io(_))
        ));
        assert_eq!(
            LocatorSettings::load_or_default("this-file-does-not-exist.json"),
            LocatorSettings::default()
        );
    }
}
