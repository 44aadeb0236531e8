use crate::{CameraId, KeyPoint};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// A pair of observations of the same point, the first from camera 1 and the
/// second from camera 2.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct FeatureMatch<P>(pub P, pub P);

impl<P> FeatureMatch<P> {
    /// Retrieves the observation made by `camera`.
    pub fn get(&self, camera: CameraId) -> &P {
        match camera {
            CameraId::First => &self.0,
            CameraId::Second => &self.1,
        }
    }

    /// Converts both observations, failing if either conversion fails.
    pub fn try_map<Q, E>(
        self,
        mut f: impl FnMut(CameraId, P) -> Result<Q, E>,
    ) -> Result<FeatureMatch<Q>, E> {
        let FeatureMatch(a, b) = self;
        Ok(FeatureMatch(f(CameraId::First, a)?, f(CameraId::Second, b)?))
    }
}

/// Two pixel points believed to observe the marker at the same instant.
pub type PointSample = FeatureMatch<KeyPoint>;

impl PointSample {
    /// Checks that all four coordinates are finite.
    pub fn is_finite(&self) -> bool {
        self.0.is_finite() && self.1.is_finite()
    }
}
