use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use nalgebra::{Point3, Vector4};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// This trait is implemented for homogeneous projective 3d coordinate.
pub trait Projective: From<Vector4<f64>> + Clone + Copy {
    /// Retrieve the homogeneous vector.
    ///
    /// No constraints are put on this vector. All components can move freely and it is not normalized.
    fn homogeneous(self) -> Vector4<f64>;

    /// Retrieve the euclidean 3d point by normalizing the homogeneous coordinate.
    ///
    /// This fails only when `w` is exactly zero. See [`Projective::point_checked`]
    /// to also reject points that are numerically at infinity.
    fn point(self) -> Option<Point3<f64>> {
        Point3::from_homogeneous(self.homogeneous())
    }

    /// Retrieve the euclidean 3d point, failing when `|w|` is at or below
    /// `epsilon` relative to the norm of the homogeneous vector, or when the
    /// result is not finite.
    ///
    /// ```
    /// use stereo_core::{nalgebra::Vector4, Projective, WorldPoint};
    /// assert!(WorldPoint(Vector4::new(1.0, 2.0, 3.0, 1e-20)).point_checked(1e-12).is_none());
    /// let p = WorldPoint(Vector4::new(2.0, 4.0, 6.0, 2.0)).point_checked(1e-12).unwrap();
    /// assert_eq!(p.coords.as_slice(), &[1.0, 2.0, 3.0]);
    /// ```
    fn point_checked(self, epsilon: f64) -> Option<Point3<f64>> {
        let homogeneous = self.homogeneous();
        let norm = homogeneous.norm();
        if !norm.is_finite() || homogeneous.w.abs() <= epsilon * norm {
            return None;
        }
        Point3::from_homogeneous(homogeneous).filter(|p| p.coords.iter().all(|n| n.is_finite()))
    }

    /// Convert the euclidean 3d point into homogeneous coordinates.
    fn from_point(point: Point3<f64>) -> Self {
        point.to_homogeneous().into()
    }
}

/// A 3d point which is relative to the camera's optical center and orientation where
/// the positive X axis is right, positive Y axis is down, and positive Z axis is forwards
/// from the optical center of the camera.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraPoint(pub Vector4<f64>);

impl Projective for CameraPoint {
    fn homogeneous(self) -> Vector4<f64> {
        self.into()
    }
}

/// A point in world coordinates, which are the coordinates of the first camera.
///
/// The unit of distance is the length of the baseline recovered by calibration.
/// If the whole scene is scaled by any factor the observations on both cameras stay
/// exactly the same, so a real-world scale can only be obtained from a known
/// reference distance measured by the user of the point.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct WorldPoint(pub Vector4<f64>);

impl Projective for WorldPoint {
    fn homogeneous(self) -> Vector4<f64> {
        self.into()
    }
}
