use crate::{CameraPoint, Projective, WorldPoint};
use derive_more::{AsMut, AsRef, From, Into};
use nalgebra::{IsometryMatrix3, Matrix3x4, Matrix4, Point3, Rotation3, Vector3};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// This trait is implemented by all the different poses in this library:
///
/// * [`CameraToWorld`] - Transforms [`CameraPoint`] into [`WorldPoint`]
/// * [`WorldToCamera`] - Transforms [`WorldPoint`] into [`CameraPoint`]
/// * [`CameraToCamera`] - Transforms [`CameraPoint`] from the first camera into [`CameraPoint`] for the second camera
pub trait Pose: From<IsometryMatrix3<f64>> + Clone + Copy {
    type InputPoint: Projective;
    type OutputPoint: Projective;
    type Inverse: Pose;

    /// Retrieve the isometry.
    fn isometry(self) -> IsometryMatrix3<f64>;

    /// Creates a pose with no change in position or orientation.
    fn identity() -> Self {
        IsometryMatrix3::identity().into()
    }

    /// Takes the inverse of the pose.
    fn inverse(self) -> Self::Inverse {
        self.isometry().inverse().into()
    }

    /// Create the pose from rotation and translation.
    fn from_parts(translation: Vector3<f64>, rotation: Rotation3<f64>) -> Self {
        IsometryMatrix3::from_parts(translation.into(), rotation).into()
    }

    /// Retrieve the rotation.
    fn rotation(self) -> Rotation3<f64> {
        self.isometry().rotation
    }

    /// Retrieve the translation, applied after the rotation.
    fn translation(self) -> Vector3<f64> {
        self.isometry().translation.vector
    }

    /// The angle in radians of the rotation that takes this orientation to the other.
    ///
    /// The cosine is clamped, so nearly identical rotations give `0.0` rather than `NaN`.
    fn rotation_angle_to(self, other: Self) -> f64 {
        let relative = self.rotation().rotation_to(&other.rotation());
        ((relative.matrix().trace() - 1.0) / 2.0).clamp(-1.0, 1.0).acos()
    }

    /// Retrieve the homogeneous matrix.
    fn homogeneous(self) -> Matrix4<f64> {
        self.isometry().to_homogeneous()
    }

    /// Retrieve the `[R | t]` 3x4 projection matrix of the pose on the normalized
    /// image plane (no intrinsics applied).
    fn projection_matrix(self) -> Matrix3x4<f64> {
        let isometry = self.isometry();
        let rot = isometry.rotation.matrix();
        let trans = isometry.translation.vector;
        Matrix3x4::<f64>::from_columns(&[
            rot.column(0),
            rot.column(1),
            rot.column(2),
            trans.column(0),
        ])
    }

    /// Transform the given point to an output point.
    fn transform(self, input: Self::InputPoint) -> Self::OutputPoint {
        (self.homogeneous() * input.homogeneous()).into()
    }
}

/// This contains a world pose, which is a pose of the world relative to the camera.
/// This maps [`WorldPoint`] into [`CameraPoint`], changing an absolute position into
/// a vector relative to the camera.
///
/// These are the extrinsics of a camera of the rig.
#[derive(Debug, Clone, Copy, PartialEq, AsMut, AsRef, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct WorldToCamera(pub IsometryMatrix3<f64>);

impl WorldToCamera {
    /// The position of the optical center of the camera in world coordinates.
    pub fn optical_center(self) -> Point3<f64> {
        self.inverse().0.translation.vector.into()
    }
}

impl Pose for WorldToCamera {
    type InputPoint = WorldPoint;
    type OutputPoint = CameraPoint;
    type Inverse = CameraToWorld;

    #[inline(always)]
    fn isometry(self) -> IsometryMatrix3<f64> {
        self.into()
    }
}

/// This contains a camera pose, which is a pose of the camera relative to the world.
/// This transforms camera points (with depth as `z`) into world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, AsMut, AsRef, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraToWorld(pub IsometryMatrix3<f64>);

impl Pose for CameraToWorld {
    type InputPoint = CameraPoint;
    type OutputPoint = WorldPoint;
    type Inverse = WorldToCamera;

    #[inline(always)]
    fn isometry(self) -> IsometryMatrix3<f64> {
        self.into()
    }
}

/// This contains a relative pose, which is a pose that transforms the [`CameraPoint`]
/// of the first camera into the [`CameraPoint`] of the second camera.
///
/// Since the first camera is the world frame, this is also the extrinsics of the
/// second camera. See [`CameraToCamera::extrinsics`].
#[derive(Debug, Clone, Copy, PartialEq, AsMut, AsRef, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraToCamera(pub IsometryMatrix3<f64>);

impl CameraToCamera {
    /// The extrinsics of the second camera when the first camera is the world.
    pub fn extrinsics(self) -> WorldToCamera {
        WorldToCamera(self.0)
    }
}

impl Pose for CameraToCamera {
    type InputPoint = CameraPoint;
    type OutputPoint = CameraPoint;
    type Inverse = CameraToCamera;

    #[inline(always)]
    fn isometry(self) -> IsometryMatrix3<f64> {
        self.into()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector4;

    #[test]
    fn projection_matrix_matches_transform() {
        let pose = WorldToCamera::from_parts(
            Vector3::new(-0.8, 0.1, 0.2),
            Rotation3::from_euler_angles(0.1, 0.3, -0.2),
        );
        let point = WorldPoint::from_point(Point3::new(0.4, -0.3, 2.5));
        let projected = pose.projection_matrix() * point.0;
        let transformed = pose.transform(point).point().unwrap();
        assert_relative_eq!(projected, transformed.coords, epsilon = 1e-12);
    }

    #[test]
    fn rotation_angle_is_finite_for_rounded_rotations() {
        let rotation = Rotation3::from_euler_angles(0.4, -0.2, 1.1);
        let pose = CameraToCamera::from_parts(Vector3::x(), rotation);
        // Renormalizing a product of rotations leaves the trace a few ulps above three.
        let rounded = CameraToCamera::from_parts(
            Vector3::x(),
            Rotation3::from_matrix_unchecked(rotation.matrix() * (1.0 + 1e-15)),
        );
        assert_eq!(pose.rotation_angle_to(pose), 0.0);
        assert!(pose.rotation_angle_to(rounded).is_finite());
        let turned = CameraToCamera::from_parts(
            Vector3::x(),
            Rotation3::from_euler_angles(0.0, 0.3, 0.0) * rotation,
        );
        assert_relative_eq!(pose.rotation_angle_to(turned), 0.3, epsilon = 1e-12);
    }

    #[test]
    fn optical_center_maps_to_origin() {
        let pose = WorldToCamera::from_parts(
            Vector3::new(0.5, -0.2, 0.1),
            Rotation3::from_euler_angles(0.0, 0.4, 0.1),
        );
        let center = WorldPoint::from_point(pose.optical_center());
        let in_camera = pose.transform(center);
        assert_relative_eq!(in_camera.0, Vector4::new(0.0, 0.0, 0.0, 1.0), epsilon = 1e-12);
    }
}
