use crate::Skew3;
use derive_more::{AsMut, AsRef, From, Into};
use nalgebra::{IsometryMatrix3, Matrix4, Point3, Rotation3, Vector3, Vector6};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// This trait is implemented by all the different poses in this library:
///
/// * [`CameraToWorld`] - Transforms camera-frame points into world points
/// * [`WorldToCamera`] - Transforms world points into the camera frame
/// * [`CameraToCamera`] - Transforms points from one camera (or rig) frame into another camera frame
pub trait Pose: From<IsometryMatrix3<f64>> + Clone + Copy {
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

    /// Applies a scale factor to the pose (scales the translation component)
    #[must_use]
    fn scale(self, scale: f64) -> Self {
        let mut isometry = self.isometry();
        isometry.translation.vector *= scale;
        isometry.into()
    }

    /// Create the pose from rotation and translation.
    fn from_parts(translation: Vector3<f64>, rotation: Rotation3<f64>) -> Self {
        IsometryMatrix3::from_parts(translation.into(), rotation).into()
    }

    /// The rotation part of the pose.
    fn rotation(self) -> Rotation3<f64> {
        self.isometry().rotation
    }

    /// The translation part of the pose.
    fn translation(self) -> Vector3<f64> {
        self.isometry().translation.vector
    }

    /// The rotation as an angle-axis vector.
    fn rotation_vector(self) -> Vector3<f64> {
        Skew3::log(&self.rotation()).0
    }

    /// Retrieve the homogeneous matrix.
    fn homogeneous(self) -> Matrix4<f64> {
        self.isometry().to_homogeneous()
    }

    /// Retrieve the se(3) representation of the pose (translation before rotation).
    fn se3(self) -> Vector6<f64> {
        let t = self.translation();
        let r = self.rotation_vector();
        Vector6::new(t.x, t.y, t.z, r.x, r.y, r.z)
    }

    /// Set the se(3) representation of the pose.
    fn from_se3(se3: Vector6<f64>) -> Self {
        let translation = se3.xyz();
        let rotation = Skew3(Vector3::new(se3[3], se3[4], se3[5])).exp();
        Self::from_parts(translation, rotation)
    }

    /// Like [`Pose::from_se3`], but reads the six values from a parameter slice.
    ///
    /// The slice must contain at least six values.
    fn from_se3_slice(se3: &[f64]) -> Self {
        Self::from_se3(Vector6::from_column_slice(&se3[..6]))
    }

    /// Transforms a point from the input frame into the output frame.
    fn transform_point(self, point: &Point3<f64>) -> Point3<f64> {
        self.isometry() * point
    }

    /// Transforms a direction from the input frame into the output frame.
    fn transform_vector(self, vector: &Vector3<f64>) -> Vector3<f64> {
        self.rotation() * vector
    }
}

/// This contains a world pose, which is a pose of the world relative to the camera.
/// This maps world points into the camera frame, changing an absolute position into
/// a vector relative to the camera.
///
/// Rig instances use this type too: their "camera" frame is the rig reference frame.
#[derive(Debug, Clone, Copy, PartialEq, AsMut, AsRef, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct WorldToCamera(pub IsometryMatrix3<f64>);

impl Pose for WorldToCamera {
    type Inverse = CameraToWorld;

    #[inline(always)]
    fn isometry(self) -> IsometryMatrix3<f64> {
        self.into()
    }
}

impl WorldToCamera {
    /// The optical center of the camera in world coordinates (`-Rᵀt`).
    pub fn origin(self) -> Point3<f64> {
        self.inverse().0.translation.vector.into()
    }

    /// Moves the camera so its optical center lies at `origin`, keeping the orientation.
    #[must_use]
    pub fn with_origin(self, origin: Point3<f64>) -> Self {
        let rotation = self.rotation();
        Self::from_parts(-(rotation * origin.coords), rotation)
    }

    /// Creates the pose from an orientation and an optical center in world coordinates.
    pub fn from_origin(rotation: Rotation3<f64>, origin: Point3<f64>) -> Self {
        Self::from_parts(-(rotation * origin.coords), rotation)
    }

    /// The direction the camera looks at (camera `+z`) in world coordinates.
    pub fn optical_axis(self) -> Vector3<f64> {
        self.rotation().inverse() * Vector3::z()
    }

    /// Applies a relative pose after this one.
    ///
    /// For a rig, `self` is the rig instance pose and `relative` is the rig camera
    /// pose; the result is the world pose of the camera.
    #[must_use]
    pub fn then(self, relative: CameraToCamera) -> Self {
        Self(relative.0 * self.0)
    }

    /// The relative pose taking points from this camera frame into `other`'s.
    pub fn relative_to(self, other: Self) -> CameraToCamera {
        CameraToCamera(other.0 * self.0.inverse())
    }
}

/// This contains a camera pose, which is a pose of the camera relative to the world.
/// This transforms camera points (with depth as `z`) into world coordinates.
/// This also tells you where the camera is located and oriented in the world.
#[derive(Debug, Clone, Copy, PartialEq, AsMut, AsRef, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraToWorld(pub IsometryMatrix3<f64>);

impl Pose for CameraToWorld {
    type Inverse = WorldToCamera;

    #[inline(always)]
    fn isometry(self) -> IsometryMatrix3<f64> {
        self.into()
    }
}

/// This contains a relative pose that transforms the points of one frame
/// into the corresponding points of a camera frame. Rig cameras store their
/// mounting as a `CameraToCamera` from the rig reference frame.
///
/// Camera space for a given camera is defined as thus:
///
/// * Origin is the optical center
/// * Positive z axis is forwards
/// * Positive y axis is down
/// * Positive x axis is right
///
/// Note that this is a right-handed coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, AsMut, AsRef, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CameraToCamera(pub IsometryMatrix3<f64>);

impl Pose for CameraToCamera {
    type Inverse = CameraToCamera;

    #[inline(always)]
    fn isometry(self) -> IsometryMatrix3<f64> {
        self.into()
    }
}

impl CameraToCamera {
    /// Checks whether this relative pose is the identity within `epsilon`.
    pub fn is_identity(self, epsilon: f64) -> bool {
        self.translation().norm() <= epsilon && self.rotation_vector().norm() <= epsilon
    }

    /// The rotation angle and translation distance between `self` and `other`.
    pub fn distance(self, other: Self) -> (f64, f64) {
        let difference = self.0 * other.0.inverse();
        (
            Skew3::log(&difference.rotation).angle(),
            difference.translation.vector.norm(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_pose() -> WorldToCamera {
        WorldToCamera::from_se3(Vector6::new(0.5, -1.0, 2.0, 0.1, -0.7, 0.3))
    }

    #[test]
    fn se3_round_trip() {
        let pose = sample_pose();
        assert_relative_eq!(WorldToCamera::from_se3(pose.se3()).0, pose.0, epsilon = 1e-12);
    }

    #[test]
    fn origin_is_fixed_point_of_inverse() {
        let pose = sample_pose();
        let origin = pose.origin();
        assert_relative_eq!(pose.transform_point(&origin), Point3::origin(), epsilon = 1e-12);
        let moved = pose.with_origin(Point3::new(4.0, 5.0, 6.0));
        assert_relative_eq!(moved.origin(), Point3::new(4.0, 5.0, 6.0), epsilon = 1e-12);
        assert_relative_eq!(moved.rotation(), pose.rotation());
    }

    #[test]
    fn optical_axis_points_at_scene() {
        let pose = sample_pose();
        let ahead = pose.origin() + pose.optical_axis() * 3.0;
        assert_relative_eq!(pose.transform_point(&ahead), Point3::new(0.0, 0.0, 3.0), epsilon = 1e-12);
    }

    #[test]
    fn relative_then_recovers_target() {
        let a = sample_pose();
        let b = WorldToCamera::from_se3(Vector6::new(-0.3, 0.2, 1.0, -0.4, 0.1, 0.9));
        let relative = a.relative_to(b);
        assert_relative_eq!(a.then(relative).0, b.0, epsilon = 1e-12);
        assert!(CameraToCamera::identity().is_identity(1e-15));
        assert!(!relative.is_identity(1e-3));
    }
}
