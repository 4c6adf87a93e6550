use crate::{CameraToCamera, Pose, Skew3, WorldToCamera};
use nalgebra::{Matrix4, Point3, Rotation3, Vector3};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// A 3d similarity transform `x ↦ s·R·x + t`.
///
/// Alignment produces one of these and the reconstruction applies it to every
/// pose and point. Per-camera GPS biases are also stored as similarities.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Similarity {
    pub rotation: Rotation3<f64>,
    pub translation: Vector3<f64>,
    pub scale: f64,
}

impl Default for Similarity {
    fn default() -> Self {
        Self::identity()
    }
}

impl Similarity {
    pub fn new(rotation: Rotation3<f64>, translation: Vector3<f64>, scale: f64) -> Self {
        Self {
            rotation,
            translation,
            scale,
        }
    }

    pub fn identity() -> Self {
        Self::new(Rotation3::identity(), Vector3::zeros(), 1.0)
    }

    /// Builds the similarity from `[rx, ry, rz, tx, ty, tz, s]`.
    ///
    /// The slice must contain at least seven values.
    pub fn from_parameters(parameters: &[f64]) -> Self {
        Self::new(
            Skew3(Vector3::new(parameters[0], parameters[1], parameters[2])).exp(),
            Vector3::new(parameters[3], parameters[4], parameters[5]),
            parameters[6],
        )
    }

    /// The parameters as `[rx, ry, rz, tx, ty, tz, s]`.
    pub fn parameters(&self) -> [f64; 7] {
        let r = Skew3::log(&self.rotation).0;
        let t = self.translation;
        [r.x, r.y, r.z, t.x, t.y, t.z, self.scale]
    }

    /// A similarity is usable when its scale is strictly positive and every entry is finite.
    pub fn is_valid(&self) -> bool {
        self.scale.is_finite()
            && self.scale > 0.0
            && self.translation.iter().all(|v| v.is_finite())
            && self.rotation.matrix().iter().all(|v| v.is_finite())
    }

    pub fn transform_point(&self, point: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation * point.coords * self.scale + self.translation)
    }

    /// Transforms a world→camera pose so that the camera keeps observing the
    /// transformed scene identically.
    pub fn transform_pose(&self, pose: WorldToCamera) -> WorldToCamera {
        let rotation = pose.rotation() * self.rotation.inverse();
        let translation = pose.translation() * self.scale - rotation * self.translation;
        WorldToCamera::from_parts(translation, rotation)
    }

    /// Relative poses are only affected by the scale.
    pub fn transform_relative(&self, pose: CameraToCamera) -> CameraToCamera {
        pose.scale(self.scale)
    }

    #[must_use]
    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        let scale = 1.0 / self.scale;
        Self::new(rotation, -(rotation * self.translation) * scale, scale)
    }

    /// The similarity that applies `other` first, then `self`.
    #[must_use]
    pub fn compose(&self, other: &Self) -> Self {
        Self::new(
            self.rotation * other.rotation,
            self.rotation * other.translation * self.scale + self.translation,
            self.scale * other.scale,
        )
    }

    pub fn to_homogeneous(&self) -> Matrix4<f64> {
        let mut matrix = Matrix4::identity();
        matrix
            .fixed_slice_mut::<3, 3>(0, 0)
            .copy_from(&(self.rotation.matrix() * self.scale));
        matrix.fixed_slice_mut::<3, 1>(0, 3).copy_from(&self.translation);
        matrix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector6;

    fn sample() -> Similarity {
        Similarity::new(
            Rotation3::from_scaled_axis(Vector3::new(0.2, -0.5, 0.8)),
            Vector3::new(1.0, -2.0, 0.5),
            2.5,
        )
    }

    #[test]
    fn inverse_undoes_transform() {
        let s = sample();
        let p = Point3::new(0.3, 4.0, -1.0);
        assert_relative_eq!(s.inverse().transform_point(&s.transform_point(&p)), p, epsilon = 1e-12);
        let identity = s.compose(&s.inverse());
        assert_relative_eq!(identity.scale, 1.0, epsilon = 1e-12);
        assert_relative_eq!(identity.translation, Vector3::zeros(), epsilon = 1e-12);
    }

    #[test]
    fn compose_applies_right_first() {
        let a = sample();
        let b = Similarity::new(Rotation3::from_scaled_axis(Vector3::new(-0.1, 0.0, 0.4)), Vector3::new(0.0, 3.0, 1.0), 0.5);
        let p = Point3::new(1.0, 2.0, 3.0);
        assert_relative_eq!(a.compose(&b).transform_point(&p), a.transform_point(&b.transform_point(&p)), epsilon = 1e-12);
        let h = a.to_homogeneous() * p.to_homogeneous();
        assert_relative_eq!(Point3::from_homogeneous(h).unwrap(), a.transform_point(&p), epsilon = 1e-12);
    }

    #[test]
    fn pose_sees_transformed_points_the_same() {
        let s = sample();
        let pose = WorldToCamera::from_se3(Vector6::new(0.5, 0.1, -2.0, 0.3, 0.2, -0.1));
        let p = Point3::new(0.4, -0.2, 5.0);
        let before = pose.transform_point(&p);
        let after = s.transform_pose(pose).transform_point(&s.transform_point(&p));
        assert_relative_eq!(after, before * s.scale, epsilon = 1e-12);
        assert_relative_eq!(s.transform_pose(pose).origin(), s.transform_point(&pose.origin()), epsilon = 1e-12);
    }

    #[test]
    fn parameters_round_trip() {
        let s = sample();
        let back = Similarity::from_parameters(&s.parameters());
        assert_relative_eq!(back.rotation, s.rotation, epsilon = 1e-12);
        assert_relative_eq!(back.translation, s.translation);
        assert_eq!(back.scale, s.scale);
        assert!(s.is_valid());
        assert!(!Similarity::new(s.rotation, s.translation, 0.0).is_valid());
    }
}
