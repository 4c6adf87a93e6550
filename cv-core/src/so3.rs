use derive_more::{AsMut, AsRef, Deref, DerefMut, From, Into};
use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};
#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Below this angle the exponential and logarithm switch to their Taylor expansions.
const SMALL_ANGLE: f64 = 1e-8;

/// A rotation vector (axis scaled by the angle in radians).
///
/// This is a member of the lie algebra so(3), and is the representation used
/// by every rotation parameter block handed to the optimizer.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, AsMut, AsRef, Deref, DerefMut, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Skew3(pub Vector3<f64>);

impl Skew3 {
    /// The rotation vector for no rotation.
    pub fn zero() -> Self {
        Self(Vector3::zeros())
    }

    /// Converts the rotation vector into the skew-symmetric cross product matrix `[w]ₓ`.
    #[rustfmt::skip]
    pub fn hat(self) -> Matrix3<f64> {
        let w = self.0;
        Matrix3::new(
            0.0, -w.z, w.y,
            w.z, 0.0, -w.x,
            -w.y, w.x, 0.0,
        )
    }

    /// Recovers the rotation vector from a skew-symmetric matrix.
    ///
    /// Only the antisymmetric part of `mat` is considered.
    pub fn vee(mat: Matrix3<f64>) -> Self {
        Self(Vector3::new(
            0.5 * (mat.m32 - mat.m23),
            0.5 * (mat.m13 - mat.m31),
            0.5 * (mat.m21 - mat.m12),
        ))
    }

    /// The rotation angle in radians.
    pub fn angle(self) -> f64 {
        self.0.norm()
    }

    /// Rodrigues' formula. Uses a second order expansion near zero.
    pub fn exp(self) -> Rotation3<f64> {
        let theta2 = self.0.norm_squared();
        let hat = self.hat();
        let hat2 = hat * hat;
        let (a, b) = if theta2 < SMALL_ANGLE * SMALL_ANGLE {
            (1.0 - theta2 / 6.0, 0.5 - theta2 / 24.0)
        } else {
            let theta = theta2.sqrt();
            (theta.sin() / theta, (1.0 - theta.cos()) / theta2)
        };
        Rotation3::from_matrix_unchecked(Matrix3::identity() + hat * a + hat2 * b)
    }

    /// The inverse of [`Skew3::exp`].
    ///
    /// Goes through the unit quaternion so that rotations close to π stay well conditioned.
    pub fn log(rotation: &Rotation3<f64>) -> Self {
        let quaternion = UnitQuaternion::from_rotation_matrix(rotation);
        let (w, imag) = (quaternion.scalar(), quaternion.imag());
        // Keep the scalar part positive so the returned angle lies in [0, π].
        let (w, imag) = if w < 0.0 { (-w, -imag) } else { (w, imag) };
        let sin_half = imag.norm();
        if sin_half < SMALL_ANGLE {
            return Self(imag * 2.0);
        }
        let half_angle = sin_half.atan2(w);
        Self(imag * (2.0 * half_angle / sin_half))
    }

    /// The rotation that maps `self` applied after `other`, as a rotation vector.
    #[must_use]
    pub fn compose(self, other: Self) -> Self {
        Self::log(&(self.exp() * other.exp()))
    }
}

impl From<Skew3> for Rotation3<f64> {
    fn from(skew: Skew3) -> Self {
        skew.exp()
    }
}

impl From<Rotation3<f64>> for Skew3 {
    fn from(rotation: Rotation3<f64>) -> Self {
        Self::log(&rotation)
    }
}

/// Wraps an angle in radians into `(-π, π]`.
pub fn wrap_angle(angle: f64) -> f64 {
    use core::f64::consts::PI;
    let wrapped = (angle + PI).rem_euclid(2.0 * PI) - PI;
    if wrapped == -PI {
        PI
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use core::f64::consts::PI;
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    #[test]
    fn exp_matches_nalgebra() {
        let mut rng = SmallRng::seed_from_u64(0);
        for _ in 0..100 {
            let w = Vector3::from_fn(|_, _| rng.gen_range(-2.0..2.0));
            assert_relative_eq!(
                Skew3(w).exp(),
                Rotation3::from_scaled_axis(w),
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn log_inverts_exp() {
        let mut rng = SmallRng::seed_from_u64(1);
        for _ in 0..100 {
            let axis = Vector3::from_fn(|_, _| rng.gen_range(-1.0..1.0)).normalize();
            let w = axis * rng.gen_range(0.0..3.1);
            assert_relative_eq!(Skew3::log(&Skew3(w).exp()).0, w, epsilon = 1e-9);
        }
    }

    #[test]
    fn tiny_rotations() {
        let w = Vector3::new(1e-10, -2e-10, 3e-10);
        assert_relative_eq!(Skew3::log(&Skew3(w).exp()).0, w, epsilon = 1e-15);
    }

    #[test]
    fn hat_vee() {
        let w = Skew3(Vector3::new(0.3, -0.2, 0.9));
        assert_eq!(Skew3::vee(w.hat()), w);
        let v = Vector3::new(1.0, 2.0, 3.0);
        assert_relative_eq!(w.hat() * v, w.0.cross(&v));
    }

    #[test]
    fn wraps_angles() {
        assert_relative_eq!(wrap_angle(3.0 * PI).abs(), PI, epsilon = 1e-12);
        assert_eq!(wrap_angle(-PI), PI);
        assert_relative_eq!(wrap_angle(0.5 - 4.0 * PI), 0.5, epsilon = 1e-12);
        assert_relative_eq!(wrap_angle(-0.25), -0.25, epsilon = 1e-12);
    }
}
