#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// A robust loss `ρ(s)` of the squared norm `s` of a whitened residual.
///
/// The threshold `a` marks where the loss stops behaving quadratically.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde-serialize", serde(rename_all = "snake_case"))]
pub enum LossFunction {
    /// `ρ(s) = s`
    Trivial,
    /// `ρ(s) = s` for `s ≤ a²`, `2a√s − a²` beyond.
    Huber { threshold: f64 },
    /// `ρ(s) = 2a²(√(1 + s/a²) − 1)`
    SoftL1 { threshold: f64 },
    /// `ρ(s) = a²·ln(1 + s/a²)`
    Cauchy { threshold: f64 },
    /// `ρ(s) = a·atan(s/a)`
    Arctan { threshold: f64 },
}

impl Default for LossFunction {
    fn default() -> Self {
        Self::Trivial
    }
}

impl LossFunction {
    /// Evaluates `ρ(s)`.
    pub fn rho(self, s: f64) -> f64 {
        match self {
            Self::Trivial => s,
            Self::Huber { threshold: a } => {
                if s <= a * a {
                    s
                } else {
                    2.0 * a * s.sqrt() - a * a
                }
            }
            Self::SoftL1 { threshold: a } => {
                let b = a * a;
                2.0 * b * ((1.0 + s / b).sqrt() - 1.0)
            }
            Self::Cauchy { threshold: a } => {
                let b = a * a;
                b * (s / b).ln_1p()
            }
            Self::Arctan { threshold: a } => a * (s / a).atan(),
        }
    }

    /// The factor that turns a residual `e` into one whose squared norm is `ρ(|e|²)`.
    pub fn scaling(self, s: f64) -> f64 {
        match self {
            Self::Trivial => 1.0,
            _ if s <= f64::EPSILON => 1.0,
            _ => (self.rho(s) / s).sqrt(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const LOSSES: [LossFunction; 5] = [
        LossFunction::Trivial,
        LossFunction::Huber { threshold: 1.0 },
        LossFunction::SoftL1 { threshold: 1.0 },
        LossFunction::Cauchy { threshold: 1.0 },
        LossFunction::Arctan { threshold: 1.0 },
    ];

    #[test]
    fn quadratic_near_zero() {
        for loss in LOSSES {
            assert_relative_eq!(loss.rho(1e-6), 1e-6, max_relative = 1e-5);
            assert_relative_eq!(loss.scaling(1e-6), 1.0, max_relative = 1e-5);
            assert_eq!(loss.rho(0.0), 0.0);
        }
    }

    #[test]
    fn robust_losses_grow_slower() {
        for loss in &LOSSES[1..] {
            assert!(loss.rho(100.0) < 100.0, "{:?}", loss);
            assert!(loss.scaling(100.0) < 1.0, "{:?}", loss);
            assert!(loss.rho(100.0) > loss.rho(50.0), "{:?}", loss);
        }
    }

    #[test]
    fn huber_is_linear_beyond_threshold() {
        let huber = LossFunction::Huber { threshold: 2.0 };
        assert_relative_eq!(huber.rho(3.0), 3.0);
        assert_relative_eq!(huber.rho(25.0), 2.0 * 2.0 * 5.0 - 4.0);
        let scaled = huber.scaling(25.0) * 5.0;
        assert_relative_eq!(scaled * scaled, huber.rho(25.0), epsilon = 1e-12);
    }
}
