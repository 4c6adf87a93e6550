//! # Bundle adjustment
//!
//! Jointly refines the poses, intrinsics and landmark positions of a [`Map`](cv_sfm::Map)
//! by minimizing
//!
//! ```text
//!   Σ ρ(|r_i(x)|²)
//! ```
//!
//! where every `r_i` is a whitened [`Residual`]: the reprojection of a landmark
//! into a shot, or a prior from GPS, compass, gravity, depth, relative motion,
//! a reference pose or nominal parameter values. `ρ` is a robust
//! [`LossFunction`] for reprojections and the identity for priors.
//!
//! The map is turned into a [`Problem`] of parameter blocks, one per shot pose,
//! rig instance, rig camera, camera, landmark and GPS bias. A block shared by
//! many residuals, such as a camera used by several shots, is registered once.
//! Blocks outside the adjusted selection are held constant. Rotations evolve on
//! the local chart `exp(δ)·R₀` and Jacobians are computed block by block with
//! central differences. Levenberg-Marquardt then minimizes the problem,
//! eliminating the landmarks from every step with a Schur complement, and the
//! solution is written back to the map.
//!
//! Entry points:
//!
//! * [`bundle`] adjusts the whole map.
//! * [`bundle_local`] adjusts the neighborhood of a shot, holding its boundary fixed.
//! * [`bundle_shot_poses`] adjusts the poses of some shots against fixed landmarks.
//! * [`bundle_selection`] adjusts an arbitrary [`BundleSelection`].
//!
//! A solver that stops before converging is not an error: the best solution is
//! still written back and the [`BundleReport`] carries a [`ConvergenceWarning`].

mod bundle;
mod loss;
mod neighborhood;
mod parameters;
mod problem;
mod residuals;
mod schur;
mod settings;

pub use bundle::*;
pub use loss::*;
pub use neighborhood::*;
pub use parameters::*;
pub use problem::*;
pub use residuals::*;
pub use settings::*;

use cv_camera::CameraError;
use cv_sfm::MapError;
use thiserror::Error;

/// Failures of bundle adjustment. All of them happen before the map is modified.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BundleError {
    #[error("malformed bundle adjustment problem: {0}")]
    Precheck(String),
    #[error("map error: {0}")]
    Map(#[from] MapError),
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
}
