//! This crate aligns reconstructions for [Rust CV](https://github.com/rust-cv/).
//!
//! ## Alignment
//!
//! Given points of a source reconstruction and the corresponding points of a
//! reference (another reconstruction, or GPS readings), we want the similarity
//! `x ↦ s·R·x + t` bringing the source onto the reference.
//!
//! - `x` a point of the source reconstruction (a camera center or a landmark)
//! - `y` the corresponding reference point
//! - `w` the weight of the correspondence
//!
//! ```text
//!   minimize  Σ w·|s·R·x + t − y|²
//! ```
//!
//! This has a closed form through the SVD of the weighted cross-covariance of
//! the centred point sets. It is undefined for fewer than three correspondences
//! or when either set lies on a line, which is reported as
//! [`AlignmentError::InsufficientData`] instead of returning an arbitrary
//! rotation. The closed form can then be refined with Levenberg-Marquardt,
//! which also takes the orientation of matched shots into account.
//!
//! Computing an alignment never modifies a map. Apply the resulting
//! [`Similarity`](cv_core::Similarity) with
//! [`Map::apply_similarity`](cv_sfm::Map::apply_similarity).

mod alignment;
mod closed_form;
mod correspondences;
mod refine;
mod settings;

pub use alignment::*;
pub use closed_form::*;
pub use correspondences::*;
pub use refine::*;
pub use settings::*;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AlignmentError {
    #[error("insufficient data for alignment: {0}")]
    InsufficientData(String),
    #[error("got {sources} source points, {targets} target points and {weights} weights")]
    MismatchedLengths {
        sources: usize,
        targets: usize,
        weights: usize,
    },
    #[error("correspondence weight {0} is not a finite non-negative number")]
    InvalidWeight(f64),
}
