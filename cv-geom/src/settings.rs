#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// The settings for aligning a reconstruction.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct AlignmentSettings {
    /// Estimate a uniform scale. When disabled the alignment is rigid.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_estimate_scale"))]
    pub estimate_scale: bool,
    /// Weight of each camera center correspondence.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_shot_weight"))]
    pub shot_weight: f64,
    /// Weight of each landmark correspondence. Zero ignores landmarks.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_landmark_weight"))]
    pub landmark_weight: f64,
    /// Weight of the orientation agreement of matched shots during refinement.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_orientation_weight")
    )]
    pub orientation_weight: f64,
    /// Refine the closed-form solution with Levenberg-Marquardt.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_refine"))]
    pub refine: bool,
    /// The maximum number of evaluations (times the number of parameters) of the refinement.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_patience"))]
    pub patience: usize,
    /// GPS accuracy in meters assumed for shots that do not report one.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_gps_accuracy")
    )]
    pub default_gps_accuracy: f64,
}

impl Default for AlignmentSettings {
    fn default() -> Self {
        Self {
            estimate_scale: default_estimate_scale(),
            shot_weight: default_shot_weight(),
            landmark_weight: default_landmark_weight(),
            orientation_weight: default_orientation_weight(),
            refine: default_refine(),
            patience: default_patience(),
            default_gps_accuracy: default_gps_accuracy(),
        }
    }
}

fn default_estimate_scale() -> bool {
    true
}

fn default_shot_weight() -> f64 {
    1.0
}

fn default_landmark_weight() -> f64 {
    1.0
}

fn default_orientation_weight() -> f64 {
    1.0
}

fn default_refine() -> bool {
    false
}

fn default_patience() -> usize {
    100
}

fn default_gps_accuracy() -> f64 {
    15.0
}
