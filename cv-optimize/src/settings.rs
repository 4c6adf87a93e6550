use crate::LossFunction;
use cv_sfm::ErrorType;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// The settings for bundle adjustment.
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BundleSettings {
    /// The robust loss applied to reprojection residuals.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_loss_function"))]
    pub loss_function: LossFunction,
    /// The units in which reprojection residuals are measured.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_error_type"))]
    pub error_type: ErrorType,
    /// Standard deviation of a reprojection, in normalized image units.
    ///
    /// Only used for observations without a positive scale, or when
    /// `use_observation_scale` is disabled.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_reprojection_error_sd")
    )]
    pub reprojection_error_sd: f64,
    /// Use each observation's feature scale as its standard deviation.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_use_observation_scale")
    )]
    pub use_observation_scale: bool,
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_true"))]
    pub use_gps: bool,
    /// GPS accuracy in meters assumed for shots that do not report one.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_gps_accuracy"))]
    pub default_gps_accuracy: f64,
    /// Let the per-camera GPS biases vary instead of applying them as they are.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_false"))]
    pub compensate_gps_bias: bool,
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_true"))]
    pub use_compass: bool,
    /// Compass accuracy in degrees assumed for shots that do not report one.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_compass_accuracy")
    )]
    pub default_compass_accuracy: f64,
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_true"))]
    pub use_gravity: bool,
    /// Standard deviation of the gravity direction, in radians.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_gravity_sd"))]
    pub gravity_sd: f64,
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_true"))]
    pub use_depth_priors: bool,
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_true"))]
    pub optimize_cameras: bool,
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_true"))]
    pub optimize_rig_cameras: bool,
    /// Relative standard deviation of focal lengths around their prior.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_focal_prior_sd"))]
    pub focal_prior_sd: f64,
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_principal_point_sd")
    )]
    pub principal_point_sd: f64,
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_radial_distortion_sd")
    )]
    pub radial_distortion_sd: f64,
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_tangential_distortion_sd")
    )]
    pub tangential_distortion_sd: f64,
    /// Standard deviation of rig camera translations around their prior, in meters.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_rig_translation_sd")
    )]
    pub rig_translation_sd: f64,
    /// Standard deviation of rig camera rotations around their prior, in radians.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_rig_rotation_sd"))]
    pub rig_rotation_sd: f64,
    /// Store marginal covariances of the adjusted shots and landmarks.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_false"))]
    pub compute_covariances: bool,
    /// The maximum number of Levenberg-Marquardt iterations, rejected steps included.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_patience"))]
    pub patience: usize,
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_tolerance"))]
    pub function_tolerance: f64,
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_tolerance"))]
    pub parameter_tolerance: f64,
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_tolerance"))]
    pub gradient_tolerance: f64,
    /// The number of neighbor rings a local bundle grows from its central shot.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_local_radius"))]
    pub local_bundle_radius: usize,
    /// Landmarks two shots must share to be neighbors in a local bundle.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_local_min_common_points")
    )]
    pub local_bundle_min_common_points: usize,
    /// The maximum number of shots adjusted by a local bundle.
    #[cfg_attr(
        feature = "serde-serialize",
        serde(default = "default_local_max_shots")
    )]
    pub local_bundle_max_shots: usize,
}

impl Default for BundleSettings {
    fn default() -> Self {
        Self {
            loss_function: default_loss_function(),
            error_type: default_error_type(),
            reprojection_error_sd: default_reprojection_error_sd(),
            use_observation_scale: default_use_observation_scale(),
            use_gps: default_true(),
            default_gps_accuracy: default_gps_accuracy(),
            compensate_gps_bias: default_false(),
            use_compass: default_true(),
            default_compass_accuracy: default_compass_accuracy(),
            use_gravity: default_true(),
            gravity_sd: default_gravity_sd(),
            use_depth_priors: default_true(),
            optimize_cameras: default_true(),
            optimize_rig_cameras: default_true(),
            focal_prior_sd: default_focal_prior_sd(),
            principal_point_sd: default_principal_point_sd(),
            radial_distortion_sd: default_radial_distortion_sd(),
            tangential_distortion_sd: default_tangential_distortion_sd(),
            rig_translation_sd: default_rig_translation_sd(),
            rig_rotation_sd: default_rig_rotation_sd(),
            compute_covariances: default_false(),
            patience: default_patience(),
            function_tolerance: default_tolerance(),
            parameter_tolerance: default_tolerance(),
            gradient_tolerance: default_tolerance(),
            local_bundle_radius: default_local_radius(),
            local_bundle_min_common_points: default_local_min_common_points(),
            local_bundle_max_shots: default_local_max_shots(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn default_loss_function() -> LossFunction {
    LossFunction::SoftL1 { threshold: 1.0 }
}

fn default_error_type() -> ErrorType {
    ErrorType::Normalized
}

fn default_reprojection_error_sd() -> f64 {
    0.004
}

fn default_use_observation_scale() -> bool {
    true
}

fn default_gps_accuracy() -> f64 {
    15.0
}

fn default_compass_accuracy() -> f64 {
    180.0
}

fn default_gravity_sd() -> f64 {
    0.05
}

fn default_focal_prior_sd() -> f64 {
    0.01
}

fn default_principal_point_sd() -> f64 {
    0.01
}

fn default_radial_distortion_sd() -> f64 {
    0.01
}

fn default_tangential_distortion_sd() -> f64 {
    0.01
}

fn default_rig_translation_sd() -> f64 {
    0.1
}

fn default_rig_rotation_sd() -> f64 {
    0.1
}

fn default_patience() -> usize {
    100
}

fn default_tolerance() -> f64 {
    1e-10
}

fn default_local_radius() -> usize {
    3
}

fn default_local_min_common_points() -> usize {
    20
}

fn default_local_max_shots() -> usize {
    30
}
