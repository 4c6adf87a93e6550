use cv_core::nalgebra::Point2;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// A depth measurement attached to an observation.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Depth {
    pub value: f64,
    /// Distance along the bearing when `true`, otherwise depth along the optical axis.
    pub is_radial: bool,
    pub std_deviation: f64,
}

/// One 2d detection of a landmark in a shot.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Observation {
    /// Position in normalized image coordinates.
    pub point: Point2<f64>,
    /// Feature scale in normalized units.
    pub scale: f64,
    pub color: [u8; 3],
    /// Index of the feature in the shot's feature list.
    pub feature_id: usize,
    pub segmentation: Option<i32>,
    pub instance: Option<i32>,
    pub depth_prior: Option<Depth>,
}

impl Observation {
    pub fn new(point: Point2<f64>, scale: f64, color: [u8; 3], feature_id: usize) -> Self {
        Self {
            point,
            scale,
            color,
            feature_id,
            segmentation: None,
            instance: None,
            depth_prior: None,
        }
    }

    #[must_use]
    pub fn with_segmentation(self, segmentation: i32) -> Self {
        Self {
            segmentation: Some(segmentation),
            ..self
        }
    }

    #[must_use]
    pub fn with_instance(self, instance: i32) -> Self {
        Self {
            instance: Some(instance),
            ..self
        }
    }

    #[must_use]
    pub fn with_depth_prior(self, depth: Depth) -> Self {
        Self {
            depth_prior: Some(depth),
            ..self
        }
    }
}
