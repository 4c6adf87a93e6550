use crate::ShotKey;
use cv_core::nalgebra::{Matrix3, Point3, Vector2};
use std::collections::{BTreeMap, BTreeSet};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Units in which reprojection errors are measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde-serialize", serde(rename_all = "snake_case"))]
pub enum ErrorType {
    /// Image-plane difference in pixels.
    Pixel,
    /// Image-plane difference in normalized image coordinates.
    Normalized,
    /// Angle in radians between the observed bearing and the direction to the point.
    Angular,
}

/// A diagnostic reprojection error of one observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReprojectionError {
    Pixel(Vector2<f64>),
    Normalized(Vector2<f64>),
    Angular(f64),
}

impl ReprojectionError {
    /// The error as a 2d vector; angular errors occupy the first component.
    pub fn as_vector(&self) -> Vector2<f64> {
        match *self {
            Self::Pixel(v) | Self::Normalized(v) => v,
            Self::Angular(a) => Vector2::new(a, 0.0),
        }
    }

    pub fn norm(&self) -> f64 {
        self.as_vector().norm()
    }
}

/// One triangulated 3d point.
#[derive(Debug, Clone)]
pub struct Landmark {
    pub(crate) id: String,
    pub(crate) observations: BTreeSet<ShotKey>,
    pub position: Point3<f64>,
    pub color: [u8; 3],
    /// Reprojection errors by shot id, as of the last
    /// [`Map::compute_reprojection_errors`](crate::Map::compute_reprojection_errors).
    pub reprojection_errors: BTreeMap<String, ReprojectionError>,
    pub covariance: Option<Matrix3<f64>>,
}

impl Landmark {
    pub(crate) fn new(id: String, position: Point3<f64>) -> Self {
        Self {
            id,
            observations: BTreeSet::new(),
            position,
            color: [0; 3],
            reprojection_errors: BTreeMap::new(),
            covariance: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn num_observations(&self) -> usize {
        self.observations.len()
    }
}
