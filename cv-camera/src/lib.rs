//! Camera models used by the reconstruction and bundle adjustment crates.
//!
//! A [`Camera`] pairs an image size with a [`Projection`]. Every model works in
//! normalized image coordinates: the image center is the origin and the larger
//! image dimension spans one unit. Use [`Camera::pixel_to_normalized`] and
//! [`Camera::normalized_to_pixel`] to move between those and pixel positions.
//!
//! The two operations consumed by the rest of the workspace are
//! [`Camera::project`] (camera-frame point to image point) and [`Camera::bearing`]
//! (image point to unit ray). Optimizers reach the intrinsics through the flat
//! parameter vector exposed by [`Camera::parameters`] and [`Camera::set_parameters`].

mod projection;
mod root;

pub use projection::*;

use cv_core::nalgebra::{Point2, UnitVector3, Vector2, Vector3};
use thiserror::Error;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CameraError {
    #[error("{projection_type} projection takes {expected} parameters, got {actual}")]
    WrongParameterCount {
        projection_type: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// An intrinsic camera: identity, image size and projection model.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Camera {
    pub id: String,
    pub width: u32,
    pub height: u32,
    pub projection: Projection,
}

impl Camera {
    pub fn new(id: impl Into<String>, projection: Projection) -> Self {
        Self {
            id: id.into(),
            width: 0,
            height: 0,
            projection,
        }
    }

    /// A perspective camera with radial distortion.
    pub fn perspective(id: impl Into<String>, focal: f64, k1: f64, k2: f64) -> Self {
        Self::new(id, Projection::Perspective { focal, k1, k2 })
    }

    /// A Brown-Conrady camera without any distortion.
    pub fn brown(id: impl Into<String>, focal_x: f64, focal_y: f64, principal_point: Point2<f64>) -> Self {
        Self::new(
            id,
            Projection::Brown {
                focal_x,
                focal_y,
                c_x: principal_point.x,
                c_y: principal_point.y,
                k1: 0.0,
                k2: 0.0,
                k3: 0.0,
                p1: 0.0,
                p2: 0.0,
            },
        )
    }

    pub fn fisheye(id: impl Into<String>, focal: f64, k1: f64, k2: f64) -> Self {
        Self::new(id, Projection::Fisheye { focal, k1, k2 })
    }

    pub fn spherical(id: impl Into<String>) -> Self {
        Self::new(id, Projection::Spherical)
    }

    /// Sets the image size in pixels.
    #[must_use]
    pub fn with_size(self, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..self
        }
    }

    pub fn projection_type(&self) -> ProjectionType {
        self.projection.projection_type()
    }

    pub fn parameter_names(&self) -> &'static [&'static str] {
        self.projection_type().parameter_names()
    }

    pub fn parameters(&self) -> Vec<f64> {
        self.projection.parameters()
    }

    /// Replaces the intrinsic parameters, keeping the projection type.
    ///
    /// Fails without modifying the camera when `parameters` has the wrong length.
    pub fn set_parameters(&mut self, parameters: &[f64]) -> Result<(), CameraError> {
        self.projection = Projection::from_parameters(self.projection_type(), parameters)?;
        Ok(())
    }

    /// Projects a camera-frame point into normalized image coordinates.
    pub fn project(&self, point: &Vector3<f64>) -> Point2<f64> {
        self.projection.project(point)
    }

    pub fn project_many(&self, points: &[Vector3<f64>]) -> Vec<Point2<f64>> {
        points.iter().map(|p| self.project(p)).collect()
    }

    /// Computes the unit ray through a normalized image point.
    pub fn bearing(&self, point: &Point2<f64>) -> UnitVector3<f64> {
        self.projection.bearing(point)
    }

    pub fn bearing_many(&self, points: &[Point2<f64>]) -> Vec<UnitVector3<f64>> {
        points.iter().map(|p| self.bearing(p)).collect()
    }

    /// The number of pixels spanned by one normalized unit.
    ///
    /// Cameras without a known size report `1.0`.
    pub fn pixel_scale(&self) -> f64 {
        f64::from(self.width.max(self.height).max(1))
    }

    fn half_size(&self) -> Vector2<f64> {
        Vector2::new(f64::from(self.width), f64::from(self.height)) * 0.5
    }

    /// Converts a pixel position (origin at the top left pixel center) into normalized coordinates.
    pub fn pixel_to_normalized(&self, pixel: &Point2<f64>) -> Point2<f64> {
        let centered = pixel.coords.add_scalar(0.5) - self.half_size();
        Point2::from(centered / self.pixel_scale())
    }

    pub fn normalized_to_pixel(&self, normalized: &Point2<f64>) -> Point2<f64> {
        let centered = normalized.coords * self.pixel_scale() + self.half_size();
        Point2::from(centered.add_scalar(-0.5))
    }
}
