use crate::root::invert_radial;
use crate::CameraError;
use core::f64::consts::PI;
use cv_core::nalgebra::{Point2, Unit, UnitVector3, Vector2, Vector3};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Fixed-point iterations used to undo Brown tangential distortion.
const BROWN_UNDISTORT_ITERATIONS: usize = 50;

/// The projection model families, without their parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde-serialize", serde(rename_all = "snake_case"))]
pub enum ProjectionType {
    Perspective,
    Brown,
    Fisheye,
    Spherical,
}

impl ProjectionType {
    pub fn name(self) -> &'static str {
        match self {
            Self::Perspective => "perspective",
            Self::Brown => "brown",
            Self::Fisheye => "fisheye",
            Self::Spherical => "spherical",
        }
    }

    /// Names of the parameters in the order of [`Projection::parameters`].
    pub fn parameter_names(self) -> &'static [&'static str] {
        match self {
            Self::Perspective | Self::Fisheye => &["focal", "k1", "k2"],
            Self::Brown => &[
                "focal_x", "focal_y", "c_x", "c_y", "k1", "k2", "k3", "p1", "p2",
            ],
            Self::Spherical => &[],
        }
    }

    pub fn num_parameters(self) -> usize {
        self.parameter_names().len()
    }
}

/// A camera projection model with its intrinsic parameters.
///
/// All models map camera-frame points to normalized image coordinates, where
/// the larger image dimension spans one unit and the image center is the origin.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[cfg_attr(
    feature = "serde-serialize",
    serde(tag = "projection_type", rename_all = "snake_case")
)]
pub enum Projection {
    /// Pinhole with a single focal and two radial distortion terms.
    Perspective { focal: f64, k1: f64, k2: f64 },
    /// Pinhole with separate focals, principal point, three radial and two tangential terms.
    Brown {
        focal_x: f64,
        focal_y: f64,
        c_x: f64,
        c_y: f64,
        k1: f64,
        k2: f64,
        k3: f64,
        p1: f64,
        p2: f64,
    },
    /// Equidistant fisheye with two radial terms on the incidence angle.
    Fisheye { focal: f64, k1: f64, k2: f64 },
    /// Equirectangular panorama.
    Spherical,
}

impl Projection {
    pub fn projection_type(&self) -> ProjectionType {
        match self {
            Self::Perspective { .. } => ProjectionType::Perspective,
            Self::Brown { .. } => ProjectionType::Brown,
            Self::Fisheye { .. } => ProjectionType::Fisheye,
            Self::Spherical => ProjectionType::Spherical,
        }
    }

    pub fn parameters(&self) -> Vec<f64> {
        match *self {
            Self::Perspective { focal, k1, k2 } | Self::Fisheye { focal, k1, k2 } => {
                vec![focal, k1, k2]
            }
            Self::Brown {
                focal_x,
                focal_y,
                c_x,
                c_y,
                k1,
                k2,
                k3,
                p1,
                p2,
            } => vec![focal_x, focal_y, c_x, c_y, k1, k2, k3, p1, p2],
            Self::Spherical => vec![],
        }
    }

    /// Builds a projection of the given type from a parameter vector.
    pub fn from_parameters(
        projection_type: ProjectionType,
        parameters: &[f64],
    ) -> Result<Self, CameraError> {
        let expected = projection_type.num_parameters();
        if parameters.len() != expected {
            return Err(CameraError::WrongParameterCount {
                projection_type: projection_type.name(),
                expected,
                actual: parameters.len(),
            });
        }
        let p = parameters;
        Ok(match projection_type {
            ProjectionType::Perspective => Self::Perspective {
                focal: p[0],
                k1: p[1],
                k2: p[2],
            },
            ProjectionType::Fisheye => Self::Fisheye {
                focal: p[0],
                k1: p[1],
                k2: p[2],
            },
            ProjectionType::Brown => Self::Brown {
                focal_x: p[0],
                focal_y: p[1],
                c_x: p[2],
                c_y: p[3],
                k1: p[4],
                k2: p[5],
                k3: p[6],
                p1: p[7],
                p2: p[8],
            },
            ProjectionType::Spherical => Self::Spherical,
        })
    }

    /// Projects a point in the camera frame into normalized image coordinates.
    pub fn project(&self, point: &Vector3<f64>) -> Point2<f64> {
        match *self {
            Self::Perspective { focal, k1, k2 } => {
                let xn = Vector2::new(point.x / point.z, point.y / point.z);
                let r2 = xn.norm_squared();
                let distortion = 1.0 + r2 * (k1 + k2 * r2);
                Point2::from(xn * (focal * distortion))
            }
            Self::Brown {
                focal_x,
                focal_y,
                c_x,
                c_y,
                k1,
                k2,
                k3,
                p1,
                p2,
            } => {
                let (x, y) = (point.x / point.z, point.y / point.z);
                let r2 = x * x + y * y;
                let radial = 1.0 + r2 * (k1 + r2 * (k2 + r2 * k3));
                let xd = x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
                let yd = y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
                Point2::new(focal_x * xd + c_x, focal_y * yd + c_y)
            }
            Self::Fisheye { focal, k1, k2 } => {
                let l = point.xy().norm();
                if l == 0.0 {
                    return Point2::origin();
                }
                let theta = l.atan2(point.z);
                let theta2 = theta * theta;
                let distortion = 1.0 + theta2 * (k1 + k2 * theta2);
                Point2::from(point.xy() * (focal * distortion * theta / l))
            }
            Self::Spherical => {
                let lon = point.x.atan2(point.z);
                let lat = (-point.y).atan2(point.x.hypot(point.z));
                Point2::new(lon / (2.0 * PI), -lat / (2.0 * PI))
            }
        }
    }

    /// Computes the unit ray leaving the optical center through the normalized image point.
    pub fn bearing(&self, point: &Point2<f64>) -> UnitVector3<f64> {
        match *self {
            Self::Perspective { focal, k1, k2 } => {
                let distorted = point.coords / focal;
                let undistorted = scale_radially(distorted, |r| invert_radial(r, k1, k2));
                Unit::new_normalize(undistorted.push(1.0))
            }
            Self::Brown {
                focal_x,
                focal_y,
                c_x,
                c_y,
                k1,
                k2,
                k3,
                p1,
                p2,
            } => {
                let xd = (point.x - c_x) / focal_x;
                let yd = (point.y - c_y) / focal_y;
                let (mut x, mut y) = (xd, yd);
                for _ in 0..BROWN_UNDISTORT_ITERATIONS {
                    let r2 = x * x + y * y;
                    let radial = 1.0 + r2 * (k1 + r2 * (k2 + r2 * k3));
                    let dx = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
                    let dy = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
                    let (nx, ny) = ((xd - dx) / radial, (yd - dy) / radial);
                    let converged = (nx - x).abs() < 1e-15 && (ny - y).abs() < 1e-15;
                    x = nx;
                    y = ny;
                    if converged {
                        break;
                    }
                }
                Unit::new_normalize(Vector3::new(x, y, 1.0))
            }
            Self::Fisheye { focal, k1, k2 } => {
                let distorted = point.coords / focal;
                let l = distorted.norm();
                if l == 0.0 {
                    return Vector3::z_axis();
                }
                let theta = invert_radial(l, k1, k2);
                let direction = distorted / l;
                Unit::new_normalize((direction * theta.sin()).push(theta.cos()))
            }
            Self::Spherical => {
                let lon = point.x * 2.0 * PI;
                let lat = -point.y * 2.0 * PI;
                Unit::new_normalize(Vector3::new(
                    lat.cos() * lon.sin(),
                    -lat.sin(),
                    lat.cos() * lon.cos(),
                ))
            }
        }
    }
}

/// Rescales `point` so its norm becomes `radius(norm)`.
fn scale_radially(point: Vector2<f64>, radius: impl Fn(f64) -> f64) -> Vector2<f64> {
    let norm = point.norm();
    if norm == 0.0 {
        point
    } else {
        point * (radius(norm) / norm)
    }
}
