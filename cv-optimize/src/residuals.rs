use cv_camera::{Projection, ProjectionType};
use cv_core::nalgebra::{Point2, Point3, Vector3};
use cv_core::{wrap_angle, CameraToCamera, Pose, Similarity, WorldToCamera};
use cv_sfm::{Depth, ErrorType};

/// Where a residual reads the world-to-camera pose of a shot from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoseSource {
    /// One world pose block: a shot pose or a rig instance pose.
    Single,
    /// A rig instance block followed by a rig camera block.
    Rig,
}

impl PoseSource {
    pub fn num_blocks(self) -> usize {
        match self {
            Self::Single => 1,
            Self::Rig => 2,
        }
    }

    fn block_sizes(self) -> impl Iterator<Item = usize> {
        std::iter::repeat(6).take(self.num_blocks())
    }
}

/// The residual families of bundle adjustment.
///
/// Every residual is whitened by its standard deviations, so that its squared
/// norm is a Mahalanobis distance. The parameter blocks a residual reads are
/// listed in its documentation, in order; a pose takes the blocks of its
/// [`PoseSource`].
#[derive(Debug, Clone, PartialEq)]
pub enum Residual {
    /// Blocks: pose, camera, landmark.
    ///
    /// `std` is expressed in the units of `error_type`: normalized image
    /// units, pixels, or radians.
    Reprojection {
        pose: PoseSource,
        projection_type: ProjectionType,
        error_type: ErrorType,
        observed: Point2<f64>,
        pixel_scale: f64,
        std: f64,
    },
    /// Blocks: pose, then the camera bias when `biased`.
    ///
    /// Compares the optical center, mapped through the bias, with `position`.
    AbsolutePosition {
        pose: PoseSource,
        position: Point3<f64>,
        std: f64,
        biased: bool,
    },
    /// Blocks: pose.
    ///
    /// The heading is the angle of the optical axis clockwise from `+y`
    /// (north) in radians, compared with wrap-around.
    Heading {
        pose: PoseSource,
        heading: f64,
        std: f64,
    },
    /// Blocks: pose.
    ///
    /// Compares the world `−z` direction seen from the camera with the
    /// measured gravity direction in the camera frame.
    UpVector {
        pose: PoseSource,
        down: Vector3<f64>,
        std: f64,
    },
    /// Blocks: pose of the first shot, pose of the second shot.
    ///
    /// `motion` takes points from the first camera frame into the second.
    RelativeMotion {
        first: PoseSource,
        second: PoseSource,
        motion: CameraToCamera,
        std_rotation: f64,
        std_translation: f64,
    },
    /// Blocks: pose.
    AbsolutePose {
        pose: PoseSource,
        prior: WorldToCamera,
        std_rotation: f64,
        std_translation: f64,
    },
    /// Blocks: any one block of `mean.len()` values.
    ParameterPrior { mean: Vec<f64>, std: Vec<f64> },
    /// Blocks: pose, landmark.
    DepthPrior { pose: PoseSource, depth: Depth },
}

/// Reads consecutive parameter blocks of a residual.
struct Blocks<'a> {
    blocks: &'a [&'a [f64]],
    next: usize,
}

impl<'a> Blocks<'a> {
    fn new(blocks: &'a [&'a [f64]]) -> Self {
        Self { blocks, next: 0 }
    }

    fn take(&mut self) -> &'a [f64] {
        let block = self.blocks[self.next];
        self.next += 1;
        block
    }

    fn pose(&mut self, source: PoseSource) -> WorldToCamera {
        let pose = WorldToCamera::from_se3_slice(self.take());
        match source {
            PoseSource::Single => pose,
            PoseSource::Rig => pose.then(CameraToCamera::from_se3_slice(self.take())),
        }
    }

    fn point(&mut self) -> Point3<f64> {
        Point3::from_slice(self.take())
    }
}

/// The translation and rotation of a pose difference, divided by their deviations.
fn pose_difference(
    difference: CameraToCamera,
    std_rotation: f64,
    std_translation: f64,
) -> Vec<f64> {
    let t = difference.translation() / std_translation;
    let r = difference.rotation_vector() / std_rotation;
    vec![t.x, t.y, t.z, r.x, r.y, r.z]
}

impl Residual {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Reprojection { .. } => "reprojection",
            Self::AbsolutePosition { .. } => "absolute position",
            Self::Heading { .. } => "heading",
            Self::UpVector { .. } => "up vector",
            Self::RelativeMotion { .. } => "relative motion",
            Self::AbsolutePose { .. } => "absolute pose",
            Self::ParameterPrior { .. } => "parameter prior",
            Self::DepthPrior { .. } => "depth prior",
        }
    }

    /// The number of scalar residuals.
    pub fn dimension(&self) -> usize {
        match self {
            Self::Reprojection {
                error_type: ErrorType::Angular,
                ..
            } => 3,
            Self::Reprojection { .. } => 2,
            Self::AbsolutePosition { .. } | Self::UpVector { .. } => 3,
            Self::Heading { .. } | Self::DepthPrior { .. } => 1,
            Self::RelativeMotion { .. } | Self::AbsolutePose { .. } => 6,
            Self::ParameterPrior { mean, .. } => mean.len(),
        }
    }

    /// Checks that every standard deviation is positive and that a parameter
    /// prior has one deviation per value.
    pub fn validate(&self) -> Result<(), String> {
        let deviations: Vec<f64> = match self {
            Self::Reprojection {
                std, pixel_scale, ..
            } => vec![*std, *pixel_scale],
            Self::AbsolutePosition { std, .. }
            | Self::Heading { std, .. }
            | Self::UpVector { std, .. } => vec![*std],
            Self::RelativeMotion {
                std_rotation,
                std_translation,
                ..
            }
            | Self::AbsolutePose {
                std_rotation,
                std_translation,
                ..
            } => vec![*std_rotation, *std_translation],
            Self::ParameterPrior { mean, std } => {
                if mean.len() != std.len() {
                    return Err(format!(
                        "{} values with {} standard deviations",
                        mean.len(),
                        std.len()
                    ));
                }
                std.clone()
            }
            Self::DepthPrior { depth, .. } => vec![depth.std_deviation],
        };
        match deviations.iter().find(|&&d| !(d.is_finite() && d > 0.0)) {
            Some(d) => Err(format!("standard deviation {} is not positive", d)),
            None => Ok(()),
        }
    }

    /// The number of values of each block the residual reads, in order.
    pub fn block_sizes(&self) -> Vec<usize> {
        match self {
            Self::Reprojection {
                pose,
                projection_type,
                ..
            } => pose
                .block_sizes()
                .chain([projection_type.num_parameters(), 3])
                .collect(),
            Self::AbsolutePosition { pose, biased, .. } => {
                let bias = if *biased { Some(7) } else { None };
                pose.block_sizes().chain(bias).collect()
            }
            Self::Heading { pose, .. }
            | Self::UpVector { pose, .. }
            | Self::AbsolutePose { pose, .. } => pose.block_sizes().collect(),
            Self::RelativeMotion { first, second, .. } => {
                first.block_sizes().chain(second.block_sizes()).collect()
            }
            Self::ParameterPrior { mean, .. } => vec![mean.len()],
            Self::DepthPrior { pose, .. } => pose.block_sizes().chain([3]).collect(),
        }
    }

    /// Evaluates the whitened residual.
    ///
    /// Returns `None` if the blocks do not fit the residual or the result is
    /// not finite.
    pub fn evaluate(&self, blocks: &[&[f64]]) -> Option<Vec<f64>> {
        let sizes = self.block_sizes();
        if sizes.len() != blocks.len() || sizes.iter().zip(blocks).any(|(&s, b)| s != b.len()) {
            return None;
        }
        if let Self::ParameterPrior { mean, std } = self {
            if mean.len() != std.len() {
                return None;
            }
        }
        let mut blocks = Blocks::new(blocks);
        let residual = match self {
            Self::Reprojection {
                pose,
                projection_type,
                error_type,
                observed,
                pixel_scale,
                std,
            } => {
                let pose = blocks.pose(*pose);
                let projection = Projection::from_parameters(*projection_type, blocks.take()).ok()?;
                let point = pose.transform_point(&blocks.point()).coords;
                match error_type {
                    ErrorType::Normalized => {
                        let e = (projection.project(&point) - observed) / *std;
                        vec![e.x, e.y]
                    }
                    ErrorType::Pixel => {
                        let e = (projection.project(&point) - observed) * (*pixel_scale / *std);
                        vec![e.x, e.y]
                    }
                    ErrorType::Angular => {
                        let e = (point.normalize() - projection.bearing(observed).into_inner()) / *std;
                        vec![e.x, e.y, e.z]
                    }
                }
            }
            Self::AbsolutePosition {
                pose,
                position,
                std,
                biased,
            } => {
                let mut origin = blocks.pose(*pose).origin();
                if *biased {
                    origin = Similarity::from_parameters(blocks.take()).transform_point(&origin);
                }
                let e = (origin - position) / *std;
                vec![e.x, e.y, e.z]
            }
            Self::Heading { pose, heading, std } => {
                let axis = blocks.pose(*pose).optical_axis();
                let predicted = axis.x.atan2(axis.y);
                vec![wrap_angle(predicted - heading) / *std]
            }
            Self::UpVector { pose, down, std } => {
                let predicted = blocks.pose(*pose).transform_vector(&-Vector3::z());
                let e = (predicted - down.normalize()) / *std;
                vec![e.x, e.y, e.z]
            }
            Self::RelativeMotion {
                first,
                second,
                motion,
                std_rotation,
                std_translation,
            } => {
                let a = blocks.pose(*first);
                let b = blocks.pose(*second);
                let difference = CameraToCamera(a.relative_to(b).0 * motion.inverse().0);
                pose_difference(difference, *std_rotation, *std_translation)
            }
            Self::AbsolutePose {
                pose,
                prior,
                std_rotation,
                std_translation,
            } => {
                let difference = CameraToCamera(blocks.pose(*pose).0 * prior.inverse().0);
                pose_difference(difference, *std_rotation, *std_translation)
            }
            Self::ParameterPrior { mean, std } => blocks
                .take()
                .iter()
                .zip(mean)
                .zip(std)
                .map(|((value, mean), std)| (value - mean) / std)
                .collect(),
            Self::DepthPrior { pose, depth } => {
                let point = blocks.pose(*pose).transform_point(&blocks.point());
                let predicted = if depth.is_radial {
                    point.coords.norm()
                } else {
                    point.z
                };
                vec![(predicted - depth.value) / depth.std_deviation]
            }
        };
        residual.iter().all(|v| v.is_finite()).then(|| residual)
    }
}
