use cv_core::nalgebra::{Point3, Vector3};
use std::collections::BTreeMap;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Sensor readings and metadata captured with a shot. Every reading may be absent.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct ShotMeasurements {
    /// Seconds since the unix epoch.
    pub capture_time: Option<f64>,
    /// Position in the reconstruction's topocentric frame.
    pub gps_position: Option<Point3<f64>>,
    /// Standard deviation of the GPS position in meters.
    pub gps_accuracy: Option<f64>,
    /// Heading in degrees, clockwise from north.
    pub compass_angle: Option<f64>,
    pub compass_accuracy: Option<f64>,
    /// Direction of gravity in the camera frame.
    pub gravity_down: Option<Vector3<f64>>,
    /// Omega, phi and kappa in degrees.
    pub opk_angles: Option<Vector3<f64>>,
    pub opk_accuracy: Option<f64>,
    /// EXIF orientation tag.
    pub orientation: Option<u8>,
    pub sequence_key: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

impl ShotMeasurements {
    /// Overwrites the readings present in `other`, keeping the current value for absent ones.
    pub fn merge_from(&mut self, other: &Self) {
        fn take<T: Clone>(target: &mut Option<T>, source: &Option<T>) {
            if source.is_some() {
                target.clone_from(source);
            }
        }
        take(&mut self.capture_time, &other.capture_time);
        take(&mut self.gps_position, &other.gps_position);
        take(&mut self.gps_accuracy, &other.gps_accuracy);
        take(&mut self.compass_angle, &other.compass_angle);
        take(&mut self.compass_accuracy, &other.compass_accuracy);
        take(&mut self.gravity_down, &other.gravity_down);
        take(&mut self.opk_angles, &other.opk_angles);
        take(&mut self.opk_accuracy, &other.opk_accuracy);
        take(&mut self.orientation, &other.orientation);
        take(&mut self.sequence_key, &other.sequence_key);
        self.attributes.extend(
            other
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
    }
}

/// Triangle mesh attached to a shot for visualization.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct ShotMesh {
    pub vertices: Vec<Point3<f64>>,
    pub faces: Vec<[usize; 3]>,
}
