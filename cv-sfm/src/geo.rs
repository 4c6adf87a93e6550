//! WGS84 geodetic coordinates and the local east-north-up frame of a reconstruction.

use cv_core::nalgebra::{Matrix3, Point3, Vector3};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

const WGS84_A: f64 = 6_378_137.0;
const WGS84_B: f64 = 6_356_752.314_245;

/// Geodetic to earth-centered earth-fixed coordinates.
///
/// `latitude` and `longitude` are in degrees, `altitude` in meters.
pub fn ecef_from_lla(latitude: f64, longitude: f64, altitude: f64) -> Point3<f64> {
    let a2 = WGS84_A * WGS84_A;
    let b2 = WGS84_B * WGS84_B;
    let (lat, lon) = (latitude.to_radians(), longitude.to_radians());
    let (sin_lat, cos_lat) = lat.sin_cos();
    let (sin_lon, cos_lon) = lon.sin_cos();
    let l = 1.0 / (a2 * cos_lat * cos_lat + b2 * sin_lat * sin_lat).sqrt();
    Point3::new(
        (a2 * l + altitude) * cos_lat * cos_lon,
        (a2 * l + altitude) * cos_lat * sin_lon,
        (b2 * l + altitude) * sin_lat,
    )
}

/// Earth-centered earth-fixed to geodetic coordinates (degrees, degrees, meters).
pub fn lla_from_ecef(ecef: &Point3<f64>) -> (f64, f64, f64) {
    let (a, b) = (WGS84_A, WGS84_B);
    let ea = ((a * a - b * b) / (a * a)).sqrt();
    let eb = ((a * a - b * b) / (b * b)).sqrt();
    let p = ecef.x.hypot(ecef.y);
    let theta = (ecef.z * a).atan2(p * b);
    let (sin_theta, cos_theta) = theta.sin_cos();
    let lon = ecef.y.atan2(ecef.x);
    let lat = (ecef.z + eb * eb * b * sin_theta.powi(3))
        .atan2(p - ea * ea * a * cos_theta.powi(3));
    let n = a / (1.0 - ea * ea * lat.sin().powi(2)).sqrt();
    let alt = p / lat.cos() - n;
    (lat.to_degrees(), lon.to_degrees(), alt)
}

/// Rotation from the east-north-up frame at a reference to ECEF axes.
fn enu_to_ecef_rotation(latitude: f64, longitude: f64) -> Matrix3<f64> {
    let (sin_lat, cos_lat) = latitude.to_radians().sin_cos();
    let (sin_lon, cos_lon) = longitude.to_radians().sin_cos();
    #[rustfmt::skip]
    let rotation = Matrix3::new(
        -sin_lon, -sin_lat * cos_lon, cos_lat * cos_lon,
        cos_lon, -sin_lat * sin_lon, cos_lat * sin_lon,
        0.0, cos_lat, sin_lat,
    );
    rotation
}

/// Converts between geodetic coordinates and a local topocentric (east, north, up) frame.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct TopocentricConverter {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

impl Default for TopocentricConverter {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}

impl TopocentricConverter {
    pub fn new(latitude: f64, longitude: f64, altitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
        }
    }

    /// Geodetic coordinates to the local frame.
    pub fn to_topocentric(&self, latitude: f64, longitude: f64, altitude: f64) -> Point3<f64> {
        let origin = ecef_from_lla(self.latitude, self.longitude, self.altitude);
        let point = ecef_from_lla(latitude, longitude, altitude);
        let rotation = enu_to_ecef_rotation(self.latitude, self.longitude);
        Point3::from(rotation.transpose() * (point - origin))
    }

    /// Local frame to geodetic coordinates (degrees, degrees, meters).
    pub fn to_lla(&self, point: &Point3<f64>) -> (f64, f64, f64) {
        let origin = ecef_from_lla(self.latitude, self.longitude, self.altitude);
        let rotation = enu_to_ecef_rotation(self.latitude, self.longitude);
        let ecef: Vector3<f64> = rotation * point.coords;
        lla_from_ecef(&(origin + ecef))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn reference_is_origin() {
        let converter = TopocentricConverter::new(52.51891, 13.4, 40.0);
        let local = converter.to_topocentric(52.51891, 13.4, 40.0);
        assert_relative_eq!(local, Point3::origin(), epsilon = 1e-6);
    }

    #[test]
    fn round_trip() {
        let converter = TopocentricConverter::new(46.5, 6.6, 400.0);
        let local = converter.to_topocentric(46.501, 6.602, 420.0);
        assert!(local.x > 100.0 && local.y > 100.0);
        assert_relative_eq!(local.z, 20.0, epsilon = 0.1);
        let (lat, lon, alt) = converter.to_lla(&local);
        assert_relative_eq!(lat, 46.501, epsilon = 1e-7);
        assert_relative_eq!(lon, 6.602, epsilon = 1e-7);
        assert_relative_eq!(alt, 420.0, epsilon = 1e-3);
    }
}
