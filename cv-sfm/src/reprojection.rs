use crate::{ErrorType, LandmarkKey, Map, MapError, Observation, ReprojectionError};
use cv_camera::Camera;
use cv_core::nalgebra::{Point3, Vector2};
use cv_core::{Pose, WorldToCamera};
use float_ord::FloatOrd;
use log::*;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Scale from the median absolute deviation to a normal standard deviation.
const MAD_TO_STD: f64 = 1.486;

/// The reprojection error of `observation` given a camera, its pose and the landmark position.
pub fn reprojection_error(
    camera: &Camera,
    pose: WorldToCamera,
    position: &Point3<f64>,
    observation: &Observation,
    error_type: ErrorType,
) -> ReprojectionError {
    let camera_point = pose.transform_point(position).coords;
    match error_type {
        ErrorType::Normalized => {
            ReprojectionError::Normalized(camera.project(&camera_point) - observation.point)
        }
        ErrorType::Pixel => ReprojectionError::Pixel(
            (camera.project(&camera_point) - observation.point) * camera.pixel_scale(),
        ),
        ErrorType::Angular => {
            let bearing = camera.bearing(&observation.point);
            let direction = camera_point.normalize();
            ReprojectionError::Angular(bearing.cross(&direction).norm().atan2(bearing.dot(&direction)))
        }
    }
}

/// How [`Map::remove_outliers`] picks its error threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde-serialize", serde(rename_all = "snake_case"))]
pub enum OutlierThreshold {
    /// Observations with an error norm above this value are outliers.
    Fixed(f64),
    /// The threshold is `ratio · |median + 1.486 · MAD|` over all current errors.
    Auto { ratio: f64 },
}

impl Default for OutlierThreshold {
    fn default() -> Self {
        Self::Auto { ratio: 3.0 }
    }
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_unstable_by_key(|&v| FloatOrd(v));
    let middle = values.len() / 2;
    if values.len() % 2 == 0 {
        0.5 * (values[middle - 1] + values[middle])
    } else {
        values[middle]
    }
}

/// Robust location and spread of a set of 2d errors.
fn error_distribution(errors: &[Vector2<f64>]) -> (Vector2<f64>, f64) {
    let mut xs: Vec<f64> = errors.iter().map(|e| e.x).collect();
    let mut ys: Vec<f64> = errors.iter().map(|e| e.y).collect();
    let center = Vector2::new(median(&mut xs), median(&mut ys));
    let mut deviations: Vec<f64> = errors.iter().map(|e| (e - center).norm()).collect();
    (center, MAD_TO_STD * median(&mut deviations))
}

impl Map {
    fn observation_errors(&self, error_type: ErrorType) -> Vec<(LandmarkKey, String, ReprojectionError)> {
        self.shots
            .keys()
            .flat_map(|shot_key| {
                let shot = &self.shots[shot_key];
                let pose = self.pose_of(shot_key);
                let camera = &self.cameras[shot.camera];
                shot.observations.iter().map(move |(&landmark, observation)| {
                    let position = &self.landmarks[landmark].position;
                    (
                        landmark,
                        shot.id.clone(),
                        reprojection_error(camera, pose, position, observation, error_type),
                    )
                })
            })
            .collect()
    }

    /// Recomputes the diagnostic reprojection error of every observation.
    pub fn compute_reprojection_errors(&mut self, error_type: ErrorType) {
        let errors = self.observation_errors(error_type);
        for landmark in self.landmarks.values_mut() {
            landmark.reprojection_errors.clear();
        }
        for (landmark, shot_id, error) in errors {
            self.landmarks[landmark]
                .reprojection_errors
                .insert(shot_id, error);
        }
    }

    /// Removes observations whose reprojection error exceeds the threshold, then
    /// the landmarks they belonged to that kept fewer than two observations.
    ///
    /// Returns the number of removed observations.
    pub fn remove_outliers(
        &mut self,
        threshold: OutlierThreshold,
        error_type: ErrorType,
    ) -> Result<usize, MapError> {
        let errors = self.observation_errors(error_type);
        let threshold = match threshold {
            OutlierThreshold::Fixed(threshold) => threshold,
            OutlierThreshold::Auto { ratio } => {
                let vectors: Vec<Vector2<f64>> = errors.iter().map(|(_, _, e)| e.as_vector()).collect();
                let (center, spread) = error_distribution(&vectors);
                ratio * (center + Vector2::repeat(spread)).norm()
            }
        };
        let outliers: Vec<(LandmarkKey, String)> = errors
            .into_iter()
            .filter(|(_, _, error)| error.norm() > threshold)
            .map(|(landmark, shot_id, _)| (landmark, shot_id))
            .collect();
        let mut touched = Vec::new();
        for (landmark, shot_id) in &outliers {
            let landmark_id = self.landmarks[*landmark].id.clone();
            self.remove_observation(shot_id, &landmark_id)?;
            touched.push(landmark_id);
        }
        touched.sort_unstable();
        touched.dedup();
        for landmark_id in touched {
            let weak = self
                .landmark_ids
                .get(&landmark_id)
                .map_or(false, |&key| self.landmarks[key].num_observations() < 2);
            if weak {
                self.remove_landmark(&landmark_id)?;
            }
        }
        info!(
            "removed {} outlier observations above threshold {}",
            outliers.len(),
            threshold
        );
        Ok(outliers.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn median_of_even_and_odd() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median(&mut []), 0.0);
    }

    #[test]
    fn distribution_ignores_single_outlier() {
        let mut errors = vec![Vector2::new(0.001, -0.001); 9];
        errors.push(Vector2::new(5.0, 5.0));
        let (center, spread) = error_distribution(&errors);
        assert_relative_eq!(center, Vector2::new(0.001, -0.001));
        assert_relative_eq!(spread, 0.0);
    }
}
