use crate::AlignmentSettings;
use cv_core::nalgebra::{Point3, Rotation3, Vector3};
use cv_core::Pose;
use cv_sfm::{Map, ShotRef};
use log::*;

/// Matched points of a source and a reference, with their weights.
///
/// Shot correspondences also record the world-to-camera rotations of both
/// shots, which the nonlinear refinement uses to align orientations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Correspondences {
    pub source: Vec<Point3<f64>>,
    pub target: Vec<Point3<f64>>,
    pub weights: Vec<f64>,
    pub orientations: Vec<(Rotation3<f64>, Rotation3<f64>)>,
    pub num_shots: usize,
    pub num_landmarks: usize,
}

impl Correspondences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    pub fn push(&mut self, source: Point3<f64>, target: Point3<f64>, weight: f64) {
        self.source.push(source);
        self.target.push(target);
        self.weights.push(weight);
    }

    /// Camera centers of the shots and positions of the landmarks present in both maps.
    pub fn between_maps(source: &Map, reference: &Map, settings: &AlignmentSettings) -> Self {
        let mut correspondences = Self::new();
        if settings.shot_weight > 0.0 {
            for shot in source.shots().iter() {
                if let Ok(other) = reference.shot(shot.id()) {
                    let (a, b) = (shot.pose(), other.pose());
                    correspondences.push(a.origin(), b.origin(), settings.shot_weight);
                    correspondences
                        .orientations
                        .push((a.rotation(), b.rotation()));
                    correspondences.num_shots += 1;
                }
            }
        }
        if settings.landmark_weight > 0.0 {
            for landmark in source.landmarks().iter() {
                if let Ok(other) = reference.landmark(landmark.id()) {
                    correspondences.push(
                        landmark.position,
                        other.position,
                        settings.landmark_weight,
                    );
                    correspondences.num_landmarks += 1;
                }
            }
        }
        debug!(
            "found {} shot and {} landmark correspondences",
            correspondences.num_shots, correspondences.num_landmarks
        );
        correspondences
    }

    /// Camera centers against GPS positions.
    ///
    /// A rig instance contributes its origin against the average GPS position
    /// of its shots. Shots outside rigs contribute their own origin. Each
    /// correspondence is weighted by the inverse GPS variance.
    pub fn to_gps(map: &Map, settings: &AlignmentSettings) -> Self {
        let mut correspondences = Self::new();
        for instance in map.rig_instances().iter() {
            let readings: Vec<(Point3<f64>, f64)> = instance
                .shot_ids()
                .filter_map(|id| map.shot(id).ok())
                .filter_map(|shot| gps_reading(&shot, settings))
                .collect();
            if readings.is_empty() {
                continue;
            }
            let count = readings.len() as f64;
            let position = readings.iter().map(|(p, _)| p.coords).sum::<Vector3<f64>>() / count;
            let accuracy = readings.iter().map(|(_, a)| a).sum::<f64>() / count;
            correspondences.push(
                instance.pose.origin(),
                position.into(),
                accuracy.powi(-2),
            );
            correspondences.num_shots += readings.len();
        }
        for shot in map.shots().iter().filter(|shot| !shot.is_in_rig()) {
            if let Some((position, accuracy)) = gps_reading(&shot, settings) {
                correspondences.push(shot.pose().origin(), position, accuracy.powi(-2));
                correspondences.num_shots += 1;
            }
        }
        debug!(
            "found {} GPS correspondences from {} shots",
            correspondences.len(),
            correspondences.num_shots
        );
        correspondences
    }
}

fn gps_reading(shot: &ShotRef<'_>, settings: &AlignmentSettings) -> Option<(Point3<f64>, f64)> {
    let position = shot.measurements.gps_position?;
    let accuracy = shot
        .measurements
        .gps_accuracy
        .filter(|&a| a > 0.0)
        .unwrap_or(settings.default_gps_accuracy);
    Some((position, accuracy))
}
