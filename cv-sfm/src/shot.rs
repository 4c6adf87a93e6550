use crate::{CameraKey, LandmarkKey, Observation, RigCameraKey, RigInstanceKey, ShotMeasurements, ShotMesh};
use cv_core::nalgebra::Matrix6;
use cv_core::WorldToCamera;
use std::collections::{BTreeMap, HashMap};

/// Where the world pose of a shot comes from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShotPose {
    /// The shot stores its own pose.
    Owned(WorldToCamera),
    /// The pose is the rig instance pose followed by the rig camera mounting.
    Rig {
        instance: RigInstanceKey,
        camera: RigCameraKey,
    },
}

/// One posed image.
///
/// The graph topology (camera, pose source, observations) is only changed
/// through [`Map`](crate::Map); the remaining fields are free to edit.
#[derive(Debug, Clone)]
pub struct Shot {
    pub(crate) id: String,
    pub(crate) camera: CameraKey,
    pub(crate) pose: ShotPose,
    pub(crate) observations: BTreeMap<LandmarkKey, Observation>,
    pub(crate) landmark_by_feature: HashMap<usize, LandmarkKey>,
    /// Covariance of the se(3) pose vector (translation before rotation).
    pub covariance: Option<Matrix6<f64>>,
    pub measurements: ShotMeasurements,
    pub mesh: ShotMesh,
    /// Connected component this shot belonged to before reconstructions were merged.
    pub merge_cc: usize,
    pub scale: f64,
}

impl Shot {
    pub(crate) fn new(id: String, camera: CameraKey, pose: ShotPose) -> Self {
        Self {
            id,
            camera,
            pose,
            observations: BTreeMap::new(),
            landmark_by_feature: HashMap::new(),
            covariance: None,
            measurements: ShotMeasurements::default(),
            mesh: ShotMesh::default(),
            merge_cc: 0,
            scale: 1.0,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn camera_key(&self) -> CameraKey {
        self.camera
    }

    pub fn pose_source(&self) -> ShotPose {
        self.pose
    }

    /// A shot is in a rig iff both its rig instance and rig camera are attached.
    pub fn is_in_rig(&self) -> bool {
        matches!(self.pose, ShotPose::Rig { .. })
    }

    pub fn num_observations(&self) -> usize {
        self.observations.len()
    }

    pub(crate) fn insert_observation(&mut self, landmark: LandmarkKey, observation: Observation) {
        self.landmark_by_feature
            .insert(observation.feature_id, landmark);
        self.observations.insert(landmark, observation);
    }

    pub(crate) fn take_observation(&mut self, landmark: LandmarkKey) -> Option<Observation> {
        let observation = self.observations.remove(&landmark)?;
        self.landmark_by_feature.remove(&observation.feature_id);
        Some(observation)
    }

    pub(crate) fn clear_observations(&mut self) {
        self.observations.clear();
        self.landmark_by_feature.clear();
    }
}
