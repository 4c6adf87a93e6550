use crate::{
    CameraKey, EntityKind, Landmark, LandmarkKey, MapError, Observation, RigCamera, RigCameraKey,
    RigInstance, RigInstanceKey, Shot, ShotKey, ShotPose, TopocentricConverter,
};
use cv_camera::Camera;
use cv_core::nalgebra::Point3;
use cv_core::{CameraToCamera, Pose, Similarity, WorldToCamera};
use log::*;
use slotmap::DenseSlotMap;
use std::collections::{BTreeMap, HashMap};

/// The reconstruction graph.
///
/// The map owns every camera, rig, shot and landmark. Shots and landmarks refer
/// to each other through slotmap keys, and each observation is stored on the
/// shot with the landmark keeping a back-reference, so both sides are always
/// updated together.
///
/// Entities are addressed by their string id in the public API. Iteration
/// through the views is ordered by id.
#[derive(Debug, Clone, Default)]
pub struct Map {
    pub(crate) cameras: DenseSlotMap<CameraKey, Camera>,
    pub(crate) rig_cameras: DenseSlotMap<RigCameraKey, RigCamera>,
    pub(crate) rig_instances: DenseSlotMap<RigInstanceKey, RigInstance>,
    pub(crate) shots: DenseSlotMap<ShotKey, Shot>,
    pub(crate) landmarks: DenseSlotMap<LandmarkKey, Landmark>,
    pub(crate) camera_ids: BTreeMap<String, CameraKey>,
    pub(crate) rig_camera_ids: BTreeMap<String, RigCameraKey>,
    pub(crate) rig_instance_ids: BTreeMap<String, RigInstanceKey>,
    pub(crate) shot_ids: BTreeMap<String, ShotKey>,
    pub(crate) landmark_ids: BTreeMap<String, LandmarkKey>,
    pub(crate) biases: HashMap<CameraKey, Similarity>,
    reference: TopocentricConverter,
}

fn lookup<K: Copy>(ids: &BTreeMap<String, K>, kind: EntityKind, id: &str) -> Result<K, MapError> {
    ids.get(id)
        .copied()
        .ok_or_else(|| MapError::not_found(kind, id))
}

fn ensure_absent<K>(ids: &BTreeMap<String, K>, kind: EntityKind, id: &str) -> Result<(), MapError> {
    if ids.contains_key(id) {
        Err(MapError::duplicate(kind, id))
    } else {
        Ok(())
    }
}

impl Map {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn camera_key(&self, id: &str) -> Result<CameraKey, MapError> {
        lookup(&self.camera_ids, EntityKind::Camera, id)
    }

    pub fn rig_camera_key(&self, id: &str) -> Result<RigCameraKey, MapError> {
        lookup(&self.rig_camera_ids, EntityKind::RigCamera, id)
    }

    pub fn rig_instance_key(&self, id: &str) -> Result<RigInstanceKey, MapError> {
        lookup(&self.rig_instance_ids, EntityKind::RigInstance, id)
    }

    pub fn shot_key(&self, id: &str) -> Result<ShotKey, MapError> {
        lookup(&self.shot_ids, EntityKind::Shot, id)
    }

    pub fn landmark_key(&self, id: &str) -> Result<LandmarkKey, MapError> {
        lookup(&self.landmark_ids, EntityKind::Landmark, id)
    }

    /// Adds a camera, identified by its `id` field.
    pub fn create_camera(&mut self, camera: Camera) -> Result<CameraKey, MapError> {
        ensure_absent(&self.camera_ids, EntityKind::Camera, &camera.id)?;
        let id = camera.id.clone();
        let key = self.cameras.insert(camera);
        self.camera_ids.insert(id, key);
        Ok(key)
    }

    /// Removes a camera that no shot uses anymore.
    pub fn remove_camera(&mut self, id: &str) -> Result<Camera, MapError> {
        let key = self.camera_key(id)?;
        if let Some(shot) = self.shots.values().find(|shot| shot.camera == key) {
            return Err(MapError::InvalidState(format!(
                "camera `{}` is still used by shot `{}`",
                id, shot.id
            )));
        }
        self.camera_ids.remove(id);
        self.biases.remove(&key);
        self.cameras
            .remove(key)
            .ok_or_else(|| MapError::not_found(EntityKind::Camera, id))
    }

    pub fn create_rig_camera(
        &mut self,
        id: impl Into<String>,
        pose: CameraToCamera,
    ) -> Result<RigCameraKey, MapError> {
        let id = id.into();
        ensure_absent(&self.rig_camera_ids, EntityKind::RigCamera, &id)?;
        let key = self.rig_cameras.insert(RigCamera::new(id.clone(), pose));
        self.rig_camera_ids.insert(id, key);
        Ok(key)
    }

    /// Removes a rig camera that no rig instance uses anymore.
    pub fn remove_rig_camera(&mut self, id: &str) -> Result<RigCamera, MapError> {
        let key = self.rig_camera_key(id)?;
        if let Some(instance) = self
            .rig_instances
            .values()
            .find(|instance| instance.shots.values().any(|&camera| camera == key))
        {
            return Err(MapError::InvalidState(format!(
                "rig camera `{}` is still used by rig instance `{}`",
                id, instance.id
            )));
        }
        self.rig_camera_ids.remove(id);
        self.rig_cameras
            .remove(key)
            .ok_or_else(|| MapError::not_found(EntityKind::RigCamera, id))
    }

    pub fn create_rig_instance(
        &mut self,
        id: impl Into<String>,
        pose: WorldToCamera,
    ) -> Result<RigInstanceKey, MapError> {
        let id = id.into();
        ensure_absent(&self.rig_instance_ids, EntityKind::RigInstance, &id)?;
        let key = self
            .rig_instances
            .insert(RigInstance::new(id.clone(), pose));
        self.rig_instance_ids.insert(id, key);
        Ok(key)
    }

    /// Removes an empty rig instance.
    ///
    /// Instances still holding shots are rejected with [`MapError::InvalidState`];
    /// remove or detach their shots first.
    pub fn remove_rig_instance(&mut self, id: &str) -> Result<RigInstance, MapError> {
        let key = self.rig_instance_key(id)?;
        let instance = &self.rig_instances[key];
        if !instance.is_empty() {
            return Err(MapError::InvalidState(format!(
                "rig instance `{}` still holds {} shots",
                id,
                instance.num_shots()
            )));
        }
        self.rig_instance_ids.remove(id);
        self.rig_instances
            .remove(key)
            .ok_or_else(|| MapError::not_found(EntityKind::RigInstance, id))
    }

    /// Creates a shot that owns its pose.
    pub fn create_shot(
        &mut self,
        id: impl Into<String>,
        camera_id: &str,
        pose: WorldToCamera,
    ) -> Result<ShotKey, MapError> {
        let id = id.into();
        ensure_absent(&self.shot_ids, EntityKind::Shot, &id)?;
        let camera = self.camera_key(camera_id)?;
        let key = self
            .shots
            .insert(Shot::new(id.clone(), camera, ShotPose::Owned(pose)));
        self.shot_ids.insert(id, key);
        Ok(key)
    }

    /// Creates a shot whose pose is derived from a rig instance and rig camera.
    pub fn create_rig_shot(
        &mut self,
        id: impl Into<String>,
        camera_id: &str,
        rig_instance_id: &str,
        rig_camera_id: &str,
    ) -> Result<ShotKey, MapError> {
        let id = id.into();
        ensure_absent(&self.shot_ids, EntityKind::Shot, &id)?;
        let camera = self.camera_key(camera_id)?;
        let (instance, rig_camera) = self.check_rig_slot(rig_instance_id, rig_camera_id)?;
        let key = self.shots.insert(Shot::new(
            id.clone(),
            camera,
            ShotPose::Rig {
                instance,
                camera: rig_camera,
            },
        ));
        self.rig_instances[instance].shots.insert(key, rig_camera);
        self.shot_ids.insert(id, key);
        Ok(key)
    }

    /// Checks that `rig_camera_id` is not yet taken in `rig_instance_id`.
    fn check_rig_slot(
        &self,
        rig_instance_id: &str,
        rig_camera_id: &str,
    ) -> Result<(RigInstanceKey, RigCameraKey), MapError> {
        let instance = self.rig_instance_key(rig_instance_id)?;
        let rig_camera = self.rig_camera_key(rig_camera_id)?;
        if self.rig_instances[instance]
            .shots
            .values()
            .any(|&camera| camera == rig_camera)
        {
            return Err(MapError::InvalidState(format!(
                "rig instance `{}` already has a shot for rig camera `{}`",
                rig_instance_id, rig_camera_id
            )));
        }
        Ok((instance, rig_camera))
    }

    /// Moves a shot owning its pose into a rig instance.
    ///
    /// An empty instance is first placed so that the shot keeps its current pose.
    /// Otherwise the shot's pose becomes the composition of the instance and rig camera poses.
    pub fn attach_shot_to_rig(
        &mut self,
        shot_id: &str,
        rig_instance_id: &str,
        rig_camera_id: &str,
    ) -> Result<(), MapError> {
        let shot_key = self.shot_key(shot_id)?;
        let current = match self.shots[shot_key].pose {
            ShotPose::Owned(pose) => pose,
            ShotPose::Rig { .. } => {
                return Err(MapError::InvalidState(format!(
                    "shot `{}` is already in a rig",
                    shot_id
                )))
            }
        };
        let (instance, rig_camera) = self.check_rig_slot(rig_instance_id, rig_camera_id)?;
        let mounting = self.rig_cameras[rig_camera].pose;
        let rig_instance = &mut self.rig_instances[instance];
        if rig_instance.is_empty() {
            rig_instance.pose = current.then(mounting.inverse());
        } else {
            debug!(
                "shot {} takes its pose from rig instance {}",
                shot_id, rig_instance_id
            );
        }
        rig_instance.shots.insert(shot_key, rig_camera);
        self.shots[shot_key].pose = ShotPose::Rig {
            instance,
            camera: rig_camera,
        };
        Ok(())
    }

    /// Takes a shot out of its rig instance, keeping its current world pose as an owned pose.
    pub fn detach_shot_from_rig(&mut self, shot_id: &str) -> Result<(), MapError> {
        let shot_key = self.shot_key(shot_id)?;
        let instance = match self.shots[shot_key].pose {
            ShotPose::Rig { instance, .. } => instance,
            ShotPose::Owned(_) => {
                return Err(MapError::InvalidState(format!(
                    "shot `{}` is not in a rig",
                    shot_id
                )))
            }
        };
        let pose = self.pose_of(shot_key);
        self.rig_instances[instance].shots.remove(&shot_key);
        self.shots[shot_key].pose = ShotPose::Owned(pose);
        Ok(())
    }

    /// Removes a shot, its observations and its rig membership.
    pub fn remove_shot(&mut self, id: &str) -> Result<Shot, MapError> {
        let key = self.shot_key(id)?;
        let shot = self
            .shots
            .remove(key)
            .ok_or_else(|| MapError::not_found(EntityKind::Shot, id))?;
        self.shot_ids.remove(id);
        for &landmark in shot.observations.keys() {
            let landmark = &mut self.landmarks[landmark];
            landmark.observations.remove(&key);
            landmark.reprojection_errors.remove(id);
        }
        if let ShotPose::Rig { instance, .. } = shot.pose {
            self.rig_instances[instance].shots.remove(&key);
        }
        debug!(
            "removed shot {} and its {} observations",
            id,
            shot.observations.len()
        );
        Ok(shot)
    }

    pub fn create_landmark(
        &mut self,
        id: impl Into<String>,
        position: Point3<f64>,
    ) -> Result<LandmarkKey, MapError> {
        let id = id.into();
        ensure_absent(&self.landmark_ids, EntityKind::Landmark, &id)?;
        let key = self.landmarks.insert(Landmark::new(id.clone(), position));
        self.landmark_ids.insert(id, key);
        Ok(key)
    }

    /// Removes a landmark and the observation each shot had of it.
    pub fn remove_landmark(&mut self, id: &str) -> Result<Landmark, MapError> {
        let key = self.landmark_key(id)?;
        let landmark = self
            .landmarks
            .remove(key)
            .ok_or_else(|| MapError::not_found(EntityKind::Landmark, id))?;
        self.landmark_ids.remove(id);
        for &shot in &landmark.observations {
            self.shots[shot].take_observation(key);
        }
        Ok(landmark)
    }

    /// Links a shot and a landmark through an observation.
    ///
    /// A shot observes each landmark at most once and uses each feature for at most one landmark.
    pub fn add_observation(
        &mut self,
        shot_id: &str,
        landmark_id: &str,
        observation: Observation,
    ) -> Result<(), MapError> {
        let shot_key = self.shot_key(shot_id)?;
        let landmark_key = self.landmark_key(landmark_id)?;
        let shot = &self.shots[shot_key];
        if shot.observations.contains_key(&landmark_key) {
            return Err(MapError::duplicate(
                EntityKind::Observation,
                format!("{}/{}", shot_id, landmark_id),
            ));
        }
        if shot
            .landmark_by_feature
            .contains_key(&observation.feature_id)
        {
            return Err(MapError::duplicate(
                EntityKind::Observation,
                format!("{}/feature {}", shot_id, observation.feature_id),
            ));
        }
        self.shots[shot_key].insert_observation(landmark_key, observation);
        self.landmarks[landmark_key].observations.insert(shot_key);
        Ok(())
    }

    /// Unlinks a shot and a landmark, returning the observation.
    pub fn remove_observation(
        &mut self,
        shot_id: &str,
        landmark_id: &str,
    ) -> Result<Observation, MapError> {
        let shot_key = self.shot_key(shot_id)?;
        let landmark_key = self.landmark_key(landmark_id)?;
        let observation = self.shots[shot_key]
            .take_observation(landmark_key)
            .ok_or_else(|| {
                MapError::not_found(
                    EntityKind::Observation,
                    format!("{}/{}", shot_id, landmark_id),
                )
            })?;
        let landmark = &mut self.landmarks[landmark_key];
        landmark.observations.remove(&shot_key);
        landmark.reprojection_errors.remove(shot_id);
        Ok(observation)
    }

    pub fn observation(&self, shot_id: &str, landmark_id: &str) -> Result<&Observation, MapError> {
        let shot_key = self.shot_key(shot_id)?;
        let landmark_key = self.landmark_key(landmark_id)?;
        self.shots[shot_key]
            .observations
            .get(&landmark_key)
            .ok_or_else(|| {
                MapError::not_found(
                    EntityKind::Observation,
                    format!("{}/{}", shot_id, landmark_id),
                )
            })
    }

    /// Removes every landmark, and with them every observation.
    pub fn clear_observations_and_landmarks(&mut self) {
        for shot in self.shots.values_mut() {
            shot.clear_observations();
        }
        self.landmarks.clear();
        self.landmark_ids.clear();
    }

    /// Removes landmarks observed by fewer than `min_observations` shots.
    ///
    /// Returns the number of removed landmarks.
    pub fn clean_landmarks_below_min_observations(
        &mut self,
        min_observations: usize,
    ) -> Result<usize, MapError> {
        let weak: Vec<String> = self
            .landmarks
            .values()
            .filter(|landmark| landmark.num_observations() < min_observations)
            .map(|landmark| landmark.id.clone())
            .collect();
        for id in &weak {
            self.remove_landmark(id)?;
        }
        if !weak.is_empty() {
            info!(
                "removed {} landmarks with fewer than {} observations",
                weak.len(),
                min_observations
            );
        }
        Ok(weak.len())
    }

    pub fn camera(&self, id: &str) -> Result<&Camera, MapError> {
        Ok(&self.cameras[self.camera_key(id)?])
    }

    /// Mutable access to a camera. Its `id` must not be changed.
    pub fn camera_mut(&mut self, id: &str) -> Result<&mut Camera, MapError> {
        let key = self.camera_key(id)?;
        Ok(&mut self.cameras[key])
    }

    pub fn rig_camera_mut(&mut self, id: &str) -> Result<&mut RigCamera, MapError> {
        let key = self.rig_camera_key(id)?;
        Ok(&mut self.rig_cameras[key])
    }

    pub fn rig_instance_mut(&mut self, id: &str) -> Result<&mut RigInstance, MapError> {
        let key = self.rig_instance_key(id)?;
        Ok(&mut self.rig_instances[key])
    }

    pub fn shot_mut(&mut self, id: &str) -> Result<&mut Shot, MapError> {
        let key = self.shot_key(id)?;
        Ok(&mut self.shots[key])
    }

    pub fn landmark_mut(&mut self, id: &str) -> Result<&mut Landmark, MapError> {
        let key = self.landmark_key(id)?;
        Ok(&mut self.landmarks[key])
    }

    /// The world pose of a shot, composing rig poses when needed.
    pub(crate) fn pose_of(&self, key: ShotKey) -> WorldToCamera {
        match self.shots[key].pose {
            ShotPose::Owned(pose) => pose,
            ShotPose::Rig { instance, camera } => self.rig_instances[instance]
                .pose
                .then(self.rig_cameras[camera].pose),
        }
    }

    pub fn shot_pose(&self, id: &str) -> Result<WorldToCamera, MapError> {
        Ok(self.pose_of(self.shot_key(id)?))
    }

    /// Sets the world pose of a shot.
    ///
    /// For a rigged shot the rig instance is moved so that the composition yields
    /// `pose`, which moves the other shots of the instance rigidly along.
    pub fn set_shot_pose(&mut self, id: &str, pose: WorldToCamera) -> Result<(), MapError> {
        let key = self.shot_key(id)?;
        match self.shots[key].pose {
            ShotPose::Owned(_) => self.shots[key].pose = ShotPose::Owned(pose),
            ShotPose::Rig { instance, camera } => {
                let mounting = self.rig_cameras[camera].pose;
                self.rig_instances[instance].pose = pose.then(mounting.inverse());
            }
        }
        Ok(())
    }

    pub fn reference(&self) -> &TopocentricConverter {
        &self.reference
    }

    pub fn set_reference(&mut self, reference: TopocentricConverter) {
        self.reference = reference;
    }

    /// The GPS bias of a camera, identity unless set.
    pub fn bias(&self, camera_id: &str) -> Result<Similarity, MapError> {
        let key = self.camera_key(camera_id)?;
        Ok(self.biases.get(&key).copied().unwrap_or_default())
    }

    pub fn set_bias(&mut self, camera_id: &str, bias: Similarity) -> Result<(), MapError> {
        let key = self.camera_key(camera_id)?;
        self.biases.insert(key, bias);
        Ok(())
    }

    /// Copies the map. Without `copy_observations`, the copy keeps every
    /// landmark but no shot observes any of them.
    pub fn deep_copy(&self, copy_observations: bool) -> Self {
        let mut copy = self.clone();
        if !copy_observations {
            for shot in copy.shots.values_mut() {
                shot.clear_observations();
            }
            for landmark in copy.landmarks.values_mut() {
                landmark.observations.clear();
                landmark.reprojection_errors.clear();
            }
        }
        copy
    }

    /// Moves the whole reconstruction by `similarity`.
    ///
    /// Shot and rig instance poses and landmark positions are transformed; rig
    /// camera mountings only have their translation scaled.
    pub fn apply_similarity(&mut self, similarity: &Similarity) {
        for landmark in self.landmarks.values_mut() {
            landmark.position = similarity.transform_point(&landmark.position);
        }
        for shot in self.shots.values_mut() {
            if let ShotPose::Owned(pose) = shot.pose {
                shot.pose = ShotPose::Owned(similarity.transform_pose(pose));
            }
        }
        for instance in self.rig_instances.values_mut() {
            instance.pose = similarity.transform_pose(instance.pose);
        }
        for rig_camera in self.rig_cameras.values_mut() {
            rig_camera.pose = similarity.transform_relative(rig_camera.pose);
        }
        info!(
            "applied similarity with scale {} to {} shots and {} landmarks",
            similarity.scale,
            self.shots.len(),
            self.landmarks.len()
        );
    }
}
