use crate::{RigCameraKey, ShotKey};
use cv_core::{CameraToCamera, WorldToCamera};
use std::collections::BTreeMap;

/// The mounting of one camera role relative to the rig reference frame.
#[derive(Debug, Clone)]
pub struct RigCamera {
    pub(crate) id: String,
    /// Transforms rig-frame points into this camera's frame.
    pub pose: CameraToCamera,
}

impl RigCamera {
    pub(crate) fn new(id: impl Into<String>, pose: CameraToCamera) -> Self {
        Self {
            id: id.into(),
            pose,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

/// One firing of a rig: the shots taken together and their shared pose.
#[derive(Debug, Clone)]
pub struct RigInstance {
    pub(crate) id: String,
    pub(crate) shots: BTreeMap<ShotKey, RigCameraKey>,
    /// World pose of the rig reference frame.
    pub pose: WorldToCamera,
}

impl RigInstance {
    pub(crate) fn new(id: String, pose: WorldToCamera) -> Self {
        Self {
            id,
            shots: BTreeMap::new(),
            pose,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn num_shots(&self) -> usize {
        self.shots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shots.is_empty()
    }
}
