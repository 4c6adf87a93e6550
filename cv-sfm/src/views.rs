//! Read-only facades over the tables of a [`Map`].
//!
//! Views borrow the map, so they cannot outlive it or observe a mutation.

use crate::{
    EntityKind, Landmark, Map, MapError, Observation, RigCamera, RigInstance, Shot, ShotPose,
};
use core::ops::Deref;
use cv_camera::Camera;
use cv_core::nalgebra::{Point2, Point3, UnitVector3};
use cv_core::{CameraToCamera, Pose, WorldToCamera};

/// A shot resolved against its map.
#[derive(Debug, Clone, Copy)]
pub struct ShotRef<'a> {
    map: &'a Map,
    shot: &'a Shot,
}

impl<'a> Deref for ShotRef<'a> {
    type Target = Shot;

    fn deref(&self) -> &Shot {
        self.shot
    }
}

impl<'a> ShotRef<'a> {
    pub fn id(&self) -> &'a str {
        &self.shot.id
    }

    pub fn camera(&self) -> &'a Camera {
        &self.map.cameras[self.shot.camera]
    }

    /// The world pose, composed from the rig when the shot is rigged.
    pub fn pose(&self) -> WorldToCamera {
        match self.shot.pose {
            ShotPose::Owned(pose) => pose,
            ShotPose::Rig { instance, camera } => self.map.rig_instances[instance]
                .pose
                .then(self.map.rig_cameras[camera].pose),
        }
    }

    pub fn rig_instance_id(&self) -> Option<&'a str> {
        match self.shot.pose {
            ShotPose::Rig { instance, .. } => Some(&self.map.rig_instances[instance].id),
            ShotPose::Owned(_) => None,
        }
    }

    pub fn rig_camera_id(&self) -> Option<&'a str> {
        match self.shot.pose {
            ShotPose::Rig { camera, .. } => Some(&self.map.rig_cameras[camera].id),
            ShotPose::Owned(_) => None,
        }
    }

    pub fn rig_camera_pose(&self) -> Option<CameraToCamera> {
        match self.shot.pose {
            ShotPose::Rig { camera, .. } => Some(self.map.rig_cameras[camera].pose),
            ShotPose::Owned(_) => None,
        }
    }

    /// Observations of this shot keyed by landmark id.
    pub fn observations(&self) -> impl Iterator<Item = (&'a str, &'a Observation)> + 'a {
        let map = self.map;
        self.shot
            .observations
            .iter()
            .map(move |(&landmark, observation)| (map.landmarks[landmark].id.as_str(), observation))
    }

    pub fn observation(&self, landmark_id: &str) -> Option<&'a Observation> {
        let key = self.map.landmark_ids.get(landmark_id)?;
        self.shot.observations.get(key)
    }

    /// The landmark observed through a given feature.
    pub fn landmark_for_feature(&self, feature_id: usize) -> Option<&'a str> {
        self.shot
            .landmark_by_feature
            .get(&feature_id)
            .map(|&key| self.map.landmarks[key].id.as_str())
    }

    /// Projects a world point into normalized image coordinates.
    pub fn project(&self, point: &Point3<f64>) -> Point2<f64> {
        let camera_point = self.pose().transform_point(point);
        self.camera().project(&camera_point.coords)
    }

    pub fn project_many(&self, points: &[Point3<f64>]) -> Vec<Point2<f64>> {
        let pose = self.pose();
        let camera = self.camera();
        points
            .iter()
            .map(|p| camera.project(&pose.transform_point(p).coords))
            .collect()
    }

    /// The world-frame ray through a normalized image point.
    pub fn bearing(&self, point: &Point2<f64>) -> UnitVector3<f64> {
        let bearing = self.camera().bearing(point);
        self.pose().inverse().rotation() * bearing
    }

    pub fn bearing_many(&self, points: &[Point2<f64>]) -> Vec<UnitVector3<f64>> {
        let rotation = self.pose().inverse().rotation();
        let camera = self.camera();
        points
            .iter()
            .map(|p| rotation * camera.bearing(p))
            .collect()
    }
}

/// A landmark resolved against its map.
#[derive(Debug, Clone, Copy)]
pub struct LandmarkRef<'a> {
    map: &'a Map,
    landmark: &'a Landmark,
}

impl<'a> Deref for LandmarkRef<'a> {
    type Target = Landmark;

    fn deref(&self) -> &Landmark {
        self.landmark
    }
}

impl<'a> LandmarkRef<'a> {
    pub fn id(&self) -> &'a str {
        &self.landmark.id
    }

    pub fn shot_ids(&self) -> impl Iterator<Item = &'a str> + 'a {
        let map = self.map;
        self.landmark
            .observations
            .iter()
            .map(move |&shot| map.shots[shot].id.as_str())
    }

    /// Observations of this landmark keyed by shot id.
    pub fn observations(&self) -> impl Iterator<Item = (&'a str, &'a Observation)> + 'a {
        let map = self.map;
        let key = self
            .map
            .landmark_ids
            .get(&self.landmark.id)
            .copied();
        self.landmark.observations.iter().filter_map(move |&shot| {
            let shot = &map.shots[shot];
            shot.observations
                .get(&key?)
                .map(|observation| (shot.id.as_str(), observation))
        })
    }
}

/// A rig instance resolved against its map.
#[derive(Debug, Clone, Copy)]
pub struct RigInstanceRef<'a> {
    map: &'a Map,
    instance: &'a RigInstance,
}

impl<'a> Deref for RigInstanceRef<'a> {
    type Target = RigInstance;

    fn deref(&self) -> &RigInstance {
        self.instance
    }
}

impl<'a> RigInstanceRef<'a> {
    pub fn id(&self) -> &'a str {
        &self.instance.id
    }

    /// Pairs of (shot id, rig camera id).
    pub fn shots(&self) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        let map = self.map;
        self.instance.shots.iter().map(move |(&shot, &camera)| {
            (map.shots[shot].id.as_str(), map.rig_cameras[camera].id.as_str())
        })
    }

    pub fn shot_ids(&self) -> impl Iterator<Item = &'a str> + 'a {
        self.shots().map(|(shot, _)| shot)
    }
}

macro_rules! table_view {
    ($(#[$doc:meta])* $view:ident, $item:ty, $ids:ident, $table:ident, $kind:expr, |$map:ident, $value:ident| $wrap:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy)]
        pub struct $view<'a> {
            map: &'a Map,
        }

        impl<'a> $view<'a> {
            pub fn len(&self) -> usize {
                self.map.$table.len()
            }

            pub fn is_empty(&self) -> bool {
                self.map.$table.is_empty()
            }

            pub fn contains(&self, id: &str) -> bool {
                self.map.$ids.contains_key(id)
            }

            pub fn get(&self, id: &str) -> Result<$item, MapError> {
                let $map = self.map;
                let key = $map
                    .$ids
                    .get(id)
                    .ok_or_else(|| MapError::not_found($kind, id))?;
                let $value = &$map.$table[*key];
                Ok($wrap)
            }

            /// Entities ordered by id.
            pub fn iter(&self) -> impl Iterator<Item = $item> + 'a {
                let $map = self.map;
                $map.$ids.values().map(move |&key| {
                    let $value = &$map.$table[key];
                    $wrap
                })
            }

            pub fn ids(&self) -> impl Iterator<Item = &'a str> + 'a {
                self.map.$ids.keys().map(String::as_str)
            }
        }
    };
}

table_view!(
    /// The cameras of a map.
    CameraView, &'a Camera, camera_ids, cameras, EntityKind::Camera,
    |_map, camera| camera
);
table_view!(
    /// The rig cameras of a map.
    RigCameraView, &'a RigCamera, rig_camera_ids, rig_cameras, EntityKind::RigCamera,
    |_map, rig_camera| rig_camera
);
table_view!(
    /// The rig instances of a map.
    RigInstanceView, RigInstanceRef<'a>, rig_instance_ids, rig_instances, EntityKind::RigInstance,
    |map, instance| RigInstanceRef { map, instance }
);
table_view!(
    /// The shots of a map.
    ShotView, ShotRef<'a>, shot_ids, shots, EntityKind::Shot,
    |map, shot| ShotRef { map, shot }
);
table_view!(
    /// The landmarks of a map.
    LandmarkView, LandmarkRef<'a>, landmark_ids, landmarks, EntityKind::Landmark,
    |map, landmark| LandmarkRef { map, landmark }
);

impl Map {
    pub fn cameras(&self) -> CameraView<'_> {
        CameraView { map: self }
    }

    pub fn rig_cameras(&self) -> RigCameraView<'_> {
        RigCameraView { map: self }
    }

    pub fn rig_instances(&self) -> RigInstanceView<'_> {
        RigInstanceView { map: self }
    }

    pub fn shots(&self) -> ShotView<'_> {
        ShotView { map: self }
    }

    pub fn landmarks(&self) -> LandmarkView<'_> {
        LandmarkView { map: self }
    }

    pub fn shot(&self, id: &str) -> Result<ShotRef<'_>, MapError> {
        self.shots().get(id)
    }

    pub fn landmark(&self, id: &str) -> Result<LandmarkRef<'_>, MapError> {
        self.landmarks().get(id)
    }

    pub fn rig_instance(&self, id: &str) -> Result<RigInstanceRef<'_>, MapError> {
        self.rig_instances().get(id)
    }

    pub fn rig_camera(&self, id: &str) -> Result<&RigCamera, MapError> {
        self.rig_cameras().get(id)
    }
}
