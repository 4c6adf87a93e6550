//! The reconstruction graph of a structure-from-motion pipeline.
//!
//! A [`Map`] owns the cameras, rigs, shots (posed images) and landmarks
//! (triangulated points) of one reconstruction, together with the observations
//! linking shots to landmarks. Observations live on the shot and the landmark
//! keeps a back-reference, and every operation that touches one side updates
//! the other, so neither ever refers to something that was removed.
//!
//! A shot either owns its pose or is part of a rig. A rigged shot takes its pose
//! from the rig instance pose followed by the mounting of its rig camera:
//!
//! ```
//! use cv_camera::Camera;
//! use cv_core::nalgebra::{IsometryMatrix3, Translation3, UnitQuaternion};
//! use cv_core::{CameraToCamera, Pose, WorldToCamera};
//! use cv_sfm::Map;
//!
//! let mut map = Map::new();
//! map.create_camera(Camera::perspective("camera", 1.0, 0.0, 0.0)).unwrap();
//! let mounting = CameraToCamera(IsometryMatrix3::from_parts(
//!     Translation3::new(0.1, 0.0, 0.0),
//!     UnitQuaternion::from_euler_angles(0.0, 0.5, 0.0).to_rotation_matrix(),
//! ));
//! map.create_rig_camera("left", mounting).unwrap();
//! map.create_rig_instance("instance", WorldToCamera::identity()).unwrap();
//! map.create_rig_shot("shot", "camera", "instance", "left").unwrap();
//! assert_eq!(map.shot_pose("shot").unwrap().0, mounting.0);
//! ```
//!
//! The [`TracksManager`] is the map-independent index of (shot, track)
//! observations exchanged with feature matching; it converts to and from a map
//! and has a lossless text format.

mod error;
pub mod geo;
mod landmark;
mod map;
mod measurements;
mod observation;
mod reprojection;
mod rig;
mod shot;
mod tracks;
mod tracks_io;
mod views;

pub use error::*;
pub use geo::TopocentricConverter;
pub use landmark::*;
pub use map::*;
pub use measurements::*;
pub use observation::*;
pub use reprojection::*;
pub use rig::*;
pub use shot::*;
pub use tracks::*;
pub use tracks_io::TRACKS_HEADER;
pub use views::*;

use slotmap::new_key_type;

new_key_type! {
    pub struct CameraKey;
    pub struct RigCameraKey;
    pub struct RigInstanceKey;
    pub struct ShotKey;
    pub struct LandmarkKey;
}
