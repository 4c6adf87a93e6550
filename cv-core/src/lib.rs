//! # Rust CV Core
//!
//! Common geometric types shared by the structure-from-motion crates: poses,
//! rotation vectors and similarity transforms.
//!
//! Poses are expressed as rigid transforms between named frames. A shot's pose is
//! a [`WorldToCamera`], which maps a world point into the camera frame where `+z`
//! looks forward. Rig instances are posed the same way, with the rig reference
//! frame standing in for the camera, and each rig camera is mounted through a
//! [`CameraToCamera`] from that reference frame.
//!
//! Rotations are parameterized with [`Skew3`] rotation vectors whenever they are
//! handed to an optimizer, and the se(3) vector of a pose is laid out as
//! `[tx, ty, tz, rx, ry, rz]`.
//!
//! A [`Similarity`] maps a whole reconstruction onto another frame
//! (`x ↦ s·R·x + t`), updating poses so that every camera keeps seeing the
//! transformed scene identically.

mod pose;
mod similarity;
mod so3;

pub use nalgebra;
pub use pose::*;
pub use similarity::*;
pub use so3::*;
