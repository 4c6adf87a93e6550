use crate::BundleError;
use cv_core::nalgebra::Vector3;
use cv_core::Skew3;
use std::collections::BTreeSet;
use std::fmt;

/// The entity behind a parameter block.
///
/// Blocks are keyed by the id of the entity they hold, so an entity shared by
/// many residuals (a camera, a rig camera) is registered exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlockId {
    /// `[tx, ty, tz, rx, ry, rz]` of a shot's world-to-camera pose.
    ShotPose(String),
    /// `[tx, ty, tz, rx, ry, rz]` of a rig instance's world-to-rig pose.
    RigInstance(String),
    /// `[tx, ty, tz, rx, ry, rz]` of a rig camera's rig-to-camera mounting.
    RigCamera(String),
    /// The projection parameters of a camera.
    Camera(String),
    /// `[x, y, z]` of a landmark.
    Landmark(String),
    /// `[rx, ry, rz, tx, ty, tz, s]` of the GPS bias of a camera.
    Bias(String),
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShotPose(id) => write!(f, "shot pose `{}`", id),
            Self::RigInstance(id) => write!(f, "rig instance `{}`", id),
            Self::RigCamera(id) => write!(f, "rig camera `{}`", id),
            Self::Camera(id) => write!(f, "camera `{}`", id),
            Self::Landmark(id) => write!(f, "landmark `{}`", id),
            Self::Bias(id) => write!(f, "bias `{}`", id),
        }
    }
}

/// How the solver's local coordinates update a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Manifold {
    /// Values are updated by plain addition.
    Euclidean,
    /// `[t, r]` with `t` updated by addition and the rotation vector `r`
    /// updated on the chart `exp(δ)·exp(r₀)`.
    Pose,
}

impl Manifold {
    /// The manifold suited to the values of a block.
    pub fn of(id: &BlockId) -> Self {
        match id {
            BlockId::ShotPose(_) | BlockId::RigInstance(_) | BlockId::RigCamera(_) => Self::Pose,
            _ => Self::Euclidean,
        }
    }
}

/// A parameter block: its values at registration and which of them may move.
#[derive(Debug, Clone)]
pub struct ParameterBlock {
    pub id: BlockId,
    pub manifold: Manifold,
    initial: Vec<f64>,
    constant: bool,
    constant_indices: BTreeSet<usize>,
    /// Position of each local coordinate in the solver vector, if free.
    offsets: Vec<Option<usize>>,
}

impl ParameterBlock {
    pub fn new(id: BlockId, values: Vec<f64>) -> Result<Self, BundleError> {
        let manifold = Manifold::of(&id);
        if manifold == Manifold::Pose && values.len() != 6 {
            return Err(BundleError::Precheck(format!(
                "{} has {} values instead of 6",
                id,
                values.len()
            )));
        }
        if let Some(value) = values.iter().find(|v| !v.is_finite()) {
            return Err(BundleError::Precheck(format!(
                "{} has a non-finite value {}",
                id, value
            )));
        }
        Ok(Self {
            id,
            manifold,
            offsets: vec![None; values.len()],
            initial: values,
            constant: false,
            constant_indices: BTreeSet::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.initial.len()
    }

    pub fn is_empty(&self) -> bool {
        self.initial.is_empty()
    }

    pub fn is_constant(&self) -> bool {
        self.constant
    }

    pub fn set_constant(&mut self, constant: bool) {
        self.constant = constant;
    }

    /// Holds the given coordinates at their initial values.
    pub fn set_constant_indices(
        &mut self,
        indices: impl IntoIterator<Item = usize>,
    ) -> Result<(), BundleError> {
        for index in indices {
            if index >= self.len() {
                return Err(BundleError::Precheck(format!(
                    "{} has no coordinate {}",
                    self.id, index
                )));
            }
            self.constant_indices.insert(index);
        }
        Ok(())
    }

    /// The values the block was registered with.
    pub fn initial(&self) -> &[f64] {
        &self.initial
    }

    /// The local coordinates the solver may move.
    pub fn free_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len()).filter(move |ix| !self.constant && !self.constant_indices.contains(ix))
    }

    pub fn num_free(&self) -> usize {
        self.free_indices().count()
    }

    /// Assigns solver vector positions from `next` on and returns the next free position.
    pub(crate) fn assign_offsets(&mut self, mut next: usize) -> usize {
        let free: Vec<usize> = self.free_indices().collect();
        self.offsets = vec![None; self.len()];
        for ix in free {
            self.offsets[ix] = Some(next);
            next += 1;
        }
        next
    }

    /// `(coordinate, solver position)` of every free coordinate.
    pub(crate) fn offsets(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.offsets
            .iter()
            .enumerate()
            .filter_map(|(ix, offset)| offset.map(|o| (ix, o)))
    }

    /// The block values at the local coordinates `delta`.
    pub fn retract(&self, delta: &[f64]) -> Vec<f64> {
        let mut values = self.initial.clone();
        match self.manifold {
            Manifold::Euclidean => {
                for (value, d) in values.iter_mut().zip(delta) {
                    *value += d;
                }
            }
            Manifold::Pose => {
                for ix in 0..3 {
                    values[ix] += delta[ix];
                }
                let step = Vector3::new(delta[3], delta[4], delta[5]);
                if step != Vector3::zeros() {
                    let base = Skew3(Vector3::new(values[3], values[4], values[5])).exp();
                    let rotation = Skew3::log(&(Skew3(step).exp() * base)).0;
                    values[3..6].copy_from_slice(rotation.as_slice());
                }
            }
        }
        values
    }

    /// The block values at the solver vector `x`.
    pub(crate) fn values_at(&self, x: &[f64]) -> Vec<f64> {
        let mut delta = vec![0.0; self.len()];
        for (ix, offset) in self.offsets() {
            delta[ix] = x[offset];
        }
        self.retract(&delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cv_core::nalgebra::Rotation3;

    #[test]
    fn pose_blocks_rotate_on_the_left() {
        let block =
            ParameterBlock::new(BlockId::ShotPose("a".into()), vec![1.0, 2.0, 3.0, 0.1, 0.2, 0.3])
                .unwrap();
        let values = block.retract(&[0.5, 0.0, 0.0, 0.0, 0.0, 0.2]);
        assert_relative_eq!(values[0], 1.5);
        let expected = Rotation3::from_scaled_axis(Vector3::new(0.0, 0.0, 0.2))
            * Rotation3::from_scaled_axis(Vector3::new(0.1, 0.2, 0.3));
        let actual = Rotation3::from_scaled_axis(Vector3::new(values[3], values[4], values[5]));
        assert_relative_eq!(actual, expected, epsilon = 1e-12);
    }

    #[test]
    fn constant_coordinates_get_no_offset() {
        let mut block = ParameterBlock::new(BlockId::Camera("c".into()), vec![0.8, 0.0, 0.0])
            .unwrap();
        block.set_constant_indices([1, 2]).unwrap();
        assert_eq!(block.assign_offsets(4), 5);
        assert_eq!(block.offsets().collect::<Vec<_>>(), vec![(0, 4)]);
        assert_relative_eq!(block.values_at(&[0.0, 0.0, 0.0, 0.0, 0.1])[0], 0.9);
        assert!(block.set_constant_indices([3]).is_err());

        block.set_constant(true);
        assert_eq!(block.assign_offsets(4), 4);
        assert_eq!(block.num_free(), 0);
    }

    #[test]
    fn malformed_blocks_are_rejected() {
        assert!(ParameterBlock::new(BlockId::RigCamera("r".into()), vec![0.0; 5]).is_err());
        assert!(ParameterBlock::new(BlockId::Landmark("l".into()), vec![0.0, f64::NAN, 0.0]).is_err());
    }
}
