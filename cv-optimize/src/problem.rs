use crate::schur::{Layout, NormalEquations, ResidualJacobian, Slot};
use crate::{BlockId, BundleError, BundleSettings, LossFunction, ParameterBlock, Residual};
use cv_core::nalgebra::{DMatrix, DVector};
use itertools::Itertools;
use log::*;
use rayon::prelude::*;
use std::collections::HashMap;
use std::fmt;

/// Relative step of the central differences.
const DIFFERENTIATION_STEP: f64 = 1e-6;
/// Damping of the first Levenberg-Marquardt step.
const INITIAL_DAMPING: f64 = 1e-4;
const MIN_DAMPING: f64 = 1e-12;
/// Beyond this damping no step can reduce the cost.
const MAX_DAMPING: f64 = 1e16;

#[derive(Debug, Clone)]
struct ResidualBlock {
    residual: Residual,
    blocks: Vec<usize>,
    loss: LossFunction,
}

/// Why [`Problem::solve`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Every block is constant or there are no residuals.
    NoFreeParameters,
    ResidualsZero,
    /// The largest gradient component fell below the gradient tolerance.
    Orthogonal,
    /// The step fell below the parameter tolerance relative to the parameters.
    SmallStep,
    /// The actual and predicted cost reductions fell below the function tolerance.
    SmallReduction,
    /// The iteration budget ran out.
    LostPatience,
    /// The damping grew without finding a step that reduces the cost.
    NoImprovementPossible,
    /// A residual stopped being finite while differentiating.
    NonFinite,
}

impl Termination {
    /// Whether the solver stopped on one of its tolerances.
    pub fn was_successful(self) -> bool {
        matches!(
            self,
            Self::NoFreeParameters
                | Self::ResidualsZero
                | Self::Orthogonal
                | Self::SmallStep
                | Self::SmallReduction
        )
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::NoFreeParameters => "no free parameters",
            Self::ResidualsZero => "residuals are zero",
            Self::Orthogonal => "gradient tolerance reached",
            Self::SmallStep => "parameter tolerance reached",
            Self::SmallReduction => "function tolerance reached",
            Self::LostPatience => "iteration budget exhausted",
            Self::NoImprovementPossible => "no improvement possible",
            Self::NonFinite => "residuals are not finite",
        };
        f.write_str(reason)
    }
}

/// The outcome of [`Problem::solve`].
#[derive(Debug, Clone, PartialEq)]
pub struct SolveReport {
    /// Half the squared norm of the robustified residuals before solving.
    pub initial_cost: f64,
    pub final_cost: f64,
    pub num_iterations: usize,
    /// Cost evaluations, the initial one included.
    pub num_evaluations: usize,
    pub termination: Termination,
    /// Whether the solver stopped on one of its tolerances.
    pub converged: bool,
}

/// A nonlinear least-squares problem over registered parameter blocks.
///
/// Blocks are registered once under their [`BlockId`] and residuals refer to
/// them by id. Only the free coordinates of the blocks reach the solver, as
/// local offsets from the registered values.
///
/// Jacobians are assembled per residual and per block. Free landmarks are
/// eliminated from the normal equations with a Schur complement, so only the
/// system over poses, cameras and other shared blocks is factored.
#[derive(Debug, Clone)]
pub struct Problem {
    blocks: Vec<ParameterBlock>,
    index: HashMap<BlockId, usize>,
    residuals: Vec<ResidualBlock>,
    num_rows: usize,
    prepared: bool,
    layout: Layout,
    params: DVector<f64>,
    /// Block values at `params`.
    values: Vec<Vec<f64>>,
}

impl Default for Problem {
    fn default() -> Self {
        Self::new()
    }
}

impl Problem {
    pub fn new() -> Self {
        Self {
            blocks: vec![],
            index: HashMap::new(),
            residuals: vec![],
            num_rows: 0,
            prepared: false,
            layout: Layout::default(),
            params: DVector::zeros(0),
            values: vec![],
        }
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.index.contains_key(id)
    }

    /// Registers a parameter block. Each id may only be registered once.
    pub fn add_block(&mut self, id: BlockId, values: Vec<f64>) -> Result<(), BundleError> {
        if self.contains(&id) {
            return Err(BundleError::Precheck(format!("{} registered twice", id)));
        }
        let block = ParameterBlock::new(id.clone(), values)?;
        self.values.push(block.initial().to_vec());
        self.index.insert(id, self.blocks.len());
        self.blocks.push(block);
        self.prepared = false;
        Ok(())
    }

    fn block_index(&self, id: &BlockId) -> Result<usize, BundleError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| BundleError::Precheck(format!("{} is not registered", id)))
    }

    pub fn block(&self, id: &BlockId) -> Option<&ParameterBlock> {
        self.index.get(id).map(|&ix| &self.blocks[ix])
    }

    /// The registered blocks in registration order.
    pub fn blocks(&self) -> impl Iterator<Item = &ParameterBlock> + '_ {
        self.blocks.iter()
    }

    /// Holds a whole block at its registered values.
    pub fn set_constant(&mut self, id: &BlockId) -> Result<(), BundleError> {
        let ix = self.block_index(id)?;
        self.blocks[ix].set_constant(true);
        self.prepared = false;
        Ok(())
    }

    /// Holds some coordinates of a block at their registered values.
    pub fn set_constant_indices(
        &mut self,
        id: &BlockId,
        indices: impl IntoIterator<Item = usize>,
    ) -> Result<(), BundleError> {
        let ix = self.block_index(id)?;
        self.blocks[ix].set_constant_indices(indices)?;
        self.prepared = false;
        Ok(())
    }

    /// Adds a residual reading the given blocks.
    ///
    /// Fails if a block is not registered, does not have the size the
    /// residual expects, or if the residual does not evaluate to finite
    /// values at the registered values.
    pub fn add_residual(
        &mut self,
        residual: Residual,
        blocks: &[BlockId],
        loss: LossFunction,
    ) -> Result<(), BundleError> {
        residual
            .validate()
            .map_err(|e| BundleError::Precheck(format!("{} residual: {}", residual.name(), e)))?;
        let indices = blocks
            .iter()
            .map(|id| self.block_index(id))
            .collect::<Result<Vec<usize>, _>>()?;
        let sizes = residual.block_sizes();
        if sizes.len() != indices.len() {
            return Err(BundleError::Precheck(format!(
                "{} residual reads {} blocks, {} given",
                residual.name(),
                sizes.len(),
                indices.len()
            )));
        }
        for (&size, &ix) in sizes.iter().zip(&indices) {
            if self.blocks[ix].len() != size {
                return Err(BundleError::Precheck(format!(
                    "{} residual expects {} values in {}, found {}",
                    residual.name(),
                    size,
                    self.blocks[ix].id,
                    self.blocks[ix].len()
                )));
            }
        }
        let initial: Vec<&[f64]> = indices.iter().map(|&ix| self.blocks[ix].initial()).collect();
        if residual.evaluate(&initial).is_none() {
            return Err(BundleError::Precheck(format!(
                "{} residual on {} is not finite",
                residual.name(),
                blocks.iter().join(", ")
            )));
        }
        self.num_rows += residual.dimension();
        self.residuals.push(ResidualBlock {
            residual,
            blocks: indices,
            loss,
        });
        self.prepared = false;
        Ok(())
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn num_residual_blocks(&self) -> usize {
        self.residuals.len()
    }

    /// The number of scalar residuals.
    pub fn num_residuals(&self) -> usize {
        self.num_rows
    }

    /// The number of free coordinates.
    pub fn num_parameters(&self) -> usize {
        self.blocks.iter().map(ParameterBlock::num_free).sum()
    }

    /// The current values of a block.
    pub fn values(&self, id: &BlockId) -> Option<&[f64]> {
        self.index.get(id).map(|&ix| self.values[ix].as_slice())
    }

    /// Assigns solver positions to the free coordinates.
    ///
    /// Free landmarks are eliminated unless a residual reads two of them, and
    /// their coordinates are placed after those of every other block.
    fn prepare(&mut self) {
        if self.prepared {
            return;
        }
        let mut eliminated: Vec<bool> = self
            .blocks
            .iter()
            .map(|block| matches!(block.id, BlockId::Landmark(_)) && block.num_free() > 0)
            .collect();
        for residual in &self.residuals {
            let landmarks: Vec<usize> = residual
                .blocks
                .iter()
                .copied()
                .unique()
                .filter(|&ix| eliminated[ix])
                .collect();
            if landmarks.len() > 1 {
                for ix in landmarks {
                    eliminated[ix] = false;
                }
            }
        }

        let mut layout = Layout {
            slots: vec![Slot::Constant; self.blocks.len()],
            eliminated: vec![],
            num_reduced: 0,
        };
        let mut next = 0;
        for (ix, block) in self.blocks.iter_mut().enumerate() {
            if eliminated[ix] {
                continue;
            }
            let start = next;
            next = block.assign_offsets(next);
            if next > start {
                layout.slots[ix] = Slot::Reduced {
                    start,
                    size: next - start,
                };
            }
        }
        layout.num_reduced = next;
        for (ix, block) in self.blocks.iter_mut().enumerate() {
            if !eliminated[ix] {
                continue;
            }
            let start = next;
            next = block.assign_offsets(next);
            layout.slots[ix] = Slot::Eliminated {
                index: layout.eliminated.len(),
            };
            layout.eliminated.push((ix, start, next - start));
        }
        debug!(
            "problem: {} reduced and {} eliminated coordinates in {} landmarks",
            layout.num_reduced,
            next - layout.num_reduced,
            layout.eliminated.len()
        );

        self.layout = layout;
        self.params = DVector::zeros(next);
        self.values = self.blocks.iter().map(|b| b.initial().to_vec()).collect();
        self.prepared = true;
    }

    fn set_params(&mut self, x: DVector<f64>) {
        self.values = self
            .blocks
            .iter()
            .map(|block| block.values_at(x.as_slice()))
            .collect();
        self.params = x;
    }

    /// The local coordinates of a block at the current parameters.
    fn delta(&self, ix: usize) -> Vec<f64> {
        let block = &self.blocks[ix];
        let mut delta = vec![0.0; block.len()];
        for (coordinate, offset) in block.offsets() {
            delta[coordinate] = self.params[offset];
        }
        delta
    }

    /// The norm of the current values of the free coordinates.
    fn free_values_norm(&self) -> f64 {
        self.blocks
            .iter()
            .zip(&self.values)
            .flat_map(|(block, values)| block.offsets().map(move |(ix, _)| values[ix]))
            .map(|v| v * v)
            .sum::<f64>()
            .sqrt()
    }

    /// Evaluates one residual with the robust loss applied, optionally replacing a block.
    fn evaluate_residual(
        &self,
        residual: &ResidualBlock,
        replace: Option<(usize, &[f64])>,
    ) -> Option<Vec<f64>> {
        let blocks: Vec<&[f64]> = residual
            .blocks
            .iter()
            .map(|&ix| match replace {
                Some((replaced, values)) if replaced == ix => values,
                _ => self.values[ix].as_slice(),
            })
            .collect();
        let mut e = residual.residual.evaluate(&blocks)?;
        let scaling = residual
            .loss
            .scaling(e.iter().map(|v| v * v).sum::<f64>());
        for v in &mut e {
            *v *= scaling;
        }
        Some(e)
    }

    /// The robustified residuals at the current parameters.
    pub fn residuals(&self) -> Option<DVector<f64>> {
        let mut residuals = Vec::with_capacity(self.num_rows);
        for residual in &self.residuals {
            residuals.extend(self.evaluate_residual(residual, None)?);
        }
        Some(DVector::from_vec(residuals))
    }

    /// Half the squared norm of the robustified residuals.
    pub fn cost(&self) -> f64 {
        self.residuals()
            .map_or(f64::INFINITY, |r| 0.5 * r.norm_squared())
    }

    /// Central differences of one residual with respect to each free block it reads.
    fn residual_jacobian(&self, residual: &ResidualBlock) -> Option<ResidualJacobian> {
        let values = DVector::from_vec(self.evaluate_residual(residual, None)?);
        let mut blocks = vec![];
        // A block may be read twice, e.g. a rig instance shared by both sides of a relative motion.
        for ix in residual.blocks.iter().copied().unique() {
            let block = &self.blocks[ix];
            let num_free = block.num_free();
            if num_free == 0 {
                continue;
            }
            let mut jacobian = DMatrix::zeros(values.len(), num_free);
            let mut delta = self.delta(ix);
            for (column, (coordinate, _)) in block.offsets().enumerate() {
                let original = delta[coordinate];
                let step = DIFFERENTIATION_STEP * self.values[ix][coordinate].abs().max(1.0);
                delta[coordinate] = original + step;
                let perturbed = block.retract(&delta);
                let forward = self.evaluate_residual(residual, Some((ix, perturbed.as_slice())))?;
                delta[coordinate] = original - step;
                let perturbed = block.retract(&delta);
                let backward = self.evaluate_residual(residual, Some((ix, perturbed.as_slice())))?;
                delta[coordinate] = original;
                for (row, (f, b)) in forward.iter().zip(&backward).enumerate() {
                    jacobian[(row, column)] = (f - b) / (2.0 * step);
                }
            }
            blocks.push((ix, jacobian));
        }
        Some(ResidualJacobian {
            residual: values,
            blocks,
        })
    }

    /// The block Jacobians of every residual at the current parameters.
    fn jacobians(&self) -> Option<Vec<ResidualJacobian>> {
        self.residuals
            .par_iter()
            .map(|residual| self.residual_jacobian(residual))
            .collect()
    }

    /// Minimizes the problem with Levenberg-Marquardt.
    ///
    /// Each iteration solves the damped normal equations reduced over the
    /// eliminated landmarks. A step that lowers the cost is kept and the
    /// damping decreases, otherwise the damping increases and the step is
    /// solved again. The block values are left at the best solution found,
    /// whether or not the solver converged.
    pub fn solve(&mut self, settings: &BundleSettings) -> SolveReport {
        self.prepare();
        let initial_cost = self.cost();
        if self.params.is_empty() || self.num_rows == 0 {
            debug!(
                "nothing to solve: {} parameters and {} residuals",
                self.params.len(),
                self.num_rows
            );
            return SolveReport {
                initial_cost,
                final_cost: initial_cost,
                num_iterations: 0,
                num_evaluations: 0,
                termination: Termination::NoFreeParameters,
                converged: true,
            };
        }

        let layout = self.layout.clone();
        let mut cost = initial_cost;
        let mut lambda = INITIAL_DAMPING;
        let mut num_iterations = 0;
        let mut num_evaluations = 1;
        let termination = 'solve: loop {
            if cost == 0.0 {
                break Termination::ResidualsZero;
            }
            let jacobians = match self.jacobians() {
                Some(jacobians) => jacobians,
                None => break Termination::NonFinite,
            };
            let equations = NormalEquations::new(&layout, &jacobians);
            if equations.gradient_max_norm() <= settings.gradient_tolerance {
                break Termination::Orthogonal;
            }
            loop {
                if num_iterations >= settings.patience {
                    break 'solve Termination::LostPatience;
                }
                num_iterations += 1;
                let step = match equations.solve(lambda) {
                    Some(step) => step,
                    None => {
                        lambda *= 10.0;
                        if lambda > MAX_DAMPING {
                            break 'solve Termination::NoImprovementPossible;
                        }
                        continue;
                    }
                };
                let tolerance = settings.parameter_tolerance;
                if step.norm() <= tolerance * (self.free_values_norm() + tolerance) {
                    break 'solve Termination::SmallStep;
                }
                let predicted: f64 = jacobians
                    .iter()
                    .map(|jacobian| {
                        let change = jacobian.apply(&layout, &step);
                        -(jacobian.residual.dot(&change) + 0.5 * change.norm_squared())
                    })
                    .sum();

                let previous = self.params.clone();
                self.set_params(&previous + step);
                let candidate = self.cost();
                num_evaluations += 1;
                trace!(
                    "iteration {}: damping {:e}, cost {} -> {}",
                    num_iterations,
                    lambda,
                    cost,
                    candidate
                );
                let threshold = settings.function_tolerance * cost;
                let small_reduction = (cost - candidate).abs() <= threshold && predicted <= threshold;
                if candidate < cost {
                    cost = candidate;
                    lambda = (lambda * 0.1).max(MIN_DAMPING);
                    if small_reduction {
                        break 'solve Termination::SmallReduction;
                    }
                    continue 'solve;
                }
                self.set_params(previous);
                if small_reduction {
                    break 'solve Termination::SmallReduction;
                }
                lambda *= 10.0;
                if lambda > MAX_DAMPING {
                    break 'solve Termination::NoImprovementPossible;
                }
            }
        };

        SolveReport {
            initial_cost,
            final_cost: cost,
            num_iterations,
            num_evaluations,
            termination,
            converged: termination.was_successful(),
        }
    }

    /// Marginal covariances of the given blocks at the current parameters.
    ///
    /// Each block's covariance is its part of `(JᵀJ)⁻¹`. Only the blocks
    /// asked for are computed. Landmarks are recovered from the reduced
    /// system through their Schur complement. Singular systems fall back to
    /// the pseudo-inverse. Constant and unknown blocks are skipped. Returns
    /// `None` before [`Problem::solve`].
    pub fn covariance(&self, ids: &[BlockId]) -> Option<Covariance> {
        if !self.prepared || self.params.is_empty() {
            return None;
        }
        let requested: Vec<usize> = ids
            .iter()
            .filter_map(|id| self.index.get(id).copied())
            .filter(|&ix| self.layout.slots[ix] != Slot::Constant)
            .unique()
            .collect();
        let jacobians = self.jacobians()?;
        let equations = NormalEquations::new(&self.layout, &jacobians);
        let free = equations.covariances(&requested)?;
        let blocks = requested
            .into_iter()
            .zip(free)
            .map(|(ix, free)| {
                let block = &self.blocks[ix];
                let coordinates: Vec<usize> = block.offsets().map(|(coordinate, _)| coordinate).collect();
                let mut covariance = DMatrix::zeros(block.len(), block.len());
                for (i, &ci) in coordinates.iter().enumerate() {
                    for (j, &cj) in coordinates.iter().enumerate() {
                        covariance[(ci, cj)] = free[(i, j)];
                    }
                }
                (block.id.clone(), covariance)
            })
            .collect();
        Some(Covariance { blocks })
    }
}

/// Marginal covariances of some blocks of a solved [`Problem`].
#[derive(Debug, Clone, PartialEq)]
pub struct Covariance {
    blocks: HashMap<BlockId, DMatrix<f64>>,
}

impl Covariance {
    /// The covariance of a block in its local coordinates.
    ///
    /// Rows and columns of constant coordinates are zero.
    pub fn block(&self, id: &BlockId) -> Option<&DMatrix<f64>> {
        self.blocks.get(id)
    }
}
