//! Block-sparse normal equations reduced over the landmark blocks.
//!
//! The free blocks of a problem are split in two sets. Eliminated blocks are
//! landmarks that never share a residual with another eliminated block, so
//! their part of `JᵀJ` is block diagonal. Every other free block is reduced.
//! With `H` and `g` the normal matrix and gradient,
//!
//! ```text
//!   S   = H_rr - Σ_e H_re H_ee⁻¹ H_er
//!   S δ_r = -(g_r - Σ_e H_re H_ee⁻¹ g_e)
//!   δ_e = -H_ee⁻¹ (g_e + H_er δ_r)
//! ```
//!
//! only the dense system `S` over the reduced blocks (poses, cameras, rig
//! cameras and biases) is ever factored.

use cv_core::nalgebra::{Cholesky, DMatrix, DVector, Dynamic};
use std::collections::BTreeMap;

/// Singular values below this are dropped by the pseudo-inverse fallbacks.
const PSEUDO_INVERSE_EPSILON: f64 = 1e-12;

/// Where the free coordinates of a block live in the solver vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Slot {
    Constant,
    /// First solver position and number of free coordinates of a reduced block.
    Reduced { start: usize, size: usize },
    /// Index among the eliminated blocks.
    Eliminated { index: usize },
}

/// The split of the solver vector into reduced and eliminated coordinates.
///
/// Reduced coordinates come first, so `start` of a reduced block is also
/// its position in `S`.
#[derive(Debug, Clone, Default)]
pub(crate) struct Layout {
    pub slots: Vec<Slot>,
    /// `(block index, first solver position, size)` of every eliminated block.
    pub eliminated: Vec<(usize, usize, usize)>,
    pub num_reduced: usize,
}

impl Layout {
    /// The first solver position of a free block.
    pub fn start(&self, block: usize) -> Option<usize> {
        match self.slots[block] {
            Slot::Constant => None,
            Slot::Reduced { start, .. } => Some(start),
            Slot::Eliminated { index } => Some(self.eliminated[index].1),
        }
    }
}

/// The robustified residual of one residual block and its Jacobian with
/// respect to each free block it reads.
#[derive(Debug, Clone)]
pub(crate) struct ResidualJacobian {
    pub residual: DVector<f64>,
    /// `(block index, dimension × free coordinates)`.
    pub blocks: Vec<(usize, DMatrix<f64>)>,
}

impl ResidualJacobian {
    /// `J δ` for the solver step `step`.
    pub fn apply(&self, layout: &Layout, step: &DVector<f64>) -> DVector<f64> {
        let mut product = DVector::zeros(self.residual.len());
        for (block, jacobian) in &self.blocks {
            if let Some(start) = layout.start(*block) {
                product += jacobian * step.rows(start, jacobian.ncols());
            }
        }
        product
    }
}

#[derive(Debug, Clone)]
struct EliminatedBlock {
    hessian: DMatrix<f64>,
    gradient: DVector<f64>,
    /// `H_re` of every reduced block sharing a residual, by reduced start.
    coupling: BTreeMap<usize, DMatrix<f64>>,
}

/// `JᵀJ` and `Jᵀr` accumulated block by block.
#[derive(Debug, Clone)]
pub(crate) struct NormalEquations<'a> {
    layout: &'a Layout,
    reduced: DMatrix<f64>,
    reduced_gradient: DVector<f64>,
    eliminated: Vec<EliminatedBlock>,
}

/// A factored symmetric system, or its pseudo-inverse when it is singular.
enum Factor {
    Cholesky(Cholesky<f64, Dynamic>),
    PseudoInverse(DMatrix<f64>),
}

impl Factor {
    fn new(matrix: DMatrix<f64>) -> Option<Self> {
        match matrix.clone().cholesky() {
            Some(cholesky) => Some(Self::Cholesky(cholesky)),
            None => matrix
                .pseudo_inverse(PSEUDO_INVERSE_EPSILON)
                .ok()
                .map(Self::PseudoInverse),
        }
    }

    fn solve(&self, rhs: &DMatrix<f64>) -> DMatrix<f64> {
        match self {
            Self::Cholesky(cholesky) => cholesky.solve(rhs),
            Self::PseudoInverse(inverse) => inverse * rhs,
        }
    }

    fn inverse(&self) -> DMatrix<f64> {
        match self {
            Self::Cholesky(cholesky) => cholesky.inverse(),
            Self::PseudoInverse(inverse) => inverse.clone(),
        }
    }
}

fn damped(matrix: &DMatrix<f64>, lambda: f64) -> DMatrix<f64> {
    let mut matrix = matrix.clone();
    for i in 0..matrix.nrows() {
        matrix[(i, i)] += lambda * matrix[(i, i)].max(1.0);
    }
    matrix
}

impl<'a> NormalEquations<'a> {
    pub fn new(layout: &'a Layout, jacobians: &[ResidualJacobian]) -> Self {
        let mut reduced = DMatrix::zeros(layout.num_reduced, layout.num_reduced);
        let mut reduced_gradient = DVector::zeros(layout.num_reduced);
        let mut eliminated: Vec<EliminatedBlock> = layout
            .eliminated
            .iter()
            .map(|&(_, _, size)| EliminatedBlock {
                hessian: DMatrix::zeros(size, size),
                gradient: DVector::zeros(size),
                coupling: BTreeMap::new(),
            })
            .collect();

        for jacobian in jacobians {
            for (a, ja) in &jacobian.blocks {
                let gradient = ja.tr_mul(&jacobian.residual);
                match layout.slots[*a] {
                    Slot::Constant => continue,
                    Slot::Reduced { start, .. } => {
                        let mut rows = reduced_gradient.rows_mut(start, ja.ncols());
                        rows += gradient;
                    }
                    Slot::Eliminated { index } => eliminated[index].gradient += gradient,
                }
                for (b, jb) in &jacobian.blocks {
                    match (layout.slots[*a], layout.slots[*b]) {
                        (Slot::Reduced { start: ra, .. }, Slot::Reduced { start: rb, .. }) => {
                            let mut view = reduced.slice_mut((ra, rb), (ja.ncols(), jb.ncols()));
                            view += ja.tr_mul(jb);
                        }
                        (Slot::Reduced { start, .. }, Slot::Eliminated { index }) => {
                            let block = &mut eliminated[index];
                            let product = ja.tr_mul(jb);
                            match block.coupling.get_mut(&start) {
                                Some(coupling) => *coupling += product,
                                None => {
                                    block.coupling.insert(start, product);
                                }
                            }
                        }
                        (Slot::Eliminated { index: ea }, Slot::Eliminated { index: eb })
                            if ea == eb =>
                        {
                            eliminated[ea].hessian += ja.tr_mul(jb);
                        }
                        // Eliminated pairs never share a residual and the
                        // transposed couplings are implied.
                        _ => {}
                    }
                }
            }
        }

        Self {
            layout,
            reduced,
            reduced_gradient,
            eliminated,
        }
    }

    /// The largest absolute component of the gradient.
    pub fn gradient_max_norm(&self) -> f64 {
        self.eliminated
            .iter()
            .flat_map(|block| block.gradient.iter())
            .chain(self.reduced_gradient.iter())
            .fold(0.0, |max, g| g.abs().max(max))
    }

    /// The step `-(H + λ D)⁻¹ g` with `D` the clamped diagonal of `H`.
    ///
    /// Returns `None` when the damped system is not positive definite.
    pub fn solve(&self, lambda: f64) -> Option<DVector<f64>> {
        let num_reduced = self.layout.num_reduced;
        let mut schur = damped(&self.reduced, lambda);
        let mut rhs = -&self.reduced_gradient;
        let mut inverses = Vec::with_capacity(self.eliminated.len());
        for block in &self.eliminated {
            let inverse = damped(&block.hessian, lambda).cholesky()?.inverse();
            for (&ra, hae) in &block.coupling {
                let weighted = hae * &inverse;
                let mut rows = rhs.rows_mut(ra, hae.nrows());
                rows += &weighted * &block.gradient;
                for (&rb, hbe) in &block.coupling {
                    let mut view = schur.slice_mut((ra, rb), (hae.nrows(), hbe.nrows()));
                    view -= &weighted * hbe.transpose();
                }
            }
            inverses.push(inverse);
        }

        let mut step = DVector::zeros(num_reduced + self.eliminated_size());
        if num_reduced > 0 {
            let reduced_step = schur.cholesky()?.solve(&rhs);
            step.rows_mut(0, num_reduced).copy_from(&reduced_step);
        }
        for ((block, inverse), &(_, start, size)) in self
            .eliminated
            .iter()
            .zip(&inverses)
            .zip(&self.layout.eliminated)
        {
            let mut rhs = block.gradient.clone();
            for (&ra, hae) in &block.coupling {
                rhs += hae.tr_mul(&step.rows(ra, hae.nrows()).into_owned());
            }
            step.rows_mut(start, size).copy_from(&(-(inverse * rhs)));
        }
        Some(step)
    }

    fn eliminated_size(&self) -> usize {
        self.layout.eliminated.iter().map(|&(_, _, size)| size).sum()
    }

    /// Marginal covariances of the requested blocks, in the order given.
    ///
    /// Only the columns of `S⁻¹` the requested blocks need are solved for.
    /// Singular systems fall back to their pseudo-inverse.
    pub fn covariances(&self, blocks: &[usize]) -> Option<Vec<DMatrix<f64>>> {
        let num_reduced = self.layout.num_reduced;
        let mut schur = self.reduced.clone();
        let mut inverses = Vec::with_capacity(self.eliminated.len());
        for block in &self.eliminated {
            let inverse = Factor::new(block.hessian.clone())?.inverse();
            for (&ra, hae) in &block.coupling {
                let weighted = hae * &inverse;
                for (&rb, hbe) in &block.coupling {
                    let mut view = schur.slice_mut((ra, rb), (hae.nrows(), hbe.nrows()));
                    view -= &weighted * hbe.transpose();
                }
            }
            inverses.push(inverse);
        }
        let schur = if num_reduced > 0 {
            Some(Factor::new(schur)?)
        } else {
            None
        };

        blocks
            .iter()
            .map(|&block| match self.layout.slots[block] {
                Slot::Constant => None,
                Slot::Reduced { start, size } => {
                    let columns = DMatrix::from_fn(num_reduced, size, |i, j| {
                        if i == start + j {
                            1.0
                        } else {
                            0.0
                        }
                    });
                    let solved = schur.as_ref()?.solve(&columns);
                    Some(solved.rows(start, size).into_owned())
                }
                Slot::Eliminated { index } => {
                    let inverse = &inverses[index];
                    let coupling = &self.eliminated[index].coupling;
                    if coupling.is_empty() {
                        return Some(inverse.clone());
                    }
                    let mut hre = DMatrix::zeros(num_reduced, inverse.nrows());
                    for (&ra, hae) in coupling {
                        hre.slice_mut((ra, 0), (hae.nrows(), hae.ncols())).copy_from(hae);
                    }
                    let solved = schur.as_ref()?.solve(&hre);
                    Some(inverse + inverse * hre.tr_mul(&solved) * inverse)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    fn random(rng: &mut SmallRng, rows: usize, columns: usize) -> DMatrix<f64> {
        DMatrix::from_fn(rows, columns, |_, _| rng.gen_range(-1.0..1.0))
    }

    /// Two reduced blocks of 6 and 2 coordinates and three eliminated landmarks.
    fn system(seed: u64) -> (Layout, Vec<ResidualJacobian>) {
        let mut rng = SmallRng::seed_from_u64(seed);
        let layout = Layout {
            slots: vec![
                Slot::Reduced { start: 0, size: 6 },
                Slot::Constant,
                Slot::Reduced { start: 6, size: 2 },
                Slot::Eliminated { index: 0 },
                Slot::Eliminated { index: 1 },
                Slot::Eliminated { index: 2 },
            ],
            eliminated: vec![(3, 8, 3), (4, 11, 3), (5, 14, 3)],
            num_reduced: 8,
        };
        let mut jacobians = vec![];
        for (reduced, size) in [(0, 6), (2, 2)] {
            jacobians.push(ResidualJacobian {
                residual: random(&mut rng, size, 1).column(0).into_owned(),
                blocks: vec![(reduced, random(&mut rng, size, size))],
            });
            for landmark in 3..6 {
                jacobians.push(ResidualJacobian {
                    residual: random(&mut rng, 2, 1).column(0).into_owned(),
                    blocks: vec![
                        (reduced, random(&mut rng, 2, size)),
                        (landmark, random(&mut rng, 2, 3)),
                    ],
                });
            }
        }
        jacobians.push(ResidualJacobian {
            residual: random(&mut rng, 3, 1).column(0).into_owned(),
            blocks: vec![(0, random(&mut rng, 3, 6)), (2, random(&mut rng, 3, 2))],
        });
        (layout, jacobians)
    }

    fn dense(layout: &Layout, jacobians: &[ResidualJacobian]) -> (DMatrix<f64>, DVector<f64>) {
        let rows: usize = jacobians.iter().map(|j| j.residual.len()).sum();
        let mut jacobian = DMatrix::zeros(rows, 17);
        let mut residual = DVector::zeros(rows);
        let mut row = 0;
        for j in jacobians {
            residual.rows_mut(row, j.residual.len()).copy_from(&j.residual);
            for (block, matrix) in &j.blocks {
                let start = layout.start(*block).unwrap();
                jacobian
                    .slice_mut((row, start), (matrix.nrows(), matrix.ncols()))
                    .copy_from(matrix);
            }
            row += j.residual.len();
        }
        (jacobian.tr_mul(&jacobian), jacobian.tr_mul(&residual))
    }

    #[test]
    fn reduced_steps_match_the_full_system() {
        let (layout, jacobians) = system(0);
        let equations = NormalEquations::new(&layout, &jacobians);
        let (hessian, gradient) = dense(&layout, &jacobians);
        assert_relative_eq!(equations.gradient_max_norm(), gradient.amax(), epsilon = 1e-12);
        for lambda in [1e-6, 1e-2, 10.0] {
            let step = equations.solve(lambda).unwrap();
            let expected = -damped(&hessian, lambda).cholesky().unwrap().solve(&gradient);
            assert_relative_eq!(step, expected, epsilon = 1e-9, max_relative = 1e-7);
        }
    }

    #[test]
    fn covariances_match_the_full_inverse() {
        let (layout, jacobians) = system(1);
        let equations = NormalEquations::new(&layout, &jacobians);
        let (hessian, _) = dense(&layout, &jacobians);
        let inverse = hessian.try_inverse().unwrap();
        let covariances = equations.covariances(&[4, 0, 2]).unwrap();
        assert_eq!(covariances.len(), 3);
        assert_relative_eq!(
            covariances[0],
            inverse.slice((11, 11), (3, 3)).into_owned(),
            epsilon = 1e-9,
            max_relative = 1e-7
        );
        assert_relative_eq!(
            covariances[1],
            inverse.slice((0, 0), (6, 6)).into_owned(),
            epsilon = 1e-9,
            max_relative = 1e-7
        );
        assert_relative_eq!(
            covariances[2],
            inverse.slice((6, 6), (2, 2)).into_owned(),
            epsilon = 1e-9,
            max_relative = 1e-7
        );
        assert!(equations.covariances(&[1]).is_none());
    }
}
