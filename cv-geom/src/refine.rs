use crate::{AlignmentSettings, Correspondences};
use cv_core::nalgebra::{
    dimension::{Dynamic, U1},
    DMatrix, DVector, VecStorage, Vector3,
};
use cv_core::{Similarity, Skew3};
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, MinimizationReport};
use log::*;

/// Relative step of the central differences.
const DIFFERENTIATION_STEP: f64 = 1e-6;

/// Alignment of correspondences as a least-squares problem.
///
/// The parameters are `[δ, t, ln s]`, where `δ` rotates the initial rotation
/// (`R = exp(δ)·R₀`) and `ln s` is only present when the scale is estimated.
#[derive(Clone)]
pub struct SimilarityRefinement<'a> {
    correspondences: &'a Correspondences,
    base: Similarity,
    orientation_weight: f64,
    estimate_scale: bool,
    params: DVector<f64>,
}

impl<'a> SimilarityRefinement<'a> {
    pub fn new(
        correspondences: &'a Correspondences,
        initial: Similarity,
        settings: &AlignmentSettings,
    ) -> Self {
        let t = initial.translation;
        let mut params = vec![0.0, 0.0, 0.0, t.x, t.y, t.z];
        if settings.estimate_scale {
            params.push(initial.scale.ln());
        }
        Self {
            correspondences,
            base: initial,
            orientation_weight: settings.orientation_weight,
            estimate_scale: settings.estimate_scale,
            params: DVector::from_vec(params),
        }
    }

    fn similarity_at(&self, x: &DVector<f64>) -> Similarity {
        let rotation = Skew3(Vector3::new(x[0], x[1], x[2])).exp() * self.base.rotation;
        let scale = if self.estimate_scale {
            x[6].exp()
        } else {
            self.base.scale
        };
        Similarity::new(rotation, Vector3::new(x[3], x[4], x[5]), scale)
    }

    /// The current estimate.
    pub fn similarity(&self) -> Similarity {
        self.similarity_at(&self.params)
    }

    fn num_residuals(&self) -> usize {
        let orientations = if self.orientation_weight > 0.0 {
            self.correspondences.orientations.len()
        } else {
            0
        };
        3 * (self.correspondences.len() + orientations)
    }

    fn residuals_at(&self, x: &DVector<f64>) -> DVector<f64> {
        let similarity = self.similarity_at(x);
        let c = self.correspondences;
        let mut residuals = DVector::zeros(self.num_residuals());
        for (ix, ((source, target), &weight)) in
            c.source.iter().zip(&c.target).zip(&c.weights).enumerate()
        {
            let error = (similarity.transform_point(source) - target) * weight.sqrt();
            residuals.fixed_rows_mut::<3>(3 * ix).copy_from(&error);
        }
        if self.orientation_weight > 0.0 {
            let offset = 3 * c.len();
            let inverse = similarity.rotation.inverse();
            for (ix, (source, target)) in c.orientations.iter().enumerate() {
                // The transformed source orientation must match the target one.
                let difference = source * inverse * target.inverse();
                let error = Skew3::log(&difference).0 * self.orientation_weight.sqrt();
                residuals
                    .fixed_rows_mut::<3>(offset + 3 * ix)
                    .copy_from(&error);
            }
        }
        residuals
    }
}

impl<'a> LeastSquaresProblem<f64, Dynamic, Dynamic> for SimilarityRefinement<'a> {
    type ResidualStorage = VecStorage<f64, Dynamic, U1>;
    type JacobianStorage = VecStorage<f64, Dynamic, Dynamic>;
    type ParameterStorage = VecStorage<f64, Dynamic, U1>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.copy_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        Some(self.residuals_at(&self.params))
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let mut jacobian = DMatrix::zeros(self.num_residuals(), self.params.len());
        let mut x = self.params.clone();
        for column in 0..self.params.len() {
            let original = x[column];
            let step = DIFFERENTIATION_STEP * original.abs().max(1.0);
            x[column] = original + step;
            let forward = self.residuals_at(&x);
            x[column] = original - step;
            let backward = self.residuals_at(&x);
            x[column] = original;
            jacobian
                .column_mut(column)
                .copy_from(&((forward - backward) / (2.0 * step)));
        }
        Some(jacobian)
    }
}

/// Refines `initial` by minimizing point distances and orientation differences.
pub fn refine_similarity(
    correspondences: &Correspondences,
    initial: Similarity,
    settings: &AlignmentSettings,
) -> (Similarity, MinimizationReport<f64>) {
    let problem = SimilarityRefinement::new(correspondences, initial, settings);
    let (problem, report) = LevenbergMarquardt::new()
        .with_patience(settings.patience)
        .minimize(problem);
    debug!(
        "similarity refinement: {:?} after {} evaluations, objective {}",
        report.termination, report.number_of_evaluations, report.objective_function
    );
    (problem.similarity(), report)
}
