use crate::{
    refine_similarity, similarity_from_points, AlignmentError, AlignmentSettings, Correspondences,
};
use cv_core::Similarity;
use cv_sfm::Map;
use log::*;

/// The result of aligning a source onto a reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Alignment {
    /// Maps source coordinates into the reference frame.
    pub similarity: Similarity,
    pub num_shots: usize,
    pub num_landmarks: usize,
    /// Root mean square distance between transformed source points and their targets.
    pub rms: f64,
    /// Whether the closed form was refined and the refinement converged.
    pub refined: bool,
}

fn rms(correspondences: &Correspondences, similarity: &Similarity) -> f64 {
    if correspondences.is_empty() {
        return 0.0;
    }
    let sum: f64 = correspondences
        .source
        .iter()
        .zip(&correspondences.target)
        .map(|(x, y)| (similarity.transform_point(x) - y).norm_squared())
        .sum();
    (sum / correspondences.len() as f64).sqrt()
}

/// Aligns arbitrary correspondences.
pub fn align(
    correspondences: &Correspondences,
    settings: &AlignmentSettings,
) -> Result<Alignment, AlignmentError> {
    let mut similarity = similarity_from_points(
        &correspondences.source,
        &correspondences.target,
        &correspondences.weights,
        settings.estimate_scale,
    )?;
    let mut refined = false;
    if settings.refine {
        let (candidate, report) = refine_similarity(correspondences, similarity, settings);
        if report.termination.was_successful() && candidate.is_valid() {
            similarity = candidate;
            refined = true;
        } else {
            warn!(
                "alignment refinement failed ({:?}), keeping the closed-form solution",
                report.termination
            );
        }
    }
    let alignment = Alignment {
        similarity,
        num_shots: correspondences.num_shots,
        num_landmarks: correspondences.num_landmarks,
        rms: rms(correspondences, &similarity),
        refined,
    };
    info!(
        "aligned {} correspondences with scale {} and rms {}",
        correspondences.len(),
        alignment.similarity.scale,
        alignment.rms
    );
    Ok(alignment)
}

/// Aligns `source` onto `reference` through the shots and landmarks sharing an id.
///
/// Neither map is modified.
pub fn align_maps(
    source: &Map,
    reference: &Map,
    settings: &AlignmentSettings,
) -> Result<Alignment, AlignmentError> {
    align(
        &Correspondences::between_maps(source, reference, settings),
        settings,
    )
}

/// Aligns the camera centers of `map` onto their GPS positions.
pub fn align_to_gps(map: &Map, settings: &AlignmentSettings) -> Result<Alignment, AlignmentError> {
    align(&Correspondences::to_gps(map, settings), settings)
}
