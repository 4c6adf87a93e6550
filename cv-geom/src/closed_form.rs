use crate::AlignmentError;
use cv_core::nalgebra::{Matrix3, Point3, Rotation3, Vector3};
use cv_core::Similarity;
use float_ord::FloatOrd;
use log::*;

/// The minimum number of correspondences that determine a similarity.
pub const MIN_CORRESPONDENCES: usize = 3;
/// Scatter eigenvalues below this are considered zero.
const EIGENVALUE_EPSILON: f64 = 1e-10;
/// A largest to second largest scatter eigenvalue ratio above this is a line.
const LINE_RATIO: f64 = 5e3;

/// Eigenvalues of the scatter matrix of the centred points, in increasing order.
pub fn scatter_eigenvalues(points: &[Point3<f64>]) -> [f64; 3] {
    if points.is_empty() {
        return [0.0; 3];
    }
    let center = points.iter().map(|p| p.coords).sum::<Vector3<f64>>() / points.len() as f64;
    let scatter = points
        .iter()
        .map(|p| {
            let d = p.coords - center;
            d * d.transpose()
        })
        .sum::<Matrix3<f64>>();
    let eigenvalues = scatter.symmetric_eigenvalues();
    let mut sorted = [eigenvalues[0], eigenvalues[1], eigenvalues[2]];
    sorted.sort_unstable_by_key(|&v| FloatOrd(v));
    sorted
}

/// Checks whether the points are too few, coincident or spread along a single line.
pub fn is_degenerate(points: &[Point3<f64>]) -> bool {
    if points.len() < MIN_CORRESPONDENCES {
        return true;
    }
    let eigenvalues = scatter_eigenvalues(points);
    let near_zero = eigenvalues
        .iter()
        .filter(|&&v| v < EIGENVALUE_EPSILON)
        .count();
    near_zero > 1 || (eigenvalues[2] / eigenvalues[1]).abs() > LINE_RATIO
}

fn weighted_centroid(points: &[Point3<f64>], weights: &[f64], total: f64) -> Vector3<f64> {
    points
        .iter()
        .zip(weights)
        .map(|(p, &w)| p.coords * w)
        .sum::<Vector3<f64>>()
        / total
}

/// Computes the similarity minimizing `Σ w·|s·R·x + t − y|²` (Umeyama).
///
/// With `estimate_scale` disabled, `s` is fixed to one.
pub fn similarity_from_points(
    source: &[Point3<f64>],
    target: &[Point3<f64>],
    weights: &[f64],
    estimate_scale: bool,
) -> Result<Similarity, AlignmentError> {
    if source.len() != target.len() || source.len() != weights.len() {
        return Err(AlignmentError::MismatchedLengths {
            sources: source.len(),
            targets: target.len(),
            weights: weights.len(),
        });
    }
    if let Some(&weight) = weights.iter().find(|w| !(w.is_finite() && **w >= 0.0)) {
        return Err(AlignmentError::InvalidWeight(weight));
    }

    // Zero-weight correspondences do not constrain anything.
    let (source_used, target_used): (Vec<Point3<f64>>, Vec<Point3<f64>>) = source
        .iter()
        .zip(target)
        .zip(weights)
        .filter(|(_, w)| **w > 0.0)
        .map(|((&x, &y), _)| (x, y))
        .unzip();
    if source_used.len() < MIN_CORRESPONDENCES {
        return Err(AlignmentError::InsufficientData(format!(
            "{} weighted correspondences, at least {} are required",
            source_used.len(),
            MIN_CORRESPONDENCES
        )));
    }
    if is_degenerate(&source_used) || is_degenerate(&target_used) {
        warn!("alignment points are coincident or aligned on a single line");
        return Err(AlignmentError::InsufficientData(
            "correspondences are coincident or collinear".to_owned(),
        ));
    }

    let total: f64 = weights.iter().sum();
    let source_center = weighted_centroid(source, weights, total);
    let target_center = weighted_centroid(target, weights, total);
    let mut covariance = Matrix3::zeros();
    let mut variance = 0.0;
    for ((x, y), &w) in source.iter().zip(target).zip(weights) {
        let dx = x.coords - source_center;
        let dy = y.coords - target_center;
        covariance += dy * dx.transpose() * w;
        variance += dx.norm_squared() * w;
    }
    covariance /= total;
    variance /= total;

    let svd = covariance.svd(true, true);
    let (u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => {
            return Err(AlignmentError::InsufficientData(
                "singular value decomposition failed".to_owned(),
            ))
        }
    };
    // Flip the axis of the smallest singular value to avoid a reflection.
    let mut signs = Vector3::repeat(1.0);
    if (u * v_t).determinant() < 0.0 {
        signs[svd.singular_values.imin()] = -1.0;
    }
    let rotation = u * Matrix3::from_diagonal(&signs) * v_t;
    let scale = if estimate_scale {
        svd.singular_values.dot(&signs) / variance
    } else {
        1.0
    };
    let translation = target_center - rotation * source_center * scale;
    let similarity = Similarity::new(Rotation3::from_matrix_unchecked(rotation), translation, scale);
    if similarity.is_valid() {
        Ok(similarity)
    } else {
        Err(AlignmentError::InsufficientData(format!(
            "alignment produced an invalid similarity with scale {}",
            scale
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn lines_and_planes() {
        let line: Vec<Point3<f64>> = (0..5)
            .map(|i| Point3::new(i as f64, 2.0 * i as f64, -(i as f64)))
            .collect();
        assert!(is_degenerate(&line));

        let plane = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
        ];
        assert!(!is_degenerate(&plane));
        assert!(is_degenerate(&plane[..2]));
        assert!(is_degenerate(&[Point3::new(1.0, 2.0, 3.0); 4]));

        // Almost a line: the spread off the line is tiny compared to its length.
        let thin = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(100.0, 0.0, 0.0),
            Point3::new(200.0, 0.0, 0.0),
            Point3::new(100.0, 0.5, 0.0),
        ];
        assert!(is_degenerate(&thin));
    }

    #[test]
    fn eigenvalues_are_sorted() {
        let points = [
            Point3::new(-3.0, 0.0, 0.0),
            Point3::new(3.0, 0.0, 0.0),
            Point3::new(0.0, -1.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        let [a, b, c] = scatter_eigenvalues(&points);
        assert_relative_eq!(a, 0.0, epsilon = 1e-12);
        assert_relative_eq!(b, 2.0, epsilon = 1e-12);
        assert_relative_eq!(c, 18.0, epsilon = 1e-12);
    }

    #[test]
    fn zero_weights_do_not_count() {
        let source = [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
        ];
        assert!(matches!(
            similarity_from_points(&source, &source, &[1.0, 1.0, 0.0], true),
            Err(AlignmentError::InsufficientData(_))
        ));
        assert_eq!(
            similarity_from_points(&source, &source, &[1.0, -1.0, 1.0], true),
            Err(AlignmentError::InvalidWeight(-1.0))
        );
    }
}
