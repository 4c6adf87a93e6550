use cv_sfm::{Map, MapError};
use itertools::Itertools;
use log::*;
use std::collections::{BTreeMap, BTreeSet};

/// Shots sharing at least `min_common_points` landmarks with `shots`, most shared first.
///
/// At most `max_neighbors` are returned. Ties are broken by shot id.
pub fn direct_shot_neighbors(
    map: &Map,
    shots: &BTreeSet<String>,
    min_common_points: usize,
    max_neighbors: usize,
) -> Result<BTreeSet<String>, MapError> {
    let mut landmarks = BTreeSet::new();
    for id in shots {
        landmarks.extend(map.shot(id)?.observations().map(|(landmark, _)| landmark));
    }
    let mut common: BTreeMap<&str, usize> = BTreeMap::new();
    for id in landmarks {
        for shot in map.landmark(id)?.shot_ids() {
            if !shots.contains(shot) {
                *common.entry(shot).or_default() += 1;
            }
        }
    }
    Ok(common
        .into_iter()
        .sorted_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)))
        .take(max_neighbors)
        .take_while(|&(_, count)| count >= min_common_points)
        .map(|(shot, _)| shot.to_owned())
        .collect())
}

/// The shots around `central_shot_id`, as `(interior, boundary)`.
///
/// The interior grows from the central shot by `radius − 1` rings of direct
/// neighbors sharing at least `min_common_points` landmarks, without exceeding
/// `max_interior_size` shots. The boundary holds every other shot sharing a
/// landmark with the interior.
pub fn shot_neighborhood(
    map: &Map,
    central_shot_id: &str,
    radius: usize,
    min_common_points: usize,
    max_interior_size: usize,
) -> Result<(BTreeSet<String>, BTreeSet<String>), MapError> {
    map.shot(central_shot_id)?;
    let mut interior = BTreeSet::new();
    interior.insert(central_shot_id.to_owned());
    for _ in 1..radius {
        let remaining = max_interior_size.saturating_sub(interior.len());
        if remaining == 0 {
            break;
        }
        let neighbors = direct_shot_neighbors(map, &interior, min_common_points, remaining)?;
        if neighbors.is_empty() {
            break;
        }
        interior.extend(neighbors);
    }
    let boundary = direct_shot_neighbors(map, &interior, 1, usize::MAX)?;
    debug!(
        "neighborhood of {}: {} interior and {} boundary shots",
        central_shot_id,
        interior.len(),
        boundary.len()
    );
    Ok((interior, boundary))
}

/// The landmarks observed by any of `shots`.
pub fn observed_landmarks_of(
    map: &Map,
    shots: &BTreeSet<String>,
) -> Result<BTreeSet<String>, MapError> {
    let mut landmarks = BTreeSet::new();
    for id in shots {
        landmarks.extend(
            map.shot(id)?
                .observations()
                .map(|(landmark, _)| landmark.to_owned()),
        );
    }
    Ok(landmarks)
}
