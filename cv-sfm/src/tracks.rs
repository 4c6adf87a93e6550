use crate::{Map, Observation};
use itertools::Itertools;
use log::*;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A shot pair with its ids in canonical (sorted) order.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShotPair(pub String, pub String);

impl ShotPair {
    /// Creates a new pair, cannonicalizing the order of the pair.
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self(a.to_owned(), b.to_owned())
        } else {
            Self(b.to_owned(), a.to_owned())
        }
    }
}

/// A bipartite index of (shot, track) → observation.
///
/// It does not depend on any [`Map`] and is the exchange format with feature
/// matching and triangulation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TracksManager {
    pub(crate) tracks_per_shot: BTreeMap<String, BTreeMap<String, Observation>>,
    pub(crate) shots_per_track: BTreeMap<String, BTreeSet<String>>,
}

impl TracksManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an observation, replacing any previous one for the same shot and track.
    pub fn add_observation(&mut self, shot_id: &str, track_id: &str, observation: Observation) {
        self.tracks_per_shot
            .entry(shot_id.to_owned())
            .or_default()
            .insert(track_id.to_owned(), observation);
        self.shots_per_track
            .entry(track_id.to_owned())
            .or_default()
            .insert(shot_id.to_owned());
    }

    /// Removes an observation. Shots and tracks left without observations disappear.
    pub fn remove_observation(&mut self, shot_id: &str, track_id: &str) -> Option<Observation> {
        let tracks = self.tracks_per_shot.get_mut(shot_id)?;
        let observation = tracks.remove(track_id)?;
        if tracks.is_empty() {
            self.tracks_per_shot.remove(shot_id);
        }
        if let Some(shots) = self.shots_per_track.get_mut(track_id) {
            shots.remove(shot_id);
            if shots.is_empty() {
                self.shots_per_track.remove(track_id);
            }
        }
        Some(observation)
    }

    pub fn num_shots(&self) -> usize {
        self.tracks_per_shot.len()
    }

    pub fn num_tracks(&self) -> usize {
        self.shots_per_track.len()
    }

    pub fn num_observations(&self) -> usize {
        self.tracks_per_shot.values().map(BTreeMap::len).sum()
    }

    pub fn shot_ids(&self) -> impl Iterator<Item = &str> {
        self.tracks_per_shot.keys().map(String::as_str)
    }

    pub fn track_ids(&self) -> impl Iterator<Item = &str> {
        self.shots_per_track.keys().map(String::as_str)
    }

    pub fn has_shot(&self, shot_id: &str) -> bool {
        self.tracks_per_shot.contains_key(shot_id)
    }

    pub fn has_track(&self, track_id: &str) -> bool {
        self.shots_per_track.contains_key(track_id)
    }

    pub fn observation(&self, shot_id: &str, track_id: &str) -> Option<&Observation> {
        self.tracks_per_shot.get(shot_id)?.get(track_id)
    }

    /// The observations of a shot keyed by track id.
    pub fn shot_observations(&self, shot_id: &str) -> Option<&BTreeMap<String, Observation>> {
        self.tracks_per_shot.get(shot_id)
    }

    /// The observations of a track keyed by shot id.
    pub fn track_observations(&self, track_id: &str) -> BTreeMap<&str, &Observation> {
        self.shots_per_track
            .get(track_id)
            .into_iter()
            .flatten()
            .filter_map(|shot| {
                self.observation(shot, track_id)
                    .map(|observation| (shot.as_str(), observation))
            })
            .collect()
    }

    /// A new index holding the observations of `tracks` in `shots`.
    pub fn construct_sub_tracks_manager<'a>(
        &self,
        tracks: impl IntoIterator<Item = &'a str>,
        shots: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let shots: BTreeSet<&str> = shots.into_iter().collect();
        let mut sub = Self::new();
        for track in tracks {
            for (shot, observation) in self.track_observations(track) {
                if shots.contains(shot) {
                    sub.add_observation(shot, track, observation.clone());
                }
            }
        }
        sub
    }

    /// The tracks seen in both shots, with the observation in each.
    pub fn all_common_observations(
        &self,
        shot_a: &str,
        shot_b: &str,
    ) -> Vec<(&str, &Observation, &Observation)> {
        let (a, b) = match (self.tracks_per_shot.get(shot_a), self.tracks_per_shot.get(shot_b)) {
            (Some(a), Some(b)) => (a, b),
            _ => return vec![],
        };
        a.iter()
            .filter_map(|(track, observation_a)| {
                b.get(track)
                    .map(|observation_b| (track.as_str(), observation_a, observation_b))
            })
            .collect()
    }

    /// Counts the tracks shared by every pair of shots.
    ///
    /// Empty filters select everything. Only pairs with at least one common track are returned.
    pub fn all_pairs_connectivity(
        &self,
        shots: &[&str],
        tracks: &[&str],
    ) -> HashMap<ShotPair, usize> {
        let shot_filter: BTreeSet<&str> = shots.iter().copied().collect();
        let selected_tracks: Vec<(&String, &BTreeSet<String>)> = if tracks.is_empty() {
            self.shots_per_track.iter().collect()
        } else {
            tracks
                .iter()
                .filter_map(|&track| self.shots_per_track.get_key_value(track))
                .collect()
        };
        let connectivity = selected_tracks
            .par_iter()
            .fold(HashMap::new, |mut counts: HashMap<ShotPair, usize>, (_, track_shots)| {
                let track_shots = track_shots
                    .iter()
                    .filter(|shot| shot_filter.is_empty() || shot_filter.contains(shot.as_str()));
                for (a, b) in track_shots.tuple_combinations() {
                    *counts.entry(ShotPair::new(a, b)).or_default() += 1;
                }
                counts
            })
            .reduce(HashMap::new, |mut total, counts| {
                for (pair, count) in counts {
                    *total.entry(pair).or_default() += count;
                }
                total
            });
        debug!(
            "computed connectivity of {} shot pairs over {} tracks",
            connectivity.len(),
            selected_tracks.len()
        );
        connectivity
    }

    /// Merges several indices into one.
    ///
    /// Tracks of different managers become one track when they share an
    /// observation of the same feature in the same shot. A merged track that
    /// would observe two different features in one shot is dropped. Merged
    /// tracks are renumbered `"0"`, `"1"`, ... in a deterministic order.
    pub fn merge(managers: &[TracksManager]) -> Self {
        // Union-find over every (manager, track).
        let nodes: Vec<(usize, &str)> = managers
            .iter()
            .enumerate()
            .flat_map(|(index, manager)| manager.track_ids().map(move |track| (index, track)))
            .collect();
        let node_index: HashMap<(usize, &str), usize> =
            nodes.iter().enumerate().map(|(i, &node)| (node, i)).collect();
        let mut parents: Vec<usize> = (0..nodes.len()).collect();

        fn find(parents: &mut [usize], mut node: usize) -> usize {
            while parents[node] != node {
                parents[node] = parents[parents[node]];
                node = parents[node];
            }
            node
        }

        let mut feature_owner: HashMap<(&str, usize), usize> = HashMap::new();
        for (index, manager) in managers.iter().enumerate() {
            for (shot, tracks) in &manager.tracks_per_shot {
                for (track, observation) in tracks {
                    let node = node_index[&(index, track.as_str())];
                    match feature_owner.get(&(shot.as_str(), observation.feature_id)) {
                        Some(&other) => {
                            let (a, b) = (find(&mut parents, node), find(&mut parents, other));
                            if a != b {
                                parents[a.max(b)] = a.min(b);
                            }
                        }
                        None => {
                            feature_owner.insert((shot.as_str(), observation.feature_id), node);
                        }
                    }
                }
            }
        }

        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for node in 0..nodes.len() {
            let root = find(&mut parents, node);
            groups.entry(root).or_default().push(node);
        }

        let mut merged = Self::new();
        let mut discarded = 0;
        let mut next_id = 0usize;
        for members in groups.values() {
            let mut observations: BTreeMap<&str, &Observation> = BTreeMap::new();
            let mut consistent = true;
            for &node in members {
                let (index, track) = nodes[node];
                for (shot, observation) in managers[index].track_observations(track) {
                    match observations.get(shot) {
                        Some(existing) if existing.feature_id != observation.feature_id => {
                            consistent = false;
                        }
                        Some(_) => {}
                        None => {
                            observations.insert(shot, observation);
                        }
                    }
                }
            }
            if !consistent {
                discarded += 1;
                continue;
            }
            let track_id = next_id.to_string();
            next_id += 1;
            for (shot, observation) in observations {
                merged.add_observation(shot, &track_id, observation.clone());
            }
        }
        if discarded > 0 {
            warn!(
                "discarded {} merged tracks observing several features in one shot",
                discarded
            );
        }
        merged
    }
}

impl Map {
    /// Exports every observation as a (shot id, landmark id) track entry.
    pub fn to_tracks_manager(&self) -> TracksManager {
        let mut manager = TracksManager::new();
        for shot in self.shots.values() {
            for (&landmark, observation) in &shot.observations {
                manager.add_observation(&shot.id, &self.landmarks[landmark].id, observation.clone());
            }
        }
        manager
    }

    /// Adds the observations of `manager` linking existing shots and existing
    /// landmarks (track ids are landmark ids). Entries whose shot or landmark is
    /// missing, or that are already in the map, are skipped. Entries that clash
    /// with a different observation of the same shot are counted as conflicts.
    pub fn add_correspondences_from_tracks_manager(
        &mut self,
        manager: &TracksManager,
    ) -> CorrespondenceImport {
        let mut import = CorrespondenceImport::default();
        for (shot_id, tracks) in &manager.tracks_per_shot {
            if !self.shot_ids.contains_key(shot_id) {
                continue;
            }
            for (track_id, observation) in tracks {
                if !self.landmark_ids.contains_key(track_id) {
                    continue;
                }
                if self.observation(shot_id, track_id).ok() == Some(observation) {
                    continue;
                }
                match self.add_observation(shot_id, track_id, observation.clone()) {
                    Ok(()) => import.added += 1,
                    Err(e) => {
                        debug!("skipping track observation: {}", e);
                        import.conflicts += 1;
                    }
                }
            }
        }
        if import.conflicts > 0 {
            warn!(
                "added {} observations from tracks, skipped {} conflicting with the map",
                import.added, import.conflicts
            );
        } else {
            debug!("added {} observations from tracks", import.added);
        }
        import
    }
}

/// The outcome of [`Map::add_correspondences_from_tracks_manager`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrespondenceImport {
    pub added: usize,
    /// Observations rejected because the shot already observes the landmark
    /// differently, or already uses the feature for another landmark.
    pub conflicts: usize,
}
