use cv_camera::Camera;
use cv_core::nalgebra::{Point2, Point3};
use cv_core::{Pose, WorldToCamera};
use cv_sfm::{CorrespondenceImport, Depth, Map, Observation, ShotPair, TracksError, TracksManager, TRACKS_HEADER};
use maplit::hashmap;
use rand::{rngs::SmallRng, Rng, SeedableRng};

fn observation(feature_id: usize) -> Observation {
    Observation::new(
        Point2::new(0.1 * feature_id as f64, -0.05),
        0.004,
        [10, 20, 30],
        feature_id,
    )
}

/// Three shots; track `a` is in all of them, `b` in the first two, `c` only in the last.
fn small_manager() -> TracksManager {
    let mut manager = TracksManager::new();
    manager.add_observation("s1", "a", observation(0));
    manager.add_observation("s2", "a", observation(0));
    manager.add_observation("s3", "a", observation(0));
    manager.add_observation("s1", "b", observation(1));
    manager.add_observation("s2", "b", observation(1));
    manager.add_observation("s3", "c", observation(2));
    manager
}

#[test]
fn text_format_preserves_everything() {
    let mut rng = SmallRng::seed_from_u64(0);
    let mut manager = TracksManager::new();
    for shot in 0..4 {
        for track in 0..25 {
            if rng.gen_bool(0.3) {
                continue;
            }
            let mut observation = Observation::new(
                Point2::new(rng.gen_range(-0.5..0.5), rng.gen_range(-0.5..0.5)),
                rng.gen_range(0.001..0.01),
                [rng.gen(), rng.gen(), rng.gen()],
                track,
            );
            if rng.gen_bool(0.5) {
                observation = observation.with_segmentation(rng.gen_range(-3..20));
            }
            if rng.gen_bool(0.5) {
                observation = observation.with_instance(rng.gen_range(0..5));
            }
            if rng.gen_bool(0.5) {
                observation = observation.with_depth_prior(Depth {
                    value: rng.gen_range(1.0..50.0),
                    is_radial: rng.gen(),
                    std_deviation: rng.gen_range(0.01..1.0),
                });
            }
            manager.add_observation(&format!("image {}.jpg", shot), &track.to_string(), observation);
        }
    }

    let text = manager.as_string().unwrap();
    assert!(text.starts_with(TRACKS_HEADER));
    let parsed: TracksManager = text.parse().unwrap();
    assert_eq!(parsed.num_shots(), manager.num_shots());
    assert_eq!(parsed.num_tracks(), manager.num_tracks());
    assert_eq!(parsed.num_observations(), manager.num_observations());
    assert_eq!(parsed, manager);
}

#[test]
fn malformed_files_are_rejected() {
    assert!(matches!(
        "OTHER_FORMAT\n".parse::<TracksManager>(),
        Err(TracksError::UnsupportedVersion(_))
    ));
    assert!(matches!(
        "".parse::<TracksManager>(),
        Err(TracksError::UnsupportedVersion(_))
    ));

    let short = format!("{}\ns1\ta\t0\t0.1\n", TRACKS_HEADER);
    assert!(matches!(
        short.parse::<TracksManager>(),
        Err(TracksError::Parse { line: 2, .. })
    ));

    let bad_number = format!(
        "{}\ns1\ta\tzero\t0.1\t0.2\t0.004\t1\t2\t3\t-\t-\t-\t-\t-\n",
        TRACKS_HEADER
    );
    assert!(matches!(
        bad_number.parse::<TracksManager>(),
        Err(TracksError::Parse { line: 2, .. })
    ));

    let mut manager = TracksManager::new();
    manager.add_observation("bad\tshot", "a", observation(0));
    assert!(matches!(
        manager.as_string(),
        Err(TracksError::InvalidId(_))
    ));
}

#[test]
fn invalid_ids_write_nothing() {
    let mut manager = TracksManager::new();
    manager.add_observation("a", "t0", observation(0));
    manager.add_observation("b", "t0", observation(1));
    let valid = manager.as_string().unwrap();
    manager.add_observation("z", "line\nbreak", observation(2));

    let mut buffer = Vec::new();
    assert!(matches!(
        manager.write_to(&mut buffer),
        Err(TracksError::InvalidId(id)) if id == "line\nbreak"
    ));
    assert!(buffer.is_empty());

    let path = std::env::temp_dir().join(format!("cv-sfm-invalid-ids-{}.tracks", std::process::id()));
    std::fs::write(&path, &valid).unwrap();
    assert!(manager.write_to_file(&path).is_err());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), valid);
    std::fs::remove_file(&path).unwrap();
}

#[test]
fn absent_columns_parse_as_none() {
    let text = format!(
        "{}\ns1\ta\t7\t0.25\t-0.5\t0.004\t1\t2\t3\t-\t4\t12.5\t1\t0.3\n",
        TRACKS_HEADER
    );
    let manager: TracksManager = text.parse().unwrap();
    let observation = manager.observation("s1", "a").unwrap();
    assert_eq!(observation.feature_id, 7);
    assert_eq!(observation.segmentation, None);
    assert_eq!(observation.instance, Some(4));
    assert_eq!(
        observation.depth_prior,
        Some(Depth {
            value: 12.5,
            is_radial: true,
            std_deviation: 0.3,
        })
    );
}

#[test]
fn queries_and_removal() {
    let mut manager = small_manager();
    assert_eq!(manager.num_shots(), 3);
    assert_eq!(manager.num_tracks(), 3);
    assert_eq!(manager.num_observations(), 6);
    assert_eq!(
        manager.track_observations("a").keys().copied().collect::<Vec<_>>(),
        ["s1", "s2", "s3"]
    );
    assert_eq!(manager.shot_observations("s3").unwrap().len(), 2);

    assert_eq!(manager.remove_observation("s3", "c"), Some(observation(2)));
    assert!(!manager.has_track("c"));
    assert_eq!(manager.remove_observation("s3", "c"), None);
    manager.remove_observation("s3", "a");
    assert!(!manager.has_shot("s3"));
}

#[test]
fn sub_manager_and_common_observations() {
    let manager = small_manager();
    let sub = manager.construct_sub_tracks_manager(["a", "c"], ["s2", "s3"]);
    assert_eq!(sub.shot_ids().collect::<Vec<_>>(), ["s2", "s3"]);
    assert_eq!(sub.track_ids().collect::<Vec<_>>(), ["a", "c"]);
    assert_eq!(sub.num_observations(), 3);

    let common = manager.all_common_observations("s1", "s2");
    let tracks: Vec<&str> = common.iter().map(|(track, _, _)| *track).collect();
    assert_eq!(tracks, ["a", "b"]);
    assert!(manager.all_common_observations("s1", "missing").is_empty());
}

#[test]
fn connectivity_counts_shared_tracks() {
    let manager = small_manager();
    assert_eq!(
        manager.all_pairs_connectivity(&[], &[]),
        hashmap! {
            ShotPair::new("s1", "s2") => 2,
            ShotPair::new("s1", "s3") => 1,
            ShotPair::new("s2", "s3") => 1,
        }
    );
    assert_eq!(
        manager.all_pairs_connectivity(&["s2", "s1"], &[]),
        hashmap! { ShotPair::new("s2", "s1") => 2 }
    );
    assert_eq!(
        manager.all_pairs_connectivity(&[], &["b"]),
        hashmap! { ShotPair::new("s1", "s2") => 1 }
    );
}

#[test]
fn merge_joins_tracks_sharing_features() {
    let mut first = TracksManager::new();
    first.add_observation("s1", "x", observation(0));
    first.add_observation("s2", "x", observation(3));
    let mut second = TracksManager::new();
    second.add_observation("s2", "y", observation(3));
    second.add_observation("s3", "y", observation(5));
    second.add_observation("s3", "z", observation(6));

    let merged = TracksManager::merge(&[first, second]);
    assert_eq!(merged.num_tracks(), 2);
    assert_eq!(merged.track_ids().collect::<Vec<_>>(), ["0", "1"]);
    assert_eq!(
        merged.track_observations("0").keys().copied().collect::<Vec<_>>(),
        ["s1", "s2", "s3"]
    );
    assert_eq!(merged.track_observations("1").len(), 1);
}

#[test]
fn merge_drops_inconsistent_tracks() {
    let mut first = TracksManager::new();
    first.add_observation("s1", "x", observation(0));
    first.add_observation("s2", "x", observation(1));
    let mut second = TracksManager::new();
    // Joins `x` through feature 0 in s1, but sees another feature in s2.
    second.add_observation("s1", "y", observation(0));
    second.add_observation("s2", "y", observation(2));
    second.add_observation("s3", "w", observation(4));
    second.add_observation("s4", "w", observation(4));

    let merged = TracksManager::merge(&[first, second]);
    assert_eq!(merged.num_tracks(), 1);
    assert_eq!(
        merged.track_observations("0").keys().copied().collect::<Vec<_>>(),
        ["s3", "s4"]
    );
}

#[test]
fn map_tracks_exchange() {
    let mut map = Map::new();
    map.create_camera(Camera::perspective("camera", 1.0, 0.0, 0.0))
        .unwrap();
    for shot in ["s1", "s2", "s3"] {
        map.create_shot(shot, "camera", WorldToCamera::identity())
            .unwrap();
    }
    for landmark in ["a", "b"] {
        map.create_landmark(landmark, Point3::new(0.0, 0.0, 1.0))
            .unwrap();
    }

    let mut manager = small_manager();
    manager.add_observation("unknown", "a", observation(9));
    assert_eq!(
        map.add_correspondences_from_tracks_manager(&manager),
        CorrespondenceImport {
            added: 5,
            conflicts: 0
        }
    );
    assert_eq!(map.landmark("a").unwrap().num_observations(), 3);
    assert_eq!(map.landmark("b").unwrap().num_observations(), 2);
    // Already present observations are not added twice.
    assert_eq!(
        map.add_correspondences_from_tracks_manager(&manager),
        CorrespondenceImport::default()
    );

    // A different feature for an observed landmark, and a feature already
    // used by another landmark, are reported instead of added.
    let mut clashing = TracksManager::new();
    clashing.add_observation("s1", "a", observation(5));
    clashing.add_observation("s3", "b", observation(0));
    assert_eq!(
        map.add_correspondences_from_tracks_manager(&clashing),
        CorrespondenceImport {
            added: 0,
            conflicts: 2
        }
    );
    assert_eq!(map.observation("s1", "a").unwrap(), &observation(0));
    assert_eq!(map.landmark("b").unwrap().num_observations(), 2);

    let exported = map.to_tracks_manager();
    assert_eq!(exported.num_observations(), 5);
    assert_eq!(exported.observation("s2", "b"), Some(&observation(1)));
    assert!(!exported.has_track("c"));
}
