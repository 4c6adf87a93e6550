use approx::assert_relative_eq;
use cv_camera::Camera;
use cv_core::nalgebra::{Matrix3, Point3, Rotation3, Vector3, Vector6};
use cv_core::{CameraToCamera, Pose, WorldToCamera};
use cv_optimize::{
    bundle, bundle_local, bundle_selection, bundle_shot_poses, shot_neighborhood,
    AbsolutePosePrior, BundleError, BundlePriors, BundleSelection, BundleSettings,
    RelativeMotionPrior, Termination,
};
use cv_sfm::{Depth, EntityKind, ErrorType, Map, MapError, Observation};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::collections::BTreeSet;

const NUM_SHOTS: usize = 6;
const NUM_LANDMARKS: usize = 30;

/// A camera at `origin` looking at `target` with the world `z` axis up in the image.
fn look_at(origin: Point3<f64>, target: Point3<f64>) -> WorldToCamera {
    let z = (target - origin).normalize();
    let x = z.cross(&Vector3::z()).normalize();
    let y = z.cross(&x);
    let rotation = Rotation3::from_matrix_unchecked(Matrix3::from_rows(&[
        x.transpose(),
        y.transpose(),
        z.transpose(),
    ]));
    WorldToCamera::from_origin(rotation, origin)
}

fn arc_origin(rng: &mut SmallRng, index: usize) -> Point3<f64> {
    let angle = index as f64 * 0.35;
    Point3::new(8.0 * angle.cos(), 8.0 * angle.sin(), rng.gen_range(1.0..2.0))
}

fn add_landmarks(map: &mut Map, rng: &mut SmallRng) {
    for l in 0..NUM_LANDMARKS {
        let position = Point3::new(
            rng.gen_range(-2.0..2.0),
            rng.gen_range(-2.0..2.0),
            rng.gen_range(-2.0..2.0),
        );
        map.create_landmark(format!("point{}", l), position).unwrap();
    }
}

/// Every shot observes every landmark exactly. The first shot also carries depth priors.
fn observe(map: &mut Map) {
    let shot_ids: Vec<String> = map.shots().ids().map(str::to_owned).collect();
    let landmarks: Vec<(String, Point3<f64>)> = map
        .landmarks()
        .iter()
        .map(|landmark| (landmark.id().to_owned(), landmark.position))
        .collect();
    for (s, shot_id) in shot_ids.iter().enumerate() {
        for (l, (landmark_id, position)) in landmarks.iter().enumerate() {
            let shot = map.shot(shot_id).unwrap();
            let mut observation = Observation::new(shot.project(position), 0.004, [255; 3], l);
            if s == 0 {
                observation = observation.with_depth_prior(Depth {
                    value: shot.pose().transform_point(position).z,
                    is_radial: false,
                    std_deviation: 0.1,
                });
            }
            map.add_observation(shot_id, landmark_id, observation).unwrap();
        }
    }
}

/// Shots on an arc around the origin looking at landmarks spread around it.
fn scene(seed: u64) -> Map {
    let _ = pretty_env_logger::try_init();
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut map = Map::new();
    map.create_camera(Camera::perspective("camera", 0.9, 0.0, 0.0).with_size(800, 600))
        .unwrap();
    for s in 0..NUM_SHOTS {
        let pose = look_at(arc_origin(&mut rng, s), Point3::origin());
        map.create_shot(format!("shot{}", s), "camera", pose).unwrap();
    }
    add_landmarks(&mut map, &mut rng);
    observe(&mut map);
    map
}

/// Four instances of a stereo rig on an arc around the origin.
fn rig_scene(seed: u64) -> Map {
    let _ = pretty_env_logger::try_init();
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut map = Map::new();
    map.create_camera(Camera::perspective("camera", 0.9, 0.0, 0.0).with_size(800, 600))
        .unwrap();
    map.create_rig_camera("left", CameraToCamera::identity()).unwrap();
    map.create_rig_camera(
        "right",
        CameraToCamera::from_se3(Vector6::new(-0.4, 0.0, 0.0, 0.0, 0.05, 0.0)),
    )
    .unwrap();
    for i in 0..4 {
        let instance = format!("instance{}", i);
        let pose = look_at(arc_origin(&mut rng, i), Point3::origin());
        map.create_rig_instance(instance.clone(), pose).unwrap();
        map.create_rig_shot(format!("left{}", i), "camera", &instance, "left")
            .unwrap();
        map.create_rig_shot(format!("right{}", i), "camera", &instance, "right")
            .unwrap();
    }
    add_landmarks(&mut map, &mut rng);
    observe(&mut map);
    map
}

fn perturb_shots(map: &mut Map, rng: &mut SmallRng, ids: &[&str], amount: f64) {
    for &id in ids {
        let se3 = map.shot_pose(id).unwrap().se3();
        let noise = Vector6::from_fn(|_, _| rng.gen_range(-amount..amount));
        map.set_shot_pose(id, WorldToCamera::from_se3(se3 + noise))
            .unwrap();
    }
}

fn perturb_landmarks(map: &mut Map, rng: &mut SmallRng, amount: f64) {
    let ids: Vec<String> = map.landmarks().ids().map(str::to_owned).collect();
    for id in ids {
        let noise = Vector3::from_fn(|_, _| rng.gen_range(-amount..amount));
        map.landmark_mut(&id).unwrap().position += noise;
    }
}

fn ids(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|&id| id.to_owned()).collect()
}

fn origin_error(map: &Map, truth: &Map, id: &str) -> f64 {
    (map.shot_pose(id).unwrap().origin() - truth.shot_pose(id).unwrap().origin()).norm()
}

fn assert_reprojections_vanish(map: &Map) {
    for landmark in map.landmarks().iter() {
        assert!(!landmark.reprojection_errors.is_empty());
        for (shot, error) in &landmark.reprojection_errors {
            assert!(
                error.norm() < 1e-6,
                "{} in {} reprojects with error {}",
                landmark.id(),
                shot,
                error.norm()
            );
        }
    }
}

#[test]
fn recovers_a_perturbed_scene() {
    let truth = scene(0);
    let mut map = truth.deep_copy(true);
    let mut rng = SmallRng::seed_from_u64(1);
    let free = ["shot2", "shot3", "shot4", "shot5"];
    perturb_shots(&mut map, &mut rng, &free, 0.05);
    perturb_landmarks(&mut map, &mut rng, 0.05);

    let selection = BundleSelection {
        shots: ids(&free),
        fixed_shots: ids(&["shot0", "shot1"]),
        fix_cameras: true,
        ..BundleSelection::default()
    };
    let settings = BundleSettings {
        compute_covariances: true,
        ..BundleSettings::default()
    };
    let report = bundle_selection(&mut map, &selection, &BundlePriors::new(), &settings).unwrap();

    assert!(report.warning.is_none(), "{:?}", report.solve);
    assert_eq!(report.num_shots, 4);
    assert_eq!(report.num_fixed_shots, 2);
    assert_eq!(report.num_landmarks, NUM_LANDMARKS);
    assert_eq!(report.num_reprojections, NUM_SHOTS * NUM_LANDMARKS);
    assert_eq!(report.num_parameters, 4 * 6 + NUM_LANDMARKS * 3);
    assert!(report.solve.final_cost < report.solve.initial_cost);

    assert_reprojections_vanish(&map);
    for id in free {
        assert!(origin_error(&map, &truth, id) < 1e-6, "{} did not converge", id);
    }
    for landmark in truth.landmarks().iter() {
        assert_relative_eq!(
            map.landmark(landmark.id()).unwrap().position,
            landmark.position,
            epsilon = 1e-6
        );
    }

    // Fixed shots keep their pose and get no covariance.
    assert_eq!(
        map.shot_pose("shot0").unwrap(),
        truth.shot_pose("shot0").unwrap()
    );
    assert!(map.shot("shot0").unwrap().covariance.is_none());
    let covariance = map.shot("shot3").unwrap().covariance.unwrap();
    assert_relative_eq!(covariance, covariance.transpose(), epsilon = 1e-9);
    assert!(covariance.diagonal().iter().all(|&v| v > 0.0));
    let covariance = map.landmark("point0").unwrap().covariance.unwrap();
    assert!(covariance.diagonal().iter().all(|&v| v > 0.0));
}

#[test]
fn shared_camera_is_adjusted_once() {
    let truth = scene(2);
    let mut map = truth.deep_copy(true);
    map.camera_mut("camera")
        .unwrap()
        .set_parameters(&[0.95, 0.0, 0.0])
        .unwrap();
    let mut rng = SmallRng::seed_from_u64(3);
    let free = ["shot2", "shot3", "shot4", "shot5"];
    perturb_shots(&mut map, &mut rng, &free, 0.02);

    let selection = BundleSelection {
        shots: ids(&free),
        fixed_shots: ids(&["shot0", "shot1"]),
        fix_landmarks: true,
        ..BundleSelection::default()
    };
    let priors = BundlePriors::from_map(&truth);
    let report = bundle_selection(&mut map, &selection, &priors, &BundleSettings::default()).unwrap();

    assert!(report.warning.is_none(), "{:?}", report.solve);
    // Four poses and the three parameters of the single camera.
    assert_eq!(report.num_parameters, 4 * 6 + 3);
    let camera = map.camera("camera").unwrap();
    assert_relative_eq!(camera.parameters()[0], 0.9, epsilon = 1e-6);
    assert_eq!(
        map.shot("shot0").unwrap().camera().parameters(),
        map.shot("shot5").unwrap().camera().parameters()
    );
    assert_reprojections_vanish(&map);
}

#[test]
fn camera_priors_must_match_the_projection() {
    let mut map = scene(4);
    let before = map.shot_pose("shot1").unwrap();
    let mut priors = BundlePriors::new();
    priors
        .cameras
        .insert("camera".to_owned(), Camera::spherical("camera"));
    let result = bundle(&mut map, &priors, &BundleSettings::default());
    assert!(matches!(result, Err(BundleError::Precheck(_))));
    assert_eq!(map.shot_pose("shot1").unwrap(), before);
}

#[test]
fn rig_cameras_are_shared_by_instances() {
    let truth = rig_scene(5);
    let mut map = truth.deep_copy(true);
    let mut rng = SmallRng::seed_from_u64(6);
    perturb_shots(&mut map, &mut rng, &["left2", "left3"], 0.03);
    map.rig_camera_mut("right").unwrap().pose =
        CameraToCamera::from_se3(Vector6::new(-0.38, 0.01, 0.0, 0.0, 0.04, 0.01));
    perturb_landmarks(&mut map, &mut rng, 0.03);

    let selection = BundleSelection {
        shots: ids(&["left2", "right2", "left3", "right3"]),
        fixed_shots: ids(&["left0", "right0", "left1", "right1"]),
        fix_cameras: true,
        ..BundleSelection::default()
    };
    let report = bundle_selection(&mut map, &selection, &BundlePriors::new(), &BundleSettings::default())
        .unwrap();
    assert!(report.warning.is_none(), "{:?}", report.solve);
    // Two instances, the right rig camera and the landmarks.
    assert_eq!(report.num_parameters, 3 * 6 + NUM_LANDMARKS * 3);

    assert_eq!(
        map.rig_camera("left").unwrap().pose,
        CameraToCamera::identity()
    );
    assert_relative_eq!(
        map.rig_camera("right").unwrap().pose.se3(),
        truth.rig_camera("right").unwrap().pose.se3(),
        epsilon = 1e-6
    );
    for id in ["left2", "right2", "left3", "right3"] {
        assert!(origin_error(&map, &truth, id) < 1e-6, "{} did not converge", id);
    }
    assert_eq!(
        map.rig_instance("instance0").unwrap().pose,
        truth.rig_instance("instance0").unwrap().pose
    );
    assert_reprojections_vanish(&map);
}

#[test]
fn measurements_anchor_a_full_bundle() {
    let truth = scene(7);
    let mut map = truth.deep_copy(true);
    let shot_ids: Vec<String> = truth.shots().ids().map(str::to_owned).collect();
    for id in &shot_ids {
        let pose = truth.shot_pose(id).unwrap();
        let axis = pose.optical_axis();
        let measurements = &mut map.shot_mut(id).unwrap().measurements;
        measurements.gps_position = Some(pose.origin());
        measurements.gps_accuracy = Some(0.5);
        measurements.compass_angle = Some(axis.x.atan2(axis.y).to_degrees());
        measurements.compass_accuracy = Some(5.0);
        measurements.gravity_down = Some(pose.rotation() * Vector3::new(0.0, 0.0, -1.0));
    }
    let mut rng = SmallRng::seed_from_u64(8);
    let all: Vec<&str> = shot_ids.iter().map(String::as_str).collect();
    perturb_shots(&mut map, &mut rng, &all, 0.03);
    perturb_landmarks(&mut map, &mut rng, 0.03);

    let settings = BundleSettings {
        optimize_cameras: false,
        ..BundleSettings::default()
    };
    let report = bundle(&mut map, &BundlePriors::new(), &settings).unwrap();
    assert!(report.warning.is_none(), "{:?}", report.solve);
    assert_eq!(report.num_shots, NUM_SHOTS);
    assert_eq!(report.num_fixed_shots, 0);
    // Reprojections, depth priors and three priors per shot.
    let num_residuals = 2 * NUM_SHOTS * NUM_LANDMARKS + NUM_LANDMARKS + NUM_SHOTS * (3 + 1 + 3);
    assert_eq!(report.num_residuals, num_residuals);

    for id in &shot_ids {
        assert!(origin_error(&map, &truth, id) < 1e-5, "{} did not converge", id);
    }
    assert_reprojections_vanish(&map);
}

#[test]
fn pose_priors_hold_shots_in_place() {
    let truth = scene(9);
    let mut map = truth.deep_copy(true);
    let mut rng = SmallRng::seed_from_u64(10);
    perturb_shots(&mut map, &mut rng, &["shot2", "shot3"], 0.05);
    map.landmark_mut("point0").unwrap().position += Vector3::new(0.1, 0.0, 0.0);

    let motion = truth
        .shot_pose("shot2")
        .unwrap()
        .relative_to(truth.shot_pose("shot3").unwrap());
    let priors = BundlePriors {
        relative_motions: vec![RelativeMotionPrior {
            first: "shot2".to_owned(),
            second: "shot3".to_owned(),
            motion,
            std_rotation: 0.01,
            std_translation: 0.01,
        }],
        absolute_poses: vec![AbsolutePosePrior {
            shot: "shot3".to_owned(),
            pose: truth.shot_pose("shot3").unwrap(),
            std_rotation: 0.01,
            std_translation: 0.01,
        }],
        ..BundlePriors::new()
    };
    let settings = BundleSettings {
        use_depth_priors: false,
        ..BundleSettings::default()
    };
    let report = bundle_shot_poses(&mut map, ["shot2", "shot3"], &priors, &settings).unwrap();
    assert!(report.warning.is_none(), "{:?}", report.solve);
    assert_eq!(report.num_parameters, 12);
    assert_eq!(report.num_residuals, 2 * 2 * NUM_LANDMARKS + 6 + 6);

    // The robust loss discounts the displaced landmark, which stays where it was.
    assert_relative_eq!(
        map.landmark("point0").unwrap().position,
        truth.landmark("point0").unwrap().position + Vector3::new(0.1, 0.0, 0.0)
    );
    for id in ["shot2", "shot3"] {
        assert!(origin_error(&map, &truth, id) < 1e-2, "{} drifted", id);
    }
}

#[test]
fn error_units_agree_on_the_solution() {
    let truth = scene(11);
    for error_type in [ErrorType::Normalized, ErrorType::Pixel, ErrorType::Angular] {
        let mut map = truth.deep_copy(true);
        let mut rng = SmallRng::seed_from_u64(12);
        perturb_shots(&mut map, &mut rng, &["shot4"], 0.05);
        let settings = BundleSettings {
            error_type,
            ..BundleSettings::default()
        };
        let report = bundle_shot_poses(&mut map, ["shot4"], &BundlePriors::new(), &settings).unwrap();
        assert!(report.warning.is_none(), "{:?}: {:?}", error_type, report.solve);
        assert!(
            origin_error(&map, &truth, "shot4") < 1e-6,
            "{:?} did not converge",
            error_type
        );
    }
}

#[test]
fn early_termination_is_a_warning() {
    let truth = scene(13);
    let mut map = truth.deep_copy(true);
    let mut rng = SmallRng::seed_from_u64(14);
    perturb_shots(&mut map, &mut rng, &["shot1"], 0.2);
    let before = origin_error(&map, &truth, "shot1");

    let settings = BundleSettings {
        patience: 3,
        function_tolerance: 1e-300,
        parameter_tolerance: 1e-300,
        gradient_tolerance: 1e-300,
        ..BundleSettings::default()
    };
    let report = bundle_shot_poses(&mut map, ["shot1"], &BundlePriors::new(), &settings).unwrap();
    let warning = report.warning.expect("the solver cannot converge");
    assert!(!report.solve.converged);
    assert_eq!(warning.termination, Termination::LostPatience);
    assert_eq!(report.solve.num_iterations, 3);
    assert_eq!(warning.num_evaluations, report.solve.num_evaluations);
    assert!(report.solve.final_cost <= report.solve.initial_cost);
    assert!(origin_error(&map, &truth, "shot1") < before);
}

#[test]
fn malformed_selections_fail_before_solving() {
    let mut map = scene(15);
    let before = map.shot_pose("shot0").unwrap();
    let priors = BundlePriors::new();
    let settings = BundleSettings::default();

    let empty = BundleSelection::default();
    assert!(matches!(
        bundle_selection(&mut map, &empty, &priors, &settings),
        Err(BundleError::Precheck(_))
    ));

    let overlapping = BundleSelection {
        shots: ids(&["shot0", "shot1"]),
        fixed_shots: ids(&["shot1"]),
        ..BundleSelection::default()
    };
    assert!(matches!(
        bundle_selection(&mut map, &overlapping, &priors, &settings),
        Err(BundleError::Precheck(_))
    ));

    assert_eq!(
        bundle_shot_poses(&mut map, ["shot0", "missing"], &priors, &settings).unwrap_err(),
        BundleError::Map(MapError::NotFound {
            kind: EntityKind::Shot,
            id: "missing".to_owned()
        })
    );

    let unknown_landmark = BundleSelection {
        shots: ids(&["shot0"]),
        landmarks: Some(ids(&["nowhere"])),
        ..BundleSelection::default()
    };
    assert!(matches!(
        bundle_selection(&mut map, &unknown_landmark, &priors, &settings),
        Err(BundleError::Map(MapError::NotFound {
            kind: EntityKind::Landmark,
            ..
        }))
    ));
    assert_eq!(map.shot_pose("shot0").unwrap(), before);
}

#[test]
fn neighborhoods_grow_by_shared_landmarks() {
    let map = scene(16);

    let (interior, boundary) = shot_neighborhood(&map, "shot0", 2, 20, 3).unwrap();
    assert_eq!(interior, ids(&["shot0", "shot1", "shot2"]));
    assert_eq!(boundary, ids(&["shot3", "shot4", "shot5"]));

    // No shot shares more landmarks than there are.
    let (interior, boundary) = shot_neighborhood(&map, "shot3", 3, NUM_LANDMARKS + 1, 10).unwrap();
    assert_eq!(interior, ids(&["shot3"]));
    assert_eq!(boundary.len(), NUM_SHOTS - 1);

    let (interior, _) = shot_neighborhood(&map, "shot3", 1, 1, 10).unwrap();
    assert_eq!(interior, ids(&["shot3"]));

    assert!(matches!(
        shot_neighborhood(&map, "missing", 2, 1, 10),
        Err(MapError::NotFound { kind: EntityKind::Shot, .. })
    ));
}

#[test]
fn local_bundle_holds_the_boundary() {
    let truth = scene(17);
    let mut map = truth.deep_copy(true);
    let mut rng = SmallRng::seed_from_u64(18);
    perturb_shots(&mut map, &mut rng, &["shot2"], 0.05);
    perturb_landmarks(&mut map, &mut rng, 0.02);

    let settings = BundleSettings {
        local_bundle_radius: 2,
        local_bundle_max_shots: 1,
        ..BundleSettings::default()
    };
    let (landmarks, report) = bundle_local(&mut map, "shot2", &BundlePriors::new(), &settings).unwrap();
    assert!(report.warning.is_none(), "{:?}", report.solve);
    assert_eq!(landmarks.len(), NUM_LANDMARKS);
    assert_eq!(report.num_shots, 1);
    assert_eq!(report.num_fixed_shots, NUM_SHOTS - 1);

    assert!(origin_error(&map, &truth, "shot2") < 1e-6);
    for id in ["shot0", "shot1", "shot3", "shot4", "shot5"] {
        assert_eq!(map.shot_pose(id).unwrap(), truth.shot_pose(id).unwrap());
    }
    assert_reprojections_vanish(&map);
}
