use crate::{
    observed_landmarks_of, shot_neighborhood, BlockId, BundleError, BundleSettings,
    LossFunction, PoseSource, Problem, Residual, SolveReport, Termination,
};
use cv_camera::Camera;
use cv_core::nalgebra::{Matrix3, Matrix6, Point3, Vector3};
use cv_core::{CameraToCamera, Pose, Similarity, WorldToCamera};
use cv_geom::Alignment;
use cv_sfm::{ErrorType, Map, ShotRef};
use log::*;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

/// Rig cameras closer than this to the identity are the rig reference and stay fixed.
const RIG_REFERENCE_EPSILON: f64 = 1e-9;

/// A measured motion between two shots, e.g. from odometry.
#[derive(Debug, Clone, PartialEq)]
pub struct RelativeMotionPrior {
    pub first: String,
    pub second: String,
    /// Takes points from the first camera frame into the second.
    pub motion: CameraToCamera,
    pub std_rotation: f64,
    pub std_translation: f64,
}

/// A measured world pose of a shot.
#[derive(Debug, Clone, PartialEq)]
pub struct AbsolutePosePrior {
    pub shot: String,
    pub pose: WorldToCamera,
    pub std_rotation: f64,
    pub std_translation: f64,
}

/// A measured optical center of a shot.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionPrior {
    pub shot: String,
    pub position: Point3<f64>,
    pub std: f64,
}

/// Priors that do not come from the map itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BundlePriors {
    /// Calibrated intrinsics, by camera id, that optimized cameras are pulled towards.
    pub cameras: HashMap<String, Camera>,
    /// Nominal mountings, by rig camera id, that optimized rig cameras are pulled towards.
    pub rig_cameras: HashMap<String, CameraToCamera>,
    pub relative_motions: Vec<RelativeMotionPrior>,
    pub absolute_poses: Vec<AbsolutePosePrior>,
    pub positions: Vec<PositionPrior>,
}

impl BundlePriors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Priors keeping every camera and rig camera near its current value in `map`.
    pub fn from_map(map: &Map) -> Self {
        Self {
            cameras: map
                .cameras()
                .iter()
                .map(|camera| (camera.id.clone(), camera.clone()))
                .collect(),
            rig_cameras: map
                .rig_cameras()
                .iter()
                .map(|rig_camera| (rig_camera.id().to_owned(), rig_camera.pose))
                .collect(),
            ..Self::default()
        }
    }

    /// Adds position priors from the shots of a reference reconstruction.
    ///
    /// `alignment` maps the adjusted map onto `reference`, so reference
    /// optical centers are brought back through its inverse.
    pub fn with_alignment(mut self, reference: &Map, alignment: &Alignment, std: f64) -> Self {
        let inverse = alignment.similarity.inverse();
        self.positions.extend(reference.shots().iter().map(|shot| PositionPrior {
            shot: shot.id().to_owned(),
            position: inverse.transform_point(&shot.pose().origin()),
            std: std / alignment.similarity.scale,
        }));
        self
    }
}

/// What a bundle adjustment optimizes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleSelection {
    /// Shots whose poses are adjusted.
    pub shots: BTreeSet<String>,
    /// Shots whose observations constrain the problem while their poses stay fixed.
    pub fixed_shots: BTreeSet<String>,
    /// Landmarks to include. `None` takes every landmark seen by `shots`.
    pub landmarks: Option<BTreeSet<String>>,
    pub fix_landmarks: bool,
    pub fix_cameras: bool,
    pub fix_rig_cameras: bool,
}

/// The solver stopped before reaching one of its tolerances.
///
/// The best parameters found were still written back.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("bundle adjustment did not converge ({termination}) after {num_evaluations} evaluations")]
pub struct ConvergenceWarning {
    pub termination: Termination,
    pub num_evaluations: usize,
}

/// The outcome of a bundle adjustment.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleReport {
    pub num_shots: usize,
    pub num_fixed_shots: usize,
    pub num_landmarks: usize,
    pub num_reprojections: usize,
    pub num_parameters: usize,
    pub num_residuals: usize,
    pub solve: SolveReport,
    pub warning: Option<ConvergenceWarning>,
}

/// Adjusts every shot, landmark, camera and rig camera of the map.
pub fn bundle(
    map: &mut Map,
    priors: &BundlePriors,
    settings: &BundleSettings,
) -> Result<BundleReport, BundleError> {
    let selection = BundleSelection {
        shots: map.shots().ids().map(str::to_owned).collect(),
        ..BundleSelection::default()
    };
    bundle_selection(map, &selection, priors, settings)
}

/// Adjusts the poses of the given shots against fixed landmarks and cameras.
pub fn bundle_shot_poses<I, S>(
    map: &mut Map,
    shot_ids: I,
    priors: &BundlePriors,
    settings: &BundleSettings,
) -> Result<BundleReport, BundleError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let selection = BundleSelection {
        shots: shot_ids.into_iter().map(Into::into).collect(),
        fix_landmarks: true,
        fix_cameras: true,
        fix_rig_cameras: true,
        ..BundleSelection::default()
    };
    bundle_selection(map, &selection, priors, settings)
}

/// Adjusts the neighborhood of a shot.
///
/// The interior of the [`shot_neighborhood`] and the landmarks it sees are
/// adjusted, while the boundary shots only contribute their observations of
/// those landmarks. Cameras and rig cameras are fixed. Returns the adjusted
/// landmark ids along with the report.
pub fn bundle_local(
    map: &mut Map,
    central_shot_id: &str,
    priors: &BundlePriors,
    settings: &BundleSettings,
) -> Result<(BTreeSet<String>, BundleReport), BundleError> {
    let (interior, boundary) = shot_neighborhood(
        map,
        central_shot_id,
        settings.local_bundle_radius,
        settings.local_bundle_min_common_points,
        settings.local_bundle_max_shots,
    )?;
    let landmarks = observed_landmarks_of(map, &interior)?;
    let selection = BundleSelection {
        shots: interior,
        fixed_shots: boundary,
        landmarks: Some(landmarks.clone()),
        fix_landmarks: false,
        fix_cameras: true,
        fix_rig_cameras: true,
    };
    let report = bundle_selection(map, &selection, priors, settings)?;
    Ok((landmarks, report))
}

/// Adjusts an arbitrary selection of the map.
///
/// Fails before touching the map if the selection refers to missing
/// entities or the problem is malformed.
pub fn bundle_selection(
    map: &mut Map,
    selection: &BundleSelection,
    priors: &BundlePriors,
    settings: &BundleSettings,
) -> Result<BundleReport, BundleError> {
    let (mut problem, num_landmarks, num_reprojections) = {
        let builder = Builder::new(map, selection, priors, settings)?.build()?;
        (builder.problem, builder.landmarks.len(), builder.num_reprojections)
    };
    let num_shots = selection.shots.len();
    let num_fixed_shots = selection.fixed_shots.len();
    info!(
        "bundle: {} shots ({} fixed), {} landmarks, {} reprojections, {} parameters, {} residuals",
        num_shots + num_fixed_shots,
        num_fixed_shots,
        num_landmarks,
        num_reprojections,
        problem.num_parameters(),
        problem.num_residuals()
    );

    let solve = problem.solve(settings);
    info!(
        "bundle: {} after {} evaluations, cost {} -> {}",
        solve.termination, solve.num_evaluations, solve.initial_cost, solve.final_cost
    );
    let warning = (!solve.converged).then(|| ConvergenceWarning {
        termination: solve.termination,
        num_evaluations: solve.num_evaluations,
    });
    if let Some(warning) = &warning {
        warn!("{}", warning);
    }

    write_back(map, &problem, settings)?;
    map.compute_reprojection_errors(settings.error_type);

    Ok(BundleReport {
        num_shots,
        num_fixed_shots,
        num_landmarks,
        num_reprojections,
        num_parameters: problem.num_parameters(),
        num_residuals: problem.num_residuals(),
        solve,
        warning,
    })
}

struct Builder<'a> {
    map: &'a Map,
    selection: &'a BundleSelection,
    priors: &'a BundlePriors,
    settings: &'a BundleSettings,
    problem: Problem,
    shots: Vec<ShotRef<'a>>,
    landmarks: BTreeSet<String>,
    num_reprojections: usize,
}

/// The pose source and blocks of a shot.
fn pose_blocks(shot: &ShotRef<'_>) -> (PoseSource, Vec<BlockId>) {
    match (shot.rig_instance_id(), shot.rig_camera_id()) {
        (Some(instance), Some(camera)) => (
            PoseSource::Rig,
            vec![
                BlockId::RigInstance(instance.to_owned()),
                BlockId::RigCamera(camera.to_owned()),
            ],
        ),
        _ => (PoseSource::Single, vec![BlockId::ShotPose(shot.id().to_owned())]),
    }
}

impl<'a> Builder<'a> {
    fn new(
        map: &'a Map,
        selection: &'a BundleSelection,
        priors: &'a BundlePriors,
        settings: &'a BundleSettings,
    ) -> Result<Self, BundleError> {
        if selection.shots.is_empty() {
            return Err(BundleError::Precheck("no shots selected".to_owned()));
        }
        if let Some(id) = selection.shots.intersection(&selection.fixed_shots).next() {
            return Err(BundleError::Precheck(format!(
                "shot `{}` is selected both as free and fixed",
                id
            )));
        }
        let shots = selection
            .shots
            .iter()
            .chain(&selection.fixed_shots)
            .map(|id| map.shot(id))
            .collect::<Result<Vec<_>, _>>()?;
        let landmarks = match &selection.landmarks {
            Some(landmarks) => {
                for id in landmarks {
                    map.landmark(id)?;
                }
                landmarks.clone()
            }
            None => observed_landmarks_of(map, &selection.shots)?,
        };
        Ok(Self {
            map,
            selection,
            priors,
            settings,
            problem: Problem::new(),
            shots,
            landmarks,
            num_reprojections: 0,
        })
    }

    fn is_free(&self, shot_id: &str) -> bool {
        self.selection.shots.contains(shot_id)
    }

    fn is_variable(&self, blocks: &[BlockId]) -> bool {
        blocks.iter().any(|id| {
            self.problem
                .block(id)
                .map_or(false, |block| block.num_free() > 0)
        })
    }

    fn build(mut self) -> Result<Self, BundleError> {
        let shots = self.shots.clone();
        for shot in &shots {
            self.add_pose(shot)?;
            self.add_camera(shot.camera())?;
        }
        for id in &self.landmarks {
            let position = self.map.landmark(id)?.position;
            let block = BlockId::Landmark(id.clone());
            self.problem.add_block(block.clone(), position.coords.as_slice().to_vec())?;
            if self.selection.fix_landmarks {
                self.problem.set_constant(&block)?;
            }
        }
        for shot in &shots {
            self.add_observations(shot)?;
            self.add_measurement_priors(shot)?;
        }
        self.add_gps_priors()?;
        self.add_user_priors()?;
        Ok(self)
    }

    fn add_pose(&mut self, shot: &ShotRef<'a>) -> Result<(), BundleError> {
        match (shot.rig_instance_id(), shot.rig_camera_id()) {
            (Some(instance_id), Some(rig_camera_id)) => {
                let instance_block = BlockId::RigInstance(instance_id.to_owned());
                if !self.problem.contains(&instance_block) {
                    let instance = self.map.rig_instance(instance_id)?;
                    self.problem
                        .add_block(instance_block.clone(), instance.pose.se3().as_slice().to_vec())?;
                    if !instance.shot_ids().any(|id| self.is_free(id)) {
                        self.problem.set_constant(&instance_block)?;
                    }
                }
                let rig_camera_block = BlockId::RigCamera(rig_camera_id.to_owned());
                if !self.problem.contains(&rig_camera_block) {
                    self.add_rig_camera(rig_camera_id, rig_camera_block)?;
                }
            }
            _ => {
                let block = BlockId::ShotPose(shot.id().to_owned());
                self.problem
                    .add_block(block.clone(), shot.pose().se3().as_slice().to_vec())?;
                if !self.is_free(shot.id()) {
                    self.problem.set_constant(&block)?;
                }
            }
        }
        Ok(())
    }

    /// Rig cameras only move when some instance holds several shots, and the
    /// reference camera of the rig never does.
    fn add_rig_camera(&mut self, id: &str, block: BlockId) -> Result<(), BundleError> {
        let pose = self.map.rig_camera(id)?.pose;
        self.problem.add_block(block.clone(), pose.se3().as_slice().to_vec())?;
        let constrained = self.map.rig_instances().iter().any(|instance| {
            instance.num_shots() > 1 && instance.shots().any(|(_, camera)| camera == id)
        });
        let fixed = self.selection.fix_rig_cameras
            || !self.settings.optimize_rig_cameras
            || !constrained
            || pose.is_identity(RIG_REFERENCE_EPSILON);
        if fixed {
            return self.problem.set_constant(&block);
        }
        if let Some(prior) = self.priors.rig_cameras.get(id) {
            let t = self.settings.rig_translation_sd;
            let r = self.settings.rig_rotation_sd;
            self.problem.add_residual(
                Residual::ParameterPrior {
                    mean: prior.se3().as_slice().to_vec(),
                    std: vec![t, t, t, r, r, r],
                },
                &[block],
                LossFunction::Trivial,
            )?;
        }
        Ok(())
    }

    fn add_camera(&mut self, camera: &Camera) -> Result<(), BundleError> {
        let block = BlockId::Camera(camera.id.clone());
        if self.problem.contains(&block) {
            return Ok(());
        }
        self.problem.add_block(block.clone(), camera.parameters())?;
        if self.selection.fix_cameras || !self.settings.optimize_cameras {
            return self.problem.set_constant(&block);
        }
        let prior = match self.priors.cameras.get(&camera.id) {
            Some(prior) if prior.projection_type() == camera.projection_type() => prior,
            Some(_) => {
                return Err(BundleError::Precheck(format!(
                    "camera `{}` has a prior of another projection type",
                    camera.id
                )))
            }
            None => return Ok(()),
        };
        if camera.parameters().is_empty() {
            return Ok(());
        }
        let mean = prior.parameters();
        let std = camera
            .parameter_names()
            .iter()
            .zip(&mean)
            .map(|(&name, value)| self.parameter_sd(name, *value))
            .collect();
        self.problem.add_residual(
            Residual::ParameterPrior { mean, std },
            &[block],
            LossFunction::Trivial,
        )
    }

    fn parameter_sd(&self, name: &str, value: f64) -> f64 {
        let settings = self.settings;
        match name {
            "focal" | "focal_x" | "focal_y" => settings.focal_prior_sd * value.abs().max(f64::EPSILON),
            "c_x" | "c_y" => settings.principal_point_sd,
            "p1" | "p2" => settings.tangential_distortion_sd,
            _ => settings.radial_distortion_sd,
        }
    }

    fn add_observations(&mut self, shot: &ShotRef<'a>) -> Result<(), BundleError> {
        let (pose, pose_blocks) = pose_blocks(shot);
        let camera = shot.camera();
        let settings = self.settings;
        for (landmark_id, observation) in shot.observations() {
            if !self.landmarks.contains(landmark_id) {
                continue;
            }
            let landmark = BlockId::Landmark(landmark_id.to_owned());
            let mut blocks = pose_blocks.clone();
            blocks.push(BlockId::Camera(camera.id.clone()));
            blocks.push(landmark.clone());

            let sd = if settings.use_observation_scale && observation.scale > 0.0 {
                observation.scale
            } else {
                settings.reprojection_error_sd
            };
            let std = match settings.error_type {
                ErrorType::Pixel => sd * camera.pixel_scale(),
                ErrorType::Normalized | ErrorType::Angular => sd,
            };
            self.problem.add_residual(
                Residual::Reprojection {
                    pose,
                    projection_type: camera.projection_type(),
                    error_type: settings.error_type,
                    observed: observation.point,
                    pixel_scale: camera.pixel_scale(),
                    std,
                },
                &blocks,
                settings.loss_function,
            )?;
            self.num_reprojections += 1;

            if let Some(depth) = observation.depth_prior.filter(|_| settings.use_depth_priors) {
                let mut blocks = pose_blocks.clone();
                blocks.push(landmark);
                self.problem.add_residual(
                    Residual::DepthPrior { pose, depth },
                    &blocks,
                    LossFunction::Trivial,
                )?;
            }
        }
        Ok(())
    }

    /// Compass and gravity priors of a shot.
    fn add_measurement_priors(&mut self, shot: &ShotRef<'a>) -> Result<(), BundleError> {
        let (pose, blocks) = pose_blocks(shot);
        if !self.is_free(shot.id()) || !self.is_variable(&blocks) {
            return Ok(());
        }
        let measurements = &shot.measurements;
        if let Some(angle) = measurements.compass_angle.filter(|_| self.settings.use_compass) {
            let accuracy = measurements
                .compass_accuracy
                .filter(|&a| a > 0.0)
                .unwrap_or(self.settings.default_compass_accuracy);
            self.problem.add_residual(
                Residual::Heading {
                    pose,
                    heading: angle.to_radians(),
                    std: accuracy.to_radians(),
                },
                &blocks,
                LossFunction::Trivial,
            )?;
        }
        if let Some(down) = measurements.gravity_down.filter(|_| self.settings.use_gravity) {
            self.problem.add_residual(
                Residual::UpVector {
                    pose,
                    down,
                    std: self.settings.gravity_sd,
                },
                &blocks,
                LossFunction::Trivial,
            )?;
        }
        Ok(())
    }

    /// GPS positions constrain the optical center of shots outside rigs and the
    /// origin of rig instances, against the average GPS position of their shots.
    fn add_gps_priors(&mut self) -> Result<(), BundleError> {
        if !self.settings.use_gps {
            return Ok(());
        }
        let mut instances = BTreeSet::new();
        let shots = self.shots.clone();
        for shot in &shots {
            if !self.is_free(shot.id()) {
                continue;
            }
            match shot.rig_instance_id() {
                Some(instance) => {
                    instances.insert(instance);
                }
                None => {
                    if let Some((position, accuracy)) = self.gps_reading(shot) {
                        let block = BlockId::ShotPose(shot.id().to_owned());
                        self.add_position_prior(&shot.camera().id, block, position, accuracy)?;
                    }
                }
            }
        }
        for instance_id in instances {
            let instance = self.map.rig_instance(instance_id)?;
            let readings: Vec<(String, Point3<f64>, f64)> = instance
                .shot_ids()
                .filter_map(|id| self.map.shot(id).ok())
                .filter_map(|shot| {
                    self.gps_reading(&shot)
                        .map(|(p, a)| (shot.camera().id.clone(), p, a))
                })
                .collect();
            let camera = match readings.first() {
                Some((camera, _, _)) => camera.clone(),
                None => continue,
            };
            let count = readings.len() as f64;
            let position = readings.iter().map(|(_, p, _)| p.coords).sum::<Vector3<f64>>() / count;
            let accuracy = readings.iter().map(|(_, _, a)| a).sum::<f64>() / count;
            let block = BlockId::RigInstance(instance_id.to_owned());
            self.add_position_prior(&camera, block, position.into(), accuracy)?;
        }
        Ok(())
    }

    fn gps_reading(&self, shot: &ShotRef<'_>) -> Option<(Point3<f64>, f64)> {
        let position = shot.measurements.gps_position?;
        let accuracy = shot
            .measurements
            .gps_accuracy
            .filter(|&a| a > 0.0)
            .unwrap_or(self.settings.default_gps_accuracy);
        Some((position, accuracy))
    }

    /// A position prior on a world pose block, through the GPS bias of `camera_id`.
    fn add_position_prior(
        &mut self,
        camera_id: &str,
        pose_block: BlockId,
        position: Point3<f64>,
        std: f64,
    ) -> Result<(), BundleError> {
        if !self.is_variable(std::slice::from_ref(&pose_block)) {
            return Ok(());
        }
        let bias = self.map.bias(camera_id)?;
        let biased = self.settings.compensate_gps_bias || bias != Similarity::identity();
        let mut blocks = vec![pose_block];
        if biased {
            let bias_block = BlockId::Bias(camera_id.to_owned());
            if !self.problem.contains(&bias_block) {
                self.problem
                    .add_block(bias_block.clone(), bias.parameters().to_vec())?;
                if !self.settings.compensate_gps_bias {
                    self.problem.set_constant(&bias_block)?;
                }
            }
            blocks.push(bias_block);
        }
        self.problem.add_residual(
            Residual::AbsolutePosition {
                pose: PoseSource::Single,
                position,
                std,
                biased,
            },
            &blocks,
            LossFunction::Trivial,
        )
    }

    /// Relative motion, absolute pose and position priors given by the caller.
    ///
    /// Priors on shots outside the problem are skipped.
    fn add_user_priors(&mut self) -> Result<(), BundleError> {
        let priors = self.priors;
        let in_problem: HashMap<&str, &ShotRef<'a>> =
            self.shots.iter().map(|shot| (shot.id(), shot)).collect();
        let mut residuals = vec![];
        for prior in &priors.relative_motions {
            if let (Some(first), Some(second)) = (
                in_problem.get(prior.first.as_str()),
                in_problem.get(prior.second.as_str()),
            ) {
                let (first_source, mut blocks) = pose_blocks(first);
                let (second_source, second_blocks) = pose_blocks(second);
                blocks.extend(second_blocks);
                residuals.push((
                    Residual::RelativeMotion {
                        first: first_source,
                        second: second_source,
                        motion: prior.motion,
                        std_rotation: prior.std_rotation,
                        std_translation: prior.std_translation,
                    },
                    blocks,
                ));
            } else {
                debug!(
                    "skipping relative motion prior between {} and {}",
                    prior.first, prior.second
                );
            }
        }
        for prior in &priors.absolute_poses {
            if let Some(shot) = in_problem.get(prior.shot.as_str()) {
                let (pose, blocks) = pose_blocks(shot);
                residuals.push((
                    Residual::AbsolutePose {
                        pose,
                        prior: prior.pose,
                        std_rotation: prior.std_rotation,
                        std_translation: prior.std_translation,
                    },
                    blocks,
                ));
            }
        }
        for prior in &priors.positions {
            if let Some(shot) = in_problem.get(prior.shot.as_str()) {
                let (pose, blocks) = pose_blocks(shot);
                residuals.push((
                    Residual::AbsolutePosition {
                        pose,
                        position: prior.position,
                        std: prior.std,
                        biased: false,
                    },
                    blocks,
                ));
            }
        }
        for (residual, blocks) in residuals {
            if self.is_variable(&blocks) {
                self.problem
                    .add_residual(residual, &blocks, LossFunction::Trivial)?;
            }
        }
        Ok(())
    }
}

/// Copies the solved blocks into the map.
fn write_back(map: &mut Map, problem: &Problem, settings: &BundleSettings) -> Result<(), BundleError> {
    let covariance = if settings.compute_covariances {
        let adjusted: Vec<BlockId> = problem
            .blocks()
            .filter(|block| {
                block.num_free() > 0
                    && matches!(block.id, BlockId::ShotPose(_) | BlockId::Landmark(_))
            })
            .map(|block| block.id.clone())
            .collect();
        let covariance = problem.covariance(&adjusted);
        if covariance.is_none() {
            warn!("bundle: covariance estimation failed");
        }
        covariance
    } else {
        None
    };
    let mut shot_covariances = vec![];
    let mut landmark_covariances = vec![];
    for block in problem.blocks().filter(|block| block.num_free() > 0) {
        let values = match problem.values(&block.id) {
            Some(values) => values,
            None => continue,
        };
        match &block.id {
            BlockId::ShotPose(id) => {
                map.set_shot_pose(id, WorldToCamera::from_se3_slice(values))?;
                if let Some(c) = covariance.as_ref().and_then(|c| c.block(&block.id)) {
                    shot_covariances.push((id, Matrix6::from_column_slice(c.as_slice())));
                }
            }
            BlockId::RigInstance(id) => {
                map.rig_instance_mut(id)?.pose = WorldToCamera::from_se3_slice(values);
            }
            BlockId::RigCamera(id) => {
                map.rig_camera_mut(id)?.pose = CameraToCamera::from_se3_slice(values);
            }
            BlockId::Camera(id) => map.camera_mut(id)?.set_parameters(values)?,
            BlockId::Landmark(id) => {
                map.landmark_mut(id)?.position = Point3::from_slice(values);
                if let Some(c) = covariance.as_ref().and_then(|c| c.block(&block.id)) {
                    landmark_covariances.push((id, Matrix3::from_column_slice(c.as_slice())));
                }
            }
            BlockId::Bias(id) => map.set_bias(id, Similarity::from_parameters(values))?,
        }
    }
    for (id, c) in shot_covariances {
        map.shot_mut(id)?.covariance = Some(c);
    }
    for (id, c) in landmark_covariances {
        map.landmark_mut(id)?.covariance = Some(c);
    }
    Ok(())
}
