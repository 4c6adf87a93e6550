use approx::assert_relative_eq;
use cv_camera::{Camera, CameraError, Projection, ProjectionType};
use cv_core::nalgebra::{Point2, Vector3};
use rand::{rngs::SmallRng, Rng, SeedableRng};

const SAMPLE_POINTS: usize = 200;

fn cameras() -> Vec<Camera> {
    vec![
        Camera::perspective("perspective", 0.9, -0.1, 0.01).with_size(640, 480),
        Camera::new(
            "brown",
            Projection::Brown {
                focal_x: 0.85,
                focal_y: 0.87,
                c_x: 0.01,
                c_y: -0.02,
                k1: -0.05,
                k2: 0.01,
                k3: 0.001,
                p1: 0.001,
                p2: -0.0015,
            },
        )
        .with_size(1920, 1080),
        Camera::fisheye("fisheye", 0.5, -0.02, 0.003).with_size(1000, 1000),
        Camera::spherical("spherical").with_size(2000, 1000),
    ]
}

/// Random directions in front of the camera, within about 35 degrees of the optical axis.
fn frontal_directions(rng: &mut SmallRng) -> Vec<Vector3<f64>> {
    (0..SAMPLE_POINTS)
        .map(|_| {
            Vector3::new(
                rng.gen_range(-0.7..0.7),
                rng.gen_range(-0.5..0.5),
                1.0,
            ) * rng.gen_range(0.5..20.0)
        })
        .collect()
}

#[test]
fn bearing_inverts_projection() {
    let mut rng = SmallRng::seed_from_u64(0);
    let points = frontal_directions(&mut rng);
    for camera in cameras() {
        let projected = camera.project_many(&points);
        let bearings = camera.bearing_many(&projected);
        for (point, bearing) in points.iter().zip(bearings) {
            assert_relative_eq!(bearing.into_inner(), point.normalize(), epsilon = 1e-9);
        }
    }
}

#[test]
fn spherical_covers_full_sphere() {
    let camera = Camera::spherical("pano").with_size(2000, 1000);
    let behind = Vector3::new(0.0, 0.0, -1.0);
    let projected = camera.project(&behind);
    assert_relative_eq!(projected.x.abs(), 0.5, epsilon = 1e-12);
    assert_relative_eq!(camera.bearing(&projected).into_inner(), behind, epsilon = 1e-12);
    let up = camera.project(&Vector3::new(0.0, -1.0, 0.0));
    assert_relative_eq!(up, Point2::new(0.0, -0.25), epsilon = 1e-12);
}

#[test]
fn parameters_follow_names() {
    for camera in cameras() {
        assert_eq!(camera.parameters().len(), camera.parameter_names().len());
    }
    let mut camera = Camera::perspective("c", 1.0, 0.0, 0.0);
    camera.set_parameters(&[0.8, 0.1, -0.01]).unwrap();
    assert_eq!(
        camera.projection,
        Projection::Perspective {
            focal: 0.8,
            k1: 0.1,
            k2: -0.01
        }
    );
    assert_eq!(
        camera.set_parameters(&[1.0]),
        Err(CameraError::WrongParameterCount {
            projection_type: "perspective",
            expected: 3,
            actual: 1
        })
    );
    assert_eq!(camera.parameters(), vec![0.8, 0.1, -0.01]);
    assert_eq!(ProjectionType::Brown.num_parameters(), 9);
}

#[test]
fn pixel_coordinates() {
    let camera = Camera::perspective("c", 1.0, 0.0, 0.0).with_size(640, 480);
    let center = camera.pixel_to_normalized(&Point2::new(319.5, 239.5));
    assert_relative_eq!(center, Point2::origin(), epsilon = 1e-12);
    let corner = Point2::new(0.0, 0.0);
    let normalized = camera.pixel_to_normalized(&corner);
    assert_relative_eq!(normalized.x, -319.5 / 640.0, epsilon = 1e-12);
    assert_relative_eq!(camera.normalized_to_pixel(&normalized), corner, epsilon = 1e-9);
}
