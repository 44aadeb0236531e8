use nister_stewenius::NisterStewenius;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use stereo_core::{
    nalgebra::{Point3, Rotation3, Vector3},
    sample_consensus::{Estimator, Model},
    CameraToCamera, FeatureMatch, Pose,
};
use stereo_pinhole::{EssentialMatrix, NormalizedKeyPoint};

const RESIDUAL_THRESHOLD: f64 = 1e-6;
const MATRIX_THRESHOLD: f64 = 1e-5;

const ROT_MAGNITUDE: f64 = 0.2;
const POINT_BOX_SIZE: f64 = 2.0;
const POINT_DISTANCE: f64 = 3.0;

#[test]
fn randomized() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
    let successes = (0..200).filter(|_| run_round(&mut rng)).count();
    eprintln!("successes: {}", successes);
    assert!(successes > 180);
}

#[test]
fn estimator_needs_five_matches() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
    let (_, matches) = some_test_data(&mut rng, 4);
    let models = NisterStewenius::new().estimate(matches.iter().copied());
    assert!(models.is_empty());
}

#[test]
fn candidates_are_essential_matrices() {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
    let (_, matches) = some_test_data(&mut rng, 5);
    let models = NisterStewenius::new().estimate(matches.iter().copied());
    assert!(!models.is_empty());
    for essential in &models {
        let mut singular: Vec<f64> = essential.0.singular_values().iter().copied().collect();
        singular.sort_by(|a, b| b.partial_cmp(a).unwrap());
        assert!((singular[0] - singular[1]).abs() < 1e-5, "{:?}", singular);
        assert!(singular[2].abs() < 1e-5, "{:?}", singular);
        assert!((essential.0.norm() - 1.0).abs() < 1e-9);
    }
}

fn run_round(rng: &mut Xoshiro256PlusPlus) -> bool {
    let (pose, matches) = some_test_data(rng, 5);
    let models = NisterStewenius::new().estimate(matches.iter().copied());
    let consistent = models
        .iter()
        .all(|essential| matches.iter().all(|m| essential.residual(m) < RESIDUAL_THRESHOLD));
    if !consistent {
        eprintln!("a candidate does not satisfy the sample");
    }
    consistent && models.iter().any(|essential| close_to_truth(essential, pose))
}

/// The estimate matches the essential matrix of the pose up to sign.
fn close_to_truth(essential: &EssentialMatrix, pose: CameraToCamera) -> bool {
    let truth = EssentialMatrix::from(pose).normalize().unwrap().0;
    let difference = (essential.0 - truth).norm().min((essential.0 + truth).norm());
    difference <= MATRIX_THRESHOLD
}

/// Gets a random relative pose and the matches of random points seen by both cameras.
fn some_test_data(
    rng: &mut Xoshiro256PlusPlus,
    count: usize,
) -> (CameraToCamera, Vec<FeatureMatch<NormalizedKeyPoint>>) {
    let mut random_vector = || {
        Vector3::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        )
    };
    let relative_pose = CameraToCamera::from_parts(
        random_vector(),
        Rotation3::new(random_vector() * std::f64::consts::PI * ROT_MAGNITUDE),
    );

    let matches = (0..count)
        .map(|_| {
            let mut a = Point3::from(random_vector() * 0.5 * POINT_BOX_SIZE);
            a.z += POINT_DISTANCE;
            let b = relative_pose.rotation() * a + relative_pose.translation();
            FeatureMatch(
                NormalizedKeyPoint::from_camera_point(a).unwrap(),
                NormalizedKeyPoint::from_camera_point(b).unwrap(),
            )
        })
        .collect();

    (relative_pose, matches)
}
