use crossbeam_channel::Sender;
use image::{DynamicImage, GrayImage, Luma};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::time::Duration;
use stereo_core::{
    nalgebra::{Point3, Rotation3, Vector3},
    CameraId, CameraToCamera, KeyPoint, Pose,
};
use stereo_locate::{Frame, LocatorSettings, StereoLocator};
use stereo_pinhole::NormalizedKeyPoint;

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;
const MARKER_RADIUS: f64 = 4.0;
const TIMEOUT: Duration = Duration::from_secs(5);
const CALIBRATION_FRAMES: usize = 48;

/// Draws a bright disc with anti-aliased edges, so its position is not bound to the pixel grid.
fn render(center: KeyPoint) -> DynamicImage {
    let mut image = GrayImage::new(WIDTH, HEIGHT);
    let reach = MARKER_RADIUS + 1.0;
    let (x0, x1) = ((center.x - reach).floor() as u32, (center.x + reach).ceil() as u32);
    let (y0, y1) = ((center.y - reach).floor() as u32, (center.y + reach).ceil() as u32);
    for y in y0..=y1 {
        for x in x0..=x1 {
            let mut covered = 0;
            for sy in 0..4 {
                for sx in 0..4 {
                    let dx = x as f64 - 0.375 + 0.25 * sx as f64 - center.x;
                    let dy = y as f64 - 0.375 + 0.25 * sy as f64 - center.y;
                    if dx * dx + dy * dy <= MARKER_RADIUS * MARKER_RADIUS {
                        covered += 1;
                    }
                }
            }
            image.put_pixel(x, y, Luma([(255 * covered / 16) as u8]));
        }
    }
    DynamicImage::ImageLuma8(image)
}

struct Rig {
    settings: LocatorSettings,
    pose: CameraToCamera,
}

impl Rig {
    fn new() -> Self {
        let rotation = Rotation3::from_euler_angles(0.01, 0.33, -0.02);
        let center = Vector3::new(0.8, 0.05, -0.05);
        Self {
            settings: LocatorSettings::default(),
            pose: CameraToCamera::from_parts(-(rotation * center), rotation),
        }
    }

    fn observe(&self, point: Point3<f64>) -> [KeyPoint; 2] {
        let second = self.pose.rotation() * point + self.pose.translation();
        [
            self.settings
                .first
                .project(NormalizedKeyPoint::from_camera_point(point).unwrap()),
            self.settings
                .second
                .project(NormalizedKeyPoint::from_camera_point(second).unwrap()),
        ]
    }
}

fn show(
    locator: &StereoLocator,
    senders: &[Sender<Frame>; 2],
    sequence: u64,
    markers: [KeyPoint; 2],
) {
    for camera in CameraId::BOTH {
        senders[camera.index()]
            .send(Frame {
                sequence,
                image: render(markers[camera.index()]),
            })
            .unwrap();
    }
    for camera in CameraId::BOTH {
        let report = locator.wait_sequence(camera, sequence, TIMEOUT).unwrap();
        assert_eq!(report.sequence, sequence);
        assert!(report.detection.is_single());
    }
}

#[test]
fn calibrate_then_locate() {
    let rig = Rig::new();
    let locator = StereoLocator::new(&rig.settings).unwrap();
    let (first_tx, first_rx) = crossbeam_channel::unbounded();
    let (second_tx, second_rx) = crossbeam_channel::unbounded();
    let workers = [
        locator.spawn_worker(CameraId::First, first_rx).unwrap(),
        locator.spawn_worker(CameraId::Second, second_rx).unwrap(),
    ];
    let senders = [first_tx, second_tx];

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
    let mut sequence = 0;
    for _ in 0..CALIBRATION_FRAMES {
        let point = Point3::new(
            rng.gen_range(-0.7..0.7),
            rng.gen_range(-0.5..0.5),
            rng.gen_range(1.6..3.0),
        );
        show(&locator, &senders, sequence, rig.observe(point));
        sequence += 1;
        locator.capture_sample().unwrap();
    }
    assert_eq!(locator.sample_count(), CALIBRATION_FRAMES);

    let report = locator.calibrate().unwrap();
    assert!(locator.is_calibrated());
    assert_eq!(locator.sample_count(), 0);
    assert!(report.diagnostics.essential_inlier_ratio > 0.8);
    assert!(report.diagnostics.refined);
    // Detections are within a fraction of a pixel of the projections.
    assert!(report.diagnostics.sampson_rms < 0.5, "rms {}", report.diagnostics.sampson_rms);
    let angle = report.extrinsics.rotation_angle_to(rig.pose.extrinsics());
    assert!(angle < 0.02, "rotation is off by {}", angle);
    let direction = (report.extrinsics.translation() - rig.pose.translation().normalize()).norm();
    assert!(direction < 0.05, "translation is off by {}", direction);

    let baseline = rig.pose.translation().norm();
    for point in [
        Point3::new(0.0, 0.0, 2.0),
        Point3::new(0.4, -0.2, 2.5),
        Point3::new(-0.5, 0.3, 1.8),
    ] {
        show(&locator, &senders, sequence, rig.observe(point));
        sequence += 1;
        let located = locator.triangulate_latest().unwrap().unwrap();
        let error = (located * baseline - point).norm();
        assert!(error < 0.05 * point.coords.norm(), "point is off by {}", error);
        assert_eq!(locator.last_point(), Some(located));
    }

    drop(senders);
    for worker in workers {
        assert_eq!(worker.join().unwrap(), sequence as usize);
    }
}

#[test]
fn ambiguous_frames_are_not_sampled() {
    let rig = Rig::new();
    let locator = StereoLocator::new(&rig.settings).unwrap();
    let (first_tx, first_rx) = crossbeam_channel::unbounded();
    let worker = locator.spawn_worker(CameraId::First, first_rx).unwrap();

    let mut image = render(KeyPoint::new(100.0, 100.0)).to_luma8();
    for y in 300..310 {
        for x in 400..410 {
            image.put_pixel(x, y, Luma([255]));
        }
    }
    first_tx
        .send(Frame {
            sequence: 0,
            image: DynamicImage::ImageLuma8(image),
        })
        .unwrap();
    let report = locator.wait_sequence(CameraId::First, 0, TIMEOUT).unwrap();
    assert_eq!(report.detection, stereo_locate::Detection::Ambiguous(2));
    assert!(locator.capture_sample().is_err());
    assert_eq!(locator.sample_count(), 0);

    drop(first_tx);
    assert_eq!(worker.join().unwrap(), 1);
}
