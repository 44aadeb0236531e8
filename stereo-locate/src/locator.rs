use crate::{
    CalibrationError, CalibrationReport, CalibrationSolver, CalibrationState, DetectionReport,
    DetectionWorker, Frame, LocatorSettings, SampleBuffer, SampleRejected, Triangulator,
    TriangulationError,
};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::*;
use marker_detect::{Detection, MarkerDetector};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use stereo_core::{nalgebra::Point3, CameraId, FeatureMatch, KeyPoint, WorldToCamera};
use stereo_pinhole::{IntrinsicsError, StereoIntrinsics};

/// The buffer and the solver are locked together so that samples can not change while
/// they are being solved.
struct Calibrator {
    buffer: SampleBuffer,
    solver: CalibrationSolver,
}

/// The control surface of the stereo rig.
///
/// It collects the detections of both cameras, buffers samples, runs calibration and
/// triangulates the marker. Every method takes `&self`, so a locator can be shared between
/// threads. Detection workers only ever talk to it through the report channels.
///
/// Triangulated points are in the frame of the first camera and in units of the baseline,
/// which has unit length after calibration.
pub struct StereoLocator {
    intrinsics: StereoIntrinsics,
    detector: MarkerDetector,
    triangulator: Triangulator,
    calibrator: Mutex<Calibrator>,
    state: RwLock<CalibrationState>,
    latest: Mutex<[Option<DetectionReport>; 2]>,
    last_point: Mutex<Option<Point3<f64>>>,
    continuous: AtomicBool,
    senders: [Sender<DetectionReport>; 2],
    receivers: [Receiver<DetectionReport>; 2],
}

impl StereoLocator {
    pub fn new(settings: &LocatorSettings) -> Result<Self, IntrinsicsError> {
        let intrinsics = settings.intrinsics()?;
        let (first_tx, first_rx) = crossbeam_channel::bounded(settings.report_capacity);
        let (second_tx, second_rx) = crossbeam_channel::bounded(settings.report_capacity);
        Ok(Self {
            intrinsics,
            detector: settings.detector,
            triangulator: Triangulator::new(),
            calibrator: Mutex::new(Calibrator {
                buffer: SampleBuffer::new(),
                solver: CalibrationSolver::new(intrinsics, settings.solver),
            }),
            state: RwLock::new(CalibrationState::default()),
            latest: Mutex::new([None, None]),
            last_point: Mutex::new(None),
            continuous: AtomicBool::new(false),
            senders: [first_tx, second_tx],
            receivers: [first_rx, second_rx],
        })
    }

    pub fn intrinsics(&self) -> &StereoIntrinsics {
        &self.intrinsics
    }

    /// The sending side of the report channel of a camera, to be given to a detection worker.
    pub fn report_sender(&self, camera: CameraId) -> Sender<DetectionReport> {
        self.senders[camera.index()].clone()
    }

    /// Starts a detection worker which publishes into the report channel of `camera`.
    pub fn spawn_worker(
        &self,
        camera: CameraId,
        frames: Receiver<Frame>,
    ) -> std::io::Result<DetectionWorker> {
        DetectionWorker::spawn(camera, self.detector, frames, self.report_sender(camera))
    }

    /// Applies every queued report without blocking and returns how many there were.
    ///
    /// Reports of the second camera are applied first, so that a report of the first camera
    /// pairs with the newest detection of the second one.
    pub fn poll(&self) -> usize {
        let mut count = 0;
        for camera in [CameraId::Second, CameraId::First] {
            for report in self.receivers[camera.index()].try_iter() {
                self.apply(report);
                count += 1;
            }
        }
        count
    }

    /// Waits up to `timeout` for the report of a camera on frame `sequence` and applies it.
    ///
    /// Older reports still queued are discarded without being applied. A report of a later
    /// frame is applied and returned instead, since the requested one was dropped.
    pub fn wait_sequence(&self, camera: CameraId, sequence: u64, timeout: Duration) -> Option<DetectionReport> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.receivers[camera.index()].recv_timeout(remaining) {
                Ok(report) if report.sequence < sequence => {
                    debug!("{} skips stale frame {} waiting for {}", camera, report.sequence, sequence);
                }
                Ok(report) => {
                    if report.sequence > sequence {
                        debug!("{} frame {} was dropped, got {}", camera, sequence, report.sequence);
                    }
                    self.apply(report);
                    return Some(report);
                }
                Err(RecvTimeoutError::Timeout) => return None,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Records the latest detection of a camera.
    ///
    /// With continuous triangulation enabled, a detection of the first camera also
    /// triangulates the latest pair.
    pub fn report_detection(&self, camera: CameraId, detection: Detection) {
        let sequence = self.latest.lock()[camera.index()].map_or(0, |report| report.sequence + 1);
        self.apply(DetectionReport {
            camera,
            sequence,
            detection,
        });
    }

    fn apply(&self, report: DetectionReport) {
        trace!("{} frame {}: {:?}", report.camera, report.sequence, report.detection);
        self.latest.lock()[report.camera.index()] = Some(report);
        if report.camera == CameraId::First && self.continuous.load(Ordering::SeqCst) && self.is_calibrated() {
            match self.triangulate_latest() {
                Some(Ok(point)) => debug!("marker at ({}, {}, {})", point.x, point.y, point.z),
                Some(Err(e)) => debug!("unable to triangulate the latest detections: {}", e),
                None => {}
            }
        }
    }

    /// The latest report of each camera.
    pub fn latest(&self) -> [Option<DetectionReport>; 2] {
        *self.latest.lock()
    }

    fn latest_pair(&self) -> (Detection, Detection) {
        let [first, second] = self.latest();
        let detection = |report: Option<DetectionReport>| {
            report.map_or(Detection::Empty, |report| report.detection)
        };
        (detection(first), detection(second))
    }

    pub fn add_sample(&self, first: KeyPoint, second: KeyPoint) -> Result<usize, SampleRejected> {
        let result = self.calibrator.lock().buffer.push(FeatureMatch(first, second));
        log_sample(result)
    }

    /// Adds the latest detections of both cameras as a sample.
    pub fn capture_sample(&self) -> Result<usize, SampleRejected> {
        let (first, second) = self.latest_pair();
        let result = self.calibrator.lock().buffer.add_sample(&first, &second);
        log_sample(result)
    }

    pub fn clear_samples(&self) {
        self.calibrator.lock().buffer.clear();
        info!("cleared all samples");
    }

    pub fn sample_count(&self) -> usize {
        self.calibrator.lock().buffer.len()
    }

    pub fn enumerate_samples(&self) -> Vec<(CameraId, usize, KeyPoint)> {
        self.calibrator.lock().buffer.enumerate()
    }

    pub fn log_samples(&self) {
        self.calibrator.lock().buffer.log_contents();
    }

    /// Solves the calibration from all buffered samples, which are consumed whether or
    /// not it succeeds.
    ///
    /// The calibration state is replaced only on success.
    pub fn calibrate(&self) -> Result<CalibrationReport, CalibrationError> {
        let mut calibrator = self.calibrator.lock();
        let samples = calibrator.buffer.drain_all();
        info!("calibrating from {} samples", samples.len());
        match calibrator.solver.solve(&samples) {
            Ok(report) => {
                *self.state.write() = CalibrationState::from_report(&report);
                info!("calibration succeeded");
                Ok(report)
            }
            Err(e) => {
                warn!("calibration failed: {}", e);
                Err(e)
            }
        }
    }

    /// Triangulates a pair of pixel points, one per camera.
    pub fn triangulate(&self, first: KeyPoint, second: KeyPoint) -> Result<Point3<f64>, TriangulationError> {
        let point = self
            .triangulator
            .triangulate(&self.state.read(), &self.intrinsics, first, second)?;
        *self.last_point.lock() = Some(point);
        Ok(point)
    }

    /// Triangulates the latest detections, if both cameras currently see exactly one marker.
    pub fn triangulate_latest(&self) -> Option<Result<Point3<f64>, TriangulationError>> {
        let (first, second) = self.latest_pair();
        Some(self.triangulate(first.single()?, second.single()?))
    }

    /// The extrinsics of the first and the second camera.
    pub fn extrinsics(&self) -> (WorldToCamera, WorldToCamera) {
        let state = self.state.read();
        (
            state.extrinsics(CameraId::First),
            state.extrinsics(CameraId::Second),
        )
    }

    pub fn is_calibrated(&self) -> bool {
        self.state.read().is_calibrated()
    }

    /// A snapshot of the calibration state.
    pub fn calibration(&self) -> CalibrationState {
        self.state.read().clone()
    }

    pub fn set_continuous_triangulation(&self, enabled: bool) {
        self.continuous.store(enabled, Ordering::SeqCst);
    }

    /// The most recently triangulated point.
    pub fn last_point(&self) -> Option<Point3<f64>> {
        *self.last_point.lock()
    }
}

fn log_sample(result: Result<usize, SampleRejected>) -> Result<usize, SampleRejected> {
    match result {
        Ok(count) => info!("added sample, {} in buffer", count),
        Err(e) => info!("sample rejected: {}", e),
    }
    result
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::synthetic::{scene_points, Scene};
    use stereo_core::Pose;

    fn locator() -> StereoLocator {
        StereoLocator::new(&LocatorSettings::default()).unwrap()
    }

    fn fill(locator: &StereoLocator, scene: &Scene) {
        for sample in scene.samples(&scene_points(4, 3)) {
            locator.add_sample(sample.0, sample.1).unwrap();
        }
    }

    #[test]
    fn failed_calibration_keeps_the_previous_state() {
        let scene = Scene::new();
        let locator = locator();

        locator.add_sample(KeyPoint::new(100.0, 100.0), KeyPoint::new(90.0, 100.0)).unwrap();
        locator.add_sample(KeyPoint::new(200.0, 150.0), KeyPoint::new(180.0, 150.0)).unwrap();
        assert!(matches!(
            locator.calibrate(),
            Err(CalibrationError::InsufficientData { got: 2, required: 5 })
        ));
        assert!(!locator.is_calibrated());
        assert_eq!(locator.sample_count(), 0);
        assert_eq!(
            locator.extrinsics(),
            (WorldToCamera::identity(), WorldToCamera::identity())
        );

        fill(&locator, &scene);
        locator.calibrate().unwrap();
        let calibrated = locator.calibration();
        scene.assert_close(calibrated.extrinsics(CameraId::Second), 1e-8);

        locator.add_sample(KeyPoint::new(100.0, 100.0), KeyPoint::new(90.0, 100.0)).unwrap();
        locator.add_sample(KeyPoint::new(200.0, 150.0), KeyPoint::new(180.0, 150.0)).unwrap();
        assert!(locator.calibrate().is_err());
        assert!(locator.is_calibrated());
        assert_eq!(locator.calibration(), calibrated);
    }

    #[test]
    fn triangulation_needs_calibration() {
        let locator = locator();
        assert_eq!(
            locator.triangulate(KeyPoint::new(320.0, 240.0), KeyPoint::new(300.0, 240.0)),
            Err(TriangulationError::NotCalibrated)
        );
        assert_eq!(locator.last_point(), None);
    }

    #[test]
    fn capture_uses_the_latest_detections() {
        let locator = locator();
        locator.report_detection(CameraId::First, Detection::Single(KeyPoint::new(1.0, 2.0)));
        assert!(locator.capture_sample().is_err());
        locator.report_detection(CameraId::Second, Detection::Ambiguous(2));
        assert!(locator.capture_sample().is_err());
        locator.report_detection(CameraId::Second, Detection::Single(KeyPoint::new(3.0, 4.0)));
        assert_eq!(locator.capture_sample(), Ok(1));
        assert_eq!(
            locator.enumerate_samples(),
            vec![
                (CameraId::First, 0, KeyPoint::new(1.0, 2.0)),
                (CameraId::Second, 0, KeyPoint::new(3.0, 4.0)),
            ]
        );
        locator.clear_samples();
        assert_eq!(locator.sample_count(), 0);
    }

    #[test]
    fn continuous_triangulation_follows_the_first_camera() {
        let scene = Scene::new();
        let locator = locator();
        fill(&locator, &scene);
        locator.calibrate().unwrap();
        locator.set_continuous_triangulation(true);

        let point = Point3::new(0.2, -0.1, 2.4);
        let sample = scene.sample(point);
        locator.report_detection(CameraId::Second, Detection::Single(sample.1));
        assert_eq!(locator.last_point(), None);
        locator.report_detection(CameraId::First, Detection::Single(sample.0));
        let located = locator.last_point().unwrap();
        assert!((located * scene.baseline() - point).norm() < 1e-6);
    }

    #[test]
    fn poll_applies_queued_reports() {
        let locator = locator();
        let sender = locator.report_sender(CameraId::First);
        sender
            .send(DetectionReport {
                camera: CameraId::First,
                sequence: 7,
                detection: Detection::Single(KeyPoint::new(5.0, 6.0)),
            })
            .unwrap();
        locator
            .report_sender(CameraId::Second)
            .send(DetectionReport {
                camera: CameraId::Second,
                sequence: 7,
                detection: Detection::Single(KeyPoint::new(7.0, 8.0)),
            })
            .unwrap();
        assert_eq!(locator.poll(), 2);
        assert_eq!(locator.poll(), 0);
        let [first, second] = locator.latest();
        assert_eq!(first.unwrap().sequence, 7);
        assert_eq!(second.unwrap().detection, Detection::Single(KeyPoint::new(7.0, 8.0)));
        assert_eq!(locator.capture_sample(), Ok(1));
    }

    #[test]
    fn waiting_skips_stale_reports() {
        let locator = locator();
        let sender = locator.report_sender(CameraId::Second);
        for (sequence, x) in [(3, 1.0), (4, 2.0), (6, 3.0)] {
            sender
                .send(DetectionReport {
                    camera: CameraId::Second,
                    sequence,
                    detection: Detection::Single(KeyPoint::new(x, 0.0)),
                })
                .unwrap();
        }
        let timeout = Duration::from_millis(50);

        let report = locator.wait_sequence(CameraId::Second, 4, timeout).unwrap();
        assert_eq!(report.sequence, 4);
        assert_eq!(locator.latest()[CameraId::Second.index()], Some(report));

        // Frame 5 never arrives, so the next one stands in for it.
        let report = locator.wait_sequence(CameraId::Second, 5, timeout).unwrap();
        assert_eq!(report.sequence, 6);
        assert_eq!(report.detection, Detection::Single(KeyPoint::new(3.0, 0.0)));

        assert_eq!(locator.wait_sequence(CameraId::Second, 7, timeout), None);
        assert_eq!(locator.latest()[CameraId::Second.index()].unwrap().sequence, 6);
        assert!(locator.latest()[CameraId::First.index()].is_none());
    }
}
