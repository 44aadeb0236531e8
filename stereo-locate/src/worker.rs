use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use image::DynamicImage;
use log::*;
use marker_detect::{Detection, MarkerDetector};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use stereo_core::CameraId;

/// How long a worker waits for a frame before checking whether it should stop.
const RECV_TIMEOUT: Duration = Duration::from_millis(50);

/// A frame received from a camera.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Frames of both cameras with the same sequence number were captured at the same time.
    pub sequence: u64,
    pub image: DynamicImage,
}

/// The marker detection of one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionReport {
    pub camera: CameraId,
    pub sequence: u64,
    pub detection: Detection,
}

/// A thread that detects the marker in every frame of one camera.
///
/// It stops when its frame source disconnects, when the receiver of its reports is gone,
/// or when [`DetectionWorker::stop`] is called. Reports that do not fit into the report
/// channel are dropped, so detection never waits on the consumer.
pub struct DetectionWorker {
    camera: CameraId,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<usize>>,
}

impl DetectionWorker {
    pub fn spawn(
        camera: CameraId,
        detector: MarkerDetector,
        frames: Receiver<Frame>,
        reports: Sender<DetectionReport>,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let stop = stop.clone();
            thread::Builder::new()
                .name(format!("detect-{}", camera.index() + 1))
                .spawn(move || run(camera, detector, frames, reports, &stop))?
        };
        Ok(Self {
            camera,
            stop,
            handle: Some(handle),
        })
    }

    pub fn camera(&self) -> CameraId {
        self.camera
    }

    /// Asks the worker to exit after the frame it is processing.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Waits for the worker to exit and returns the number of frames it processed.
    pub fn join(mut self) -> thread::Result<usize> {
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(0),
        }
    }
}

impl Drop for DetectionWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.stop();
            if handle.join().is_err() {
                error!("detection worker of {} panicked", self.camera);
            }
        }
    }
}

fn run(
    camera: CameraId,
    detector: MarkerDetector,
    frames: Receiver<Frame>,
    reports: Sender<DetectionReport>,
    stop: &AtomicBool,
) -> usize {
    let mut processed = 0;
    while !stop.load(Ordering::SeqCst) {
        let frame = match frames.recv_timeout(RECV_TIMEOUT) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("frame source of {} closed", camera);
                break;
            }
        };
        processed += 1;
        let report = DetectionReport {
            camera,
            sequence: frame.sequence,
            detection: detector.classify(&frame.image),
        };
        match reports.try_send(report) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                debug!("dropping report of frame {} from {}", frame.sequence, camera)
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!("report receiver of {} is gone", camera);
                break;
            }
        }
    }
    processed
}
