use log::*;
use marker_detect::Detection;
use std::collections::VecDeque;
use stereo_core::{CameraId, FeatureMatch, KeyPoint, PointSample};
use thiserror::Error;

/// Raised when a sample is not added to the buffer. Neither queue changes when this happens.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum SampleRejected {
    #[error("{0} did not see exactly one marker")]
    NoMarker(CameraId),
    #[error("the point of {0} is not finite")]
    NonFinite(CameraId),
}

/// Corresponding points of both cameras waiting to be used for calibration.
///
/// There is one FIFO queue per camera. Both always have the same length since points are
/// only ever added or removed in pairs.
#[derive(Debug, Clone, Default)]
pub struct SampleBuffer {
    queues: [VecDeque<KeyPoint>; 2],
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the points of two simultaneous detections, which must both be a single marker.
    ///
    /// Returns the number of samples in the buffer afterwards.
    pub fn add_sample(
        &mut self,
        first: &Detection,
        second: &Detection,
    ) -> Result<usize, SampleRejected> {
        let a = first.single().ok_or(SampleRejected::NoMarker(CameraId::First))?;
        let b = second.single().ok_or(SampleRejected::NoMarker(CameraId::Second))?;
        self.push(FeatureMatch(a, b))
    }

    /// Adds a pair of points, which must both be finite.
    pub fn push(&mut self, sample: PointSample) -> Result<usize, SampleRejected> {
        for camera in CameraId::BOTH {
            if !sample.get(camera).is_finite() {
                return Err(SampleRejected::NonFinite(camera));
            }
        }
        let FeatureMatch(a, b) = sample;
        self.queues[0].push_back(a);
        self.queues[1].push_back(b);
        Ok(self.len())
    }

    /// Removes every sample, oldest first.
    pub fn drain_all(&mut self) -> Vec<PointSample> {
        let [first, second] = &mut self.queues;
        first
            .drain(..)
            .zip(second.drain(..))
            .map(|(a, b)| FeatureMatch(a, b))
            .collect()
    }

    pub fn clear(&mut self) {
        for queue in &mut self.queues {
            queue.clear();
        }
    }

    pub fn len(&self) -> usize {
        debug_assert_eq!(self.queues[0].len(), self.queues[1].len());
        self.queues[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every buffered point with its camera and position in that camera's queue, camera by camera.
    pub fn enumerate(&self) -> Vec<(CameraId, usize, KeyPoint)> {
        CameraId::BOTH
            .into_iter()
            .flat_map(|camera| {
                self.queues[camera.index()]
                    .iter()
                    .enumerate()
                    .map(move |(ix, &point)| (camera, ix, point))
            })
            .collect()
    }

    /// Logs the contents of both queues.
    pub fn log_contents(&self) {
        for camera in CameraId::BOTH {
            let queue = &self.queues[camera.index()];
            info!("{} has {} points", camera, queue.len());
            for (ix, point) in queue.iter().enumerate() {
                info!("{} point {}: ({}, {})", camera, ix, point.x, point.y);
            }
        }
    }
}
