//! Extrinsic calibration of two independently mounted cameras and localization of a single
//! bright marker seen by both of them.
//!
//! Each camera feeds frames to a [`DetectionWorker`], which reports where the marker is (if
//! it is unambiguous) to a [`StereoLocator`]. Pairs of simultaneous detections are buffered
//! as samples. Once enough samples are collected, [`StereoLocator::calibrate`] estimates the
//! pose of the second camera relative to the first, after which every new pair of
//! detections can be triangulated into a 3d point.
//!
//! The world frame is the frame of the first camera. Translations from two views have no
//! absolute scale: the baseline between the cameras has unit length after calibration, and
//! triangulated points are expressed in that unit.

mod buffer;
mod calibration;
mod locator;
mod settings;
mod triangulate;
mod worker;

pub use buffer::*;
pub use calibration::*;
pub use locator::*;
pub use settings::*;
pub use triangulate::*;
pub use worker::*;

pub use marker_detect::{Detection, MarkerDetector};
pub use stereo_core::{CameraId, KeyPoint, PointSample, WorldToCamera};
pub use stereo_pinhole::{CameraIntrinsics, StereoIntrinsics};

#[cfg(test)]
mod synthetic;
