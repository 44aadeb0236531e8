//! # Stereo Core
//!
//! Common types shared by every crate of the stereo marker workspace: pixel keypoints,
//! point pairs observed by the two cameras, camera poses and homogeneous 3d points.
//! Every other crate of the workspace builds on these types.
//!
//! ## Frames
//!
//! The world frame is the frame of the first camera. Its extrinsics are always the
//! identity. The second camera is located by a [`WorldToCamera`] pose that maps world
//! points into its own frame. Both cameras use the usual computer vision convention:
//! X points right, Y points down and Z points forwards out of the optical center.
//!
//! - `p` the marker
//! - `a` the observation of the marker on camera 1
//! - `b` the observation of the marker on camera 2
//! - `O` the optical center of a camera
//! - `@` the virtual image plane
//!
//! ```text
//!                        @
//!                        @
//!               p--------b--------O (camera 2)
//!              /         @
//!             /          @
//!            /           @
//!           /            @
//!   @@@@@@@a@@@@@
//!         /
//!        /
//!       /
//!      O (camera 1, world origin)
//! ```
//!
//! Translations recovered from two views have no absolute scale. Every distance
//! expressed in world units is relative to the length of the baseline between the
//! two optical centers as produced by calibration.

mod camera;
mod keypoint;
mod matches;
mod point;
mod pose;

pub use camera::*;
pub use keypoint::*;
pub use matches::*;
pub use nalgebra;
pub use point::*;
pub use pose::*;
pub use sample_consensus;
