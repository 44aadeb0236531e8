//! This crate contains the computational geometry of the stereo rig.
//!
//! ## Triangulation
//!
//! In this problem we know the projection matrices of both cameras and where the same
//! marker appears on the virtual image plane of each. We want to find the point where
//! the two rays intersect (or nearly intersect, in the presence of noise).
//!
//! - `p` the point we are trying to triangulate
//! - `a` the normalized keypoint on camera A
//! - `b` the normalized keypoint on camera B
//! - `O` the optical center of a camera
//! - `@` the virtual image plane
//!
//! ```text
//!                        @
//!                        @
//!               p--------b--------O
//!              /         @
//!             /          @
//!            /           @
//!           /            @
//!   @@@@@@@a@@@@@
//!         /
//!        /
//!       /
//!      O
//! ```
//!
//! ## Pose recovery
//!
//! An essential matrix decomposes into four relative poses. [`PoseRecovery`] triangulates
//! the matches under each of them and keeps the one that places the most points in front
//! of both cameras.
//!
//! ## Refinement
//!
//! [`PoseRefinement`] polishes a recovered pose by minimizing the Sampson distances of
//! the matches that support it.

mod recovery;
mod refinement;
mod triangulation;

pub use recovery::*;
pub use refinement::*;
pub use triangulation::*;
