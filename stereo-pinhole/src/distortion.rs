use stereo_core::nalgebra::{Matrix2, Vector2};
use thiserror::Error;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Raised when a distorted point can not be mapped back onto the undistorted
/// normalized image plane.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum UndistortError {
    #[error("undistortion did not converge after {iterations} iterations (residual {residual})")]
    NotConverged { iterations: usize, residual: f64 },
    #[error("distortion jacobian is singular")]
    Singular,
    #[error("point is not finite")]
    NonFinite,
}

/// Stopping criteria of the iterative undistortion.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct UndistortCriteria {
    /// Maximum number of Newton steps.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_max_iterations"))]
    pub max_iterations: usize,
    /// Largest accepted distance, on the normalized image plane, between the
    /// distorted estimate and the observed point.
    #[cfg_attr(feature = "serde-serialize", serde(default = "default_tolerance"))]
    pub tolerance: f64,
}

impl Default for UndistortCriteria {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
        }
    }
}

fn default_max_iterations() -> usize {
    20
}

fn default_tolerance() -> f64 {
    1e-12
}

/// Brown-Conrady lens distortion with three radial and two tangential coefficients,
/// in the same layout and convention as OpenCV.
///
/// Given undistorted normalized coordinates $(x, y)$ and $r^2 = x^2 + y^2$, the
/// distorted coordinates are:
///
/// $$
/// \begin{aligned}
/// x_d &= x (1 + k_1 r^2 + k_2 r^4 + k_3 r^6) + 2 p_1 x y + p_2 (r^2 + 2 x^2) \\\\
/// y_d &= y (1 + k_1 r^2 + k_2 r^4 + k_3 r^6) + p_1 (r^2 + 2 y^2) + 2 p_2 x y
/// \end{aligned}
/// $$
///
/// # References
///
/// * D.C. Brown (1966). Decentering Distortion of Lenses.
/// * [OpenCV camera calibration](https://docs.opencv.org/4.5.0/d9/d0c/group__calib3d.html)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl Distortion {
    /// A lens with no distortion.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(k1: f64, k2: f64, p1: f64, p2: f64, k3: f64) -> Self {
        Self { k1, k2, p1, p2, k3 }
    }

    pub fn is_none(&self) -> bool {
        *self == Self::none()
    }

    pub fn is_finite(&self) -> bool {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
            .iter()
            .all(|n| n.is_finite())
    }

    fn radial(&self, r2: f64) -> f64 {
        1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3))
    }

    /// Applies the distortion to a point on the undistorted normalized image plane.
    pub fn distort(&self, point: Vector2<f64>) -> Vector2<f64> {
        let (x, y) = (point.x, point.y);
        let r2 = x * x + y * y;
        let radial = self.radial(r2);
        Vector2::new(
            x * radial + 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x),
            y * radial + self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y,
        )
    }

    /// The Jacobian of [`Distortion::distort`] with respect to the undistorted point.
    #[rustfmt::skip]
    pub fn jacobian(&self, point: Vector2<f64>) -> Matrix2<f64> {
        let (x, y) = (point.x, point.y);
        let r2 = x * x + y * y;
        let radial = self.radial(r2);
        // Derivative of the radial factor with respect to r^2.
        let d_radial = self.k1 + r2 * (2.0 * self.k2 + 3.0 * self.k3 * r2);
        let cross = 2.0 * x * y * d_radial + 2.0 * self.p1 * x + 2.0 * self.p2 * y;
        Matrix2::new(
            radial + 2.0 * x * x * d_radial + 2.0 * self.p1 * y + 6.0 * self.p2 * x,  cross,
            cross,  radial + 2.0 * y * y * d_radial + 6.0 * self.p1 * y + 2.0 * self.p2 * x,
        )
    }

    /// Inverts the distortion with Newton's method, starting from the distorted point.
    ///
    /// Fails instead of returning an unrefined estimate when the iteration does not
    /// reach `criteria.tolerance`, which happens when the distortion is too strong to
    /// be inverted at this point.
    ///
    /// ```
    /// use stereo_core::nalgebra::Vector2;
    /// use stereo_pinhole::{Distortion, UndistortCriteria};
    /// let distortion = Distortion::new(0.244, -0.224, -0.0008, -0.0004, 0.0526);
    /// let undistorted = Vector2::new(-0.9, 0.7);
    /// let distorted = distortion.distort(undistorted);
    /// let recovered = distortion.undistort(distorted, UndistortCriteria::default()).unwrap();
    /// assert!((recovered - undistorted).norm() < 1e-9);
    /// ```
    pub fn undistort(
        &self,
        distorted: Vector2<f64>,
        criteria: UndistortCriteria,
    ) -> Result<Vector2<f64>, UndistortError> {
        if !distorted.iter().all(|n| n.is_finite()) {
            return Err(UndistortError::NonFinite);
        }
        if self.is_none() {
            return Ok(distorted);
        }
        let mut point = distorted;
        let mut residual = self.distort(point) - distorted;
        for _ in 0..criteria.max_iterations {
            if residual.norm() <= criteria.tolerance {
                return Ok(point);
            }
            let step = self
                .jacobian(point)
                .lu()
                .solve(&residual)
                .ok_or(UndistortError::Singular)?;
            point -= step;
            if !point.iter().all(|n| n.is_finite()) {
                return Err(UndistortError::NonFinite);
            }
            residual = self.distort(point) - distorted;
        }
        let residual = residual.norm();
        if residual <= criteria.tolerance {
            Ok(point)
        } else {
            Err(UndistortError::NotConverged {
                iterations: criteria.max_iterations,
                residual,
            })
        }
    }
}
