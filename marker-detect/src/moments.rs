use imageproc::{contours::Contour, point::Point};
use stereo_core::{nalgebra::Point2, KeyPoint};

/// The spatial moments of order zero and one of the polygon traced by a contour.
///
/// They are computed with Green's theorem over the closed polygon through the contour
/// pixels, so `m00` is the signed polygon area. A contour of one pixel or one line of
/// pixels has zero area and therefore no centroid.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Moments {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
}

impl Moments {
    /// Moments of the polygon with the given vertices, closed from the last back to the first.
    pub fn from_polygon(points: &[Point<i32>]) -> Self {
        let mut moments = Self::default();
        if points.len() < 3 {
            return moments;
        }
        let next = points.iter().cycle().skip(1);
        for (p, q) in points.iter().zip(next) {
            let (x0, y0) = (p.x as f64, p.y as f64);
            let (x1, y1) = (q.x as f64, q.y as f64);
            let cross = x0 * y1 - x1 * y0;
            moments.m00 += cross;
            moments.m10 += (x0 + x1) * cross;
            moments.m01 += (y0 + y1) * cross;
        }
        moments.m00 /= 2.0;
        moments.m10 /= 6.0;
        moments.m01 /= 6.0;
        moments
    }

    pub fn from_contour(contour: &Contour<i32>) -> Self {
        Self::from_polygon(&contour.points)
    }

    /// The centroid `(m10 / m00, m01 / m00)`, or `None` for zero area.
    pub fn centroid(&self) -> Option<KeyPoint> {
        if self.m00.abs() <= f64::EPSILON {
            return None;
        }
        Some(KeyPoint(Point2::new(self.m10 / self.m00, self.m01 / self.m00)))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn square_centroid_and_area() {
        let square = [
            Point::new(2, 2),
            Point::new(6, 2),
            Point::new(6, 6),
            Point::new(2, 6),
        ];
        let moments = Moments::from_polygon(&square);
        assert_relative_eq!(moments.m00.abs(), 16.0);
        assert_relative_eq!(moments.centroid().unwrap().0, Point2::new(4.0, 4.0));
    }

    #[test]
    fn orientation_does_not_change_the_centroid() {
        let triangle = [Point::new(0, 0), Point::new(9, 0), Point::new(0, 6)];
        let mut reversed = triangle;
        reversed.reverse();
        let a = Moments::from_polygon(&triangle).centroid().unwrap();
        let b = Moments::from_polygon(&reversed).centroid().unwrap();
        assert_relative_eq!(a.0, Point2::new(3.0, 2.0), epsilon = 1e-12);
        assert_relative_eq!(a.0, b.0, epsilon = 1e-12);
    }

    #[test]
    fn degenerate_polygons_have_no_centroid() {
        assert!(Moments::from_polygon(&[Point::new(3, 3)]).centroid().is_none());
        let line = [Point::new(0, 0), Point::new(5, 0), Point::new(10, 0)];
        assert!(Moments::from_polygon(&line).centroid().is_none());
    }
}
