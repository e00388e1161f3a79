use super::point::PointF32;
use image::{GrayImage, Luma};
use imageproc::drawing::draw_polygon_mut;
use imageproc::point::Point;

#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub points: Vec<PointF32>,
}

impl Polygon {
    pub fn new(points: Vec<PointF32>) -> Self {
        Self { points }
    }

    /// Convex hull of `points` in counter-clockwise order (Andrew's monotone
    /// chain). Collinear and duplicate points are dropped, so fewer than 3
    /// distinct non-collinear inputs yield a degenerate hull.
    pub fn convex_hull(points: &[PointF32]) -> Polygon {
        let mut sorted: Vec<PointF32> = points.iter().copied().filter(|p| p.is_finite()).collect();
        sorted.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
        sorted.dedup();

        if sorted.len() < 3 {
            return Polygon::new(sorted);
        }

        let mut hull: Vec<PointF32> = Vec::with_capacity(sorted.len() * 2);
        for pass in [sorted.clone(), sorted.into_iter().rev().collect()] {
            let start = hull.len();
            for p in pass {
                while hull.len() >= start + 2
                    && robust::orient2d(
                        hull[hull.len() - 2].into(),
                        hull[hull.len() - 1].into(),
                        p.into(),
                    ) <= 0.
                {
                    hull.pop();
                }
                hull.push(p);
            }
            // last point of each chain starts the other
            hull.pop();
        }

        Polygon::new(hull)
    }

    pub fn is_degenerate(&self) -> bool {
        self.points.len() < 3
    }

    /// Rasterize the polygon into a single channel mask, 255 inside.
    pub fn fill_mask(&self, width: u32, height: u32) -> GrayImage {
        let mut mask = GrayImage::new(width, height);
        if self.is_degenerate() {
            return mask;
        }

        let mut poly: Vec<Point<i32>> = self
            .points
            .iter()
            .map(|p| Point::new(p.x.round() as i32, p.y.round() as i32))
            .collect();
        poly.dedup();
        while poly.len() > 1 && poly.first() == poly.last() {
            poly.pop();
        }

        if poly.len() >= 3 {
            draw_polygon_mut(&mut mask, &poly, Luma([255u8]));
        }

        mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convex_hull_drops_inner_points() {
        let points = [
            PointF32::new(0., 0.),
            PointF32::new(4., 0.),
            PointF32::new(2., 1.),
            PointF32::new(4., 4.),
            PointF32::new(2., 2.),
            PointF32::new(0., 4.),
            PointF32::new(2., 0.),
        ];
        let hull = Polygon::convex_hull(&points);

        assert_eq!(
            hull.points,
            Vec::from([
                PointF32::new(0., 0.),
                PointF32::new(4., 0.),
                PointF32::new(4., 4.),
                PointF32::new(0., 4.),
            ])
        );
    }

    #[test]
    fn test_collinear_hull_is_degenerate() {
        let points = [
            PointF32::new(0., 0.),
            PointF32::new(1., 1.),
            PointF32::new(2., 2.),
        ];
        let hull = Polygon::convex_hull(&points);

        assert!(hull.is_degenerate());
        assert!(hull.fill_mask(8, 8).pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn test_fill_mask() {
        let hull = Polygon::convex_hull(&[
            PointF32::new(2., 2.),
            PointF32::new(6., 2.),
            PointF32::new(6., 6.),
            PointF32::new(2., 6.),
        ]);
        let mask = hull.fill_mask(10, 10);

        assert_eq!(mask.get_pixel(4, 4)[0], 255);
        assert_eq!(mask.get_pixel(2, 2)[0], 255);
        assert_eq!(mask.get_pixel(0, 0)[0], 0);
        assert_eq!(mask.get_pixel(8, 4)[0], 0);
    }
}
