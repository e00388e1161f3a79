use super::point::PointF32;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Rect {
    // centerpoint
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RectF32 {
    // centerpoint
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl RectF32 {
    pub fn adjust(&mut self, dx: f32, dy: f32, dw: f32, dh: f32) -> RectF32 {
        self.x += dx;
        self.y += dy;
        self.w = dw;
        self.h = dh;

        *self
    }

    pub fn scale(&mut self, scale_x: f32, scale_y: f32) -> RectF32 {
        self.x *= scale_x;
        self.y *= scale_y;
        self.w *= scale_x;
        self.h *= scale_y;

        *self
    }

    // Snap to pixel grid, keeping all edges within max_x x max_y. A negative
    // size flips the edges rather than producing an inverted rect.
    pub fn clamped(&self, max_x: u32, max_y: u32) -> Rect {
        let snap = |v: f32, max: u32| v.round().clamp(0., max as f32) as u32;
        let (x0, x1) = (snap(self.x - self.w / 2., max_x), snap(self.x + self.w / 2., max_x));
        let (y0, y1) = (snap(self.y - self.h / 2., max_y), snap(self.y + self.h / 2., max_y));

        let (l, r) = (x0.min(x1), x0.max(x1));
        let (t, b) = (y0.min(y1), y0.max(y1));
        Rect::from_tl(l, t, r - l, b - t)
    }
}

impl Rect {
    pub fn left(&self) -> u32 {
        self.x - self.w / 2
    }
    pub fn right(&self) -> u32 {
        self.left() + self.w
    }
    pub fn top(&self) -> u32 {
        self.y - self.h / 2
    }
    pub fn bottom(&self) -> u32 {
        self.top() + self.h
    }
    pub fn area(&self) -> u32 {
        self.w * self.h
    }

    pub fn scale_x(&mut self, mag: f32, max: u32) -> Rect {
        // Ensure we don't go <0 on x axis
        let new_w = self.w as f32 * mag;
        let new_l = (self.x as f32 - new_w / 2.).max(0.).round() as u32;
        let new_r = ((self.x as f32 + new_w / 2.).round() as u32).min(max);

        self.w = new_r - new_l;
        self.x = new_l + self.w / 2;

        *self
    }

    pub fn scale_y(&mut self, mag: f32, max: u32) -> Rect {
        let new_h = self.h as f32 * mag;
        let new_t = (self.y as f32 - new_h / 2.).round().max(0.) as u32;
        let new_b = ((self.y as f32 + new_h / 2.).round() as u32).min(max);

        self.h = new_b - new_t;
        self.y = new_t + self.h / 2;

        *self
    }

    pub fn scale(&mut self, mag: f32, max_x: u32, max_y: u32) -> Rect {
        self.scale_x(mag, max_x);
        self.scale_y(mag, max_y);

        *self
    }

    pub fn from_tl(x: u32, y: u32, w: u32, h: u32) -> Rect {
        Rect {
            x: x + w / 2,
            y: y + h / 2,
            w,
            h,
        }
    }

    // Smallest rect containing every point, clamped to max_x x max_y
    pub fn bounding(points: &[PointF32], max_x: u32, max_y: u32) -> Option<Rect> {
        let first = points.first()?;
        let (mut l, mut r, mut t, mut b) = (first.x, first.x, first.y, first.y);
        for p in points {
            l = l.min(p.x);
            r = r.max(p.x);
            t = t.min(p.y);
            b = b.max(p.y);
        }

        let l = l.floor().clamp(0., max_x as f32) as u32;
        let r = r.ceil().clamp(0., max_x as f32) as u32;
        let t = t.floor().clamp(0., max_y as f32) as u32;
        let b = b.ceil().clamp(0., max_y as f32) as u32;

        Some(Rect::from_tl(l, t, r - l, b - t))
    }

    // Grow every edge by px, staying within max_x x max_y
    pub fn pad(&self, px: u32, max_x: u32, max_y: u32) -> Rect {
        let l = self.left().saturating_sub(px);
        let t = self.top().saturating_sub(px);
        let r = (self.right() + px).min(max_x);
        let b = (self.bottom() + px).min(max_y);

        Rect::from_tl(l, t, r.saturating_sub(l), b.saturating_sub(t))
    }

    pub fn overlap_pct(&self, other: &Rect) -> f32 {
        let x_min = self.left().max(other.left());
        let x_max = self.right().min(other.right());
        let y_min = self.top().max(other.top());
        let y_max = self.bottom().min(other.bottom());

        let overlap_area = if x_min < x_max && y_min < y_max {
            (x_max - x_min) * (y_max - y_min)
        } else {
            0
        };

        let area_delta = self.area() + other.area() - overlap_area;

        if area_delta > 0 {
            overlap_area as f32 / area_delta as f32 * 100.
        } else {
            0.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlap_pct() {
        let a = Rect::from_tl(0, 0, 10, 10);
        let b = Rect::from_tl(5, 0, 10, 10);

        assert_eq!(a.overlap_pct(&a), 100.);
        assert!((a.overlap_pct(&b) - 50. / 150. * 100.).abs() < 1e-4);
        assert_eq!(a.overlap_pct(&Rect::from_tl(20, 20, 5, 5)), 0.);
    }

    #[test]
    fn test_bounding_clamps_to_frame() {
        let points = [
            PointF32::new(-4., 10.),
            PointF32::new(30.2, 12.),
            PointF32::new(12., 90.),
        ];
        let r = Rect::bounding(&points, 64, 64).unwrap();

        assert_eq!(r.left(), 0);
        assert_eq!(r.right(), 31);
        assert_eq!(r.top(), 10);
        assert_eq!(r.bottom(), 64);
        assert!(Rect::bounding(&[], 64, 64).is_none());
    }

    #[test]
    fn test_clamped_negative_size() {
        let r = RectF32 {
            x: 50.,
            y: 40.,
            w: -20.,
            h: 10.,
        }
        .clamped(100, 100);

        assert_eq!((r.left(), r.right()), (40, 60));
        assert_eq!((r.top(), r.bottom()), (35, 45));

        let nan = RectF32 {
            x: f32::NAN,
            y: 10.,
            w: 4.,
            h: 4.,
        }
        .clamped(100, 100);
        assert_eq!(nan.w, 0);
    }

    #[test]
    fn test_pad() {
        let r = Rect::from_tl(4, 20, 10, 10).pad(6, 100, 32);

        assert_eq!((r.left(), r.top()), (0, 14));
        assert_eq!((r.right(), r.bottom()), (20, 32));
    }

    #[test]
    fn test_scale_stays_in_frame() {
        let mut r = Rect::from_tl(10, 10, 20, 20);
        r.scale(2., 40, 35);

        assert_eq!(r.left(), 0);
        assert_eq!(r.right(), 40);
        assert_eq!(r.top(), 0);
        assert_eq!(r.bottom(), 35);
    }
}
