#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PointF32 {
    pub x: f32,
    pub y: f32,
}

impl PointF32 {
    pub const fn new(x: f32, y: f32) -> PointF32 {
        PointF32 { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    pub fn dist(&self, o: &PointF32) -> f32 {
        let dx = self.x - o.x;
        let dy = self.y - o.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn offset(&self, dx: f32, dy: f32) -> PointF32 {
        PointF32::new(self.x + dx, self.y + dy)
    }

    // Rotate about origin by theta radians
    pub fn rotate(&mut self, origin: PointF32, theta: f32) -> PointF32 {
        let x = self.x - origin.x;
        let y = self.y - origin.y;

        self.x = x * theta.cos() - y * theta.sin() + origin.x;
        self.y = x * theta.sin() + y * theta.cos() + origin.y;

        *self
    }
}

impl From<PointF32> for robust::Coord<f32> {
    fn from(p: PointF32) -> robust::Coord<f32> {
        robust::Coord { x: p.x, y: p.y }
    }
}
