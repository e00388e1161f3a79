use crate::error::MorphError;
use crate::landmarks::LandmarkSet;
use crate::shapes::point::PointF32;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::{Level, span, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Feminine,
    Masculine,
}

impl Category {
    pub fn opposite(self) -> Category {
        match self {
            Category::Feminine => Category::Masculine,
            Category::Masculine => Category::Feminine,
        }
    }
}

impl FromStr for Category {
    type Err = MorphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "feminine" | "female" => Ok(Category::Feminine),
            "masculine" | "male" => Ok(Category::Masculine),
            _ => Err(MorphError::UnknownCategory(s.to_string())),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Feminine => write!(f, "feminine"),
            Category::Masculine => write!(f, "masculine"),
        }
    }
}

/// Displacement of one landmark as a fraction of frame width/height at
/// intensity 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Offset {
    pub idx: usize,
    pub dx: f32,
    pub dy: f32,
}

const fn offset(idx: usize, dx: f32, dy: f32) -> Offset {
    Offset { idx, dx, dy }
}

// right jaw: 365, 379, 361, 288, 397
// left jaw: 136, 150, 132, 58, 172
const FEMININE_OFFSETS: [Offset; 14] = [
    offset(365, -0.03, -0.01),
    offset(379, -0.03, -0.01),
    offset(361, -0.03, -0.01),
    offset(288, -0.03, -0.01),
    offset(397, -0.03, -0.01),
    offset(136, 0.03, -0.01),
    offset(150, 0.03, -0.01),
    offset(132, 0.03, -0.01),
    offset(58, 0.03, -0.01),
    offset(172, 0.03, -0.01),
    // cheeks
    offset(205, -0.01, -0.02),
    offset(123, 0.01, -0.02),
    // upper eyelids
    offset(159, 0., -0.015),
    offset(386, 0., -0.015),
];

const MASCULINE_OFFSETS: [Offset; 13] = [
    offset(365, 0.04, 0.01),
    offset(379, 0.04, 0.01),
    offset(361, 0.04, 0.01),
    offset(288, 0.04, 0.01),
    offset(397, 0.04, 0.01),
    offset(136, -0.04, 0.01),
    offset(150, -0.04, 0.01),
    offset(132, -0.04, 0.01),
    offset(58, -0.04, 0.01),
    offset(172, -0.04, 0.01),
    // brows
    offset(107, 0., 0.015),
    offset(70, 0., 0.015),
    offset(300, 0., 0.015),
];

#[derive(Debug, Clone, PartialEq)]
pub struct OffsetTable {
    categories: HashMap<Category, Vec<Offset>>,
}

impl Default for OffsetTable {
    fn default() -> Self {
        Self::new([
            (Category::Feminine, FEMININE_OFFSETS.to_vec()),
            (Category::Masculine, MASCULINE_OFFSETS.to_vec()),
        ])
    }
}

impl OffsetTable {
    pub fn new(categories: impl IntoIterator<Item = (Category, Vec<Offset>)>) -> Self {
        Self {
            categories: categories.into_iter().collect(),
        }
    }

    pub fn offsets(&self, category: Category) -> &[Offset] {
        self.categories
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Source and destination control points, in pixels.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ControlPoints {
    pub src: Vec<PointF32>,
    pub dst: Vec<PointF32>,
}

impl ControlPoints {
    pub fn len(&self) -> usize {
        self.src.len()
    }

    pub fn is_empty(&self) -> bool {
        self.src.is_empty()
    }

    pub fn push(&mut self, src: PointF32, dst: PointF32) {
        self.src.push(src);
        self.dst.push(dst);
    }
}

pub const BORDER_POINT_COUNT: usize = 8;

/// Corners and edge midpoints. Pinning these keeps the warp local to the face.
pub fn border_points(width: u32, height: u32) -> [PointF32; BORDER_POINT_COUNT] {
    let r = width.saturating_sub(1) as f32;
    let b = height.saturating_sub(1) as f32;
    let cx = (width / 2) as f32;
    let cy = (height / 2) as f32;

    [
        PointF32::new(0., 0.),
        PointF32::new(cx, 0.),
        PointF32::new(r, 0.),
        PointF32::new(0., cy),
        PointF32::new(r, cy),
        PointF32::new(0., b),
        PointF32::new(cx, b),
        PointF32::new(r, b),
    ]
}

#[derive(Debug, Clone)]
pub struct Displacer {
    table: OffsetTable,
    max_intensity: f32,
    clamp_to_frame: bool,
}

impl Default for Displacer {
    fn default() -> Self {
        Self {
            table: OffsetTable::default(),
            max_intensity: 1.,
            clamp_to_frame: true,
        }
    }
}

impl Displacer {
    pub fn new(table: OffsetTable, max_intensity: f32, clamp_to_frame: bool) -> Self {
        Self {
            table,
            max_intensity: max_intensity.max(0.),
            clamp_to_frame,
        }
    }

    pub fn table(&self) -> &OffsetTable {
        &self.table
    }

    pub fn max_intensity(&self) -> f32 {
        self.max_intensity
    }

    pub fn displace(
        &self,
        landmarks: &LandmarkSet,
        category: Category,
        intensity: f32,
        width: u32,
        height: u32,
    ) -> ControlPoints {
        let span = span!(Level::DEBUG, "displace");
        let _guard = span.enter();

        let intensity = self.clamp_intensity(intensity);
        let w = width as f32;
        let h = height as f32;

        let src = landmarks.to_pixels(width, height);
        let mut dst = src.clone();

        for o in self.table.offsets(category) {
            let Some(p) = dst.get_mut(o.idx) else {
                continue;
            };
            let start = src[o.idx];
            let mut moved = start.offset(o.dx * intensity * w, o.dy * intensity * h);

            if self.clamp_to_frame {
                moved = PointF32::new(
                    clamp_axis(moved.x, start.x, w - 1.),
                    clamp_axis(moved.y, start.y, h - 1.),
                );
            }
            *p = moved;
        }

        let mut points = ControlPoints { src, dst };
        for p in border_points(width, height) {
            points.push(p, p);
        }

        points
    }

    fn clamp_intensity(&self, intensity: f32) -> f32 {
        if !intensity.is_finite() {
            warn!("Intensity {intensity} is not finite, using 0");
            return 0.;
        }

        let clamped = intensity.clamp(0., self.max_intensity);
        if clamped != intensity {
            warn!("Intensity {intensity} clamped to {clamped}");
        }
        clamped
    }
}

// Keep v within [0, max], widened to include the starting position
fn clamp_axis(v: f32, start: f32, max: f32) -> f32 {
    v.clamp(start.min(0.), start.max(max))
}

/// Displace with the built-in offset table and clamping policy.
pub fn displace(
    landmarks: &LandmarkSet,
    category: Category,
    intensity: f32,
    width: u32,
    height: u32,
) -> ControlPoints {
    Displacer::default().displace(landmarks, category, intensity, width, height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::FACE_MESH_LEN;

    fn grid_landmarks(n: usize) -> LandmarkSet {
        LandmarkSet::new(
            (0..n)
                .map(|i| {
                    PointF32::new(
                        0.3 + 0.4 * (i % 22) as f32 / 22.,
                        0.3 + 0.4 * (i / 22) as f32 / 22.,
                    )
                })
                .collect(),
        )
    }

    #[test]
    fn test_category_from_str() {
        assert_eq!("female".parse::<Category>().unwrap(), Category::Feminine);
        assert_eq!("Masculine".parse::<Category>().unwrap(), Category::Masculine);
        assert!("neutral".parse::<Category>().is_err());
        assert_eq!(Category::Feminine.opposite(), Category::Masculine);
        assert_eq!(Category::Masculine.opposite(), Category::Feminine);
    }

    #[test]
    fn test_zero_intensity_is_identity() {
        let landmarks = grid_landmarks(FACE_MESH_LEN);
        for category in [Category::Feminine, Category::Masculine] {
            let points = displace(&landmarks, category, 0., 320, 240);
            assert_eq!(points.src, points.dst);
        }
    }

    #[test]
    fn test_point_count() {
        for n in [0, 10, 300, FACE_MESH_LEN] {
            let points = displace(&grid_landmarks(n), Category::Masculine, 0.7, 100, 80);
            assert_eq!(points.src.len(), n + BORDER_POINT_COUNT);
            assert_eq!(points.dst.len(), n + BORDER_POINT_COUNT);
        }
    }

    #[test]
    fn test_border_points_pinned() {
        let points = displace(&grid_landmarks(FACE_MESH_LEN), Category::Feminine, 1., 65, 33);
        let border = &points.dst[FACE_MESH_LEN..];

        assert_eq!(border, &points.src[FACE_MESH_LEN..]);
        assert_eq!(border, &border_points(65, 33)[..]);
        assert_eq!(border[1], PointF32::new(32., 0.));
        assert_eq!(border[7], PointF32::new(64., 32.));
    }

    #[test]
    fn test_intensity_is_linear() {
        let landmarks = grid_landmarks(FACE_MESH_LEN);
        let k = 0.2;
        let single = displace(&landmarks, Category::Masculine, k, 400, 300);
        let double = displace(&landmarks, Category::Masculine, 2. * k, 400, 300);

        for idx in 0..FACE_MESH_LEN {
            let d1x = single.dst[idx].x - single.src[idx].x;
            let d1y = single.dst[idx].y - single.src[idx].y;
            let d2x = double.dst[idx].x - double.src[idx].x;
            let d2y = double.dst[idx].y - double.src[idx].y;

            assert!((d2x - 2. * d1x).abs() < 1e-3, "idx {idx}");
            assert!((d2y - 2. * d1y).abs() < 1e-3, "idx {idx}");
        }
        // jaw moves outward for masculine
        assert!(single.dst[365].x > single.src[365].x);
        assert!(single.dst[136].x < single.src[136].x);
    }

    #[test]
    fn test_untouched_indices_stay() {
        let landmarks = grid_landmarks(FACE_MESH_LEN);
        let points = displace(&landmarks, Category::Feminine, 1., 200, 200);
        let moved: Vec<usize> = (0..FACE_MESH_LEN)
            .filter(|&i| points.src[i] != points.dst[i])
            .collect();

        let mut expected: Vec<usize> = FEMININE_OFFSETS.iter().map(|o| o.idx).collect();
        expected.sort();
        assert_eq!(moved, expected);
    }

    #[test]
    fn test_out_of_range_indices_skipped() {
        // only 100 landmarks: 58 and 70 are present, jaw indices are not
        let landmarks = grid_landmarks(100);
        let points = displace(&landmarks, Category::Masculine, 1., 200, 200);

        assert_ne!(points.dst[58], points.src[58]);
        assert_ne!(points.dst[70], points.src[70]);
        assert_eq!(points.len(), 108);
    }

    #[test]
    fn test_intensity_and_frame_clamping() {
        let mut landmarks = grid_landmarks(FACE_MESH_LEN);
        landmarks.set(365, PointF32::new(0.97, 0.5));

        let over = displace(&landmarks, Category::Masculine, 5., 100, 100);
        let max = displace(&landmarks, Category::Masculine, 1., 100, 100);
        assert_eq!(over, max);

        // pushed past the right edge
        assert_eq!(max.dst[365].x, 99.);

        let negative = displace(&landmarks, Category::Masculine, -1., 100, 100);
        assert_eq!(negative.src, negative.dst);
    }
}
