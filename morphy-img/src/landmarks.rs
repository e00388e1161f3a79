use crate::error::GeometryError;
use crate::shapes::point::PointF32;

/// Number of points in a full face mesh.
pub const FACE_MESH_LEN: usize = 468;

// left eye, right eye, nose tip, left mouth corner, right mouth corner
pub const ALIGNMENT_IDXS: [usize; 5] = [33, 263, 1, 61, 291];

/// Landmarks for one face, in normalized [0, 1] image coordinates and
/// indexed by the face mesh numbering.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LandmarkSet {
    points: Vec<PointF32>,
}

impl LandmarkSet {
    pub fn new(points: Vec<PointF32>) -> LandmarkSet {
        LandmarkSet { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<PointF32> {
        self.points.get(idx).copied()
    }

    pub fn set(&mut self, idx: usize, p: PointF32) {
        if let Some(slot) = self.points.get_mut(idx) {
            *slot = p;
        }
    }

    pub fn points(&self) -> &[PointF32] {
        &self.points
    }

    pub fn to_pixels(&self, width: u32, height: u32) -> Vec<PointF32> {
        let w = width as f32;
        let h = height as f32;
        self.points
            .iter()
            .map(|p| PointF32::new(p.x * w, p.y * h))
            .collect()
    }

    /// The five alignment anchors in pixel coordinates.
    pub fn alignment_anchors(
        &self,
        width: u32,
        height: u32,
    ) -> Result<[PointF32; 5], GeometryError> {
        let mut anchors = [PointF32::default(); 5];
        for (anchor, idx) in anchors.iter_mut().zip(ALIGNMENT_IDXS) {
            let p = self.get(idx).ok_or(GeometryError::MissingAnchors(idx))?;
            *anchor = PointF32::new(p.x * width as f32, p.y * height as f32);
        }

        Ok(anchors)
    }
}

impl From<Vec<PointF32>> for LandmarkSet {
    fn from(points: Vec<PointF32>) -> LandmarkSet {
        LandmarkSet::new(points)
    }
}
