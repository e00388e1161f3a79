use crate::shapes::rect::RectF32;

pub const ANCHOR_COUNT: usize = 896;

// (stride, anchors per cell) for the two BlazeFace feature maps
const LAYERS: [(u32, usize); 2] = [(8, 2), (16, 6)];
const ANCHOR_OFFSET: f32 = 0.5;

/// SSD anchors for the 128x128 short range face detector, centered on each
/// feature map cell and expressed in input pixels. The model regresses
/// offsets in pixels too, so anchors carry no size.
pub fn gen_anchors(input_size: u32) -> Vec<RectF32> {
    let mut anchors = Vec::with_capacity(ANCHOR_COUNT);

    for (stride, per_cell) in LAYERS {
        let cells = input_size.div_ceil(stride);
        for y in 0..cells {
            for x in 0..cells {
                let anchor = RectF32 {
                    x: (x as f32 + ANCHOR_OFFSET) * stride as f32,
                    y: (y as f32 + ANCHOR_OFFSET) * stride as f32,
                    w: 1.,
                    h: 1.,
                };
                anchors.extend(std::iter::repeat_n(anchor, per_cell));
            }
        }
    }

    anchors
}
