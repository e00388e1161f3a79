use super::model::{Session, initialize_model, input_name};
use crate::shapes::point::PointF32;
use crate::shapes::rect::{Rect, RectF32};
use anchors::gen_anchors;
use anyhow::{Result, anyhow};
use image::RgbImage;
use image::imageops::{self, FilterType};
use ndarray::{Array4, ArrayViewD, Axis, Ix2};
use ort::value::Tensor;
use std::path::Path;
use tracing::{Level, span, trace};

mod anchors;

pub const MODEL_FILE: &str = "face_detection_short_range.onnx";

const WIDTH: u32 = 128;
const HEIGHT: u32 = 128;
const MIN_SCORE: f32 = 0.5;
const MAX_OVERLAP_PCT: f32 = 30.;

pub struct FaceDetector {
    model: Session,
    input: String,
    anchors: Vec<RectF32>,
}

#[derive(Debug, Clone)]
pub struct Face {
    pub bounds: Rect,
    pub l_eye: PointF32,
    pub r_eye: PointF32,
    confidence: f32,
}

impl Face {
    pub fn with_eyes(confidence: f32, bounds: Rect, l_eye: PointF32, r_eye: PointF32) -> Face {
        Face {
            l_eye,
            r_eye,
            bounds,
            confidence,
        }
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Angle of the eye line, 0 when upright.
    pub fn rot_theta(&self) -> f32 {
        let dx = self.r_eye.x - self.l_eye.x;
        let dy = self.r_eye.y - self.l_eye.y;
        dy.atan2(dx)
    }
}

impl FaceDetector {
    /*
    BlazeFace short range model.

    Model Input: 1x128x128x3 f32 image in [-1, 1]
    Model Output:
    - classificators: 896 logits, one per anchor
    - regressors: 896x16, per anchor the box center offset, box width and
      height, then six (x, y) keypoints starting with the two eyes. All in
      input pixels relative to the anchor center.
     */
    pub fn new(model_path: &Path, threads: usize) -> Result<FaceDetector> {
        let model = initialize_model(model_path, threads)?;
        let input = input_name(&model, 0)?;

        Ok(FaceDetector {
            model,
            input,
            anchors: gen_anchors(WIDTH),
        })
    }

    pub fn detect(&self, img: &RgbImage) -> Result<Vec<Face>> {
        let span = span!(Level::DEBUG, "face_detector");
        let _guard = span.enter();

        let resized = imageops::resize(img, WIDTH, HEIGHT, FilterType::Triangle);
        let input = Array4::from_shape_fn(
            (1, HEIGHT as usize, WIDTH as usize, 3),
            |(_, y, x, c)| resized.get_pixel(x as u32, y as u32)[c] as f32 / 127.5 - 1.,
        );

        let outputs = self
            .model
            .run(ort::inputs![self.input.as_str() => Tensor::from_array(input)?]?)?;
        let regressors = outputs["regressors"].try_extract_tensor::<f32>()?;
        let classificators = outputs["classificators"].try_extract_tensor::<f32>()?;
        let scores: Vec<f32> = classificators.iter().copied().collect();

        decode(
            regressors,
            &scores,
            &self.anchors,
            img.width(),
            img.height(),
        )
    }
}

fn decode(
    regressors: ArrayViewD<f32>,
    scores: &[f32],
    anchors: &[RectF32],
    input_width: u32,
    input_height: u32,
) -> Result<Vec<Face>> {
    let detections = match regressors.ndim() {
        3 => regressors.index_axis_move(Axis(0), 0),
        _ => regressors,
    };
    if detections.ndim() != 2 || detections.len_of(Axis(0)) != anchors.len() {
        return Err(anyhow!(
            "unexpected regressor shape {:?}",
            detections.shape()
        ));
    }
    if scores.len() != anchors.len() {
        return Err(anyhow!("expected {} scores, found {}", anchors.len(), scores.len()));
    }
    let detections = detections.into_dimensionality::<Ix2>()?;

    let x_scale = input_width as f32 / WIDTH as f32;
    let y_scale = input_height as f32 / HEIGHT as f32;
    let mut results: Vec<Face> = Vec::new();

    for (row_idx, res) in detections.outer_iter().enumerate() {
        let score = sigmoid_stable(scores[row_idx]);
        if score <= MIN_SCORE || res.len() < 8 {
            continue;
        }
        if !(res[2].is_finite() && res[3].is_finite() && res[2] > 0. && res[3] > 0.) {
            trace!("Dropping detection {row_idx} with size {}x{}", res[2], res[3]);
            continue;
        }

        let mut anchor = anchors[row_idx];
        let (ax, ay) = (anchor.x, anchor.y);
        let bounds = anchor
            .adjust(res[0], res[1], res[2], res[3])
            .scale(x_scale, y_scale)
            .clamped(input_width, input_height);

        let mut better_found = false;
        if let Some(i) = results
            .iter()
            .position(|d| d.bounds.overlap_pct(&bounds) > MAX_OVERLAP_PCT)
        {
            if results[i].confidence > score {
                better_found = true;
            } else {
                results.swap_remove(i);
            }
        }

        if !better_found {
            let l_eye = PointF32::new((ax + res[4]) * x_scale, (ay + res[5]) * y_scale);
            let r_eye = PointF32::new((ax + res[6]) * x_scale, (ay + res[7]) * y_scale);
            results.push(Face::with_eyes(score, bounds, l_eye, r_eye));
        }
    }

    trace!("Detected {} faces", results.len());

    Ok(results)
}

fn sigmoid_stable(x: f32) -> f32 {
    if x >= 0. {
        1. / (1. + (-x).exp())
    } else {
        x.exp() / (1. + x.exp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchors::ANCHOR_COUNT;
    use ndarray::Array3;

    #[test]
    fn test_decode_keeps_best_of_overlapping() {
        let anchors = gen_anchors(WIDTH);
        let mut regressors = Array3::<f32>::zeros((1, ANCHOR_COUNT, 16));
        let mut scores = vec![-10f32; ANCHOR_COUNT];

        // anchors 0 and 1 share a cell; 40 is elsewhere
        for (idx, score) in [(0, 2.), (1, 4.), (40, 3.)] {
            let mut row = regressors.index_axis_mut(Axis(1), idx);
            row[[0, 2]] = 20.;
            row[[0, 3]] = 20.;
            row[[0, 4]] = -5.;
            row[[0, 6]] = 5.;
            scores[idx] = score;
        }

        let faces = decode(regressors.view().into_dyn(), &scores, &anchors, 256, 128).unwrap();

        assert_eq!(faces.len(), 2);
        let best = faces.iter().find(|f| f.bounds.x < 30).unwrap();
        assert!((best.confidence() - sigmoid_stable(4.)).abs() < 1e-6);
        // x scaled by 2
        assert_eq!(best.l_eye, PointF32::new(-2., 4.));
        assert_eq!(best.rot_theta(), 0.);
    }

    #[test]
    fn test_decode_drops_inverted_boxes() {
        let anchors = gen_anchors(WIDTH);
        let mut regressors = Array3::<f32>::zeros((1, ANCHOR_COUNT, 16));
        let mut scores = vec![-10f32; ANCHOR_COUNT];

        for (idx, w, h) in [(100, -20., 20.), (200, 20., f32::NAN), (300, 16., 16.)] {
            let mut row = regressors.index_axis_mut(Axis(1), idx);
            row[[0, 2]] = w;
            row[[0, 3]] = h;
            scores[idx] = 3.;
        }

        let faces = decode(regressors.view().into_dyn(), &scores, &anchors, 128, 128).unwrap();

        assert_eq!(faces.len(), 1);
        assert_eq!((faces[0].bounds.w, faces[0].bounds.h), (16, 16));
    }

    #[test]
    fn test_decode_rejects_bad_shape() {
        let anchors = gen_anchors(WIDTH);
        let regressors = Array3::<f32>::zeros((1, 10, 16));

        assert!(decode(regressors.view().into_dyn(), &[0.; 10], &anchors, 128, 128).is_err());
    }

    #[test]
    fn test_sigmoid() {
        assert_eq!(sigmoid_stable(0.), 0.5);
        assert!(sigmoid_stable(-100.) >= 0.);
        assert!(sigmoid_stable(100.) <= 1.);
    }
}
