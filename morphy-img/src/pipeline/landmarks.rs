use super::LandmarkSource;
use super::detection::{Face, FaceDetector};
use super::model::{Session, initialize_model, input_name};
use crate::landmarks::{FACE_MESH_LEN, LandmarkSet};
use crate::shapes::point::PointF32;
use anyhow::{Result, anyhow};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};
use ndarray::Array4;
use ort::value::Tensor;
use std::path::Path;
use tracing::{Level, debug, span};

pub const MODEL_FILE: &str = "face_landmark.onnx";

const HEIGHT: u32 = 192;
const WIDTH: u32 = 192;
const MESH_OUTPUT: &str = "conv2d_21";

/// Face mesh landmarks for every face the detector finds.
pub struct FaceMeshLandmarker {
    detector: FaceDetector,
    model: Session,
    input: String,
}

impl FaceMeshLandmarker {
    pub fn new(detector: FaceDetector, model_path: &Path, threads: usize) -> Result<Self> {
        let model = initialize_model(model_path, threads)?;
        let input = input_name(&model, 0)?;

        Ok(Self {
            detector,
            model,
            input,
        })
    }

    // ~80-90ms
    fn run(&self, img: &RgbImage, face: &Face) -> Result<LandmarkSet> {
        let span = span!(Level::DEBUG, "face_landmarker");
        let _guard = span.enter();

        let (img_w, img_h) = img.dimensions();
        let mut bounds = face.bounds;
        // pad 25% on each side
        bounds.scale(1.5, img_w, img_h);
        if bounds.area() == 0 {
            return Err(anyhow!("empty face bounds {bounds:?}"));
        }

        let face_img =
            imageops::crop_imm(img, bounds.left(), bounds.top(), bounds.w, bounds.h).to_image();

        // level the eyes before running the mesh
        let theta = face.rot_theta();
        let upright = rotate_about_center(&face_img, -theta, Interpolation::Bilinear, Rgb([0, 0, 0]));
        let input_img = imageops::resize(&upright, WIDTH, HEIGHT, FilterType::Triangle);

        let input_arr = Array4::from_shape_fn(
            (1, HEIGHT as usize, WIDTH as usize, 3),
            |(_, y, x, c)| input_img.get_pixel(x as u32, y as u32)[c] as f32 / 255., // 0. - 1. range
        );

        let outputs = self
            .model
            .run(ort::inputs![self.input.as_str() => Tensor::from_array(input_arr)?]?)?;
        let mesh: Vec<f32> = outputs[MESH_OUTPUT]
            .try_extract_tensor::<f32>()?
            .iter()
            .copied()
            .collect();

        let points = mesh_to_frame(
            &mesh,
            bounds.left() as f32,
            bounds.top() as f32,
            bounds.w as f32,
            bounds.h as f32,
            theta,
        )?;

        Ok(LandmarkSet::new(
            points
                .into_iter()
                .map(|p| PointF32::new(p.x / img_w as f32, p.y / img_h as f32))
                .collect(),
        ))
    }
}

impl LandmarkSource for FaceMeshLandmarker {
    fn detect(&self, img: &RgbImage) -> Result<Vec<LandmarkSet>> {
        let faces = self.detector.detect(img)?;
        debug!("Running face mesh on {} faces", faces.len());

        faces.iter().map(|face| self.run(img, face)).collect()
    }
}

// Map mesh output (x, y, z triples in model input pixels) back into frame
// pixels: undo the resize, then the rotation about the crop center, then the
// crop offset.
fn mesh_to_frame(
    mesh: &[f32],
    left: f32,
    top: f32,
    crop_w: f32,
    crop_h: f32,
    theta: f32,
) -> Result<Vec<PointF32>> {
    if mesh.len() < FACE_MESH_LEN * 3 {
        return Err(anyhow!(
            "expected {} mesh values, found {}",
            FACE_MESH_LEN * 3,
            mesh.len()
        ));
    }

    let x_scale = crop_w / WIDTH as f32;
    let y_scale = crop_h / HEIGHT as f32;
    let origin = PointF32::new(crop_w / 2., crop_h / 2.);

    Ok(mesh
        .chunks_exact(3)
        .take(FACE_MESH_LEN)
        .map(|kpt| {
            let mut p = PointF32::new(kpt[0] * x_scale, kpt[1] * y_scale);
            p.rotate(origin, theta);
            p.offset(left, top)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mesh_to_frame() {
        let mut mesh = vec![0f32; FACE_MESH_LEN * 3];
        // model center and the right edge midpoint
        mesh[0] = 96.;
        mesh[1] = 96.;
        mesh[3] = 192.;
        mesh[4] = 96.;

        let points = mesh_to_frame(&mesh, 10., 20., 96., 96., std::f32::consts::FRAC_PI_2).unwrap();

        assert_eq!(points.len(), FACE_MESH_LEN);
        assert!(points[0].dist(&PointF32::new(58., 68.)) < 1e-3);
        // a quarter turn takes the right edge to the bottom
        assert!(points[1].dist(&PointF32::new(58., 116.)) < 1e-3);
    }

    #[test]
    fn test_short_mesh() {
        assert!(mesh_to_frame(&[0.; 30], 0., 0., 10., 10., 0.).is_err());
    }
}
