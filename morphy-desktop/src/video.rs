use anyhow::{Result, anyhow, bail};
use image::{EncodableLayout, RgbImage};
use std::io::Write;
use std::process::{Child, Command, Stdio};
use tracing::{debug, error, info, warn};

use nokhwa::{
    Camera, nokhwa_initialize,
    pixel_format::RgbFormat,
    query,
    utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType},
};

/// ffmpeg name for the layout of `RgbImage` buffers.
const PIXEL_FORMAT: &str = "rgb24";

/// Live camera feed decoded to RGB frames.
pub struct Webcam {
    camera: Camera,
}

impl Webcam {
    /// Open camera `index`, or the last one found when unset.
    pub fn open(index: Option<u32>, fps: u32) -> Result<Webcam> {
        nokhwa_initialize(|granted| debug!("Camera access granted: {granted}"));

        let cameras = query(ApiBackend::Auto)?;
        for cam in &cameras {
            debug!("Found camera: {cam:?}");
        }

        let info = match index {
            Some(i) => cameras
                .iter()
                .find(|cam| *cam.index() == CameraIndex::Index(i))
                .ok_or_else(|| anyhow!("No camera with index {i}"))?,
            None => cameras.last().ok_or_else(|| anyhow!("No camera found"))?,
        };
        info!("Using camera {}", info.human_name());

        let mut camera = Camera::new(
            info.index().clone(),
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
        )?;
        camera.set_frame_rate(fps)?;
        camera.open_stream()?;

        Ok(Webcam { camera })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        let resolution = self.camera.resolution();
        (resolution.width(), resolution.height())
    }

    /// Pull the next frame. Errors when the camera stops delivering, yields
    /// `None` for a frame that arrived but could not be decoded.
    pub fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let buffer = self.camera.frame()?;
        match buffer.decode_image::<RgbFormat>() {
            Ok(img) => Ok(Some(img)),
            Err(e) => {
                warn!("Dropping undecodable frame: {e}");
                Ok(None)
            }
        }
    }
}

impl Drop for Webcam {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            error!("Failed to stop camera {e:?}");
        }
    }
}

/// Where processed frames go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sink {
    /// ffplay window
    Window,
    /// v4l2 loopback device name under /dev
    Loopback(String),
}

impl From<Option<String>> for Sink {
    fn from(device: Option<String>) -> Sink {
        device.map_or(Sink::Window, Sink::Loopback)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSettings {
    pub sink: Sink,
    pub width: u32,
    pub height: u32,
}

impl OutputSettings {
    pub fn new(sink: Sink, (width, height): (u32, u32)) -> OutputSettings {
        OutputSettings {
            sink,
            width,
            height,
        }
    }

    fn size(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    pub fn program(&self) -> &'static str {
        match self.sink {
            Sink::Window => "ffplay",
            Sink::Loopback(_) => "ffmpeg",
        }
    }

    /// Arguments reading raw frames from stdin.
    pub fn args(&self) -> Vec<String> {
        let size = self.size();
        let args = match &self.sink {
            Sink::Window => vec![
                "-f",
                "rawvideo",
                "-pixel_format",
                PIXEL_FORMAT,
                "-video_size",
                size.as_str(),
                "-fflags",
                "nobuffer",
                "-flags",
                "low_delay",
                "-",
            ],
            Sink::Loopback(_) => vec![
                "-f",
                "rawvideo",
                "-pix_fmt",
                PIXEL_FORMAT,
                "-s",
                size.as_str(),
                "-i",
                "-",
                "-map",
                "0:v",
                "-vf",
                "format=yuv420p",
                "-f",
                "v4l2",
            ],
        };

        let mut args: Vec<String> = args.into_iter().map(String::from).collect();
        if let Sink::Loopback(device) = &self.sink {
            args.push(format!("/dev/{device}"));
        }
        args
    }

    fn check(&self, img: &RgbImage) -> Result<()> {
        if img.dimensions() != (self.width, self.height) {
            bail!(
                "frame is {}x{}, output expects {}",
                img.width(),
                img.height(),
                self.size()
            );
        }
        Ok(())
    }
}

/// Child process fed raw frames over stdin.
pub struct FramePipe {
    settings: OutputSettings,
    child: Child,
}

impl FramePipe {
    pub fn spawn(settings: OutputSettings) -> Result<FramePipe> {
        info!("Writing {} frames to {:?}", settings.size(), settings.sink);
        let child = Command::new(settings.program())
            .args(settings.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()?;

        Ok(FramePipe { settings, child })
    }

    pub fn write_frame(&mut self, img: &RgbImage) -> Result<()> {
        self.settings.check(img)?;
        let stdin = self
            .child
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("{} stdin closed", self.settings.program()))?;
        stdin.write_all(img.as_bytes())?;
        Ok(())
    }
}

impl Drop for FramePipe {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            error!("Failed to stop output process {e:?}");
        }
    }
}
