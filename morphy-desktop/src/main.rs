#![warn(unused_extern_crates)]
use anyhow::Result;
use clap::{Args, Parser};
use image::RgbImage;
use morphy_img::tensor::ChannelOrder;
use morphy_img::{Category, MorphConfig, Pipeline, Request};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{Level, debug, error, info, span, trace};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use video::{FramePipe, OutputSettings, Webcam};

mod video;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct CmdArgs {
    /// Target frame rate
    #[arg(long, default_value = "30")]
    fps: u32,

    /// Camera index to read from, defaults to the last one found
    #[arg(long)]
    camera: Option<u32>,

    #[command(flatten)]
    out: Out,

    /// Process single input frame, reading from input path
    #[arg(short, long, requires = "output")]
    input: Option<PathBuf>,

    /// Direction to morph faces in (feminine or masculine)
    #[arg(long, default_value = "feminine")]
    category: Category,

    /// Morph each face toward the opposite of its detected category, using
    /// --category when no classifier is available
    #[arg(long)]
    auto: bool,

    /// Strength of the morph, 0 leaves faces as they are
    #[arg(long, default_value = "0.5")]
    intensity: f32,

    /// Upper bound for --intensity
    #[arg(long, default_value = "1.0")]
    max_intensity: f32,

    /// Swap faces with the reference identity instead of morphing when possible
    #[arg(short, long)]
    synthesize: bool,

    /// Directory holding the onnx models
    #[arg(short, long, value_name = "DIR", default_value = "models")]
    models_dir: PathBuf,

    /// Portrait whose identity swapped faces take
    #[arg(short, long, value_name = "FILE")]
    reference: Option<PathBuf>,

    /// Channel order the identity and swap models expect
    #[arg(long, default_value = "rgb")]
    channel_order: ChannelOrder,

    /// Max threads per model, defaults to the number of cpus
    #[arg(short = 't', long)]
    max_threads: Option<usize>,

    /// Pixel spacing of the warp interpolation grid
    #[arg(long, default_value = "4")]
    grid_step: u32,
}

#[derive(Args, Debug)]
#[group(multiple = false)]
struct Out {
    /// Loopback device to write to. Displays in window if unset
    #[arg(group = "dest", short, long)]
    device: Option<String>,

    /// Process single input frame, writing to output path
    #[arg(group = "dest", short, long, requires = "input")]
    output: Option<PathBuf>,
}

impl CmdArgs {
    fn config(&self) -> MorphConfig {
        MorphConfig {
            max_intensity: self.max_intensity,
            grid_step: self.grid_step,
            channel_order: self.channel_order,
            ..MorphConfig::default()
        }
    }

    fn request(&self) -> Request {
        Request {
            category: self.category,
            intensity: self.intensity,
            use_synthesis: self.synthesize,
            auto_category: self.auto,
        }
    }
}

fn main() -> Result<()> {
    let filter = EnvFilter::from_default_env();
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_env_filter(filter)
        .init();

    let args = CmdArgs::parse();
    let threads = args.max_threads.unwrap_or_else(num_cpus::get);
    let request = args.request();

    let pipeline = Pipeline::load(
        &args.models_dir,
        args.reference.as_deref(),
        threads,
        &args.config(),
    );
    info!(
        "Ready: landmarks {}, swap {}, gender {}",
        pipeline.has_landmarks(),
        pipeline.has_swapper(),
        pipeline.has_gender()
    );

    if let (Some(input), Some(output)) = (&args.input, &args.out.output) {
        // Process single image at file and exit
        return process_image(input, output, &pipeline, &request);
    }

    let mut camera = Webcam::open(args.camera, args.fps)?;
    let mut output = FramePipe::spawn(OutputSettings::new(
        args.out.device.into(),
        camera.dimensions(),
    ))?;

    loop {
        let span = span!(Level::INFO, "frame_loop_iter");
        let _guard = span.enter();

        let get_frame_span = span!(Level::DEBUG, "get_frame");
        let get_frame_guard = get_frame_span.enter();
        let input_img = match camera.next_frame() {
            Ok(Some(img)) => img,
            Ok(None) => continue,
            Err(e) => {
                error!("Failed to pull frame from webcam: {e:?}");
                break;
            }
        };
        drop(get_frame_guard);

        let img = process_frame(&input_img, &pipeline, &request);

        let write_frame_span = span!(Level::DEBUG, "write_frame");
        let write_frame_guard = write_frame_span.enter();
        match output.write_frame(&img) {
            Ok(_) => trace!("Rendered frame."),
            Err(e) => error!("Failed to render frame: {e:?}"),
        }
        drop(write_frame_guard);
    }

    Ok(())
}

fn process_image(
    src: &Path,
    dest: &Path,
    pipeline: &Pipeline,
    request: &Request,
) -> Result<()> {
    let img = image::open(src)?.to_rgb8();
    let result = process_frame(&img, pipeline, request);
    result.save(dest)?;
    info!("Wrote {}", dest.display());
    Ok(())
}

fn process_frame(input_img: &RgbImage, pipeline: &Pipeline, request: &Request) -> RgbImage {
    let span = span!(Level::DEBUG, "process_frame");
    let _guard = span.enter();
    let start = Instant::now();

    let processed = pipeline.process_frame(input_img, request);
    debug!("{}ms to process frame", start.elapsed().as_millis());

    for (i, gender) in processed.genders.iter().enumerate() {
        if let Some(estimate) = gender {
            info!("Face {i} detected: {estimate}");
        }
    }

    processed.image
}
