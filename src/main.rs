use anyhow::{Context, Result};
use clap::Parser;
use image::Rgb;
use matte_stream::capture::{CaptureSource, WebcamCapture};
use matte_stream::config::{parse_rgb, DEFAULT_BACKGROUND, DEFAULT_THRESHOLD};
use matte_stream::output::{OutputSink, V4L2Output};
use matte_stream::segmentation::OnnxLoader;
use matte_stream::{
    FrameScheduler, LoadPolicy, ModelRegistry, Orientation, OrientationMode, PipelineConfig,
    ResizePolicy, SegmentationPipeline,
};
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input webcam device index
    #[arg(short, long, default_value_t = 0)]
    input_device: u32,

    /// Output v4l2loopback device path
    #[arg(short, long, default_value = "/dev/video10")]
    output_device: String,

    /// Capture resolution width
    #[arg(long, default_value_t = 1920)]
    capture_width: u32,

    /// Capture resolution height
    #[arg(long, default_value_t = 1080)]
    capture_height: u32,

    /// Output resolution width
    #[arg(long, default_value_t = 1280)]
    output_width: u32,

    /// Output resolution height
    #[arg(long, default_value_t = 720)]
    output_height: u32,

    /// Target frames per second
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// ONNX model used for portrait (taller than wide) frames
    #[arg(long)]
    portrait_model: Option<PathBuf>,

    /// ONNX model used for landscape frames
    #[arg(long)]
    landscape_model: Option<PathBuf>,

    /// Background score threshold; higher keeps more of the frame
    #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
    threshold: f32,

    /// Resampling filter between frame and model resolution
    #[arg(long, value_enum, default_value_t = ResizePolicy::Bilinear)]
    resize: ResizePolicy,

    /// How frames are tagged portrait or landscape
    #[arg(long, value_enum, default_value_t = OrientationMode::Auto)]
    orientation: OrientationMode,

    /// Whether a model that fails to load aborts startup
    #[arg(long, value_enum, default_value_t = LoadPolicy::Strict)]
    load_policy: LoadPolicy,

    /// Colour painted behind removed pixels on the loopback output (R,G,B)
    #[arg(long, value_parser = parse_rgb, default_value = "0,177,64")]
    background: Rgb<u8>,

    /// ONNX Runtime intra-op threads per model
    #[arg(long, default_value_t = 4)]
    intra_threads: usize,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            threshold: self.threshold,
            resize: self.resize,
            orientation: self.orientation,
            load_policy: self.load_policy,
            background: self.background,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let config = args.pipeline_config();
    config.validate().context("Invalid pipeline configuration")?;

    tracing::info!("matte-stream starting");
    tracing::info!("Capture: {}x{}", args.capture_width, args.capture_height);
    tracing::info!("Output: {}x{}", args.output_width, args.output_height);
    tracing::info!("Target FPS: {}", args.fps);
    tracing::info!(
        "Threshold {}, resize {:?}, orientation {:?}",
        config.threshold,
        config.resize,
        config.orientation
    );
    if config.background != DEFAULT_BACKGROUND {
        tracing::info!("Background colour {:?}", config.background.0);
    }

    let pipeline = load_pipeline(&args, &config)?;

    // Initialize capture
    let mut capture = WebcamCapture::new(
        args.input_device,
        args.capture_width,
        args.capture_height,
        args.fps,
        config.orientation,
    )
    .context("Failed to initialize webcam capture")?;
    let (capture_width, capture_height) = capture.resolution();
    if (capture_width, capture_height) != (args.capture_width, args.capture_height) {
        tracing::warn!(
            "Camera negotiated {}x{} instead of the requested {}x{}",
            capture_width,
            capture_height,
            args.capture_width,
            args.capture_height
        );
    }

    // Initialize output
    let output = V4L2Output::new(
        &args.output_device,
        args.output_width,
        args.output_height,
        config.background,
    )
    .context("Failed to initialize v4l2loopback output")?;
    tracing::info!(
        "Writing {}x{} frames to {}",
        output.resolution().0,
        output.resolution().1,
        args.output_device
    );

    let scheduler =
        FrameScheduler::spawn(pipeline, output).context("Failed to start segmentation worker")?;

    run_pipeline(&mut capture, &scheduler, args.fps)
}

fn load_pipeline(args: &Args, config: &PipelineConfig) -> Result<SegmentationPipeline> {
    let mut registry = ModelRegistry::new(OnnxLoader::new(args.intra_threads));
    for (orientation, path) in [
        (Orientation::Portrait, &args.portrait_model),
        (Orientation::Landscape, &args.landscape_model),
    ] {
        if let Some(path) = path {
            registry = registry.with_source(orientation, path.clone());
        }
    }

    let loaded = registry
        .load_all(config.load_policy)
        .context("Failed to load segmentation models")?;
    for orientation in Orientation::ALL {
        if !loaded.contains(&orientation) {
            tracing::warn!("No {} model loaded, those frames will be dropped", orientation);
        }
    }

    Ok(SegmentationPipeline::from_config(registry, config)?)
}

fn run_pipeline<C>(capture: &mut C, scheduler: &FrameScheduler, target_fps: u32) -> Result<()>
where
    C: CaptureSource,
{
    let frame_duration = Duration::from_secs_f32(1.0 / target_fps.max(1) as f32);
    let mut frame_count = 0u64;
    let mut total_capture_time = Duration::ZERO;

    tracing::info!("Starting main pipeline loop");
    tracing::info!("Press Ctrl+C to stop");

    loop {
        let loop_start = Instant::now();

        // Capture frame
        let capture_start = Instant::now();
        let frame = capture
            .capture_frame()
            .context("Failed to capture frame")?;
        total_capture_time += capture_start.elapsed();
        frame_count += 1;

        // Drops are counted by the scheduler
        let _ = scheduler.submit(frame);

        // Log stats every 30 frames
        if frame_count % 30 == 0 {
            let stats = scheduler.stats();
            let avg_capture_ms = total_capture_time.as_secs_f64() * 1000.0 / frame_count as f64;
            tracing::info!(
                "Frame {}: accepted={}, dropped={}, completed={}, failed={}, sink_errors={}, capture={:.1}ms",
                frame_count,
                stats.accepted,
                stats.dropped,
                stats.completed,
                stats.failed,
                stats.sink_errors,
                avg_capture_ms
            );
        }

        // Frame rate limiting
        let elapsed = loop_start.elapsed();
        if elapsed < frame_duration {
            std::thread::sleep(frame_duration - elapsed);
        }
    }
}
