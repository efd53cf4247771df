//! Headless demo: plays a simulated stream through the watermark pipeline
//! using the software backend, and reports what reached the display.
//!
//! ```bash
//! cargo run -p lumina-watermark-demo -- demo://bars --seconds 3 --fail-after 1
//! ```

mod simulated;

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use crossbeam_channel::Receiver;

use lumina_watermark_core::{
    CapabilityProbe, CpuBackend, DecoderFactory, DeviceCaps, GpuBackend, NativeModule,
    PipelineConfig, PlatformServices, PlaybackController, PlaybackEvent, RawSurfaceProvider,
    StaticProbe, WatermarkAsset, WatermarkError,
};

use simulated::SimulatedDecoders;

#[derive(Parser, Debug)]
#[command(about = "Play a simulated stream with a GPU-style watermark overlay")]
struct Args {
    /// Stream identifier handed to the decoder
    #[arg(default_value = "demo://color-bars")]
    url: String,

    /// How long to play
    #[arg(long, default_value_t = 3)]
    seconds: u64,

    /// Inject a decoder error after this many seconds
    #[arg(long)]
    fail_after: Option<u64>,

    /// Pretend the GPU lacks the required GLES version
    #[arg(long)]
    no_gpu: bool,

    /// Display width
    #[arg(long, default_value_t = 320)]
    width: u32,

    /// Display height
    #[arg(long, default_value_t = 180)]
    height: u32,

    /// Frame rate of the simulated decoder
    #[arg(long, default_value_t = 30)]
    fps: u32,
}

/// Semi-transparent white badge in the top-left quarter, clear elsewhere.
fn demo_watermark() -> Result<WatermarkAsset, WatermarkError> {
    let (width, height) = (64u32, 36u32);
    let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
    for y in 0..height {
        for x in 0..width {
            let badge = x < width / 4 && y < height / 4;
            let alpha = if badge { 160 } else { 0 };
            pixels.extend_from_slice(&[255, 255, 255, alpha]);
        }
    }
    WatermarkAsset::from_rgba(width, height, pixels)
}

fn log_events(events: &Receiver<PlaybackEvent>) {
    for event in events.try_iter() {
        tracing::info!("event: {:?}", event);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lumina_watermark_core=debug".parse()?)
                .add_directive("lumina_watermark_demo=debug".parse()?),
        )
        .init();

    let args = Args::parse();
    tracing::info!("Starting demo: {:?}", args);

    let backend = Arc::new(CpuBackend::new(args.width, args.height));
    let decoders = Arc::new(SimulatedDecoders::new(args.fps));
    let probe: Arc<dyn CapabilityProbe> = if args.no_gpu {
        Arc::new(StaticProbe::unsupported())
    } else {
        Arc::new(StaticProbe::new(DeviceCaps::gles(3, 0)))
    };

    let services = PlatformServices {
        probe,
        gpu: Arc::clone(&backend) as Arc<dyn GpuBackend>,
        module: Arc::new(NativeModule::builtin("MediaWatermark")),
        watermark: demo_watermark(),
        raw_surfaces: Arc::clone(&backend) as Arc<dyn RawSurfaceProvider>,
        decoders: Arc::clone(&decoders) as Arc<dyn DecoderFactory>,
    };

    let mut controller = PlaybackController::new(PipelineConfig::default(), services);
    let events = controller.subscribe();
    controller.start(args.url.as_str())?;

    let started = Instant::now();
    let run_for = Duration::from_secs(args.seconds);
    let fail_at = args.fail_after.map(Duration::from_secs);
    let mut injected = false;

    while started.elapsed() < run_for {
        controller.process_for(Duration::from_millis(50));
        log_events(&events);
        if let Some(at) = fail_at {
            if !injected && started.elapsed() >= at {
                decoders.fail_latest(1);
                injected = true;
            }
        }
    }

    tracing::info!(
        "Final state {:?} on {:?} drawable after {} recoveries",
        controller.state(),
        controller.drawable_kind(),
        controller.recovery_attempts()
    );
    match backend.presented() {
        Some(frame) => {
            tracing::info!(
                "Presented {} frames; last {}x{} (source #{}, watermarked: {}), top-left {:?}, center {:?}",
                backend.frames_presented(),
                frame.width,
                frame.height,
                frame.source_sequence,
                frame.watermarked,
                frame.pixel(2, 2),
                frame.pixel(frame.width / 2, frame.height / 2)
            );
        }
        None => tracing::warn!("Nothing was presented"),
    }

    controller.stop();
    controller.process_pending();
    log_events(&events);
    Ok(())
}
