//! edgecam: throttled edge detection over a live camera feed
//!
//! `edgecam [config.toml]`. SIGUSR1 toggles processing, SIGUSR2 runs a
//! background/foreground cycle (stop, then start), Ctrl+C exits. A camera
//! that fails to open leaves the pipeline stopped until the next cycle.

use std::path::PathBuf;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use edgecam::capture::{FrameSource, SyntheticSource};
use edgecam::display::DisplaySurface;
use edgecam::pipeline::PipelineController;
use edgecam::transform::EdgeTransform;
use edgecam::{CaptureBackend, Config};

const PUMP_INTERVAL: Duration = Duration::from_millis(16);
const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("edgecam=debug")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("edgecam launching...");

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    info!("Configuration: {:?}", config);

    let source = build_source(&config)?;
    let transform = Box::new(EdgeTransform::new(&config.transform));
    let resolution = config.capture.resolution();

    #[cfg(feature = "sdl-display")]
    {
        let surface =
            edgecam::display::Sdl2Surface::new(config.display.width, config.display.height)?;
        let controller =
            PipelineController::new(config.pipeline.clone(), resolution, source, transform, surface);
        run(controller).await?;
    }

    #[cfg(not(feature = "sdl-display"))]
    {
        use edgecam::display::HeadlessSurface;

        let surface = match &config.display.snapshot_path {
            Some(path) => HeadlessSurface::with_snapshot_path(path),
            None => HeadlessSurface::new(),
        };
        let controller =
            PipelineController::new(config.pipeline.clone(), resolution, source, transform, surface);
        let controller = run(controller).await?;
        controller.presenter().surface().save_snapshot()?;
    }

    info!("edgecam shutting down");
    Ok(())
}

fn build_source(config: &Config) -> Result<Box<dyn FrameSource>> {
    match config.capture.backend {
        CaptureBackend::Synthetic => Ok(Box::new(
            SyntheticSource::new(Duration::from_millis(config.capture.synthetic_interval_ms))
                .with_format(config.capture.format)
                .with_pool_size(config.capture.buffer_count as usize),
        )),
        #[cfg(feature = "v4l2")]
        CaptureBackend::V4l2 => Ok(Box::new(edgecam::capture::V4l2Source::new(&config.capture))),
        #[cfg(feature = "gstreamer-pipeline")]
        CaptureBackend::GStreamer => {
            Ok(Box::new(edgecam::capture::GstSource::new(&config.capture)))
        }
        #[allow(unreachable_patterns)]
        backend => Err(eyre!("capture backend {:?} is not compiled in", backend)),
    }
}

/// Presentation loop. Returns the stopped controller once asked to exit.
async fn run<S: DisplaySurface>(
    mut controller: PipelineController<S>,
) -> Result<PipelineController<S>> {
    start_or_report(&mut controller);

    let mut toggle_signal = signal(SignalKind::user_defined1())?;
    let mut cycle_signal = signal(SignalKind::user_defined2())?;
    let mut pump = tokio::time::interval(PUMP_INTERVAL);
    let mut stats = tokio::time::interval(STATS_INTERVAL);
    let telemetry = controller.telemetry_handle();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received");
                break;
            }
            _ = toggle_signal.recv() => {
                let enabled = controller.toggle_processing();
                info!("Processing {}", if enabled { "enabled" } else { "disabled" });
            }
            _ = cycle_signal.recv() => {
                controller.stop();
                start_or_report(&mut controller);
            }
            _ = pump.tick() => {
                controller.pump();
                if controller.presenter_mut().surface_mut().closed() {
                    break;
                }
            }
            _ = stats.tick() => {
                info!(
                    state = ?controller.state(),
                    stats = ?controller.stats(),
                    queue = ?controller.queue_stats(),
                    telemetry = ?telemetry.load(),
                    "Pipeline status"
                );
            }
        }
    }

    controller.stop();
    Ok(controller)
}

/// Start the pipeline. A failure is already on the surface's status line and
/// leaves the pipeline stopped until the next cycle.
fn start_or_report<S: DisplaySurface>(controller: &mut PipelineController<S>) {
    if let Err(e) = controller.start() {
        error!("Pipeline start failed: {}", e);
    }
}
