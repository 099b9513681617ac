//! Worker lifecycle and the enable/disable state machine

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, instrument};

use crate::capture::{FrameSink, FrameSource, FrameStream, Resolution};
use crate::display::{DisplaySurface, PresentEvent, Presenter, TelemetryHandle};
use crate::error::{OpenFailure, PipelineError};
use crate::pipeline::dispatch::{Dispatcher, FrameTransform};
use crate::pipeline::handler::FrameHandler;
use crate::pipeline::ringbuf::{FrameQueue, QueueStats};
use crate::pipeline::stats::{PipelineStats, StatsSnapshot};
use crate::pipeline::Toggle;
use crate::PipelineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Stopped,
    /// Stream active, transform not invoked
    RunningDisabled,
    /// Stream active, transform invoked per accepted frame
    RunningEnabled,
}

/// Resources that move onto the worker for a session and come back on stop
struct WorkerParts {
    source: Box<dyn FrameSource>,
    dispatcher: Dispatcher,
}

struct WorkerExit {
    parts: WorkerParts,
    stream: Option<Box<dyn FrameStream>>,
}

struct WorkerContext {
    resolution: Resolution,
    min_interval: Duration,
    toggle: Arc<Toggle>,
    stats: Arc<PipelineStats>,
    queue: Arc<FrameQueue>,
    events: Sender<PresentEvent>,
    ready: Sender<Result<Resolution, OpenFailure>>,
}

/// State of one start/stop cycle
struct Session {
    worker: JoinHandle<WorkerExit>,
    queue: Arc<FrameQueue>,
    events: Receiver<PresentEvent>,
    stats: Arc<PipelineStats>,
    resolution: Resolution,
}

/// Owns the pipeline worker and the presentation side.
///
/// Lives on the presentation thread: `pump` applies worker results to the
/// surface, `set_enabled` flips processing, `start`/`stop` follow the
/// application's foreground/background transitions.
pub struct PipelineController<S: DisplaySurface> {
    config: PipelineConfig,
    resolution: Resolution,
    toggle: Arc<Toggle>,
    presenter: Presenter<S>,
    parts: Option<WorkerParts>,
    session: Option<Session>,
    last_stats: StatsSnapshot,
    last_queue_stats: QueueStats,
}

impl<S: DisplaySurface> PipelineController<S> {
    pub fn new(
        config: PipelineConfig,
        resolution: Resolution,
        source: Box<dyn FrameSource>,
        transform: Box<dyn FrameTransform>,
        surface: S,
    ) -> Self {
        let toggle = Arc::new(Toggle::new(config.start_enabled));
        let presenter = Presenter::new(surface, toggle.clone());
        Self {
            config,
            resolution,
            toggle,
            presenter,
            parts: Some(WorkerParts {
                source,
                dispatcher: Dispatcher::new(transform),
            }),
            session: None,
            last_stats: StatsSnapshot::default(),
            last_queue_stats: QueueStats::default(),
        }
    }

    /// Open the camera on a fresh worker and begin processing.
    ///
    /// Blocks until the worker reports whether the stream opened. On failure
    /// the pipeline stays stopped; nothing is retried.
    #[instrument(skip(self), fields(resolution = %self.resolution))]
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if self.session.is_some() {
            debug!("pipeline already running");
            return Ok(());
        }
        let Some(parts) = self.parts.take() else {
            let err = PipelineError::WorkerLost;
            self.presenter.report_failure(&err.to_string());
            return Err(err);
        };
        self.toggle.set(self.config.start_enabled);

        let queue = Arc::new(FrameQueue::new(self.config.queue_depth));
        let stats = Arc::new(PipelineStats::new());
        let (event_tx, event_rx) = flume::bounded(self.config.present_queue_depth.max(1));
        let (ready_tx, ready_rx) = flume::bounded(1);
        let context = WorkerContext {
            resolution: self.resolution,
            min_interval: self.config.min_interval(),
            toggle: self.toggle.clone(),
            stats: stats.clone(),
            queue: queue.clone(),
            events: event_tx,
            ready: ready_tx,
        };

        let worker = thread::Builder::new()
            .name("pipeline-worker".into())
            .spawn(move || run_worker(parts, context))?;

        match ready_rx.recv() {
            Ok(Ok(resolution)) => {
                info!("Pipeline started at {}", resolution);
                self.presenter.reset_session();
                self.presenter.apply_toggle(self.toggle.is_enabled());
                self.session = Some(Session {
                    worker,
                    queue,
                    events: event_rx,
                    stats,
                    resolution,
                });
                Ok(())
            }
            Ok(Err(failure)) => {
                error!("Camera unavailable: {}", failure);
                self.reclaim(worker);
                self.presenter.report_failure(&failure.to_string());
                Err(failure.into())
            }
            Err(_) => {
                self.reclaim(worker);
                let err = PipelineError::WorkerLost;
                self.presenter.report_failure(&err.to_string());
                Err(err)
            }
        }
    }

    /// Stop delivery, let an in-flight transform finish, stop the stream, join
    /// the worker, then release the stream. No result is presented after this
    /// returns until the next `start`.
    pub fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let Session {
            worker,
            queue,
            events,
            stats,
            resolution,
        } = session;

        info!("Stopping pipeline ({})", resolution);
        queue.close();
        self.reclaim(worker);

        let undelivered = events.len();
        drop(events);
        if undelivered > 0 {
            debug!(undelivered, "discarded pending results");
        }

        self.last_stats = stats.snapshot();
        self.last_queue_stats = queue.stats();
        info!(stats = ?self.last_stats, queue = ?self.last_queue_stats, "Pipeline stopped");
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.toggle.set(enabled) {
            info!(enabled, "Processing toggled");
            self.presenter.apply_toggle(enabled);
        }
    }

    /// Flip processing; returns the new setting.
    pub fn toggle_processing(&mut self) -> bool {
        let enabled = !self.toggle.is_enabled();
        self.set_enabled(enabled);
        enabled
    }

    /// Apply every result the worker has posted so far. Returns how many.
    pub fn pump(&mut self) -> usize {
        self.reap_dead_worker();
        let Some(session) = &self.session else {
            return 0;
        };
        let mut applied = 0;
        for event in session.events.try_iter() {
            self.presenter.present(event);
            applied += 1;
        }
        applied
    }

    /// Like [`pump`](Self::pump), but waits up to `timeout` for the first result.
    pub fn pump_timeout(&mut self, timeout: Duration) -> usize {
        self.reap_dead_worker();
        let Some(session) = &self.session else {
            return 0;
        };
        match session.events.recv_timeout(timeout) {
            Ok(event) => {
                self.presenter.present(event);
                1 + self.pump()
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    pub fn state(&self) -> PipelineState {
        match (self.is_running(), self.toggle.is_enabled()) {
            (false, _) => PipelineState::Stopped,
            (true, false) => PipelineState::RunningDisabled,
            (true, true) => PipelineState::RunningEnabled,
        }
    }

    pub fn is_running(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| !session.worker.is_finished())
    }

    pub fn is_enabled(&self) -> bool {
        self.toggle.is_enabled()
    }

    /// Counters of the running session, or of the last one after `stop`.
    pub fn stats(&self) -> StatsSnapshot {
        self.session
            .as_ref()
            .map_or(self.last_stats, |session| session.stats.snapshot())
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.session
            .as_ref()
            .map_or(self.last_queue_stats, |session| session.queue.stats())
    }

    pub fn presenter(&self) -> &Presenter<S> {
        &self.presenter
    }

    pub fn presenter_mut(&mut self) -> &mut Presenter<S> {
        &mut self.presenter
    }

    pub fn telemetry_handle(&self) -> TelemetryHandle {
        self.presenter.telemetry_handle()
    }

    /// Tear down a session whose worker exited on its own.
    fn reap_dead_worker(&mut self) {
        if self.session.is_some() && !self.is_running() {
            error!("Pipeline worker exited unexpectedly");
            self.stop();
        }
    }

    fn reclaim(&mut self, worker: JoinHandle<WorkerExit>) {
        match worker.join() {
            Ok(exit) => {
                self.parts = Some(exit.parts);
                drop(exit.stream);
            }
            Err(_) => error!("Pipeline worker panicked; camera and transform are lost"),
        }
    }
}

impl<S: DisplaySurface> Drop for PipelineController<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Worker body: open, deliver, process until the queue closes, stop the stream.
fn run_worker(parts: WorkerParts, context: WorkerContext) -> WorkerExit {
    let WorkerParts {
        mut source,
        dispatcher,
    } = parts;

    let mut stream = match source.open(context.resolution) {
        Ok(stream) => stream,
        Err(failure) => {
            let _ = context.ready.send(Err(failure));
            return WorkerExit {
                parts: WorkerParts { source, dispatcher },
                stream: None,
            };
        }
    };

    if let Err(failure) = stream.start(FrameSink::new(context.queue.clone())) {
        let _ = context.ready.send(Err(failure));
        return WorkerExit {
            parts: WorkerParts { source, dispatcher },
            stream: Some(stream),
        };
    }
    let _ = context.ready.send(Ok(stream.resolution()));

    let mut handler = FrameHandler::new(
        context.min_interval,
        dispatcher,
        context.toggle,
        context.stats,
        context.events,
    );
    while let Some(frame) = context.queue.next_frame() {
        let sequence = frame.sequence();
        // A frame that panics the handler is lost; the session keeps going.
        if panic::catch_unwind(AssertUnwindSafe(|| handler.handle(frame))).is_err() {
            error!(sequence, "frame handling panicked, frame dropped");
        }
    }

    debug!("frame queue closed, stopping stream");
    stream.stop();

    WorkerExit {
        parts: WorkerParts {
            source,
            dispatcher: handler.into_dispatcher(),
        },
        stream: Some(stream),
    }
}
