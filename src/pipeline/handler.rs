//! Per-frame sequence run on the pipeline worker

use std::sync::Arc;
use std::time::Duration;

use flume::{Sender, TrySendError};
use tracing::{debug, trace, warn};

use crate::capture::Frame;
use crate::display::{PresentEvent, ProcessedFrame};
use crate::pipeline::dispatch::Dispatcher;
use crate::pipeline::marshal::marshal;
use crate::pipeline::stats::{Counter, PipelineStats};
use crate::pipeline::throttle::RateLimiter;
use crate::pipeline::Toggle;

/// What happened to one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Throttled,
    Disabled,
    MarshalFailed,
    TransformFailed,
    Posted,
    /// The presentation thread was behind; the result was dropped
    HandoffDropped,
}

/// Throttle, marshal, dispatch and post, strictly in that order.
///
/// Every path consumes the frame; it is released before dispatch runs.
pub struct FrameHandler {
    limiter: RateLimiter,
    dispatcher: Dispatcher,
    toggle: Arc<Toggle>,
    stats: Arc<PipelineStats>,
    results: Sender<PresentEvent>,
}

impl FrameHandler {
    pub fn new(
        min_interval: Duration,
        dispatcher: Dispatcher,
        toggle: Arc<Toggle>,
        stats: Arc<PipelineStats>,
        results: Sender<PresentEvent>,
    ) -> Self {
        Self {
            limiter: RateLimiter::new(min_interval),
            dispatcher,
            toggle,
            stats,
            results,
        }
    }

    pub fn handle(&mut self, frame: Frame) -> FrameOutcome {
        self.stats.bump(Counter::Received);

        if !self.limiter.accept(frame.timestamp) {
            trace!(sequence = frame.sequence(), "throttled");
            self.stats.bump(Counter::Throttled);
            frame.release();
            return FrameOutcome::Throttled;
        }

        let (epoch, enabled) = self.toggle.observe();
        if !enabled {
            self.stats.bump(Counter::SkippedDisabled);
            self.post_preview(frame, epoch);
            return FrameOutcome::Disabled;
        }

        let marshalled = marshal(&frame);
        let sequence = frame.sequence();
        frame.release();

        let buffer = match marshalled {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!("Dropping frame {}: {}", sequence, e);
                self.stats.bump(Counter::MarshalError);
                return FrameOutcome::MarshalFailed;
            }
        };
        self.stats.bump(Counter::Marshalled);

        self.stats.bump(Counter::Dispatched);
        let Some(image) = self.dispatcher.dispatch(&buffer) else {
            self.stats.bump(Counter::TransformFailure);
            self.post(PresentEvent::Missed { sequence });
            return FrameOutcome::TransformFailed;
        };

        let processed = ProcessedFrame {
            image,
            sequence,
            captured_at: buffer.captured_at(),
            epoch,
        };
        if self.post(PresentEvent::Processed(processed)) {
            self.stats.bump(Counter::ResultPosted);
            FrameOutcome::Posted
        } else {
            self.stats.bump(Counter::HandoffDropped);
            FrameOutcome::HandoffDropped
        }
    }

    /// Hand the dispatcher back once the session ends.
    pub fn into_dispatcher(self) -> Dispatcher {
        self.dispatcher
    }

    /// Post the frame's luma as the raw preview. The transform is not involved.
    fn post_preview(&self, frame: Frame, epoch: u64) {
        let preview = marshal(&frame).ok().and_then(|buffer| buffer.luma_preview());
        let sequence = frame.sequence();
        let captured_at = frame.timestamp;
        frame.release();

        let Some(image) = preview else {
            trace!(sequence, "no preview for malformed frame");
            return;
        };
        let preview = ProcessedFrame {
            image,
            sequence,
            captured_at,
            epoch,
        };
        if self.post(PresentEvent::Preview(preview)) {
            self.stats.bump(Counter::PreviewPosted);
        }
    }

    // Fire-and-forget: never blocks the worker on the presentation thread.
    fn post(&self, event: PresentEvent) -> bool {
        match self.results.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("presentation queue full, dropping result");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                trace!("presentation side gone");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FrameMetadata, PixelFormat, Plane, Resolution};
    use crate::pipeline::dispatch::TransformInput;
    use crate::pipeline::throttle::DEFAULT_MIN_INTERVAL;
    use bytes::Bytes;
    use image::RgbaImage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    struct Harness {
        handler: FrameHandler,
        toggle: Arc<Toggle>,
        stats: Arc<PipelineStats>,
        released: Arc<AtomicUsize>,
        events: flume::Receiver<PresentEvent>,
    }

    fn harness(transform_succeeds: bool, enabled: bool) -> Harness {
        let toggle = Arc::new(Toggle::new(enabled));
        let stats = Arc::new(PipelineStats::new());
        let (tx, rx) = flume::bounded(64);
        let dispatcher = Dispatcher::new(Box::new(move |input: TransformInput<'_>| {
            transform_succeeds.then(|| RgbaImage::new(input.width, input.height))
        }));
        Harness {
            handler: FrameHandler::new(
                DEFAULT_MIN_INTERVAL,
                dispatcher,
                toggle.clone(),
                stats.clone(),
                tx,
            ),
            toggle,
            stats,
            released: Arc::new(AtomicUsize::new(0)),
            events: rx,
        }
    }

    impl Harness {
        fn frame(&self, sequence: u64, timestamp: Instant, planes: usize) -> Frame {
            let released = self.released.clone();
            let planes = vec![
                Plane::new(Bytes::from(vec![0u8; 16]), 4, 1),
                Plane::new(Bytes::from(vec![1u8; 4]), 2, 1),
                Plane::new(Bytes::from(vec![2u8; 4]), 2, 1),
            ]
            .into_iter()
            .take(planes)
            .collect();
            Frame::new(
                FrameMetadata::new(sequence, Resolution::new(4, 4), PixelFormat::I420),
                planes,
                timestamp,
            )
            .with_release_hook(Box::new(move |_| {
                released.fetch_add(1, Ordering::SeqCst);
            }))
        }

        fn run(&mut self, sequence: u64, timestamp: Instant, planes: usize) -> FrameOutcome {
            let frame = self.frame(sequence, timestamp, planes);
            self.handler.handle(frame)
        }

        fn released(&self) -> usize {
            self.released.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn every_path_releases_the_frame_once() {
        let mut h = harness(true, true);
        let base = Instant::now();

        assert_eq!(h.run(0, base, 3), FrameOutcome::Posted);
        assert_eq!(h.released(), 1);

        let early = base + Duration::from_millis(10);
        assert_eq!(h.run(1, early, 3), FrameOutcome::Throttled);
        assert_eq!(h.released(), 2);

        let later = base + Duration::from_millis(200);
        assert_eq!(h.run(2, later, 2), FrameOutcome::MarshalFailed);
        assert_eq!(h.released(), 3);

        h.toggle.set(false);
        let much_later = base + Duration::from_millis(400);
        assert_eq!(h.run(3, much_later, 3), FrameOutcome::Disabled);
        assert_eq!(h.released(), 4);
    }

    #[test]
    fn transform_failure_releases_and_reports_missed() {
        let mut h = harness(false, true);
        assert_eq!(
            h.run(5, Instant::now(), 3),
            FrameOutcome::TransformFailed
        );
        assert_eq!(h.released(), 1);
        assert!(matches!(
            h.events.try_recv(),
            Ok(PresentEvent::Missed { sequence: 5 })
        ));
    }

    #[test]
    fn disabled_frames_still_advance_the_rate_limiter() {
        let mut h = harness(true, false);
        let base = Instant::now();
        assert_eq!(h.run(0, base, 3), FrameOutcome::Disabled);

        h.toggle.set(true);
        let soon = base + Duration::from_millis(50);
        assert_eq!(h.run(1, soon, 3), FrameOutcome::Throttled);
        assert_eq!(h.stats.snapshot().marshalled, 0);
        assert_eq!(h.stats.snapshot().dispatched, 0);
    }

    #[test]
    fn disabled_frames_post_a_raw_preview() {
        let mut h = harness(true, false);
        let captured = Instant::now();
        assert_eq!(h.run(4, captured, 3), FrameOutcome::Disabled);
        assert_eq!(h.released(), 1);

        match h.events.try_recv() {
            Ok(PresentEvent::Preview(preview)) => {
                assert_eq!(preview.sequence, 4);
                assert_eq!(preview.captured_at, captured);
                assert_eq!(preview.image.dimensions(), (4, 4));
                assert_eq!(preview.image.get_pixel(0, 0).0, [0, 0, 0, 255]);
            }
            other => panic!("expected a preview, got {:?}", other),
        }
        assert_eq!(h.stats.snapshot().previews_posted, 1);
        assert_eq!(h.stats.snapshot().dispatched, 0);
    }

    #[test]
    fn full_handoff_drops_instead_of_blocking() {
        let toggle = Arc::new(Toggle::new(true));
        let stats = Arc::new(PipelineStats::new());
        let (tx, _rx) = flume::bounded(1);
        let dispatcher = Dispatcher::new(Box::new(|input: TransformInput<'_>| {
            Some(RgbaImage::new(input.width, input.height))
        }));
        let mut handler =
            FrameHandler::new(Duration::ZERO, dispatcher, toggle, stats.clone(), tx);
        let h = harness(true, true);

        assert_eq!(handler.handle(h.frame(0, Instant::now(), 3)), FrameOutcome::Posted);
        assert_eq!(
            handler.handle(h.frame(1, Instant::now(), 3)),
            FrameOutcome::HandoffDropped
        );
        assert_eq!(stats.snapshot().handoff_dropped, 1);
        assert_eq!(h.released(), 2);
    }

    #[test]
    fn posted_result_carries_capture_time_and_epoch() {
        let mut h = harness(true, true);
        let captured = Instant::now();
        h.run(9, captured, 3);

        match h.events.try_recv() {
            Ok(PresentEvent::Processed(frame)) => {
                assert_eq!(frame.sequence, 9);
                assert_eq!(frame.captured_at, captured);
                assert_eq!(frame.epoch, h.toggle.epoch());
            }
            other => panic!("expected a processed frame, got {:?}", other),
        }
    }
}
