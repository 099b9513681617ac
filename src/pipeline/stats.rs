//! Per-stage frame counters

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;

/// Counters written by the worker, readable from any thread
#[derive(Debug, Default)]
pub struct PipelineStats {
    received: CachePadded<AtomicU64>,
    throttled: CachePadded<AtomicU64>,
    skipped_disabled: CachePadded<AtomicU64>,
    previews_posted: CachePadded<AtomicU64>,
    marshal_errors: CachePadded<AtomicU64>,
    marshalled: CachePadded<AtomicU64>,
    dispatched: CachePadded<AtomicU64>,
    transform_failures: CachePadded<AtomicU64>,
    results_posted: CachePadded<AtomicU64>,
    handoff_dropped: CachePadded<AtomicU64>,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub throttled: u64,
    pub skipped_disabled: u64,
    /// Raw previews posted while processing was off
    pub previews_posted: u64,
    pub marshal_errors: u64,
    pub marshalled: u64,
    pub dispatched: u64,
    pub transform_failures: u64,
    pub results_posted: u64,
    pub handoff_dropped: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Counter {
    Received,
    Throttled,
    SkippedDisabled,
    PreviewPosted,
    MarshalError,
    Marshalled,
    Dispatched,
    TransformFailure,
    ResultPosted,
    HandoffDropped,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bump(&self, counter: Counter) {
        let (cell, name) = match counter {
            Counter::Received => (&self.received, "edgecam_frames_received"),
            Counter::Throttled => (&self.throttled, "edgecam_frames_throttled"),
            Counter::SkippedDisabled => (&self.skipped_disabled, "edgecam_frames_skipped"),
            Counter::PreviewPosted => (&self.previews_posted, "edgecam_previews_posted"),
            Counter::MarshalError => (&self.marshal_errors, "edgecam_marshal_errors"),
            Counter::Marshalled => (&self.marshalled, "edgecam_frames_marshalled"),
            Counter::Dispatched => (&self.dispatched, "edgecam_frames_dispatched"),
            Counter::TransformFailure => (&self.transform_failures, "edgecam_transform_failures"),
            Counter::ResultPosted => (&self.results_posted, "edgecam_results_posted"),
            Counter::HandoffDropped => (&self.handoff_dropped, "edgecam_handoff_dropped"),
        };
        cell.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(name).increment(1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            skipped_disabled: self.skipped_disabled.load(Ordering::Relaxed),
            previews_posted: self.previews_posted.load(Ordering::Relaxed),
            marshal_errors: self.marshal_errors.load(Ordering::Relaxed),
            marshalled: self.marshalled.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            transform_failures: self.transform_failures.load(Ordering::Relaxed),
            results_posted: self.results_posted.load(Ordering::Relaxed),
            handoff_dropped: self.handoff_dropped.load(Ordering::Relaxed),
        }
    }
}

impl StatsSnapshot {
    /// Frames that passed the rate limiter
    /// Frames past the rate limiter. Fields are loaded independently, so a
    /// snapshot taken mid-frame may briefly see `throttled` ahead of `received`.
    pub fn accepted(&self) -> u64 {
        self.received.saturating_sub(self.throttled)
    }
}
