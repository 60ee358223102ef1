//! Gap-free sequential playback scheduling.
//!
//! Decoded units must play in arrival order, back-to-back, on one output
//! timeline. The scheduler keeps a single monotonic cursor (the earliest
//! time the next unit may start) and the set of currently scheduled or
//! playing units, so a barge-in can halt everything at once.
//!
//! Single-writer: one scheduler instance is owned by the session event-loop
//! thread. The sink and clock it talks to are the only shared pieces.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tracing::{debug, trace};

use crate::codec::DecodedAudioUnit;
use crate::spectrum::SpectrumTap;

use super::{OutputClock, PlaybackSink};

/// Bookkeeping for one scheduled unit's slot on the output timeline.
#[derive(Debug, Clone, Copy)]
struct ActiveUnit {
    /// Scheduled start, seconds on the output clock.
    start: f64,
    /// `start` + unit duration.
    end: f64,
}

pub struct PlaybackScheduler {
    sink: Box<dyn PlaybackSink>,
    /// Feed for the playback-side waveform display.
    tap: SpectrumTap,
    /// `None` until the session reaches Connected (and again after reset).
    clock: Option<Arc<dyn OutputClock>>,
    /// Earliest time the next unit may begin. Non-decreasing between resets.
    cursor: f64,
    /// Units currently scheduled or playing, in schedule order.
    active: Vec<ActiveUnit>,
    next_unit_id: u64,
    /// Mirror of "active set is non-empty" for cheap polling by the UI.
    speaking: Arc<AtomicBool>,
}

impl PlaybackScheduler {
    pub fn new(sink: Box<dyn PlaybackSink>, tap: SpectrumTap, speaking: Arc<AtomicBool>) -> Self {
        speaking.store(false, Ordering::Release);
        Self {
            sink,
            tap,
            clock: None,
            cursor: 0.0,
            active: Vec::new(),
            next_unit_id: 0,
            speaking,
        }
    }

    /// Wire the scheduler to the output clock. Resets the cursor to the
    /// clock's present so the first unit of a session starts at "now".
    pub fn attach_clock(&mut self, clock: Arc<dyn OutputClock>) {
        self.cursor = clock.now();
        self.clock = Some(clock);
    }

    fn now(&self) -> f64 {
        self.clock.as_ref().map(|c| c.now()).unwrap_or(0.0)
    }

    /// Schedule a unit directly after whatever is already queued.
    ///
    /// Returns the computed start time. The unit joins the active set and
    /// leaves it exactly once: when the clock passes its end, or when
    /// [`interrupt`](Self::interrupt) halts everything.
    pub fn enqueue(&mut self, unit: DecodedAudioUnit) -> f64 {
        self.prune_finished();

        let start = self.cursor.max(self.now());
        self.cursor = start + unit.duration_secs();

        let id = self.next_unit_id;
        self.next_unit_id += 1;
        self.active.push(ActiveUnit {
            start,
            end: self.cursor,
        });
        self.speaking.store(true, Ordering::Release);

        trace!(
            id,
            start,
            end = self.cursor,
            samples = unit.samples.len(),
            "unit scheduled"
        );

        self.tap.push(&unit.samples);
        self.sink.submit(&unit);
        start
    }

    /// Barge-in: halt every active unit, empty the set, and pull the cursor
    /// back to the clock's present (0 with no clock) so the next unit plays
    /// immediately instead of at a stale future time.
    pub fn interrupt(&mut self) {
        debug!(halted = self.active.len(), "playback interrupted");
        self.sink.halt();
        self.tap.clear();
        self.active.clear();
        self.speaking.store(false, Ordering::Release);
        self.cursor = self.now();
    }

    /// Session teardown: interrupt plus dropping the clock association.
    pub fn reset(&mut self) {
        self.sink.halt();
        self.tap.clear();
        self.active.clear();
        self.speaking.store(false, Ordering::Release);
        self.clock = None;
        self.cursor = 0.0;
    }

    /// Drop units whose scheduled end has passed. Called on event-loop
    /// ticks so natural completion is observed without a callback from the
    /// output device.
    pub fn poll(&mut self) {
        self.prune_finished();
    }

    /// Number of units still scheduled or playing.
    pub fn active_count(&mut self) -> usize {
        self.prune_finished();
        self.active.len()
    }

    /// `[start, end)` intervals of every active unit, in schedule order.
    pub fn active_intervals(&self) -> Vec<(f64, f64)> {
        self.active.iter().map(|u| (u.start, u.end)).collect()
    }

    fn prune_finished(&mut self) {
        let now = self.now();
        let before = self.active.len();
        self.active.retain(|u| u.end > now);
        if self.active.len() < before {
            trace!(finished = before - self.active.len(), "units completed");
        }
        if self.active.is_empty() {
            self.speaking.store(false, Ordering::Release);
        }
    }
}
