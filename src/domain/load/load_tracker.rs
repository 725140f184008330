use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::domain::sync::lock;
use crate::domain::utils::clock::SharedClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordKind {
    Work,
    Sleep,
}

#[derive(Debug, Clone, Copy)]
struct Record {
    kind: RecordKind,
    nanos: u64,
}

/// How far back [`LoadTracker::get_load`] looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadWindow {
    Trailing(Duration),
    WholeHistory,
}

impl LoadWindow {
    fn cap_nanos(&self) -> u64 {
        match self {
            LoadWindow::Trailing(d) => d.as_nanos().min(u64::MAX as u128) as u64,
            LoadWindow::WholeHistory => u64::MAX,
        }
    }
}

#[derive(Debug)]
struct TrackerState {
    /// Most recent first. Consecutive records always differ in kind.
    records: VecDeque<Record>,
    last_click: u64,
    done: bool,
}

/// Fraction of recent wall-clock time spent working rather than sleeping.
///
/// Time is attributed through clicks: every click closes the running period into the newest record
/// and starts a new period of the clicked kind.
#[derive(Debug)]
pub struct LoadTracker {
    clock: SharedClock,
    state: Mutex<TrackerState>,
}

impl LoadTracker {
    pub fn new(clock: SharedClock) -> Self {
        let now = clock.now_nanos();
        LoadTracker { clock, state: Mutex::new(TrackerState { records: VecDeque::new(), last_click: now, done: false }) }
    }

    pub fn start_work(&self) {
        self.click(RecordKind::Work);
    }

    pub fn start_sleep(&self) {
        self.click(RecordKind::Sleep);
    }

    pub fn end_work(&self) {
        self.flush();
    }

    pub fn end_sleep(&self) {
        self.flush();
    }

    /// Flushes the running period and freezes the tracker. Later calls of any kind are no-ops.
    pub fn done(&self) {
        let now = self.clock.now_nanos();
        let mut state = lock(&self.state);
        if state.done {
            return;
        }
        Self::add_elapsed(&mut state, now);
        state.done = true;
    }

    pub fn is_done(&self) -> bool {
        lock(&self.state).done
    }

    fn click(&self, kind: RecordKind) {
        let now = self.clock.now_nanos();
        let mut state = lock(&self.state);
        if state.done {
            return;
        }

        Self::add_elapsed(&mut state, now);
        if state.records.front().map(|r| r.kind) != Some(kind) {
            state.records.push_front(Record { kind, nanos: 0 });
        }
    }

    fn flush(&self) {
        let now = self.clock.now_nanos();
        let mut state = lock(&self.state);
        if !state.done {
            Self::add_elapsed(&mut state, now);
        }
    }

    fn add_elapsed(state: &mut TrackerState, now: u64) {
        let elapsed = now.saturating_sub(state.last_click);
        if let Some(front) = state.records.front_mut() {
            front.nanos = front.nanos.saturating_add(elapsed);
        }
        state.last_click = now;
    }

    /// Work time over total time within `window`, in `[0, 1]`.
    ///
    /// The still-running period counts towards the newest record's kind. Without any recorded time
    /// the load is 0.
    pub fn get_load(&self, window: LoadWindow) -> f64 {
        let now = self.clock.now_nanos();
        let state = lock(&self.state);

        let Some(newest) = state.records.front() else {
            return 0.0;
        };

        let cap = window.cap_nanos();
        let mut total = 0u64;
        let mut work = 0u64;

        if !state.done {
            total = capped_delta(0, now.saturating_sub(state.last_click), cap);
            if newest.kind == RecordKind::Work {
                work = total;
            }
        }

        for record in &state.records {
            if total >= cap {
                break;
            }
            let delta = capped_delta(total, record.nanos, cap);
            if record.kind == RecordKind::Work {
                work += delta;
            }
            total += delta;
        }

        if total == 0 {
            return 0.0;
        }
        (work as f64 / total as f64).clamp(0.0, 1.0)
    }
}

fn capped_delta(current: u64, desired: u64, cap: u64) -> u64 {
    if current.saturating_add(desired) < cap { desired } else { cap.saturating_sub(current) }
}
