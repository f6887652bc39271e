//! # Execution-Time Profiler
//!
//! Accounts CPU time per task from the switch events of the scheduler.
//!
//! Every switch-out adds `now - switch_in_time` to the outgoing task's busy
//! time; every switch-in stamps `switch_in_time`. After each event the
//! aggregate load is recomputed as
//!
//! ```text
//! cpu_load = 100 * Σ busy / (now - epoch)
//! ```
//!
//! The handlers run inside the context switch with interrupts masked, so
//! they only do constant-time integer arithmetic on fixed-size counters.
//! Hardware debug signaling (toggling a pin per task, say) is not done here
//! but through the optional [`SwitchObserver`].

use crate::config::MAX_TASKS;
use crate::task::{TaskTag, Tick, Timestamp};

/// A switch-in or switch-out, as reported to the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchEvent {
    In { tag: TaskTag, at: Timestamp },
    Out { tag: TaskTag, at: Timestamp },
}

/// Callback invoked on every switch event, with interrupts masked.
pub type SwitchObserver = fn(SwitchEvent);

/// Counters of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileSlot {
    pub tag: TaskTag,
    pub switch_in_time: Timestamp,
    pub switch_out_time: Timestamp,
    pub busy: Timestamp,
    /// Number of times the task was switched in.
    pub dispatches: u32,
    running: bool,
}

impl ProfileSlot {
    const EMPTY: Self = Self {
        tag: TaskTag(0),
        switch_in_time: 0,
        switch_out_time: 0,
        busy: 0,
        dispatches: 0,
        running: false,
    };
}

/// Hundredths of a percent in 100 %.
const FULL_LOAD: u32 = 10_000;

/// Profiler time from a down-counting tick timer.
///
/// `current` counts from `reload` down to 0 once per tick. `wrap_pending`
/// means the counter already wrapped but the tick has not been counted yet.
/// The caller must read `current` and `wrap_pending` consistently.
pub fn cycle_timestamp(tick: Tick, reload: u32, current: u32, wrap_pending: bool) -> Timestamp {
    let tick = if wrap_pending { tick + 1 } else { tick };
    let elapsed = reload.saturating_sub(current);
    tick * (reload as Timestamp + 1) + elapsed as Timestamp
}

pub struct Profiler {
    slots: [ProfileSlot; MAX_TASKS],
    slot_count: usize,
    epoch: Timestamp,
    system_time: Timestamp,
    total_busy: Timestamp,
    /// CPU load in hundredths of a percent.
    load: u32,
    observer: Option<SwitchObserver>,
}

impl Profiler {
    pub const fn new() -> Self {
        Self {
            slots: [ProfileSlot::EMPTY; MAX_TASKS],
            slot_count: 0,
            epoch: 0,
            system_time: 0,
            total_busy: 0,
            load: 0,
            observer: None,
        }
    }

    pub fn set_observer(&mut self, observer: Option<SwitchObserver>) {
        self.observer = observer;
    }

    /// Claim a slot for `tag`. Returns its index, or `None` when full.
    pub fn register(&mut self, tag: TaskTag) -> Option<usize> {
        if self.slot_count >= MAX_TASKS {
            return None;
        }
        let slot = self.slot_count;
        self.slots[slot] = ProfileSlot { tag, ..ProfileSlot::EMPTY };
        self.slot_count += 1;
        Some(slot)
    }

    /// Slot index of `tag`.
    pub fn slot_of(&self, tag: TaskTag) -> Option<usize> {
        self.slots[..self.slot_count].iter().position(|s| s.tag == tag)
    }

    pub fn slot(&self, tag: TaskTag) -> Option<&ProfileSlot> {
        self.slot_of(tag).map(|i| &self.slots[i])
    }

    /// Clear every counter and measure from `now` on.
    pub fn reset(&mut self, now: Timestamp) {
        for slot in &mut self.slots[..self.slot_count] {
            let running = slot.running;
            *slot = ProfileSlot { tag: slot.tag, ..ProfileSlot::EMPTY };
            if running {
                slot.running = true;
                slot.switch_in_time = now;
            }
        }
        self.epoch = now;
        self.system_time = 0;
        self.total_busy = 0;
        self.load = 0;
    }

    pub fn switch_in(&mut self, slot: usize, now: Timestamp) {
        let s = &mut self.slots[slot];
        s.switch_in_time = now;
        s.dispatches += 1;
        s.running = true;
        if let Some(observer) = self.observer {
            observer(SwitchEvent::In { tag: s.tag, at: now });
        }
    }

    pub fn switch_out(&mut self, slot: usize, now: Timestamp) {
        let s = &mut self.slots[slot];
        if s.running {
            let ran = now.saturating_sub(s.switch_in_time);
            s.busy += ran;
            self.total_busy += ran;
        }
        s.switch_out_time = now;
        s.running = false;
        if let Some(observer) = self.observer {
            observer(SwitchEvent::Out { tag: s.tag, at: now });
        }
    }

    /// Advance the system time to `now` and recompute the load.
    pub fn update(&mut self, now: Timestamp) {
        self.system_time = now.saturating_sub(self.epoch);
        self.load = if self.system_time == 0 {
            0
        } else {
            let load = self.total_busy * FULL_LOAD as u64 / self.system_time;
            load.min(FULL_LOAD as u64) as u32
        };
    }

    /// Aggregate CPU load in whole percent.
    pub fn cpu_load(&self) -> u8 {
        (self.load / 100) as u8
    }

    /// Aggregate CPU load in hundredths of a percent.
    pub fn cpu_load_hundredths(&self) -> u32 {
        self.load
    }

    /// Busy time accumulated by `tag`, excluding the interval in progress.
    pub fn busy_time(&self, tag: TaskTag) -> Option<Timestamp> {
        self.slot(tag).map(|s| s.busy)
    }

    /// Sum of all per-task busy times.
    pub fn total_busy(&self) -> Timestamp {
        self.total_busy
    }

    /// Time since the epoch as of the last update.
    pub fn system_time(&self) -> Timestamp {
        self.system_time
    }

    pub fn slots(&self) -> &[ProfileSlot] {
        &self.slots[..self.slot_count]
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_busy_time_accumulates_per_tag() {
        let mut p = Profiler::new();
        let a = p.register(TaskTag(1)).unwrap();
        let b = p.register(TaskTag(2)).unwrap();

        p.switch_in(a, 0);
        p.switch_out(a, 3);
        p.switch_in(b, 3);
        p.switch_out(b, 8);
        p.switch_in(a, 10);
        p.switch_out(a, 12);
        p.update(20);

        assert_eq!(p.busy_time(TaskTag(1)), Some(5));
        assert_eq!(p.busy_time(TaskTag(2)), Some(5));
        assert_eq!(p.busy_time(TaskTag(9)), None);
        assert_eq!(p.total_busy(), 10);
        assert_eq!(p.system_time(), 20);
        assert_eq!(p.cpu_load(), 50);
        assert_eq!(p.slot(TaskTag(1)).unwrap().dispatches, 2);
    }

    #[test]
    fn test_load_is_fixed_point_and_capped() {
        let mut p = Profiler::new();
        let a = p.register(TaskTag(1)).unwrap();
        p.switch_in(a, 0);
        p.switch_out(a, 1);
        p.update(3);
        assert_eq!(p.cpu_load_hundredths(), 3333);
        assert_eq!(p.cpu_load(), 33);

        // A timestamp that went backwards never pushes the load above 100 %.
        p.switch_in(a, 3);
        p.switch_out(a, 9);
        p.update(5);
        assert_eq!(p.cpu_load(), 100);
    }

    #[test]
    fn test_reset_restarts_epoch() {
        let mut p = Profiler::new();
        let a = p.register(TaskTag(4)).unwrap();
        p.switch_in(a, 0);
        p.switch_out(a, 50);
        p.switch_in(a, 60);
        p.reset(100);
        assert_eq!(p.total_busy(), 0);
        assert_eq!(p.busy_time(TaskTag(4)), Some(0));

        // The running task is measured from the reset on.
        p.switch_out(a, 110);
        p.update(120);
        assert_eq!(p.busy_time(TaskTag(4)), Some(10));
        assert_eq!(p.system_time(), 20);
    }

    #[test]
    fn test_slots_are_bounded() {
        let mut p = Profiler::new();
        for t in 0..MAX_TASKS {
            assert_eq!(p.register(TaskTag(t as u8)), Some(t));
        }
        assert_eq!(p.register(TaskTag(200)), None);
    }

    #[test]
    fn test_cycle_timestamp_is_monotonic_across_wrap() {
        const RELOAD: u32 = 15_999;
        let before_wrap = cycle_timestamp(7, RELOAD, 0, false);
        let after_wrap = cycle_timestamp(7, RELOAD, RELOAD, true);
        let after_tick = cycle_timestamp(8, RELOAD, RELOAD - 10, false);

        assert_eq!(before_wrap, 7 * 16_000 + RELOAD as Timestamp);
        assert_eq!(after_wrap, 8 * 16_000);
        assert!(before_wrap < after_wrap);
        assert!(after_wrap < after_tick);
    }

    static EVENTS: AtomicU32 = AtomicU32::new(0);

    fn count_events(event: SwitchEvent) {
        let (SwitchEvent::In { tag, .. } | SwitchEvent::Out { tag, .. }) = event;
        assert_eq!(tag, TaskTag(7));
        EVENTS.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn test_observer_sees_every_event() {
        let mut p = Profiler::new();
        p.set_observer(Some(count_events));
        let a = p.register(TaskTag(7)).unwrap();
        p.switch_in(a, 0);
        p.switch_out(a, 1);
        p.switch_in(a, 2);
        assert_eq!(EVENTS.load(Ordering::Relaxed), 3);
    }
}
