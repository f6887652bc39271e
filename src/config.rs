//! # EDF OS Configuration
//!
//! Compile-time constants governing the scheduler and system behavior, plus
//! the small runtime [`KernelConfig`] applied once at startup.
//! All limits are fixed at compile time; there is no dynamic allocation.

use crate::profiler::SwitchObserver;
use crate::task::Tick;

/// Maximum number of periodic tasks the system can manage.
/// This bounds the static TCB array, the Ready Set and the profiler slots.
/// The idle context is kept outside of this budget.
pub const MAX_TASKS: usize = 8;

/// SysTick frequency in Hz. One tick is the scheduler's time quantum and
/// the unit of every period and deadline.
pub const TICK_HZ: u32 = 1000;

/// System clock frequency in Hz (default for STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// Processor cycles per scheduler tick. Profiler timestamps on hardware are
/// expressed in these cycles.
pub const CYCLES_PER_TICK: u32 = SYSTEM_CLOCK_HZ / TICK_HZ;

/// Size of the shared stack pool in 32-bit words (16 KiB).
/// Every task stack and the idle stack are carved out of it.
pub const STACK_POOL_WORDS: usize = 4096;

/// Smallest stack a task may request, in words. Must hold the initial
/// exception frame (16 words), the canary and the deepest call chain
/// of a trivial task body.
pub const MIN_STACK_WORDS: usize = 64;

/// Stack handed to the idle context, in words.
pub const IDLE_STACK_WORDS: usize = 64;

/// Fill pattern painted over every stack region on allocation.
pub const STACK_CANARY: u32 = 0xA5A5_A5A5;

/// Number of words at the low end of a region that must keep the canary.
/// A clobbered word there means the task ran off the end of its stack.
pub const CANARY_WORDS: usize = 4;

/// What `wait_for_next_period` does when the next activation is already
/// in the past.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrunPolicy {
    /// Release the missed activation immediately. The reference time still
    /// advances by exactly one period, so the long-run rate is preserved.
    CatchUp,
    /// Drop the activations that are already in the past and wait for the
    /// next point of the task's activation grid.
    SkipMissed,
}

/// Hook invoked from the tick interrupt with the new tick count.
pub type TickHook = fn(Tick);

/// Runtime kernel configuration, applied by `kernel::init`.
#[derive(Debug, Clone, Copy)]
pub struct KernelConfig {
    /// Recovery policy for late activations.
    pub overrun_policy: OverrunPolicy,
    /// Called on every switch-in and switch-out (e.g. to toggle debug pins).
    pub switch_observer: Option<SwitchObserver>,
    /// Called on every tick, inside the tick interrupt.
    pub tick_hook: Option<TickHook>,
}

impl KernelConfig {
    pub const fn new() -> Self {
        Self {
            overrun_policy: OverrunPolicy::CatchUp,
            switch_observer: None,
            tick_hook: None,
        }
    }

    pub const fn with_overrun_policy(mut self, policy: OverrunPolicy) -> Self {
        self.overrun_policy = policy;
        self
    }

    pub const fn with_switch_observer(mut self, observer: SwitchObserver) -> Self {
        self.switch_observer = Some(observer);
        self
    }

    pub const fn with_tick_hook(mut self, hook: TickHook) -> Self {
        self.tick_hook = Some(hook);
        self
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}
