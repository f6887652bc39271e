//! # Host Simulation
//!
//! Drives the real [`Scheduler`] tick by tick on the host, with synthetic
//! per-job costs standing in for task bodies. One step is one tick:
//!
//! ```text
//! step(t):
//!   1. newly released jobs get their cost from the task's CostModel
//!   2. the running task consumes one tick of work; if its job is done it
//!      calls wait_for_next_period (at time t)
//!   3. tick()                  -> time t+1, releases, overrun detection
//!   4. reschedule(t+1)         if a switch was requested
//! ```
//!
//! Profiler timestamps are ticks, so busy time and load are exact.

use heapless::Vec;

use crate::config::{KernelConfig, MAX_TASKS, MIN_STACK_WORDS};
use crate::error::{Fault, KernelError, Resource};
use crate::scheduler::{Scheduler, Selection};
use crate::task::{TaskControlBlock, TaskRef, TaskState, TaskTag, Tick};

/// Execution time of successive jobs of one task, in ticks. Every job
/// consumes at least one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostModel {
    Fixed(Tick),
    /// Cycles through the given costs.
    Sequence(&'static [Tick]),
    /// `base + r % (spread + 1)` with a deterministic xorshift `r`.
    Jitter { base: Tick, spread: Tick, seed: u32 },
}

/// Workload bookkeeping of one simulated task.
#[derive(Debug, Clone, Copy)]
pub struct SimTask {
    pub tag: TaskTag,
    pub period: Tick,
    pub model: CostModel,
    /// Work left in the current job.
    pub remaining: Tick,
    /// Ticks of work executed so far.
    pub executed: Tick,
    /// Activations whose reference time fell off the `origin + k * period` grid.
    pub off_grid: u32,
    origin: Tick,
    seen: u32,
    jobs: u32,
    rng: u32,
}

impl SimTask {
    fn new(tag: TaskTag, period: Tick, model: CostModel, origin: Tick) -> Self {
        let seed = match model {
            CostModel::Jitter { seed, .. } => seed,
            _ => 0,
        };
        Self {
            tag,
            period,
            model,
            remaining: 0,
            executed: 0,
            off_grid: 0,
            origin,
            seen: 0,
            jobs: 0,
            rng: seed | 1,
        }
    }

    /// Pick up activations released since the last step.
    fn observe(&mut self, tcb: &TaskControlBlock) {
        while self.seen < tcb.stats.activations {
            self.seen += 1;
            self.remaining = self.next_cost();
            if (tcb.last_wake - self.origin) % self.period != 0 {
                self.off_grid += 1;
            }
        }
    }

    fn next_cost(&mut self) -> Tick {
        let cost = match self.model {
            CostModel::Fixed(cost) => cost,
            CostModel::Sequence(costs) if costs.is_empty() => 1,
            CostModel::Sequence(costs) => costs[self.jobs as usize % costs.len()],
            CostModel::Jitter { base, spread, .. } => base + self.next_random() as Tick % (spread + 1),
        };
        self.jobs += 1;
        cost.max(1)
    }

    fn next_random(&mut self) -> u32 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng = x;
        x
    }
}

pub struct Simulation {
    scheduler: Scheduler,
    tasks: Vec<SimTask, MAX_TASKS>,
    idle_ticks: Tick,
}

impl Simulation {
    pub fn new(config: KernelConfig) -> Result<Self, KernelError> {
        let mut scheduler = Scheduler::new();
        scheduler.configure(config)?;
        Ok(Self {
            scheduler,
            tasks: Vec::new(),
            idle_ticks: 0,
        })
    }

    pub fn add_task(&mut self, tag: TaskTag, period: Tick, model: CostModel) -> Result<TaskRef, KernelError> {
        let task = self
            .scheduler
            .create_periodic(sim_task, MIN_STACK_WORDS, period, tag)?;
        let origin = self.scheduler.current_time();
        self.tasks
            .push(SimTask::new(tag, period, model, origin))
            .map_err(|_| KernelError::ResourceExhausted(Resource::TaskSlots))?;
        Ok(task)
    }

    pub fn start(&mut self) -> Result<(), KernelError> {
        self.scheduler.start(sim_task, self.scheduler.current_time())?;
        Ok(())
    }

    /// Advance the simulation by one tick.
    pub fn step(&mut self) -> Result<(), Fault> {
        for (i, task) in self.tasks.iter_mut().enumerate() {
            if let Some(tcb) = self.scheduler.task_at(i) {
                task.observe(tcb);
            }
        }

        match self.scheduler.current() {
            Selection::Task(i) if self.is_running(i) => {
                let task = &mut self.tasks[i];
                task.remaining = task.remaining.saturating_sub(1);
                task.executed += 1;
                if task.remaining == 0 {
                    self.scheduler.wait_for_next_period();
                }
            }
            _ => self.idle_ticks += 1,
        }

        if self.scheduler.tick() {
            let now = self.scheduler.current_time();
            self.scheduler.reschedule(now)?;
        }
        Ok(())
    }

    pub fn run(&mut self, ticks: Tick) -> Result<(), Fault> {
        for _ in 0..ticks {
            self.step()?;
        }
        Ok(())
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    /// Ticks during which the idle context held the CPU.
    pub fn idle_ticks(&self) -> Tick {
        self.idle_ticks
    }

    pub fn task(&self, tag: TaskTag) -> Option<&SimTask> {
        self.tasks.iter().find(|t| t.tag == tag)
    }

    pub fn tasks(&self) -> &[SimTask] {
        &self.tasks
    }

    fn is_running(&self, index: usize) -> bool {
        self.scheduler
            .task_at(index)
            .is_some_and(|t| t.state == TaskState::Running)
    }
}

/// Entry point planted in simulated frames. Never executed.
extern "C" fn sim_task() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OverrunPolicy;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn simulation(tasks: &[(u8, Tick, CostModel)], policy: OverrunPolicy) -> Simulation {
        let mut sim = Simulation::new(KernelConfig::new().with_overrun_policy(policy)).unwrap();
        for &(tag, period, model) in tasks {
            sim.add_task(TaskTag(tag), period, model).unwrap();
        }
        sim.start().unwrap();
        sim
    }

    fn stats(sim: &Simulation, tag: u8) -> crate::task::TaskStats {
        sim.scheduler().task_stats(TaskTag(tag)).unwrap()
    }

    #[test]
    fn test_edf_order_holds_every_tick() {
        let mut sim = simulation(
            &[
                (1, 10, CostModel::Fixed(2)),
                (2, 15, CostModel::Jitter { base: 1, spread: 4, seed: 7 }),
                (3, 40, CostModel::Sequence(&[3, 9, 5])),
            ],
            OverrunPolicy::CatchUp,
        );
        for _ in 0..600 {
            sim.step().unwrap();
            assert!(sim.scheduler().check_edf_order());
        }
    }

    #[test]
    fn test_no_drift_under_jitter() {
        let mut sim = simulation(
            &[
                (1, 10, CostModel::Fixed(3)),
                (2, 7, CostModel::Jitter { base: 1, spread: 3, seed: 0x1234_5678 }),
            ],
            OverrunPolicy::CatchUp,
        );
        sim.run(1000).unwrap();

        let a = sim.scheduler().task(TaskTag(1)).unwrap();
        assert_eq!(a.stats.activations, 101);
        assert_eq!(a.last_wake, 1000);
        let b = sim.scheduler().task(TaskTag(2)).unwrap();
        assert_eq!(b.stats.activations, 143);
        assert_eq!(b.last_wake, 994);

        assert_eq!(sim.task(TaskTag(1)).unwrap().off_grid, 0);
        assert_eq!(sim.task(TaskTag(2)).unwrap().off_grid, 0);
        assert_eq!(sim.scheduler().deadline_overruns(), 0);
    }

    #[test]
    fn test_full_utilization_is_schedulable() {
        let mut sim = simulation(
            &[(1, 4, CostModel::Fixed(2)), (2, 8, CostModel::Fixed(4))],
            OverrunPolicy::CatchUp,
        );
        sim.run(800).unwrap();
        assert_eq!(sim.scheduler().deadline_overruns(), 0);
        assert_eq!(sim.idle_ticks(), 0);
        assert_eq!(sim.scheduler().cpu_load(), 100);
    }

    #[test]
    fn test_overload_counts_overruns_with_catch_up() {
        let mut sim = simulation(&[(1, 10, CostModel::Fixed(12))], OverrunPolicy::CatchUp);
        sim.run(100).unwrap();

        let s = stats(&sim, 1);
        assert_eq!(s.activations, 9);
        assert_eq!(s.completions, 8);
        assert_eq!(s.deadline_overruns, 9);
        assert_eq!(s.skipped_activations, 0);
        // Catch-up keeps the reference on the grid.
        assert_eq!(sim.task(TaskTag(1)).unwrap().off_grid, 0);
    }

    #[test]
    fn test_overload_skips_missed_activations() {
        let mut sim = simulation(&[(1, 10, CostModel::Fixed(12))], OverrunPolicy::SkipMissed);
        sim.run(100).unwrap();

        // Jobs released at 0, 20, .., 80 each run 12 ticks and drop the next slot.
        let s = stats(&sim, 1);
        assert_eq!(s.activations, 6);
        assert_eq!(s.completions, 5);
        assert_eq!(s.deadline_overruns, 5);
        assert_eq!(s.skipped_activations, 5);
        assert_eq!(sim.task(TaskTag(1)).unwrap().off_grid, 0);
        assert_eq!(sim.scheduler().task(TaskTag(1)).unwrap().last_wake, 100);
    }

    #[test]
    fn test_profiler_conservation() {
        let mut sim = simulation(
            &[
                (1, 20, CostModel::Jitter { base: 2, spread: 6, seed: 99 }),
                (2, 30, CostModel::Fixed(5)),
            ],
            OverrunPolicy::CatchUp,
        );
        for _ in 0..500 {
            sim.step().unwrap();
            let p = sim.scheduler().profiler();
            assert!(p.total_busy() <= p.system_time());
            assert!(sim.scheduler().cpu_load() <= 100);
            let sum: u64 = p.slots().iter().map(|s| s.busy).sum();
            assert_eq!(sum, p.total_busy());
        }
    }

    #[test]
    fn test_reference_scenario_load() {
        let mut sim = simulation(
            &[
                (1, 10, CostModel::Fixed(2)),
                (2, 50, CostModel::Fixed(5)),
                (3, 100, CostModel::Fixed(8)),
            ],
            OverrunPolicy::CatchUp,
        );
        sim.run(1000).unwrap();

        let sched = sim.scheduler();
        assert_eq!(sched.deadline_overruns(), 0);
        assert!((35..=40).contains(&sched.cpu_load()));
        assert_eq!(sched.per_task_busy_time(TaskTag(1)), Some(200));
        assert_eq!(sched.per_task_busy_time(TaskTag(2)), Some(100));
        assert_eq!(sched.per_task_busy_time(TaskTag(3)), Some(80));
    }

    #[test]
    fn test_short_period_variant_is_feasible() {
        let mut sim = simulation(
            &[
                (1, 5, CostModel::Fixed(2)),
                (2, 50, CostModel::Fixed(5)),
                (3, 100, CostModel::Fixed(8)),
            ],
            OverrunPolicy::CatchUp,
        );
        sim.run(1000).unwrap();
        assert_eq!(sim.scheduler().deadline_overruns(), 0);
    }

    #[test]
    fn test_overload_misses_cascade_from_tie() {
        let mut sim = simulation(
            &[
                (1, 5, CostModel::Fixed(5)),
                (2, 50, CostModel::Fixed(5)),
                (3, 100, CostModel::Fixed(8)),
            ],
            OverrunPolicy::CatchUp,
        );
        sim.run(49).unwrap();
        assert_eq!(sim.scheduler().deadline_overruns(), 0);

        // Tag 1's job due at 50 wins the tie, so tag 2 misses first.
        sim.step().unwrap();
        assert_eq!(sim.scheduler().deadline_overruns(), 1);
        assert_eq!(stats(&sim, 2).deadline_overruns, 1);

        // Tag 2 then runs late and pushes every later tag 1 job past its deadline.
        sim.run(50).unwrap();
        assert_eq!(stats(&sim, 1).deadline_overruns, 10);
        assert_eq!(stats(&sim, 2).deadline_overruns, 2);
        assert_eq!(stats(&sim, 3).deadline_overruns, 1);
    }

    static HOOK_TICKS: AtomicU64 = AtomicU64::new(0);

    fn count_tick(now: Tick) {
        HOOK_TICKS.store(now, Ordering::Relaxed);
    }

    #[test]
    fn test_tick_hook_sees_every_tick() {
        let mut sim = Simulation::new(KernelConfig::new().with_tick_hook(count_tick)).unwrap();
        sim.add_task(TaskTag(1), 10, CostModel::Fixed(1)).unwrap();
        sim.start().unwrap();
        sim.run(25).unwrap();
        assert_eq!(HOOK_TICKS.load(Ordering::Relaxed), 25);
        assert_eq!(sim.idle_ticks(), 22);
    }

    #[test]
    fn test_jitter_is_deterministic_and_bounded() {
        let model = CostModel::Jitter { base: 1, spread: 3, seed: 42 };
        let mut a = SimTask::new(TaskTag(1), 10, model, 0);
        let mut b = SimTask::new(TaskTag(1), 10, model, 0);
        for _ in 0..100 {
            let cost = a.next_cost();
            assert_eq!(cost, b.next_cost());
            assert!((1..=4).contains(&cost));
        }
    }
}
