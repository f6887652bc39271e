//! # EDF OS Example Firmware
//!
//! Runs a small periodic workload under the EDF scheduler:
//!
//! | Task | Tag | Period | Load | Behavior |
//! |------|-----|--------|------|----------|
//! | `sampler_task` | 1 | 10 ms | 2 ms | Fixed synthetic work |
//! | `transmitter_task` | 2 | 50 ms | 5 ms | Formats a message into the mailbox |
//! | `receiver_task` | 3 | 50 ms | 1 ms | Drains the mailbox |
//! | `background_task` | 4 | 100 ms | 8 ms | Long synthetic work |
//! | `monitor_task` | 5 | 1000 ms | logging | Reports CPU load and overruns |
//!
//! Utilization is about 0.4, so no deadline should ever be missed and the
//! monitor should report a load close to 40 %.
//!
//! Built for the host, the binary runs the same task set through the
//! scheduling simulation and prints the resulting report.

#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_std)]
#![cfg_attr(all(target_arch = "arm", target_os = "none"), no_main)]

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod firmware {
    use core::fmt::Write;
    use core::sync::atomic::{AtomicU32, Ordering};

    use cortex_m_rt::entry;
    use heapless::String;
    use log::{error, info, warn, LevelFilter};
    use panic_halt as _;

    use edfos::arch::cortex_m4;
    use edfos::config::{KernelConfig, CYCLES_PER_TICK};
    use edfos::kernel;
    use edfos::logger;
    use edfos::mailbox::Mailbox;
    use edfos::task::{TaskEntry, TaskTag, Tick};

    type Message = String<20>;

    static LINK: Mailbox<Message> = Mailbox::new();
    static REJECTED: AtomicU32 = AtomicU32::new(0);
    static RECEIVED: AtomicU32 = AtomicU32::new(0);

    /// Keep the CPU busy for about `ticks` scheduler ticks.
    fn burn(ticks: u32) {
        cortex_m::asm::delay(ticks * CYCLES_PER_TICK);
    }

    // -----------------------------------------------------------------------
    // Task entry points
    // -----------------------------------------------------------------------

    extern "C" fn sampler_task() -> ! {
        loop {
            burn(2);
            kernel::wait_for_next_period();
        }
    }

    extern "C" fn transmitter_task() -> ! {
        let mut sequence: u32 = 0;
        loop {
            let mut msg = Message::new();
            let _ = write!(msg, "sample {}", sequence);
            if !LINK.try_send(msg) {
                REJECTED.fetch_add(1, Ordering::Relaxed);
            }
            sequence = sequence.wrapping_add(1);
            burn(5);
            kernel::wait_for_next_period();
        }
    }

    extern "C" fn receiver_task() -> ! {
        loop {
            if LINK.try_receive().is_some() {
                RECEIVED.fetch_add(1, Ordering::Relaxed);
            }
            burn(1);
            kernel::wait_for_next_period();
        }
    }

    extern "C" fn background_task() -> ! {
        loop {
            burn(8);
            kernel::wait_for_next_period();
        }
    }

    extern "C" fn monitor_task() -> ! {
        loop {
            info!(
                "t={} load={}% overruns={} rx={} rejected={}",
                kernel::current_time(),
                kernel::cpu_load(),
                kernel::deadline_overruns(),
                RECEIVED.load(Ordering::Relaxed),
                REJECTED.load(Ordering::Relaxed),
            );
            if let Some(free) = kernel::stack_high_water_mark(TaskTag(2)) {
                if free < 32 {
                    warn!("transmitter stack nearly exhausted: {} words free", free);
                }
            }
            kernel::wait_for_next_period();
        }
    }

    const TASKS: [(TaskEntry, usize, Tick, TaskTag); 5] = [
        (sampler_task, 128, 10, TaskTag(1)),
        (transmitter_task, 256, 50, TaskTag(2)),
        (receiver_task, 128, 50, TaskTag(3)),
        (background_task, 128, 100, TaskTag(4)),
        (monitor_task, 512, 1000, TaskTag(5)),
    ];

    // -----------------------------------------------------------------------
    // Main entry point
    // -----------------------------------------------------------------------

    /// Firmware entry point. Initializes the kernel, creates tasks, and
    /// starts the EDF scheduler. Does not return.
    #[entry]
    fn main() -> ! {
        let _ = logger::init(LevelFilter::Info);

        if let Err(err) = kernel::init(KernelConfig::new()) {
            error!("kernel init failed: {}", err);
        }

        for (entry, stack_words, period, tag) in TASKS {
            if let Err(err) = kernel::create_periodic(entry, stack_words, period, tag) {
                error!("task {} not created: {}", tag, err);
            }
        }

        match cortex_m::Peripherals::take() {
            Some(cp) => kernel::start(cp),
            None => {
                error!("core peripherals already taken");
                cortex_m4::halt()
            }
        }
    }
}

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    use edfos::config::KernelConfig;
    use edfos::sim::{CostModel, Simulation};
    use edfos::task::TaskTag;

    const TICKS: u64 = 1000;

    let mut sim = Simulation::new(KernelConfig::new())?;
    sim.add_task(TaskTag(1), 10, CostModel::Fixed(2))?;
    sim.add_task(TaskTag(2), 50, CostModel::Fixed(5))?;
    sim.add_task(TaskTag(3), 50, CostModel::Fixed(1))?;
    sim.add_task(TaskTag(4), 100, CostModel::Fixed(8))?;
    sim.start()?;
    sim.run(TICKS)?;

    let sched = sim.scheduler();
    println!(
        "{} ticks: cpu load {}.{:02}%, {} context switches, {} idle ticks",
        sched.current_time(),
        sched.cpu_load_hundredths() / 100,
        sched.cpu_load_hundredths() % 100,
        sched.context_switches(),
        sim.idle_ticks(),
    );
    println!("tag  period  jobs  done  overruns  worst  busy");
    for tcb in sched.tasks() {
        let s = tcb.stats;
        println!(
            "{:<4} {:>6}  {:>4}  {:>4}  {:>8}  {:>5}  {:>4}",
            tcb.tag.to_string(),
            tcb.period,
            s.activations,
            s.completions,
            s.deadline_overruns,
            s.worst_response,
            sched.per_task_busy_time(tcb.tag).unwrap_or(0),
        );
    }
    Ok(())
}
