//! Timing-thread internals for the PWM engine.

#![allow(clippy::cast_lossless)]

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use libc::{self, c_long, sched_param, time_t, timespec, CLOCK_MONOTONIC, PR_SET_TIMERSLACK, SCHED_RR};

use crate::gpio::{Level, Line};

// Only call sleep_ns() if we have enough time remaining
const SLEEP_THRESHOLD: i64 = 250_000;
// Reserve some time for busy waiting
const BUSYWAIT_MAX: i64 = 200_000;
// Subtract from the remaining busy wait time to account for get_time_ns() overhead
const BUSYWAIT_REMAINDER: i64 = 100;

// Spawns the timing thread. The thread owns the claimed line for its
// entire lifetime; when it exits, for whatever reason, it drives the pin
// low and releases the line, so a level write can never race the release.
pub(crate) fn spawn<L: Line>(
    mut line: L,
    cycle_micros: u64,
    on_micros: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        // Set the scheduling policy to real-time round robin at the highest
        // priority. This will silently fail if we're not running as root.
        #[cfg(target_env = "gnu")]
        let params = sched_param {
            sched_priority: unsafe { libc::sched_get_priority_max(SCHED_RR) },
        };

        #[cfg(target_env = "musl")]
        let params = sched_param {
            sched_priority: unsafe { libc::sched_get_priority_max(SCHED_RR) },
            sched_ss_low_priority: 0,
            sched_ss_repl_period: timespec {
                tv_sec: 0,
                tv_nsec: 0,
            },
            sched_ss_init_budget: timespec {
                tv_sec: 0,
                tv_nsec: 0,
            },
            sched_ss_max_repl: 0,
        };

        unsafe {
            libc::sched_setscheduler(0, SCHED_RR, &params);
        }

        // Set timer slack to 1 ns (default = 50 µs). This is only relevant
        // if we're unable to set a real-time scheduling policy.
        unsafe {
            libc::prctl(PR_SET_TIMERSLACK, 1);
        }

        let cycle_ns = cycle_micros as i64 * 1_000;

        loop {
            if stop.load(Ordering::Acquire) {
                break;
            }

            // The on phase is re-read every cycle, so a duty change takes
            // effect within at most one cycle, never mid-phase. The off
            // phase is derived from it, and always completes the cycle.
            let on_ns = on_micros.load(Ordering::Acquire) as i64 * 1_000;
            let off_ns = cycle_ns - on_ns;

            // At the duty extremes one of the phases is empty, and the
            // level write for it is skipped. A fully-on or fully-off
            // signal then costs one kernel trap per cycle instead of two.
            if on_ns != 0 && line.write_level(Level::High).is_err() {
                break;
            }
            delay_ns(on_ns);

            if stop.load(Ordering::Acquire) {
                break;
            }

            if off_ns != 0 && line.write_level(Level::Low).is_err() {
                break;
            }
            delay_ns(off_ns);
        }

        // Leave the output in the low state before giving the pin back.
        let _ = line.write_level(Level::Low);
        line.release();
    })
}

// Sleep for the bulk of the delay, while reserving some time for busy
// waiting to compensate for sleep taking longer than needed.
fn delay_ns(ns: i64) {
    if ns <= 0 {
        return;
    }

    let start_ns = get_time_ns();

    if ns >= SLEEP_THRESHOLD {
        sleep_ns(ns - BUSYWAIT_MAX);
    }

    // Busy-wait for the remaining time, minus BUSYWAIT_REMAINDER to
    // account for get_time_ns() overhead.
    loop {
        if (ns - (get_time_ns() - start_ns)) <= BUSYWAIT_REMAINDER {
            break;
        }
    }
}

#[inline(always)]
fn get_time_ns() -> i64 {
    let mut ts = timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };

    unsafe {
        libc::clock_gettime(CLOCK_MONOTONIC, &mut ts);
    }

    (ts.tv_sec as i64 * 1_000_000_000) + ts.tv_nsec as i64
}

#[inline(always)]
fn sleep_ns(ns: i64) {
    let ts = timespec {
        tv_sec: (ns / 1_000_000_000) as time_t,
        tv_nsec: (ns % 1_000_000_000) as c_long,
    };

    unsafe {
        libc::clock_nanosleep(CLOCK_MONOTONIC, 0, &ts, ptr::null_mut());
    }
}
