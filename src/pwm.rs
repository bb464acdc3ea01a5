//! Software PWM engine.
//!
//! A [`PwmChannel`] owns a single GPIO pin and emulates a PWM signal on
//! it by toggling the pin's output state on a dedicated thread. The cycle
//! length is fixed when the channel is started; the duty cycle can be
//! changed at any time while the channel is running, and takes effect
//! within at most one full cycle.
//!
//! The timing thread re-reads the duty settings at every cycle and checks
//! for a stop request at both phase boundaries, so a long on phase never
//! delays shutdown by an additional off phase. At the duty extremes (0%
//! and 100%) the redundant level write is skipped, halving the syscall
//! overhead for a signal that's fully off or fully on.
//!
//! Software-based PWM is inherently inaccurate on a multi-threaded OS due
//! to scheduling/preemption. The timing thread combines sleep with short
//! busy-waits to reduce jitter, and tries to elevate itself to a
//! real-time scheduling policy, which silently fails without root.

use std::error;
use std::fmt;
use std::io;
use std::result;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crate::gpio::{Backend, Sysfs};

mod timing;

/// Errors that can occur when starting a PWM channel.
#[derive(Debug)]
pub enum Error {
    /// Claiming the GPIO pin failed.
    ///
    /// The pin couldn't be exported, switched to output mode, or opened
    /// for writing. Carries the underlying OS error. Common causes are
    /// insufficient permissions (the user isn't a member of the `gpio`
    /// group), a pin that's already in use elsewhere, or a pin number
    /// that doesn't exist on this board.
    Hardware(io::Error),
    /// The cycle length is zero.
    ZeroCycle,
    /// The channel is already running.
    ///
    /// Call [`PwmChannel::stop`] first to change the cycle length.
    AlreadyRunning,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::Hardware(ref err) => write!(f, "Can't set up pin: {}", err),
            Error::ZeroCycle => write!(f, "Cycle length must be greater than zero"),
            Error::AlreadyRunning => write!(f, "Channel is already running"),
        }
    }
}

impl error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Hardware(err)
    }
}

/// Result type returned from methods that can have `softpwm::pwm::Error`s.
pub type Result<T> = result::Result<T, Error>;

// State held while the timing thread is active. on_micros is the only
// mutable value shared with the thread besides the stop flag; the off
// phase is always derived as cycle_micros - on_micros, so the loop can
// never observe an on/off pair that doesn't sum to the cycle length.
struct Running {
    cycle_micros: u64,
    on_micros: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

/// A software PWM channel bound to a single GPIO pin.
///
/// The channel is created idle, with no hardware claimed. [`start`]
/// claims the pin through the channel's [`Backend`] and spawns the timing
/// thread; [`stop`] halts the thread and releases the pin. Dropping a
/// running channel stops it.
///
/// [`start`]: #method.start
/// [`stop`]: #method.stop
#[derive(Debug)]
pub struct PwmChannel<B: Backend = Sysfs> {
    pin: u8,
    backend: B,
    running: Option<Running>,
}

impl PwmChannel<Sysfs> {
    /// Constructs an idle channel for the specified BCM GPIO pin, using
    /// the sysfs GPIO interface.
    pub fn new(pin: u8) -> PwmChannel<Sysfs> {
        PwmChannel::with_backend(pin, Sysfs)
    }
}

impl<B: Backend> PwmChannel<B> {
    /// Constructs an idle channel for the specified pin on a custom
    /// GPIO backend.
    pub fn with_backend(pin: u8, backend: B) -> PwmChannel<B> {
        PwmChannel {
            pin,
            backend,
            running: None,
        }
    }

    /// Returns the GPIO pin number this channel is bound to.
    pub fn pin(&self) -> u8 {
        self.pin
    }

    /// Returns `true` while the timing thread is active.
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Returns the cycle length in microseconds, or `None` while the
    /// channel is idle.
    pub fn cycle_micros(&self) -> Option<u64> {
        self.running.as_ref().map(|r| r.cycle_micros)
    }

    /// Returns the current `(on, off)` phase lengths in microseconds, or
    /// `None` while the channel is idle. The two always sum to the cycle
    /// length.
    pub fn duty_micros(&self) -> Option<(u64, u64)> {
        self.running.as_ref().map(|r| {
            let on = r.on_micros.load(Ordering::Acquire);
            (on, r.cycle_micros - on)
        })
    }

    /// Claims the pin and starts the timing thread with the specified
    /// cycle length in microseconds.
    ///
    /// The duty cycle starts out at 0.0 (fully off); use [`set_duty`] to
    /// raise it. `start` returns as soon as the thread is launched,
    /// without waiting for the first cycle to complete.
    ///
    /// Returns [`Error::ZeroCycle`] if `cycle_micros` is zero, and
    /// [`Error::AlreadyRunning`] if the channel is already started. If
    /// claiming the pin fails, [`Error::Hardware`] is returned and the
    /// channel stays idle; `start` can be retried after the cause is
    /// resolved.
    ///
    /// [`set_duty`]: #method.set_duty
    pub fn start(&mut self, cycle_micros: u64) -> Result<()> {
        if self.running.is_some() {
            return Err(Error::AlreadyRunning);
        }

        if cycle_micros == 0 {
            return Err(Error::ZeroCycle);
        }

        let line = self.backend.claim(self.pin)?;

        let on_micros = Arc::new(AtomicU64::new(0));
        let stop = Arc::new(AtomicBool::new(false));

        let thread = timing::spawn(line, cycle_micros, on_micros.clone(), stop.clone());

        self.running = Some(Running {
            cycle_micros,
            on_micros,
            stop,
            thread: Some(thread),
        });

        Ok(())
    }

    /// Sets the duty cycle as a fraction between 0.0 (fully off) and 1.0
    /// (fully on).
    ///
    /// Values outside that range are clamped. The timing thread picks up
    /// the new setting at the start of its next cycle, so the change
    /// takes effect within at most one full cycle length.
    ///
    /// Silently ignored while the channel is idle.
    pub fn set_duty(&mut self, fraction: f64) {
        if let Some(ref running) = self.running {
            let fraction = fraction.max(0.0).min(1.0);
            let on = (running.cycle_micros as f64 * fraction).round() as u64;
            running.on_micros.store(on, Ordering::Release);
        }
    }

    /// Stops the timing thread and releases the pin.
    ///
    /// Blocks until the thread has observed the stop request, driven the
    /// pin low, and given the pin back to the OS, so no write can race
    /// the release. Calling `stop` on an idle channel is a no-op.
    pub fn stop(&mut self) {
        if let Some(mut running) = self.running.take() {
            running.stop.store(true, Ordering::Release);

            if let Some(thread) = running.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

impl<B: Backend> Drop for PwmChannel<B> {
    fn drop(&mut self) {
        // Don't wait for the timing thread to exit if the main thread is
        // panicking, because we could potentially block indefinitely
        // while unwinding if the timing thread doesn't respond to the
        // stop request for some reason.
        if !thread::panicking() {
            self.stop();
        }
    }
}

impl fmt::Debug for Running {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Running")
            .field("cycle_micros", &self.cycle_micros)
            .field("on_micros", &self.on_micros)
            .field("stop", &self.stop)
            .field("thread", &format_args!("{{ .. }}"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use super::{Error, PwmChannel};
    use crate::gpio::{Backend, Level, Line};

    #[derive(Default)]
    struct Recorder {
        claims: AtomicUsize,
        releases: AtomicUsize,
        writes: Mutex<Vec<Level>>,
    }

    impl Recorder {
        fn claims(&self) -> usize {
            self.claims.load(Ordering::SeqCst)
        }

        fn releases(&self) -> usize {
            self.releases.load(Ordering::SeqCst)
        }

        fn writes(&self) -> Vec<Level> {
            self.writes.lock().unwrap().clone()
        }
    }

    struct FakeBackend {
        recorder: Arc<Recorder>,
        fail_claim: Arc<AtomicBool>,
    }

    struct FakeLine {
        recorder: Arc<Recorder>,
        released: bool,
    }

    impl Backend for FakeBackend {
        type Line = FakeLine;

        fn claim(&self, _pin: u8) -> io::Result<FakeLine> {
            if self.fail_claim.load(Ordering::SeqCst) {
                return Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "write /sys/class/gpio/export: Permission denied",
                ));
            }

            self.recorder.claims.fetch_add(1, Ordering::SeqCst);

            Ok(FakeLine {
                recorder: self.recorder.clone(),
                released: false,
            })
        }
    }

    impl Line for FakeLine {
        fn write_level(&mut self, level: Level) -> io::Result<()> {
            self.recorder.writes.lock().unwrap().push(level);

            Ok(())
        }

        fn release(&mut self) {
            if !self.released {
                self.released = true;
                self.recorder.releases.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn channel(pin: u8) -> (PwmChannel<FakeBackend>, Arc<Recorder>, Arc<AtomicBool>) {
        let recorder = Arc::new(Recorder::default());
        let fail_claim = Arc::new(AtomicBool::new(false));
        let backend = FakeBackend {
            recorder: recorder.clone(),
            fail_claim: fail_claim.clone(),
        };

        (
            PwmChannel::with_backend(pin, backend),
            recorder,
            fail_claim,
        )
    }

    #[test]
    fn duty_split_sums_to_cycle() {
        let (mut pwm, _, _) = channel(17);
        pwm.start(20_000).unwrap();

        for fraction in [0.0, 0.075, 0.25, 1.0 / 3.0, 0.5, 0.9, 1.0] {
            pwm.set_duty(fraction);
            let (on, off) = pwm.duty_micros().unwrap();
            assert_eq!(on + off, 20_000, "fraction {}", fraction);
        }

        pwm.stop();
    }

    #[test]
    fn servo_center_pulse() {
        let (mut pwm, _, _) = channel(17);
        pwm.start(20_000).unwrap();

        pwm.set_duty(0.075);

        assert_eq!(pwm.duty_micros(), Some((1_500, 18_500)));
    }

    #[test]
    fn duty_extremes() {
        let (mut pwm, _, _) = channel(17);
        pwm.start(20_000).unwrap();

        pwm.set_duty(0.0);
        assert_eq!(pwm.duty_micros(), Some((0, 20_000)));

        pwm.set_duty(1.0);
        assert_eq!(pwm.duty_micros(), Some((20_000, 0)));
    }

    #[test]
    fn out_of_range_duty_is_clamped() {
        let (mut pwm, _, _) = channel(17);
        pwm.start(2_000).unwrap();

        pwm.set_duty(1.5);
        assert_eq!(pwm.duty_micros(), Some((2_000, 0)));

        pwm.set_duty(-0.5);
        assert_eq!(pwm.duty_micros(), Some((0, 2_000)));
    }

    #[test]
    fn start_stop_releases_pin_once() {
        let (mut pwm, recorder, _) = channel(17);

        pwm.start(20_000).unwrap();
        assert!(pwm.is_running());
        assert_eq!(pwm.cycle_micros(), Some(20_000));

        pwm.stop();
        assert!(!pwm.is_running());
        assert_eq!(recorder.claims(), 1);
        assert_eq!(recorder.releases(), 1);

        // The channel stays usable after a stop.
        pwm.start(10_000).unwrap();
        pwm.stop();
        assert_eq!(recorder.claims(), 2);
        assert_eq!(recorder.releases(), 2);
    }

    #[test]
    fn stop_before_start_is_noop() {
        let (mut pwm, recorder, _) = channel(17);

        pwm.stop();
        pwm.stop();

        assert!(!pwm.is_running());
        assert_eq!(recorder.releases(), 0);
    }

    #[test]
    fn failed_claim_leaves_channel_idle() {
        let (mut pwm, recorder, fail_claim) = channel(17);
        fail_claim.store(true, Ordering::SeqCst);

        let err = pwm.start(20_000).unwrap_err();
        assert!(matches!(err, Error::Hardware(_)));
        assert!(!err.to_string().is_empty());
        assert!(!pwm.is_running());
        assert!(recorder.writes().is_empty());

        // A failed start is recoverable.
        fail_claim.store(false, Ordering::SeqCst);
        pwm.start(20_000).unwrap();
        pwm.stop();
    }

    #[test]
    fn double_start_is_rejected() {
        let (mut pwm, recorder, _) = channel(17);

        pwm.start(20_000).unwrap();
        assert!(matches!(pwm.start(20_000), Err(Error::AlreadyRunning)));
        assert!(pwm.is_running());
        assert_eq!(recorder.claims(), 1);

        pwm.stop();
    }

    #[test]
    fn zero_cycle_is_rejected() {
        let (mut pwm, recorder, _) = channel(17);

        assert!(matches!(pwm.start(0), Err(Error::ZeroCycle)));
        assert!(!pwm.is_running());
        assert_eq!(recorder.claims(), 0);
    }

    #[test]
    fn set_duty_is_ignored_while_idle() {
        let (mut pwm, _, _) = channel(17);

        pwm.set_duty(0.5);

        assert_eq!(pwm.duty_micros(), None);
    }

    #[test]
    fn dropping_running_channel_releases_pin() {
        let (mut pwm, recorder, _) = channel(17);
        pwm.start(20_000).unwrap();

        drop(pwm);

        assert_eq!(recorder.releases(), 1);
    }

    #[test]
    fn timing_loop_writes_both_levels() {
        let (mut pwm, recorder, _) = channel(17);
        pwm.start(1_000).unwrap();
        pwm.set_duty(0.5);

        thread::sleep(Duration::from_millis(20));
        pwm.stop();

        let writes = recorder.writes();
        assert!(writes.contains(&Level::High));
        assert!(writes.contains(&Level::Low));
    }

    #[test]
    fn fully_off_skips_high_writes() {
        let (mut pwm, recorder, _) = channel(17);
        pwm.start(5_000).unwrap();

        thread::sleep(Duration::from_millis(15));
        pwm.stop();

        assert!(!recorder.writes().contains(&Level::High));
    }

    #[test]
    fn duty_updates_race_with_timing_loop() {
        let (mut pwm, _, _) = channel(17);
        pwm.start(1_000).unwrap();

        for i in 0..500 {
            pwm.set_duty(f64::from(i % 101) / 100.0);
            let (on, off) = pwm.duty_micros().unwrap();
            assert_eq!(on + off, 1_000);
        }

        pwm.stop();
    }
}
