//! Software-generated PWM on GPIO pins, using the Linux sysfs GPIO
//! interface. No hardware PWM peripheral or third-party GPIO daemon is
//! required; each [`PwmChannel`] claims a single pin and emulates the PWM
//! signal by toggling its output state on a dedicated thread.
//!
//! This is intended for low-frequency actuator control, such as hobby
//! servos (typically 50 Hz), or for LED brightness control. Software-based
//! PWM is inherently inaccurate on a multi-threaded OS due to
//! scheduling/preemption. The timing thread compensates by combining sleep
//! with short busy-waits, and tries to elevate itself to a real-time
//! scheduling policy, but no hard real-time guarantees are made.
//!
//! Pins are addressed by their BCM GPIO numbers, rather than their
//! physical location on the GPIO header.
//!
//! # Examples
//!
//! Drive a servo connected to BCM GPIO 17 with a 20 ms (50 Hz) cycle:
//!
//! ```no_run
//! use softpwm::pwm::PwmChannel;
//!
//! # fn main() -> softpwm::pwm::Result<()> {
//! let mut channel = PwmChannel::new(17);
//! channel.start(20_000)?;
//! channel.set_duty(0.075); // 1.5 ms pulse, servo center position
//! channel.stop();
//! # Ok(())
//! # }
//! ```
//!
//! When a `PwmChannel` goes out of scope while running, it is stopped and
//! the GPIO pin is unexported automatically. Note that drop methods aren't
//! called when a process is abnormally terminated, for instance when a
//! `SIGINT` signal isn't caught. You can catch those using crates such as
//! `simple-signal`, as shown in the bundled demos.

#![doc(html_root_url = "https://docs.rs/softpwm/0.1.0")]

pub mod gpio;
pub mod pwm;

pub use crate::pwm::PwmChannel;
