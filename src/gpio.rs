//! Interface for GPIO output lines.
//!
//! The PWM engine doesn't talk to the GPIO control surface directly.
//! Instead it's handed a [`Backend`], which knows how to claim a pin for
//! output, and which yields a [`Line`] that can be driven high or low and
//! later released. The default backend is [`Sysfs`], which uses the
//! `/sys/class/gpio` interface available on most single-board computers.
//!
//! Keeping the engine behind these traits means it carries no global
//! state, and can be exercised in tests with a fake backend that never
//! touches hardware.

use std::fmt;
use std::io;

mod sysfs;

pub use self::sysfs::{Sysfs, SysfsLine};

/// Pin logic levels.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[repr(u8)]
pub enum Level {
    Low = 0,
    High = 1,
}

impl From<bool> for Level {
    fn from(e: bool) -> Level {
        if e {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Level::Low => write!(f, "Low"),
            Level::High => write!(f, "High"),
        }
    }
}

/// A GPIO control surface that can claim pins for output.
///
/// Claiming a pin requests exclusive output control of it from the OS.
/// Claiming fails if the pin is busy, doesn't exist, can't be switched to
/// output mode, or the process lacks the required permissions. Claiming
/// the same pin from two places at once isn't supported.
pub trait Backend {
    type Line: Line;

    fn claim(&self, pin: u8) -> io::Result<Self::Line>;
}

/// An exclusively owned GPIO output line.
pub trait Line: Send + 'static {
    /// Sets the line's output level.
    ///
    /// This is called on the PWM hot path, potentially thousands of times
    /// per second, so implementations should avoid allocation and
    /// formatting.
    fn write_level(&mut self, level: Level) -> io::Result<()>;

    /// Relinquishes the claim on the line.
    ///
    /// Best-effort: errors are ignored, since release happens during
    /// cleanup. Calling `release` more than once is a no-op.
    fn release(&mut self);
}

#[cfg(test)]
mod tests {
    use super::Level;

    #[test]
    fn level_from_bool() {
        assert_eq!(Level::from(false), Level::Low);
        assert_eq!(Level::from(true), Level::High);
    }
}
