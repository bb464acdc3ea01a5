//! Backend for the `/sys/class/gpio` interface.

use std::ffi::CString;
use std::fs;
use std::fs::{File, OpenOptions};
use std::io;
use std::io::Write;
use std::os::linux::fs::MetadataExt;
use std::path::Path;
use std::thread;
use std::time::Duration;

use super::{Backend, Level, Line};

// Find group ID for specified group name
fn group_name_to_gid(name: &str) -> Option<u32> {
    if let Ok(name_cstr) = CString::new(name) {
        unsafe {
            let group_ptr = libc::getgrnam(name_cstr.as_ptr());

            if !group_ptr.is_null() {
                return Some((*group_ptr).gr_gid);
            }
        }
    }

    None
}

fn export(pin: u8) -> io::Result<()> {
    // Only export if the pin isn't already exported
    if !Path::new(&format!("/sys/class/gpio/gpio{}", pin)).exists() {
        File::create("/sys/class/gpio/export")?.write_fmt(format_args!("{}", pin))?;
    }

    // The node created by exporting a pin starts off owned by root:root.
    // There's a short delay before udev changes the group to gpio. Since
    // softpwm should work for non-root users, wait for max. 1s for the
    // group to change. If this isn't working, check the udev rules
    // (/etc/udev/rules.d/99-com.rules).
    let gid_gpio = group_name_to_gid("gpio").unwrap_or(0);

    let mut counter = 0;
    while counter < 20 {
        let meta = fs::metadata(format!("/sys/class/gpio/gpio{}", pin))?;
        if meta.st_gid() == gid_gpio {
            break;
        }

        thread::sleep(Duration::from_millis(50));
        counter += 1;
    }

    Ok(())
}

fn unexport(pin: u8) -> io::Result<()> {
    // Only unexport if the pin is actually exported
    if Path::new(&format!("/sys/class/gpio/gpio{}", pin)).exists() {
        File::create("/sys/class/gpio/unexport")?.write_fmt(format_args!("{}", pin))?;
    }

    Ok(())
}

fn set_direction_out(pin: u8) -> io::Result<()> {
    OpenOptions::new()
        .write(true)
        .open(format!("/sys/class/gpio/gpio{}/direction", pin))?
        .write_all(b"out")?;

    Ok(())
}

fn open_value(pin: u8) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .open(format!("/sys/class/gpio/gpio{}/value", pin))
}

/// The sysfs GPIO control surface.
///
/// Claiming a pin exports it through `/sys/class/gpio/export`, sets its
/// direction to output, and keeps the pin's `value` attribute open for
/// the lifetime of the returned [`SysfsLine`].
#[derive(Debug, Default, Copy, Clone)]
pub struct Sysfs;

impl Backend for Sysfs {
    type Line = SysfsLine;

    fn claim(&self, pin: u8) -> io::Result<SysfsLine> {
        export(pin)?;
        set_direction_out(pin)?;
        let value = open_value(pin)?;

        Ok(SysfsLine {
            pin,
            value: Some(value),
        })
    }
}

/// An output line claimed through [`Sysfs`].
#[derive(Debug)]
pub struct SysfsLine {
    pin: u8,
    value: Option<File>,
}

impl SysfsLine {
    /// Returns the BCM GPIO pin number.
    pub fn pin(&self) -> u8 {
        self.pin
    }
}

impl Line for SysfsLine {
    fn write_level(&mut self, level: Level) -> io::Result<()> {
        // A single pre-encoded byte on the saved descriptor. Writing the
        // value attribute involves a kernel trap no matter what, but the
        // loop time might be microseconds, so everything else on this
        // path has to be free.
        if let Some(ref mut value) = self.value {
            value.write_all(match level {
                Level::Low => b"0",
                Level::High => b"1",
            })?;
        }

        Ok(())
    }

    fn release(&mut self) {
        if self.value.take().is_some() {
            let _ = unexport(self.pin);
        }
    }
}

impl Drop for SysfsLine {
    fn drop(&mut self) {
        self.release();
    }
}
