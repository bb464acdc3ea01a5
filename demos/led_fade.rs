// led_fade.rs - Fades an LED up and down using software PWM, while
// handling any incoming SIGINT (Ctrl-C) and SIGTERM signals so the pin is
// released before the application exits.
//
// Remember to add a resistor of an appropriate value in series, to
// prevent exceeding the maximum current rating of the GPIO pin and the
// LED.

use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use simple_signal::{self, Signal};

use softpwm::pwm::PwmChannel;

// BCM GPIO 23 is tied to physical pin 16.
const GPIO_LED: u8 = 23;

// 500 Hz is fast enough that the LED won't visibly flicker.
const CYCLE_MICROS: u64 = 2_000;

fn main() -> Result<(), Box<dyn Error>> {
    let mut pwm = PwmChannel::new(GPIO_LED);
    pwm.start(CYCLE_MICROS)?;

    let running = Arc::new(AtomicBool::new(true));

    // When a SIGINT (Ctrl-C) or SIGTERM signal is caught, atomically set
    // running to false.
    simple_signal::set_handler(&[Signal::Int, Signal::Term], {
        let running = running.clone();
        move |_| {
            running.store(false, Ordering::SeqCst);
        }
    });

    // Ramp the brightness up and down until running is set to false.
    'fade: loop {
        for step in (0..=100).chain((1..100).rev()) {
            if !running.load(Ordering::SeqCst) {
                break 'fade;
            }

            pwm.set_duty(f64::from(step) / 100.0);
            thread::sleep(Duration::from_millis(20));
        }
    }

    // Stops the timing thread and unexports the pin, leaving the output
    // in the low state.
    pwm.stop();

    Ok(())
}
