// servo.rs - Drives a servo connected to a GPIO pin using software PWM,
// with the pulse length read interactively from the operator.
//
// For the common SG90 micro-servo, the recommended PWM frequency is 50 Hz
// (20,000 µs cycles), and the acceptable input range, expressed as a
// fraction, is 0.025 - 0.125. These values correspond to pulse lengths of
// 0.5 - 2.5 ms. At 50 Hz that means only the smallest part of the
// available PWM range is used. If you're just setting the brightness of
// an LED, the full 0.0 - 1.0 range can be used instead.
//
// Don't power the servo directly from the board's GPIO header. Current
// spikes during power-up and stalls could otherwise damage the board. If
// you're powering the servo from a separate supply, remember to connect
// the grounds together.

use std::error::Error;
use std::io;
use std::io::{BufRead, Write};

use softpwm::pwm::PwmChannel;

// BCM GPIO 17 is tied to physical pin 11.
const GPIO_PWM: u8 = 17;

// 50 Hz.
const CYCLE_MICROS: u64 = 20_000;

fn main() -> Result<(), Box<dyn Error>> {
    let mut pwm = PwmChannel::new(GPIO_PWM);
    pwm.start(CYCLE_MICROS)?;

    let stdin = io::stdin();

    loop {
        print!("Set on fraction (0.0-1.0), or a negative number to stop: ");
        io::stdout().flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break;
        }

        match input.trim().parse::<f64>() {
            Ok(val) if val < 0.0 => break,
            Ok(val) => {
                println!("Setting {}", val);
                pwm.set_duty(val);
            }
            Err(_) => println!("Not a number: {}", input.trim()),
        }
    }

    // Stops the timing thread and unexports the pin, leaving the output
    // in the low state.
    pwm.stop();

    Ok(())
}
