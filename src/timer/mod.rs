//! Timer and tick-scheduling utilities for the waveform engine.
//!
//! The engine wants one interrupt per half-bit, with the compare interval
//! switched between the one-bit and zero-bit durations from its return
//! value. This module holds the helpers for setting that up: OCR
//! calculators for CTC-style timers (runtime and `const` variants), plus
//! two scheduling styles behind features: an interrupt service routine
//! using `critical_section::with` (`timer-isr` feature), or a blocking
//! delay-paced step (`delayus-loop` feature).
//!
//! Common prescalers at 16 MHz:
//!
//! | PRESCALER | 58 µs counts | 100 µs counts |
//! |-----------|--------------|---------------|
//! |         8 |          116 |           200 |
//! |        64 |           14 |            25 |
//! |       256 |            4 |             6 |

use libm::round;

#[cfg(feature = "delayus-loop")]
mod delay;
#[cfg_attr(feature = "delayus-loop", allow(unused_imports))]
#[cfg(feature = "delayus-loop")]
pub use delay::*;

#[cfg(feature = "timer-isr")]
mod isr;
#[cfg_attr(feature = "timer-isr", allow(unused_imports))]
#[cfg(feature = "timer-isr")]
pub use isr::*;

#[cfg(feature = "timer-isr")]
mod macros;

pub use crate::consts::{ONE_HALF_BIT_US, ZERO_HALF_BIT_US};

/// Computes the OCR value for a CTC timer to fire after `interval_us`.
///
/// # Arguments
/// - `f_cpu`: CPU frequency in Hz
/// - `prescaler`: timer prescaler (e.g., 8, 64, 256)
/// - `interval_us`: desired compare interval in microseconds
///
/// # Returns
/// - OCR value for the compare register (rounds to nearest integer)
pub fn compute_ocr_value(f_cpu: u32, prescaler: u32, interval_us: u32) -> u16 {
    let ticks_per_us = f_cpu as f64 / prescaler as f64 / 1_000_000.0;
    round(ticks_per_us * interval_us as f64) as u16
}

/// Compile-time OCR value calculator (truncating).
///
/// See [`compute_ocr_value`] for the arguments.
pub const fn const_ocr_value(f_cpu: u32, prescaler: u32, interval_us: u32) -> u16 {
    ((f_cpu as u64 / prescaler as u64) * interval_us as u64 / 1_000_000) as u16
}

/// The OCR values for the one-bit and zero-bit half-cycles, in that order.
///
/// Load the compare register with one of these from the ISR depending on
/// the engine's return value.
pub fn ocr_values(f_cpu: u32, prescaler: u32) -> (u16, u16) {
    (
        compute_ocr_value(f_cpu, prescaler, ONE_HALF_BIT_US),
        compute_ocr_value(f_cpu, prescaler, ZERO_HALF_BIT_US),
    )
}
