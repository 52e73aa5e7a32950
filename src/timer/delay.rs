use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

use crate::registers::Track;
use crate::waveform::WaveformEngine;

/// Emits one half-bit and blocks for its duration.
///
/// This is the polled alternative to a compare-match interrupt: call it in
/// a tight loop and the rails carry a correctly timed signal, at the cost
/// of the CPU. Useful on targets without a free timer, and in bring-up.
///
/// # Arguments
/// - `engine`: The output's waveform engine.
/// - `track`: The [`Track`] the engine renders.
/// - `delay`: A delay provider implementing `DelayNs`, typically from the HAL.
///
/// # Example
/// ```rust
/// # use embedded_hal_mock::eh1::delay::NoopDelay as Delay;
/// # use embedded_hal_mock::eh1::digital::{
/// #     Mock as Pin, State as PinState, Transaction as PinTransaction,
/// # };
/// use dcc_station::registers::Track;
/// use dcc_station::timer::run_waveform_step;
/// use dcc_station::waveform::WaveformEngine;
///
/// static MAIN: Track<13> = Track::new();
/// # let pin = Pin::new(&[
/// #     PinTransaction::set(PinState::Low),
/// #     PinTransaction::set(PinState::High),
/// # ]);
/// let mut engine = WaveformEngine::new(pin, 16);
/// let mut delay = Delay::new();
/// run_waveform_step(&mut engine, &MAIN, &mut delay);
/// # engine.free().done();
/// ```
///
/// # Notes
/// - Pin errors are swallowed here; a polarity pin that can fail wants the
///   interrupt-driven setup where the error reaches the caller.
pub fn run_waveform_step<D, P, const SLOTS: usize>(
    engine: &mut WaveformEngine<P>,
    track: &Track<SLOTS>,
    delay: &mut D,
) where
    D: DelayNs,
    P: OutputPin,
{
    if let Ok(us) = engine.tick(track) {
        delay.delay_us(us);
    }
}
