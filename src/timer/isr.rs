use core::cell::RefCell;

use critical_section::Mutex;
use embedded_hal::digital::OutputPin;

use crate::registers::Track;
use crate::waveform::WaveformEngine;

/// Used to initialize a global static [`WaveformEngine`] for use with
/// `critical_section`.
///
/// # Returns
/// * An empty mutable ref-cell
///
/// # Example
/// ```rust
/// use core::cell::RefCell;
/// use critical_section::Mutex;
/// use dcc_station::timer::global_engine_init;
/// use dcc_station::waveform::WaveformEngine;
/// # type RailPin = embedded_hal_mock::eh1::digital::Mock;
///
/// static MAIN_ENGINE: Mutex<RefCell<Option<WaveformEngine<RailPin>>>> =
///     global_engine_init::<RailPin>();
/// ```
pub const fn global_engine_init<P: OutputPin>() -> Mutex<RefCell<Option<WaveformEngine<P>>>> {
    Mutex::new(RefCell::new(None))
}

/// Places a fresh engine into the global static once the rail polarity pin
/// exists (so, from `main`, not from a `const` context).
///
/// # Arguments
/// * The global static created with [`global_engine_init`]
/// * The rail polarity pin
/// * The preamble length for this output (16 for operations, 22 for
///   programming)
pub fn global_engine_setup<P: OutputPin>(
    global_engine: &'static Mutex<RefCell<Option<WaveformEngine<P>>>>,
    pin: P,
    preamble_bits: u8,
) {
    critical_section::with(|cs| {
        let _ = global_engine
            .borrow(cs)
            .replace(Some(WaveformEngine::new(pin, preamble_bits)));
    });
}

/// Runs one engine tick from the timer interrupt.
///
/// # Arguments
/// * The global static created with [`global_engine_init`]
/// * The [`Track`] this engine renders
///
/// # Returns
/// * Microseconds until the next compare match, or `None` while the engine
///   is not set up (or its pin failed)
///
/// # Example
/// ```ignore
/// #[interrupt]
/// fn TIMER1_COMPA() {
///     if let Some(us) = global_engine_tick(&MAIN_ENGINE, &MAIN) {
///         rearm_compare(us);
///     }
/// }
/// ```
pub fn global_engine_tick<P: OutputPin, const SLOTS: usize>(
    global_engine: &'static Mutex<RefCell<Option<WaveformEngine<P>>>>,
    track: &Track<SLOTS>,
) -> Option<u32> {
    critical_section::with(|cs| {
        global_engine
            .borrow(cs)
            .borrow_mut()
            .as_mut()
            .and_then(|engine| engine.tick(track).ok())
    })
}
