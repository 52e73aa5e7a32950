/// Declares a static global `WAVEFORM_ENGINE` instance protected by a
/// `critical_section` mutex.
///
/// This creates the `static` singleton a timer ISR and `main` share when
/// one output's engine must be reachable from both.
///
/// # Arguments
/// - `$pin`: The concrete type of the rail polarity pin (must implement
///   `OutputPin`)
///
/// # Example
/// ```ignore
/// init_waveform_engine!(MyRailPinType);
/// ```
#[macro_export]
macro_rules! init_waveform_engine {
    ( $pin:ty ) => {
        pub static WAVEFORM_ENGINE: $crate::critical_section::Mutex<
            core::cell::RefCell<Option<$crate::waveform::WaveformEngine<$pin>>>,
        > = $crate::critical_section::Mutex::new(core::cell::RefCell::new(None));
    };
}

/// Initializes the global `WAVEFORM_ENGINE` singleton with a new engine.
///
/// # Arguments
/// - `$pin`: The rail polarity pin value
/// - `$preamble_bits`: Preamble length for this output
///
/// # Example
/// ```ignore
/// fn main() {
///     setup_waveform_engine!(rail_pin, 16);
/// }
/// ```
///
/// # Notes
/// - Requires `init_waveform_engine!` to have been used earlier.
#[macro_export]
macro_rules! setup_waveform_engine {
    ( $pin:expr, $preamble_bits:expr ) => {
        $crate::critical_section::with(|cs| {
            let _ = WAVEFORM_ENGINE
                .borrow(cs)
                .replace(Some($crate::waveform::WaveformEngine::new(
                    $pin,
                    $preamble_bits,
                )));
        });
    };
}

/// Runs one tick on the global `WAVEFORM_ENGINE` if it has been
/// initialized.
///
/// Intended to be invoked from the output's timer ISR; evaluates to the
/// microseconds until the next compare match, or `None` before setup.
///
/// # Example
/// ```ignore
/// #[interrupt]
/// fn TIMER1_COMPA() {
///     if let Some(us) = tick_waveform!(&MAIN) {
///         rearm_compare(us);
///     }
/// }
/// ```
#[macro_export]
macro_rules! tick_waveform {
    ( $track:expr ) => {
        $crate::critical_section::with(|cs| {
            WAVEFORM_ENGINE
                .borrow(cs)
                .borrow_mut()
                .as_mut()
                .and_then(|engine| engine.tick($track).ok())
        })
    };
}
