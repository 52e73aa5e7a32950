//! Track current sensing.
//!
//! Current sampling stays platform-specific: implement [`CurrentProbe`]
//! over whatever ADC channel monitors the H-bridge sense resistor and hand
//! it to a [`CurrentMonitor`]. The monitor converts raw counts to
//! milliamps through a scale and zero-offset bias, keeps an exponentially
//! smoothed reading, and trips an injected overload action when the
//! smoothed current exceeds [`CURRENT_SAMPLE_MAX`](crate::consts::CURRENT_SAMPLE_MAX).
//!
//! Service mode uses the *raw* reads (see
//! [`read`](CurrentMonitor::read)): acknowledgement pulses are measured as
//! deflections from an averaged base, and smoothing would blur the very
//! flanks the detector is looking for.

use crate::consts::{CURRENT_SAMPLE_MAX, CURRENT_SMOOTHING_DIV};

/// On-demand access to one analog current channel.
pub trait CurrentProbe {
    /// Samples the channel, returning the raw converter count.
    fn read_raw(&mut self) -> u16;
}

/// Smoothed, calibrated current readout for one output.
#[derive(Debug)]
pub struct CurrentMonitor<PR: CurrentProbe> {
    probe: PR,
    scale_percent: i32,
    bias: i32,
    smoothed_ma: i32,
}

impl<PR: CurrentProbe> CurrentMonitor<PR> {
    /// Creates a monitor over `probe`.
    ///
    /// `scale_percent` is milliamps per raw count times 100 (300 for a
    /// 3 mA/count sense chain, 150 for 1.5 mA/count); `bias` is added to
    /// every converted reading so an unloaded track reads zero.
    pub fn new(probe: PR, scale_percent: i32, bias: i32) -> Self {
        Self {
            probe,
            scale_percent,
            bias,
            smoothed_ma: 0,
        }
    }

    /// Immediate raw sample, bypassing calibration and smoothing.
    pub fn read(&mut self) -> u16 {
        self.probe.read_raw()
    }

    /// Takes one sample, folds it into the smoothed reading and returns
    /// the result in milliamps.
    pub fn sample(&mut self) -> i32 {
        let ma = i32::from(self.probe.read_raw()) * self.scale_percent / 100 + self.bias;
        self.smoothed_ma += (ma - self.smoothed_ma) / CURRENT_SMOOTHING_DIV;
        self.smoothed_ma
    }

    /// Last smoothed reading in milliamps.
    pub fn current_ma(&self) -> i32 {
        self.smoothed_ma
    }

    /// Samples once and invokes `overload` if the smoothed current exceeds
    /// the trip limit. The action is injected so the monitor never owns
    /// power-control policy; typically it drives the signal-enable pin low.
    pub fn check(&mut self, overload: impl FnOnce()) {
        if self.sample() > CURRENT_SAMPLE_MAX {
            overload();
        }
    }
}
