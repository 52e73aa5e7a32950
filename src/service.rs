//! Service-mode programming on the PROG output.
//!
//! [`ServiceMode`] sequences the NMRA direct-mode conversations: power the
//! output up (with the long power-on wait when it was cold), average the
//! quiescent current, install probe packets, and couple the
//! [`AckDetector`](crate::ack::AckDetector) to the current probe while the
//! waveform engine refreshes the probe packet from slot 1.
//!
//! Reading a CV asks eight verify-bit questions, each prefixed with three
//! reset packets through the one-shot slot, then re-verifies the
//! assembled byte. Writes are checked by acknowledgement too, falling back
//! to an explicit verify when the write itself went unanswered. Every
//! operation returns `Ok(None)` rather than an error when the decoder
//! simply did not answer; the textual wrappers render that as `-1`.
//!
//! All blocking in this module is either a packet-count wait or one
//! current sample per loop iteration. The `idle` hook runs once per
//! busy-wait turn: production code passes a spin hint, tests drive a
//! simulated engine from it.

use core::fmt::{self, Write};

use embedded_hal::digital::StatefulOutputPin;

use crate::ack::{AckDetector, AckPoll};
use crate::commands::int_args;
use crate::consts::{
    ACK_BASE_COUNT, CV_BIT_VERIFY_DATA, CV_BIT_WRITE_DATA, CV_VERIFY_BIT, CV_VERIFY_BYTE,
    CV_WRITE_BYTE, POWER_ON_WAIT_PACKETS, POWER_WARM_WAIT_PACKETS, RESET_PAYLOAD,
};
use crate::monitor::{CurrentMonitor, CurrentProbe};
use crate::registers::Track;
use crate::Error;

/// Orchestrates service-mode conversations on one programming output.
///
/// Borrows the PROG [`Track`], its [`CurrentMonitor`], and the
/// signal-enable pin of the PROG power stage. `idle` is called once per
/// busy-wait iteration.
pub struct ServiceMode<'a, const SLOTS: usize, PR, EN, F>
where
    PR: CurrentProbe,
    EN: StatefulOutputPin,
    F: FnMut(),
{
    track: &'a Track<SLOTS>,
    monitor: &'a mut CurrentMonitor<PR>,
    enable: &'a mut EN,
    idle: F,
}

impl<'a, const SLOTS: usize, PR, EN, F> ServiceMode<'a, SLOTS, PR, EN, F>
where
    PR: CurrentProbe,
    EN: StatefulOutputPin,
    F: FnMut(),
{
    /// Binds a sequencer to the programming output.
    pub fn new(
        track: &'a Track<SLOTS>,
        monitor: &'a mut CurrentMonitor<PR>,
        enable: &'a mut EN,
        idle: F,
    ) -> Self {
        Self {
            track,
            monitor,
            enable,
            idle,
        }
    }

    fn cv_index(cv: u16) -> Result<(u8, u8), Error> {
        if !(1..=1024).contains(&cv) {
            return Err(Error::InvalidCv);
        }
        let cv = cv - 1;
        Ok((((cv >> 8) as u8) & 0x03, cv as u8))
    }

    /// Ensures the output is powered and settled, returning whether it was
    /// powered here (and so must be switched off again afterwards).
    pub fn power_on(&mut self) -> bool {
        let mut restore = false;
        let mut wait = POWER_WARM_WAIT_PACKETS;
        if self.enable.is_set_low().unwrap_or(true) {
            restore = true;
            wait = POWER_ON_WAIT_PACKETS;
            let _ = self.enable.set_high();
        }
        let start = self.track.packets_transmitted();
        let _ = self
            .track
            .load_packet_with(1, &RESET_PAYLOAD, 1, &mut self.idle);
        while self.track.packets_transmitted().wrapping_sub(start) < wait {
            (self.idle)();
        }
        restore
    }

    /// Restores the power state recorded by [`power_on`](Self::power_on).
    pub fn power_off(&mut self, restore: bool) {
        if restore {
            let _ = self.enable.set_low();
        }
    }

    /// Averages [`ACK_BASE_COUNT`] raw probe samples into the base current
    /// that acknowledgement deflections are measured against.
    pub fn read_base_current(&mut self) -> u16 {
        let mut sum: u32 = 0;
        for _ in 0..ACK_BASE_COUNT {
            sum += u32::from(self.monitor.read());
        }
        (sum / ACK_BASE_COUNT as u32) as u16
    }

    /// Watches the current probe until the decoder answers or the
    /// nine-packet window closes. Re-installs the reset packet in slot 1
    /// on either outcome.
    pub fn ack_detect(&mut self, base: u16) -> bool {
        let mut detector = AckDetector::new(base, self.track.packets_transmitted());
        let acked = loop {
            let raw = self.monitor.read();
            let (ticks, packets) = self.track.clock();
            match detector.poll(raw, ticks, packets) {
                AckPoll::Pending => {}
                AckPoll::Confirmed => {
                    // answered: give the decoder resets to chew on while
                    // the linger runs down
                    let _ = self
                        .track
                        .load_packet_with(1, &RESET_PAYLOAD, 1, &mut self.idle);
                }
                AckPoll::Ack => break true,
                AckPoll::Timeout => {
                    let _ = self
                        .track
                        .load_packet_with(1, &RESET_PAYLOAD, 1, &mut self.idle);
                    break false;
                }
            }
        };
        #[cfg(feature = "log")]
        log::debug!("ack detect against base {}: {}", base, acked);
        acked
    }

    /// Reads a whole CV byte, one verify-bit probe per bit, then
    /// re-verifies the assembled value. `Ok(None)` when the final
    /// verification went unanswered.
    pub fn read_cv(&mut self, cv: u16) -> Result<Option<u8>, Error> {
        let (hi, lo) = Self::cv_index(cv)?;
        let restore = self.power_on();
        let base = self.read_base_current();

        let mut value = 0u8;
        for bit in 0..8u8 {
            self.track
                .load_packet_with(0, &RESET_PAYLOAD, 3, &mut self.idle)?;
            self.track.load_packet_with(
                1,
                &[CV_VERIFY_BIT + hi, lo, CV_BIT_VERIFY_DATA + bit],
                1,
                &mut self.idle,
            )?;
            if self.ack_detect(base) {
                value |= 1 << bit;
            }
        }

        self.track
            .load_packet_with(0, &RESET_PAYLOAD, 3, &mut self.idle)?;
        self.track
            .load_packet_with(1, &[CV_VERIFY_BYTE + hi, lo, value], 1, &mut self.idle)?;
        let verified = self.ack_detect(base);

        self.power_off(restore);
        #[cfg(feature = "log")]
        log::debug!("cv {} read: {:?}", cv, verified.then_some(value));
        Ok(verified.then_some(value))
    }

    /// Writes a CV byte, verifying by acknowledgement with a fallback to
    /// an explicit verify-byte probe. `Ok(None)` when both went
    /// unanswered.
    pub fn write_cv_byte(&mut self, cv: u16, value: u8) -> Result<Option<u8>, Error> {
        let (hi, lo) = Self::cv_index(cv)?;
        let restore = self.power_on();
        let base = self.read_base_current();

        self.track
            .load_packet_with(1, &[CV_WRITE_BYTE + hi, lo, value], 1, &mut self.idle)?;
        let mut acked = self.ack_detect(base);
        if !acked {
            self.track
                .load_packet_with(1, &[CV_VERIFY_BYTE + hi, lo, value], 1, &mut self.idle)?;
            acked = self.ack_detect(base);
        }

        self.power_off(restore);
        Ok(acked.then_some(value))
    }

    /// Writes one CV bit. On a silent write the instruction is flipped
    /// from write to verify and retried. `Ok(None)` when both went
    /// unanswered.
    pub fn write_cv_bit(&mut self, cv: u16, bit: u8, value: u8) -> Result<Option<u8>, Error> {
        let (hi, lo) = Self::cv_index(cv)?;
        let bit = bit & 0x07;
        let value = value & 0x01;
        let restore = self.power_on();
        let base = self.read_base_current();

        let mut data = CV_BIT_WRITE_DATA | (value << 3) | bit;
        self.track
            .load_packet_with(1, &[CV_VERIFY_BIT + hi, lo, data], 1, &mut self.idle)?;
        let mut acked = self.ack_detect(base);
        if !acked {
            data &= !0x10; // write becomes verify
            self.track
                .load_packet_with(1, &[CV_VERIFY_BIT + hi, lo, data], 1, &mut self.idle)?;
            acked = self.ack_detect(base);
        }

        self.power_off(restore);
        Ok(acked.then_some(value))
    }

    /// Textual entry point: `cv callback callbackSub`. Responds
    /// `<r cb|cbSub|cv value>` with `value = -1` on failure.
    pub fn read_cv_cmd<W: Write>(&mut self, args: &str, out: &mut W) {
        let (n, [cv, cb, cb_sub]) = int_args::<3>(args);
        if n != 3 || !(1..=1024).contains(&cv) {
            return;
        }
        let value = match self.read_cv(cv as u16) {
            Ok(v) => v.map_or(-1, i32::from),
            Err(_) => return,
        };
        let _ = write!(out, "<r{}|{}|{} {}>", cb, cb_sub, cv, value);
    }

    /// Textual entry point: `cv value callback callbackSub`. Responds
    /// `<r cb|cbSub|cv value>` with `value = -1` on failure.
    pub fn write_cv_byte_cmd<W: Write>(&mut self, args: &str, out: &mut W) {
        let (n, [cv, value, cb, cb_sub]) = int_args::<4>(args);
        if n != 4 || !(1..=1024).contains(&cv) || !(0..=255).contains(&value) {
            return;
        }
        let result = match self.write_cv_byte(cv as u16, value as u8) {
            Ok(v) => v.map_or(-1, i32::from),
            Err(_) => return,
        };
        let _ = write!(out, "<r{}|{}|{} {}>", cb, cb_sub, cv, result);
    }

    /// Textual entry point: `cv bit value callback callbackSub`. Responds
    /// `<r cb|cbSub|cv bit value>` with `value = -1` on failure.
    pub fn write_cv_bit_cmd<W: Write>(&mut self, args: &str, out: &mut W) {
        let (n, [cv, bit, value, cb, cb_sub]) = int_args::<5>(args);
        if n != 5 || !(1..=1024).contains(&cv) {
            return;
        }
        let result = match self.write_cv_bit(cv as u16, (bit & 0x07) as u8, (value & 0x01) as u8) {
            Ok(v) => v.map_or(-1, i32::from),
            Err(_) => return,
        };
        let _ = write!(out, "<r{}|{}|{} {} {}>", cb, cb_sub, cv, bit & 0x07, result);
    }
}

impl<const SLOTS: usize, PR, EN, F> fmt::Debug for ServiceMode<'_, SLOTS, PR, EN, F>
where
    PR: CurrentProbe,
    EN: StatefulOutputPin,
    F: FnMut(),
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceMode").finish_non_exhaustive()
    }
}
