//! Acknowledgement pulse detection.
//!
//! A decoder in service mode answers a matching verify or write packet by
//! briefly loading the track: a current bump of 4.5 to 8.5 ms, some 60 mA
//! above the quiescent draw. [`AckDetector`] recovers that pulse from a
//! stream of raw probe samples: it hunts for the rising flank, times the
//! dwell to the falling flank against the legal window, and then lingers
//! for three more packet transmissions so the decoder sees the follow-up
//! reset pattern before the next probe.
//!
//! The detector is deliberately free of I/O: feed it one sample per
//! [`poll`](AckDetector::poll) call together with the transmission clock
//! readings, and act on the returned [`AckPoll`]. There is no internal
//! clock; sampling cadence is whatever rate the current probe supports,
//! and all timing comes from the tick and packet counters maintained by
//! the waveform engine.
//!
//! Timeout is measured purely in transmitted packets: nine packet times
//! cover the three resets, five verifies and one packet of slack that the
//! programming sequence allows before giving up.

use crate::consts::{
    ACK_LINGER_PACKETS, ACK_MAX_TICKS, ACK_MIN_TICKS, ACK_SAMPLE_THRESHOLD, ACK_TIMEOUT_PACKETS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AckState {
    SeekRise,
    SeekFall { up_tick: u32 },
    Linger,
}

/// Outcome of feeding one current sample to the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AckPoll {
    /// Keep sampling.
    Pending,
    /// A pulse with a legal dwell just completed. Re-install the reset
    /// packet in slot 1 and keep polling through the linger.
    Confirmed,
    /// The linger elapsed; the acknowledgement stands.
    Ack,
    /// Nine packet times passed without a confirmed pulse. Re-install the
    /// reset packet and report failure.
    Timeout,
}

/// State machine that times one acknowledgement conversation.
///
/// Arm a fresh detector per probe packet; `base` is the averaged quiescent
/// current and `packets_now` the packet counter at arming time.
#[derive(Debug)]
pub struct AckDetector {
    base: u16,
    state: AckState,
    armed_at: u32,
}

impl AckDetector {
    /// Arms the detector against `base` at packet count `packets_now`.
    pub fn new(base: u16, packets_now: u32) -> Self {
        Self {
            base,
            state: AckState::SeekRise,
            armed_at: packets_now,
        }
    }

    /// Feeds one raw probe sample taken at tick `ticks` with `packets`
    /// packets transmitted so far.
    pub fn poll(&mut self, raw: u16, ticks: u32, packets: u32) -> AckPoll {
        let c = raw.saturating_sub(self.base);
        match self.state {
            AckState::SeekRise => {
                if c > ACK_SAMPLE_THRESHOLD {
                    self.state = AckState::SeekFall { up_tick: ticks };
                }
            }
            AckState::SeekFall { up_tick } => {
                if c < ACK_SAMPLE_THRESHOLD {
                    let dwell = ticks.wrapping_sub(up_tick);
                    if (ACK_MIN_TICKS..=ACK_MAX_TICKS).contains(&dwell) {
                        self.state = AckState::Linger;
                        self.armed_at = packets;
                        return AckPoll::Confirmed;
                    }
                    // too short or too long: a glitch, not an answer
                    self.state = AckState::SeekRise;
                }
            }
            AckState::Linger => {
                if packets.wrapping_sub(self.armed_at) >= ACK_LINGER_PACKETS {
                    return AckPoll::Ack;
                }
                return AckPoll::Pending;
            }
        }
        if packets.wrapping_sub(self.armed_at) >= ACK_TIMEOUT_PACKETS {
            return AckPoll::Timeout;
        }
        AckPoll::Pending
    }
}
