//! Half-bit waveform generation and the refresh rotation.
//!
//! [`WaveformEngine`] is the interrupt-context half of an output. Each call
//! to [`tick`](WaveformEngine::tick) emits one half-cycle of the bipolar
//! rail signal on the polarity pin (high for the first half of a bit, low
//! for the second) and returns the microseconds until the next compare
//! match: 58 for a logical one, 100 for a logical zero. Re-arm a CTC timer
//! from the return value and the engine is the entire ISR body.
//!
//! Every packet starts with a preamble of logical ones whose length is
//! fixed at construction. When the stop bit of a frame completes, the
//! engine does its frame-end bookkeeping inside one critical section:
//!
//! 1. the packet counter increments;
//! 2. slot 0 with repeats remaining is re-emitted;
//! 3. otherwise a pending hand-off is adopted and the cell cleared;
//! 4. otherwise the rotation advances to the next persistent slot whose
//!    invalid flag is clear, falling back to the built-in idle packet.
//!
//! The engine never reads a slot whose invalid flag is set at selection
//! time, which is the other half of the loader's rewrite protocol.

use embedded_hal::digital::OutputPin;

use crate::consts::{ONE_HALF_BIT_US, ZERO_HALF_BIT_US};
use crate::packet::Slot;
use crate::registers::{SlotTable, Track};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Slot(u8),
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Preamble { sent: u8 },
    Payload { bit: u8 },
}

/// Renders slot buffers onto one rail polarity pin, one half-bit per tick.
///
/// The engine holds only its own cursor; all packet data stays inside the
/// [`Track`], which the foreground plane updates through the hand-off
/// protocol.
#[derive(Debug)]
pub struct WaveformEngine<P: OutputPin> {
    pin: P,
    preamble_bits: u8,
    source: Source,
    phase: Phase,
    second_half: bool,
}

impl<P: OutputPin> WaveformEngine<P> {
    /// Creates an engine driving `pin`, with `preamble_bits` logical ones
    /// in front of every packet (16 suits an operations output, 22 a
    /// programming output).
    ///
    /// The pin is driven low so the rails idle until the first tick.
    pub fn new(pin: P, preamble_bits: u8) -> Self {
        let mut pin = pin;
        let _ = pin.set_low();
        Self {
            pin,
            preamble_bits,
            source: Source::Idle,
            phase: Phase::Preamble { sent: 0 },
            second_half: false,
        }
    }

    /// Releases the polarity pin.
    pub fn free(self) -> P {
        self.pin
    }

    /// Emits the next half-cycle and returns its duration in microseconds.
    ///
    /// Call from the timer interrupt of the output this engine drives; the
    /// `track` must be the same instance on every call.
    pub fn tick<const SLOTS: usize>(&mut self, track: &Track<SLOTS>) -> Result<u32, P::Error> {
        let second = self.second_half;
        let half_us = track.with(|t| {
            let one = self.current_bit(t);
            let half_us = if one { ONE_HALF_BIT_US } else { ZERO_HALF_BIT_US };
            t.micros = t.micros.wrapping_add(half_us);
            if second {
                self.advance(t);
            }
            half_us
        });
        self.second_half = !second;
        if second {
            self.pin.set_low()?;
        } else {
            self.pin.set_high()?;
        }
        Ok(half_us)
    }

    fn current_bit<const SLOTS: usize>(&self, t: &SlotTable<SLOTS>) -> bool {
        match self.phase {
            Phase::Preamble { .. } => true,
            Phase::Payload { bit } => match self.source {
                Source::Slot(p) => t.slots[usize::from(p)].bit(bit),
                Source::Idle => Slot::IDLE.bit(bit),
            },
        }
    }

    fn frame_bits<const SLOTS: usize>(&self, t: &SlotTable<SLOTS>) -> u8 {
        match self.source {
            Source::Slot(p) => t.slots[usize::from(p)].len_bits(),
            Source::Idle => Slot::IDLE.len_bits(),
        }
    }

    fn advance<const SLOTS: usize>(&mut self, t: &mut SlotTable<SLOTS>) {
        match self.phase {
            Phase::Preamble { sent } => {
                let sent = sent + 1;
                self.phase = if sent >= self.preamble_bits {
                    Phase::Payload { bit: 0 }
                } else {
                    Phase::Preamble { sent }
                };
            }
            Phase::Payload { bit } => {
                let bit = bit + 1;
                if bit < self.frame_bits(t) {
                    self.phase = Phase::Payload { bit };
                } else {
                    self.finish_frame(t);
                }
            }
        }
    }

    fn finish_frame<const SLOTS: usize>(&mut self, t: &mut SlotTable<SLOTS>) {
        t.packets_transmitted = t.packets_transmitted.wrapping_add(1);
        if self.source == Source::Slot(0) && t.n_repeat > 0 {
            t.n_repeat -= 1; // re-emit the one-shot slot
        } else if let Some(p) = t.next.take() {
            self.source = Source::Slot(p);
        } else {
            self.source = self.rotate(t);
        }
        self.phase = Phase::Preamble { sent: 0 };
    }

    fn rotate<const SLOTS: usize>(&self, t: &SlotTable<SLOTS>) -> Source {
        let max = usize::from(t.max_loaded);
        if max == 0 {
            return Source::Idle;
        }
        let from = match self.source {
            Source::Slot(p) if (1..=max).contains(&usize::from(p)) => usize::from(p),
            _ => max, // scan starts at slot 1
        };
        for k in 1..=max {
            let cand = (from - 1 + k) % max + 1;
            if !t.slots[cand].is_invalid() {
                return Source::Slot(cand as u8);
            }
        }
        Source::Idle
    }
}
