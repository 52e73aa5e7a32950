//! Slot table, address map and loader for one DCC output.
//!
//! A [`Track`] is the shared state between the two execution contexts of an
//! output: the foreground command plane, which assembles payloads and loads
//! them into slots, and the timer-interrupt waveform plane, which walks the
//! packed buffers bit by bit. All shared fields live behind a
//! `critical_section::Mutex<RefCell<..>>`; every access, a single load of
//! the packet counter included, runs inside a critical section, so the
//! discipline holds on targets where a `u32` read is not atomic.
//!
//! ## Slot numbering
//!
//! `SLOTS` is the physical slot count. Slot 0 is the one-shot slot used for
//! packets that need a burst of transmissions rather than indefinite
//! refresh (functions, accessories, operations-mode CV writes). Numbers
//! `1..SLOTS-1` are user-facing persistent slots; an address map tracks
//! which physical slot currently backs each number, and reassigning a
//! number recycles its previous slot on the following update.
//!
//! ## Hand-off protocol
//!
//! The loader encodes into a slot whose invalid flag is set, busy-waits
//! until the hand-off cell is empty, then, inside one critical section,
//! publishes the slot pointer and clears its flag. The engine adopts the
//! cell at a frame boundary and clears it exactly once. At any instant the
//! cell is either empty or refers to a fully encoded, valid slot.

use core::cell::RefCell;
use core::convert::Infallible;
use core::fmt;

use critical_section::Mutex;

use crate::consts::{MAX_PAYLOAD_LEN, MIN_PAYLOAD_LEN, TICK_MICROS};
use crate::packet::Slot;
use crate::Error;

/// The slot storage and bookkeeping shared with the waveform engine.
///
/// Only reachable through [`Track`]; fields are crate-internal so the
/// engine can walk buffers without copying them out.
#[derive(Debug)]
pub struct SlotTable<const SLOTS: usize> {
    pub(crate) slots: [Slot; SLOTS],
    map: [Option<u8>; SLOTS],
    recycle: Option<u8>,
    pub(crate) max_loaded: u8,
    pub(crate) next: Option<u8>,
    pub(crate) n_repeat: u8,
    pub(crate) packets_transmitted: u32,
    pub(crate) micros: u32,
}

impl<const SLOTS: usize> SlotTable<SLOTS> {
    const fn new() -> Self {
        Self {
            slots: [Slot::EMPTY; SLOTS],
            map: [None; SLOTS],
            recycle: None,
            max_loaded: 0,
            next: None,
            n_repeat: 0,
            packets_transmitted: 0,
            micros: 0,
        }
    }

    /// Picks the physical slot that will back `reg` from now on and
    /// remembers the displaced slot as the next recycling candidate.
    fn allocate(&mut self, reg: usize) -> usize {
        let mut new = usize::from(self.max_loaded) + 1;
        if let Some(r) = self.recycle {
            if r <= self.max_loaded {
                new = usize::from(r);
            }
        }
        let old = self.map[reg];
        if new >= SLOTS {
            // watermark at the top and no recycling candidate: fall back to
            // any unmapped slot, or re-encode the number's own slot in place
            new = self
                .unmapped_slot()
                .or(old.map(usize::from))
                .unwrap_or(usize::from(self.max_loaded));
        }
        self.recycle = if old == Some(new as u8) { None } else { old };
        self.map[reg] = Some(new as u8);
        new
    }

    fn unmapped_slot(&self) -> Option<usize> {
        (1..SLOTS).find(|p| !self.map.iter().any(|m| *m == Some(*p as u8)))
    }

    /// Publishes `phys` through the hand-off cell. Runs inside a critical
    /// section; the displaced slot is flagged here so the engine drops it
    /// on its next rotation.
    fn publish(&mut self, phys: usize, repeat: u8) {
        self.slots[phys].mark_valid();
        self.next = Some(phys as u8);
        if phys == 0 {
            self.n_repeat = repeat;
        } else {
            if let Some(r) = self.recycle {
                self.slots[usize::from(r)].mark_invalid();
            }
            if phys as u8 > self.max_loaded {
                self.max_loaded = phys as u8;
            }
        }
    }
}

/// One DCC output's packet core: slot table, hand-off cell and counters.
///
/// `Track::new()` is `const`, so the two outputs of a station are plain
/// statics:
///
/// ```rust
/// use dcc_station::consts::{MAIN_SLOTS, PROG_SLOTS};
/// use dcc_station::registers::Track;
///
/// static MAIN: Track<MAIN_SLOTS> = Track::new();
/// static PROG: Track<PROG_SLOTS> = Track::new();
/// # assert_eq!(MAIN.capacity(), 12);
/// # assert_eq!(PROG.capacity(), 2);
/// ```
pub struct Track<const SLOTS: usize> {
    state: Mutex<RefCell<SlotTable<SLOTS>>>,
}

impl<const SLOTS: usize> Track<SLOTS> {
    /// Creates an empty slot table. Until the first load the waveform
    /// engine transmits idle packets.
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(SlotTable::new())),
        }
    }

    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut SlotTable<SLOTS>) -> R) -> R {
        critical_section::with(|cs| f(&mut self.state.borrow(cs).borrow_mut()))
    }

    /// Number of user-facing persistent slots.
    pub fn capacity(&self) -> usize {
        SLOTS - 1
    }

    /// Packets fully emitted by the waveform engine so far.
    ///
    /// This counter is the only clock service mode uses for its timeouts.
    pub fn packets_transmitted(&self) -> u32 {
        self.with(|t| t.packets_transmitted)
    }

    /// Elapsed transmission time in 4 µs ticks.
    pub fn ticks(&self) -> u32 {
        self.with(|t| t.micros / TICK_MICROS)
    }

    /// Tick clock and packet counter read under one critical section, so
    /// the acknowledgement detector sees a consistent pair.
    pub(crate) fn clock(&self) -> (u32, u32) {
        self.with(|t| (t.micros / TICK_MICROS, t.packets_transmitted))
    }

    /// Whether a loaded slot is still waiting to be adopted by the engine.
    pub fn handoff_pending(&self) -> bool {
        self.with(|t| t.next.is_some())
    }

    /// Non-blocking probe of the hand-off cell; `nb::block!`-able when a
    /// caller wants to park until the engine has caught up.
    pub fn poll_handoff(&self) -> nb::Result<(), Infallible> {
        if self.handoff_pending() {
            Err(nb::Error::WouldBlock)
        } else {
            Ok(())
        }
    }

    /// Copy of the packet currently backing slot number `reg` (the one-shot
    /// buffer for `reg == 0`), or `None` if the number was never loaded.
    pub fn refreshing(&self, reg: usize) -> Option<Slot> {
        if reg >= SLOTS {
            return None;
        }
        self.with(|t| {
            if reg == 0 {
                Some(t.slots[0])
            } else {
                t.map[reg].map(|p| t.slots[usize::from(p)])
            }
        })
    }

    /// Loads `payload` into slot `reg`, spinning while the hand-off cell is
    /// occupied. See [`Track::load_packet_with`].
    pub fn load_packet(&self, reg: usize, payload: &[u8], repeat: u8) -> Result<(), Error> {
        self.load_packet_with(reg, payload, repeat, &mut core::hint::spin_loop)
    }

    /// Loads `payload` (2..=5 bytes) into slot `reg`, calling `idle` once
    /// per busy-wait iteration.
    ///
    /// `reg` is coerced modulo the table size. For persistent slots the
    /// payload is encoded into a freshly allocated physical slot before the
    /// wait, so the only blocking is on the engine adopting the *previous*
    /// load, bounded by one packet time. Slot 0 shares its buffer with the
    /// engine, so there the wait comes first. `repeat` requests that many
    /// extra transmissions of slot 0 and is ignored for persistent slots.
    pub fn load_packet_with(
        &self,
        reg: usize,
        payload: &[u8],
        repeat: u8,
        idle: &mut impl FnMut(),
    ) -> Result<(), Error> {
        if !(MIN_PAYLOAD_LEN..=MAX_PAYLOAD_LEN).contains(&payload.len()) {
            return Err(Error::BadPayloadLength);
        }
        let reg = reg % SLOTS;

        if reg == 0 {
            while self.handoff_pending() {
                idle();
            }
            self.with(|t| {
                t.slots[0].encode(payload);
                t.publish(0, repeat);
            });
            return Ok(());
        }

        let phys = self.with(|t| {
            let phys = t.allocate(reg);
            t.slots[phys].encode(payload);
            phys
        });
        while self.handoff_pending() {
            idle();
        }
        self.with(|t| t.publish(phys, repeat));
        Ok(())
    }
}

impl<const SLOTS: usize> fmt::Debug for Track<SLOTS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track").field("slots", &SLOTS).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::vec::Vec;

    fn drain<const SLOTS: usize>(track: &Track<SLOTS>) {
        track.with(|t| t.next = None);
    }

    fn mapped<const SLOTS: usize>(track: &Track<SLOTS>, reg: usize) -> Option<u8> {
        track.with(|t| t.map[reg])
    }

    #[test]
    fn first_load_goes_to_slot_one() {
        let track: Track<13> = Track::new();
        track.load_packet(3, &[0x2A, 0x3F, 0xC1], 0).unwrap();
        assert_eq!(mapped(&track, 3), Some(1));
        track.with(|t| {
            assert_eq!(t.max_loaded, 1);
            assert_eq!(t.next, Some(1));
            assert!(!t.slots[1].is_invalid());
        });
    }

    #[test]
    fn rejects_out_of_range_payloads() {
        let track: Track<13> = Track::new();
        assert_eq!(track.load_packet(1, &[0x01], 0), Err(Error::BadPayloadLength));
        assert_eq!(
            track.load_packet(1, &[0, 1, 2, 3, 4, 5], 0),
            Err(Error::BadPayloadLength)
        );
    }

    #[test]
    fn slot_number_coerced_modulo_table_size() {
        let track: Track<13> = Track::new();
        track.load_packet(13 + 2, &[0x05, 0x3F, 0x80], 0).unwrap();
        assert_eq!(mapped(&track, 2), Some(1));
    }

    #[test]
    fn max_loaded_is_monotone_and_bounded() {
        let track: Track<5> = Track::new();
        let mut seen = 0u8;
        for round in 0..12usize {
            let reg = round % 4 + 1;
            track.load_packet(reg, &[reg as u8, 0x3F, 0x80], 0).unwrap();
            track.with(|t| {
                assert!(t.max_loaded >= seen);
                assert!(usize::from(t.max_loaded) < 5);
                seen = t.max_loaded;
            });
            drain(&track);
        }
    }

    #[test]
    fn handoff_never_references_invalid_slot() {
        let track: Track<5> = Track::new();
        for round in 0..10usize {
            track
                .load_packet(round % 4 + 1, &[round as u8, 0x3F, 0x80], 0)
                .unwrap();
            track.with(|t| {
                let p = t.next.expect("hand-off pending after load");
                assert!(!t.slots[usize::from(p)].is_invalid());
                t.next = None;
            });
        }
    }

    #[test]
    fn reassignment_recycles_between_two_slots() {
        let track: Track<13> = Track::new();
        let mut used = BTreeSet::new();
        for round in 0..10u8 {
            track.load_packet(3, &[round, 0x3F, 0x80], 0).unwrap();
            used.insert(mapped(&track, 3).unwrap());
            drain(&track);
        }
        assert!(used.len() <= 2, "slot 3 churned across {:?}", used);
    }

    #[test]
    fn reassignment_invalidates_displaced_slot() {
        let track: Track<13> = Track::new();
        track.load_packet(3, &[0x01, 0x3F, 0x80], 0).unwrap();
        drain(&track);
        let old = mapped(&track, 3).unwrap();
        track.load_packet(3, &[0x02, 0x3F, 0x80], 0).unwrap();
        let new = mapped(&track, 3).unwrap();
        assert_ne!(old, new);
        track.with(|t| {
            assert!(t.slots[usize::from(old)].is_invalid());
            assert!(!t.slots[usize::from(new)].is_invalid());
        });
    }

    #[test]
    fn full_table_reassignment_stays_in_bounds() {
        let track: Track<4> = Track::new();
        for reg in 1..=3usize {
            track.load_packet(reg, &[reg as u8, 0x3F, 0x80], 0).unwrap();
            drain(&track);
        }
        // every physical slot is mapped; updating a number must re-use its
        // own slot rather than run off the table
        track.load_packet(2, &[0x77, 0x3F, 0x80], 0).unwrap();
        let phys = mapped(&track, 2).unwrap();
        assert!(usize::from(phys) < 4);
        track.with(|t| assert!(!t.slots[usize::from(phys)].is_invalid()));
        drain(&track);

        // the other mappings survived the churn
        let all: Vec<_> = (1..=3).map(|r| mapped(&track, r).unwrap()).collect();
        let distinct: BTreeSet<_> = all.iter().collect();
        assert_eq!(distinct.len(), 3);
    }

    #[test]
    fn slot_zero_sets_repeat_count() {
        let track: Track<13> = Track::new();
        track.load_packet(0, &[0x98, 0xFB], 4).unwrap();
        track.with(|t| {
            assert_eq!(t.next, Some(0));
            assert_eq!(t.n_repeat, 4);
            assert!(!t.slots[0].is_invalid());
        });
    }

    #[test]
    fn persistent_load_leaves_repeat_count_alone() {
        let track: Track<13> = Track::new();
        track.load_packet(0, &[0x00, 0x00], 3).unwrap();
        drain(&track);
        track.load_packet(1, &[0x78, 0x1C, 0xE8], 1).unwrap();
        track.with(|t| assert_eq!(t.n_repeat, 3));
    }

    #[test]
    fn poll_handoff_reports_pending_cell() {
        let track: Track<13> = Track::new();
        assert!(track.poll_handoff().is_ok());
        track.load_packet(1, &[0x05, 0x3F, 0x80], 0).unwrap();
        assert_eq!(track.poll_handoff(), Err(nb::Error::WouldBlock));
        drain(&track);
        assert!(nb::block!(track.poll_handoff()).is_ok());
    }

    #[test]
    fn refreshing_reads_back_current_mapping() {
        let track: Track<13> = Track::new();
        assert!(track.refreshing(3).is_none());
        track.load_packet(3, &[0x2A, 0x3F, 0xC1], 0).unwrap();
        let slot = track.refreshing(3).unwrap();
        assert_eq!(slot.len_bits(), 37);
        assert!(track.refreshing(13).is_none());
    }
}
