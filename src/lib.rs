//! # dcc-station
//!
//! A portable, no_std Rust core for NMRA Digital Command Control (DCC) base
//! stations: the part of the station that turns throttle, function,
//! accessory and configuration-variable commands into bit-packed DCC
//! packets, refreshes them onto the rails through an interrupt-driven
//! waveform engine, and performs closed-loop service-mode programming by
//! sensing the decoder's acknowledgement current pulse.
//!
//! This crate implements a software-based packet plane using:
//! - `embedded-hal` traits for digital I/O and timing
//! - interrupt-safe slot-table access with `critical-section`
//! - optional tick scheduling using either timer interrupts or blocking delay
//!
//! ## Crate features
//! | Feature               | Description |
//! |-----------------------|-------------|
//! | `std`                 | Disables `#![no_std]` support |
//! | `delayus-loop`        | Uses `embedded_hal::delay::DelayNs` for half-bit pacing |
//! | `timer-isr` (default) | Uses `critical_section::with` singleton helpers for ISR mounting |
//! | `defmt`               | Derives `defmt::Format` on public value types |
//! | `log`                 | Emits `log` records at service-mode milestones |
//!
//! ## Software Features
//!
//! - **Two independent outputs**: each [`registers::Track`] instance owns a
//!   slot table, hand-off cell and packet counters; a station declares one
//!   for the operations track and one for the programming track
//! - Bit-packed frame encoder with interleaved start bits, stop bit and XOR
//!   checksum ([`packet`])
//! - Continuous refresh rotation with one-shot repeats and slot recycling
//!   ([`registers`], [`waveform`])
//! - Service-mode CV read/write with current-pulse acknowledgement
//!   detection ([`service`], [`ack`], [`monitor`])
//! - Textual command surface compatible with the classic base-station
//!   protocol ([`commands`])
//!
//! ## Usage
//!
//! ```rust
//! use dcc_station::commands::CommandStation;
//! use dcc_station::registers::Track;
//!
//! static MAIN: Track<13> = Track::new();
//!
//! let mut station = CommandStation::new(&MAIN);
//! let mut response = dcc_station::heapless::String::<32>::new();
//! station.set_throttle("3 42 64 1", &mut response);
//! assert_eq!(response.as_str(), "<T3 64 1>");
//! ```
//!
//! The waveform side runs from a timer interrupt (or a polled delay loop,
//! feature `delayus-loop`): every tick emits one half-bit on the rail
//! polarity pin and returns the microseconds until the next compare match
//! (58 for a one, 100 for a zero).
//!
//! ## Integration Notes
//!
//! - Timing precision is critical; a CTC-style timer re-armed from the
//!   engine's return value is recommended (helpers in [`timer`])
//! - Only one engine instance may drive a given [`registers::Track`]
//! - The command plane busy-waits on the hand-off cell; it must run at a
//!   lower priority than the engine's interrupt
//!
//! --
//! Designed for `#![no_std]` use in resource-constrained embedded environments.

#![deny(
    nonstandard_style,
    improper_ctypes,
    non_shorthand_field_patterns,
    no_mangle_generic_items,
    overflowing_literals,
    path_statements,
    patterns_in_fns_without_body,
    unconditional_recursion,
    while_true,
    missing_debug_implementations,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces
)]
#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(test)]
extern crate std;

pub use critical_section;
pub use heapless;

pub mod ack;
pub mod commands;
pub mod consts;
pub mod monitor;
pub mod packet;
pub mod registers;
pub mod service;
pub mod timer;
pub mod waveform;

/// Errors reported by the typed command builders and service-mode entry
/// points.
///
/// The textual command surface maps every error to silence (the classic
/// protocol drops malformed commands), so this type only surfaces through
/// the typed API.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Packet payload length outside the legal 2..=5 byte range.
    BadPayloadLength,
    /// Persistent slot number outside `1..=capacity`.
    InvalidSlot,
    /// Cab address above 10239 or accessory address above 511.
    InvalidAddress,
    /// Accessory port outside `0..=3`.
    InvalidPort,
    /// Configuration variable outside `1..=1024`.
    InvalidCv,
}
