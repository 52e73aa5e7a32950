//! Constants used across the DCC packet core.
//!
//! This module defines protocol-wide constants for frame sizing, half-bit
//! timing, preamble lengths, service-mode instruction opcodes, and the
//! acknowledgement-detection thresholds.
//!
//! ## Key Concepts
//!
//! - **Frame sizing**: a DCC payload of 2..=5 bytes gains an XOR checksum
//!   byte and is packed with interleaved start bits and a trailing stop bit,
//!   so every legal frame fits a 9-byte buffer.
//! - **Half-bit timing**: the rails carry a bipolar square wave; a logical
//!   one is two 58 µs half-cycles, a logical zero two 100 µs half-cycles.
//! - **Acknowledgement window**: a service-mode decoder answers with a
//!   current pulse of 4.5 to 8.5 ms, measured here in 4 µs ticks.
//!
//! These values should be used wherever framing, scheduling or detection
//! logic is implemented to keep both outputs consistent.

/// Smallest legal DCC payload (address byte plus one instruction byte).
pub const MIN_PAYLOAD_LEN: usize = 2;

/// Largest legal DCC payload before the checksum is appended.
pub const MAX_PAYLOAD_LEN: usize = 5;

/// Largest transmitted frame: payload plus the appended checksum byte.
pub const MAX_FRAME_LEN: usize = MAX_PAYLOAD_LEN + 1;

/// Size of the bit-packed output buffer.
///
/// A 6-byte frame packs to `9 * 6 + 1 = 55` bits; 9 bytes leave the final
/// buffer bit free for the invalid flag.
pub const PACKET_BUF_LEN: usize = 9;

/// Duration of one half-cycle of a logical one, in microseconds.
pub const ONE_HALF_BIT_US: u32 = 58;

/// Duration of one half-cycle of a logical zero, in microseconds.
pub const ZERO_HALF_BIT_US: u32 = 100;

/// Preamble length used on the operations (MAIN) output.
pub const MAIN_PREAMBLE_BITS: u8 = 16;

/// Preamble length used on the programming (PROG) output.
///
/// Service mode wants the long preamble so freshly powered decoders lock
/// before the instruction arrives.
pub const PROG_PREAMBLE_BITS: u8 = 22;

/// Suggested slot count (including the one-shot slot 0) for the MAIN
/// output: twelve persistent cab slots.
pub const MAIN_SLOTS: usize = 13;

/// Suggested slot count (including the one-shot slot 0) for the PROG
/// output: two persistent slots are plenty for service mode.
pub const PROG_SLOTS: usize = 3;

/// Length of one tick of the acknowledgement clock, in microseconds.
pub const TICK_MICROS: u32 = 4;

/// Minimum raw-count deflection above the base current that counts as the
/// rising edge of an acknowledgement pulse.
pub const ACK_SAMPLE_THRESHOLD: u16 = 30;

/// Shortest acceptable acknowledgement pulse, in ticks (4.5 ms).
pub const ACK_MIN_TICKS: u32 = 1125;

/// Longest acceptable acknowledgement pulse, in ticks (8.5 ms).
pub const ACK_MAX_TICKS: u32 = 2125;

/// Number of probe samples averaged into the base current.
pub const ACK_BASE_COUNT: usize = 10;

/// Packets to keep transmitting after a confirmed acknowledgement so the
/// decoder sees the follow-up reset pattern.
pub const ACK_LINGER_PACKETS: u32 = 3;

/// Acknowledgement timeout: 3 resets, 5 verifies and one extra packet time.
pub const ACK_TIMEOUT_PACKETS: u32 = 9;

/// Packets to wait after powering the programming output up from cold.
pub const POWER_ON_WAIT_PACKETS: u32 = 20;

/// Packets to wait when the programming output was already powered.
pub const POWER_WARM_WAIT_PACKETS: u32 = 3;

/// Smoothed current, in milliamps, at which the overload action trips.
pub const CURRENT_SAMPLE_MAX: i32 = 1000;

/// Divisor of the exponential low-pass filter applied to current samples.
pub const CURRENT_SMOOTHING_DIV: i32 = 8;

/// Payload of the idle packet transmitted when nothing else is scheduled.
pub const IDLE_PAYLOAD: [u8; 2] = [0xFF, 0x00];

/// Payload of the service-mode reset packet.
pub const RESET_PAYLOAD: [u8; 2] = [0x00, 0x00];

/// Service-mode instruction: verify a single CV bit (`0111 10AA`).
pub const CV_VERIFY_BIT: u8 = 0x78;

/// Service-mode instruction: verify a whole CV byte (`0111 01AA`).
pub const CV_VERIFY_BYTE: u8 = 0x74;

/// Service-mode instruction: write a whole CV byte (`0111 11AA`).
pub const CV_WRITE_BYTE: u8 = 0x7C;

/// Operations-mode instruction: write a CV byte on the move (`1110 11AA`).
pub const CV_WRITE_BYTE_MAIN: u8 = 0xEC;

/// Operations-mode instruction: manipulate a CV bit on the move (`1110 10AA`).
pub const CV_WRITE_BIT_MAIN: u8 = 0xE8;

/// Data byte template for a bit write: `1111 WBBB` with the value in W.
pub const CV_BIT_WRITE_DATA: u8 = 0xF0;

/// Data byte template for verifying that a CV bit reads as one: `1110 1BBB`.
pub const CV_BIT_VERIFY_DATA: u8 = 0xE8;

/// 128-step speed and direction instruction byte.
pub const SPEED_128_INSTRUCTION: u8 = 0x3F;

/// High-byte flag marking a two-byte (long) cab address.
pub const LONG_ADDRESS_FLAG: u8 = 0xC0;

/// Largest cab address encodable in the two-byte form.
pub const MAX_CAB_ADDRESS: u16 = 10239;

/// Largest basic accessory decoder address (9 bits).
pub const MAX_ACCESSORY_ADDRESS: u16 = 511;

/// Top of the 128-step speed range; codes 2..=127 map to 1..=126.
pub const MAX_SPEED: i16 = 126;
