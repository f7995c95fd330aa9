//! AS111 wire protocol.
//!
//! Every request is a single frame:
//!
//! ```text
//! 0x99 | length | seq | command | payload[0..n] | checksum
//! ```
//!
//! `length` counts the sequence, command and checksum bytes plus the payload
//! (`3 + n`). The checksum is the two's complement of `command + sum(payload)`,
//! so those bytes and the checksum always sum to zero modulo 256.
//!
//! Responses have no common envelope that the host relies on; each query
//! reads its value from a fixed offset, counted from either end of the frame.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{Datelike, Timelike};
use serde::Serialize;

use crate::errors::TransportError;

// ============================================================================
// Constants
// ============================================================================

/// First byte of every request frame.
pub const FRAME_START: u8 = 0x99;

pub const CMD_QUERY_CAPABILITIES: u8 = 6;
pub const CMD_QUERY_NAME: u8 = 8;
pub const CMD_QUERY_VOLUME: u8 = 15;
pub const CMD_QUERY_VERSION: u8 = 19;
/// Multiplexed setter; the first payload byte selects what is set.
pub const CMD_SET: u8 = 17;

pub const SELECT_VOLUME: u8 = 0;
pub const SELECT_DISPLAY: u8 = 8;
pub const SELECT_ALARM_LED: u8 = 24;

/// Highest volume step the dock accepts.
pub const MAX_VOLUME: u8 = 32;

/// Largest payload that still fits the one-byte length field.
pub const MAX_PAYLOAD: usize = u8::MAX as usize - 3;

// ============================================================================
// Response Layout
// ============================================================================

/// Response windows as `[start, end)`; negative values count from the end.
pub const NAME_SPAN: (isize, isize) = (4, -1);
pub const VERSION_SPAN: (isize, isize) = (5, -3);
pub const CAPABILITIES_SPAN: (isize, isize) = (8, -1);

/// Expected response lengths per command.
///
/// Over RFCOMM the value is only compared against what arrived. The serial
/// link has no message boundaries, so it also uses the value as its read
/// target.
pub const NAME_RESPONSE_LEN: usize = 20;
pub const VERSION_RESPONSE_LEN: usize = 16;
pub const VOLUME_RESPONSE_LEN: usize = 6;
pub const CAPABILITIES_RESPONSE_LEN: usize = 13;
pub const SET_RESPONSE_LEN: usize = 5;

// ============================================================================
// Request Encoding
// ============================================================================

/// Frame encoder holding the request sequence counter.
///
/// The counter is bumped before every frame and wraps at 256. One codec
/// belongs to one session and is never shared between threads.
#[derive(Debug, Default, Clone)]
pub struct Codec {
    seq: u8,
}

impl Codec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a given counter value. The next frame carries `seq + 1`.
    pub fn with_sequence(seq: u8) -> Self {
        Self { seq }
    }

    /// Sequence number carried by the most recent frame.
    pub fn sequence(&self) -> u8 {
        self.seq
    }

    /// Build the next request frame for `command`.
    pub fn build_request(&mut self, command: u8, payload: &[u8]) -> Vec<u8> {
        debug_assert!(
            payload.len() <= MAX_PAYLOAD,
            "payload of {} bytes overflows the length field",
            payload.len()
        );
        self.seq = self.seq.wrapping_add(1);

        let mut frame = Vec::with_capacity(payload.len() + 5);
        frame.push(FRAME_START);
        frame.push((payload.len() + 3) as u8);
        frame.push(self.seq);
        frame.push(command);
        frame.extend_from_slice(payload);
        frame.push(checksum(command, payload));
        frame
    }
}

/// Two's complement of `command + sum(payload)`, truncated to a byte.
pub fn checksum(command: u8, payload: &[u8]) -> u8 {
    let sum = payload
        .iter()
        .fold(command, |acc, &byte| acc.wrapping_add(byte));
    sum.wrapping_neg()
}

/// The seven clock/display fields sent with [`SELECT_DISPLAY`].
///
/// The dock renders `hour` and `minute` as its two digit pairs, which is
/// how arbitrary numbers get onto the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayFields {
    pub century: u8,
    pub year: u8,
    /// Month, 0-based.
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl DisplayFields {
    pub fn from_datetime<T: Datelike + Timelike>(dt: &T) -> Self {
        let year = dt.year().clamp(0, 9999) as u32;
        Self {
            century: (year / 100) as u8,
            year: (year % 100) as u8,
            month: dt.month0() as u8,
            day: dt.day() as u8,
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
            // leap seconds show up as 60
            second: dt.second().min(59) as u8,
        }
    }

    /// Keep the date, put two arbitrary pairs into the hour/minute slots.
    pub fn with_pairs(self, first: u8, second: u8) -> Self {
        Self {
            hour: first,
            minute: second,
            second: 0,
            ..self
        }
    }

    pub fn to_array(self) -> [u8; 7] {
        [
            self.century,
            self.year,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
        ]
    }

    /// Payload for a `CMD_SET` display request, selector included.
    pub fn to_payload(self) -> [u8; 8] {
        let f = self.to_array();
        [SELECT_DISPLAY, f[0], f[1], f[2], f[3], f[4], f[5], f[6]]
    }
}

impl fmt::Display for DisplayFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}{:02}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.century,
            self.year,
            self.month + 1,
            self.day,
            self.hour,
            self.minute,
            self.second
        )
    }
}

/// Split a four-digit number into its upper and lower digit pairs.
///
/// Values above 9999 keep only their last four digits.
pub fn split_pairs(number: u16) -> (u8, u8) {
    let number = number % 10_000;
    ((number / 100) as u8, (number % 100) as u8)
}

// ============================================================================
// Response Decoding
// ============================================================================

/// Resolve `[start, end)` bounds: negative indices count from the
/// end, everything is clamped, and an inverted range is empty.
fn slice_bounds(len: usize, start: isize, end: isize) -> (usize, usize) {
    let resolve = |i: isize| -> usize {
        if i < 0 {
            len.saturating_sub(i.unsigned_abs())
        } else {
            (i as usize).min(len)
        }
    };
    let from = resolve(start);
    let to = resolve(end);
    (from, to.max(from))
}

/// Decode text from a response.
///
/// Each byte becomes one character and NUL padding is dropped before the
/// `[start, end)` character window is applied.
pub fn extract_string(frame: &[u8], start: isize, end: isize) -> String {
    let chars: Vec<char> = frame
        .iter()
        .filter(|&&b| b != 0)
        .map(|&b| b as char)
        .collect();
    let (from, to) = slice_bounds(chars.len(), start, end);
    chars[from..to].iter().collect()
}

/// Volume sits in the byte before the checksum.
pub fn extract_volume(frame: &[u8]) -> Result<u8, TransportError> {
    if frame.len() < 2 {
        return Err(TransportError::ShortResponse {
            needed: 2,
            actual: frame.len(),
        });
    }
    Ok(frame[frame.len() - 2])
}

/// Bytes of `frame` inside a `[start, end)` window.
pub fn extract_bytes(frame: &[u8], start: isize, end: isize) -> &[u8] {
    let (from, to) = slice_bounds(frame.len(), start, end);
    &frame[from..to]
}

/// Decode the capability bitmask of a capabilities response.
///
/// The byte order is reversed first, then bits are numbered from bit 0 of
/// the (originally last) byte upwards. Bits past the end of the capability
/// table are ignored.
pub fn decode_capabilities(bitmask: &[u8]) -> BTreeSet<Capability> {
    let mut found = BTreeSet::new();
    for (byte_index, byte) in bitmask.iter().rev().enumerate() {
        for bit in 0..8 {
            if byte & (1 << bit) == 0 {
                continue;
            }
            if let Some(cap) = Capability::from_index(byte_index * 8 + bit) {
                found.insert(cap);
            }
        }
    }
    found
}

// ============================================================================
// Capabilities
// ============================================================================

/// Optional dock features, in bitmask order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Capability {
    Volume,
    Dsc,
    Dbb,
    Treble,
    Bass,
    FullRangeEq,
    Balance,
    Loudness,
    AudioSource,
    FmTuner,
    AmTuner,
    DabTuner,
    Alarm,
    SleepTimer,
    DateTime,
    DisplayBrightness,
    DemoMode,
    Playback,
    ShuffleRepeat,
    Battery,
    DeviceName,
    FirmwareVersion,
    Profile,
    Led,
    Nfc,
    SpeakerPairing,
    AutoStandby,
}

impl Capability {
    pub const ALL: [Capability; 27] = [
        Capability::Volume,
        Capability::Dsc,
        Capability::Dbb,
        Capability::Treble,
        Capability::Bass,
        Capability::FullRangeEq,
        Capability::Balance,
        Capability::Loudness,
        Capability::AudioSource,
        Capability::FmTuner,
        Capability::AmTuner,
        Capability::DabTuner,
        Capability::Alarm,
        Capability::SleepTimer,
        Capability::DateTime,
        Capability::DisplayBrightness,
        Capability::DemoMode,
        Capability::Playback,
        Capability::ShuffleRepeat,
        Capability::Battery,
        Capability::DeviceName,
        Capability::FirmwareVersion,
        Capability::Profile,
        Capability::Led,
        Capability::Nfc,
        Capability::SpeakerPairing,
        Capability::AutoStandby,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Volume => "VOLUME",
            Capability::Dsc => "DSC",
            Capability::Dbb => "DBB",
            Capability::Treble => "TREBLE",
            Capability::Bass => "BASS",
            Capability::FullRangeEq => "FULL_RANGE_EQ",
            Capability::Balance => "BALANCE",
            Capability::Loudness => "LOUDNESS",
            Capability::AudioSource => "AUDIO_SOURCE",
            Capability::FmTuner => "FM_TUNER",
            Capability::AmTuner => "AM_TUNER",
            Capability::DabTuner => "DAB_TUNER",
            Capability::Alarm => "ALARM",
            Capability::SleepTimer => "SLEEP_TIMER",
            Capability::DateTime => "DATE_TIME",
            Capability::DisplayBrightness => "DISPLAY_BRIGHTNESS",
            Capability::DemoMode => "DEMO_MODE",
            Capability::Playback => "PLAYBACK",
            Capability::ShuffleRepeat => "SHUFFLE_REPEAT",
            Capability::Battery => "BATTERY",
            Capability::DeviceName => "DEVICE_NAME",
            Capability::FirmwareVersion => "FIRMWARE_VERSION",
            Capability::Profile => "PROFILE",
            Capability::Led => "LED",
            Capability::Nfc => "NFC",
            Capability::SpeakerPairing => "SPEAKER_PAIRING",
            Capability::AutoStandby => "AUTO_STANDBY",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn frame_sum_ok(frame: &[u8]) -> bool {
        // command + payload + checksum
        let tail = &frame[3..];
        tail.iter().fold(0u8, |acc, &b| acc.wrapping_add(b)) == 0
    }

    #[test]
    fn request_layout_and_checksum() {
        let mut codec = Codec::new();
        let frame = codec.build_request(CMD_QUERY_NAME, &[]);
        assert_eq!(frame, vec![0x99, 3, 1, 8, 0xF8]);

        for payload in [&[][..], &[0], &[8, 20, 26, 9, 18, 12, 30, 0], &[255; 40]] {
            let frame = codec.build_request(CMD_SET, payload);
            assert_eq!(frame.len(), payload.len() + 5);
            assert_eq!(frame[1] as usize, payload.len() + 3);
            assert!(frame_sum_ok(&frame), "bad checksum in {frame:02X?}");
        }
    }

    #[test]
    fn sequence_increments_and_wraps() {
        let mut codec = Codec::with_sequence(253);
        let seqs: Vec<u8> = (0..4)
            .map(|_| codec.build_request(CMD_QUERY_VOLUME, &[0])[2])
            .collect();
        assert_eq!(seqs, vec![254, 255, 0, 1]);
        assert_eq!(codec.sequence(), 1);
    }

    #[test]
    fn same_counter_same_bytes() {
        let a = Codec::with_sequence(41).build_request(CMD_SET, &[0, 12]);
        let b = Codec::with_sequence(41).build_request(CMD_SET, &[0, 12]);
        assert_eq!(a, b);
    }

    #[test]
    fn capabilities_decoding() {
        assert!(decode_capabilities(&[0, 0, 0, 0]).is_empty());
        assert_eq!(
            decode_capabilities(&[0x01]).into_iter().collect::<Vec<_>>(),
            vec![Capability::Volume]
        );

        let caps = decode_capabilities(&[0xFF, 0x00]);
        let indices: Vec<usize> = caps.iter().map(|c| c.index()).collect();
        assert_eq!(indices, (8..16).collect::<Vec<_>>());
    }

    #[test]
    fn capability_bits_past_table_are_ignored() {
        // bits 24..31; only 24, 25, 26 exist
        let caps = decode_capabilities(&[0xFF, 0x00, 0x00, 0x00]);
        assert_eq!(
            caps.into_iter().collect::<Vec<_>>(),
            vec![
                Capability::Nfc,
                Capability::SpeakerPairing,
                Capability::AutoStandby
            ]
        );
        assert!(decode_capabilities(&[0x80, 0, 0, 0, 0]).is_empty());
    }

    #[test]
    fn strings_skip_nul_padding() {
        assert_eq!(extract_string(&[72, 105, 0, 0], 0, 4), "Hi");
        let frame = b"\x99\x0c\x01\x08AS111\x00\x00\x00\x5c";
        assert_eq!(extract_string(frame, NAME_SPAN.0, NAME_SPAN.1), "AS111");
    }

    #[test]
    fn string_slices_out_of_range_are_empty() {
        assert_eq!(extract_string(&[65, 66], 4, -1), "");
        assert_eq!(extract_string(&[], 5, -3), "");
        assert_eq!(extract_string(&[65, 66, 67], -10, 10), "ABC");
    }

    #[test]
    fn volume_from_short_frame_is_an_error() {
        assert_eq!(extract_volume(&[0x99, 4, 7, 15, 0, 12, 0xE1]).unwrap(), 12);
        match extract_volume(&[]) {
            Err(TransportError::ShortResponse { needed: 2, actual: 0 }) => {}
            other => panic!("expected short response, got {other:?}"),
        }
        assert!(extract_volume(&[9]).is_err());
    }

    #[test]
    fn display_fields_from_datetime() {
        let dt = NaiveDate::from_ymd_opt(2026, 10, 18)
            .unwrap()
            .and_hms_opt(7, 5, 9)
            .unwrap();
        let fields = DisplayFields::from_datetime(&dt);
        assert_eq!(fields.to_array(), [20, 26, 9, 18, 7, 5, 9]);
        assert_eq!(fields.to_payload()[0], SELECT_DISPLAY);
        assert_eq!(fields.to_string(), "2026-10-18 07:05:09");

        let shown = fields.with_pairs(87, 65);
        assert_eq!(shown.to_array(), [20, 26, 9, 18, 87, 65, 0]);
    }

    #[test]
    fn number_splits_into_pairs() {
        assert_eq!(split_pairs(8765), (87, 65));
        assert_eq!(split_pairs(5), (0, 5));
        assert_eq!(split_pairs(12_345), (23, 45));
    }

    #[test]
    fn capability_names_round_trip_through_index() {
        for (i, cap) in Capability::ALL.iter().enumerate() {
            assert_eq!(cap.index(), i);
        }
        assert_eq!(Capability::Dbb.to_string(), "DBB");
        assert_eq!(
            serde_json::to_string(&Capability::FullRangeEq).unwrap(),
            "\"FULL_RANGE_EQ\""
        );
    }
}
