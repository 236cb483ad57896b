//! Band Protocol
//!
//! Wire format for the frames exchanged with the band over the
//! write/notify characteristics. Everything here is pure: no I/O, no clocks.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use std::fmt;
use thiserror::Error;

/// Every outbound command frame is exactly this long on the wire
pub const COMMAND_FRAME_LEN: usize = 20;

/// Shortest inbound notification that carries a full sensor reading
pub const SENSOR_FRAME_MIN_LEN: usize = 13;

/// Longest phone number (in bytes) that fits in a call-event frame
pub const MAX_PHONE_NUMBER_LEN: usize = 17;

/// The band firmware rejects dates before this year
pub const MIN_SYNC_YEAR: i32 = 2021;

const TAG_TIME_SYNC: u8 = 0x00;
const TAG_CALL_EVENT: u8 = 0x01;

/// Kind of command carried by a [`CommandFrame`], taken from its leading tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    TimeSync,
    CallEvent,
}

impl CommandKind {
    pub fn tag(self) -> u8 {
        match self {
            Self::TimeSync => TAG_TIME_SYNC,
            Self::CallEvent => TAG_CALL_EVENT,
        }
    }
}

/// A fixed 20-byte outbound payload
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    kind: CommandKind,
    bytes: [u8; COMMAND_FRAME_LEN],
}

impl CommandFrame {
    fn new(kind: CommandKind) -> Self {
        let mut bytes = [0u8; COMMAND_FRAME_LEN];
        bytes[0] = kind.tag();
        Self { kind, bytes }
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn as_bytes(&self) -> &[u8; COMMAND_FRAME_LEN] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        to_hex(&self.bytes)
    }
}

impl fmt::Debug for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandFrame({:?}, {})", self.kind, self.to_hex())
    }
}

/// Build a time-sync frame
///
/// # Frame Structure (20 bytes)
///
/// ```text
/// [0]     : 0x00 (time sync tag)
/// [1]     : year - 2000 (year clamped to >= 2021)
/// [2]     : month (1-12)
/// [3]     : day (1-31)
/// [4]     : hour (0-23)
/// [5]     : minute (0-59)
/// [6]     : second (0-59)
/// [7-19]  : zero
/// ```
pub fn encode_time_sync<T: Datelike + Timelike>(now: &T) -> CommandFrame {
    let mut frame = CommandFrame::new(CommandKind::TimeSync);
    let year = now.year().max(MIN_SYNC_YEAR) - 2000;

    frame.bytes[1] = (year & 0xFF) as u8;
    frame.bytes[2] = (now.month() & 0xFF) as u8;
    frame.bytes[3] = (now.day() & 0xFF) as u8;
    frame.bytes[4] = (now.hour() & 0xFF) as u8;
    frame.bytes[5] = (now.minute() & 0xFF) as u8;
    frame.bytes[6] = (now.second() & 0xFF) as u8;
    frame
}

/// Build a call-event frame
///
/// # Frame Structure (20 bytes)
///
/// ```text
/// [0]     : 0x01 (call event tag)
/// [1]     : 1 = incoming call ringing, 0 = call ended / idle
/// [2]     : number length in bytes, at most 17
/// [3-19]  : raw number bytes, truncated to 17
/// ```
///
/// When the call is not ringing, or there is no number, bytes 2..20 stay zero.
pub fn encode_call_event(enabled: bool, phone_number: Option<&str>) -> CommandFrame {
    let mut frame = CommandFrame::new(CommandKind::CallEvent);
    frame.bytes[1] = u8::from(enabled);

    let number = match phone_number {
        Some(n) if enabled && !n.is_empty() => n.as_bytes(),
        _ => return frame,
    };

    let len = number.len().min(MAX_PHONE_NUMBER_LEN);
    frame.bytes[2] = len as u8;
    frame.bytes[3..3 + len].copy_from_slice(&number[..len]);
    frame
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("sensor frame too short: {len} bytes (need at least 13)")]
    TooShort { len: usize },
}

/// Calendar fields as reported by the band, one raw byte each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BandTimestamp {
    pub year_offset: u8,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl BandTimestamp {
    pub fn year(&self) -> i32 {
        2000 + i32::from(self.year_offset)
    }

    /// `None` when the band reports a date that does not exist
    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year(), u32::from(self.month), u32::from(self.day))?
            .and_hms_opt(
                u32::from(self.hour),
                u32::from(self.minute),
                u32::from(self.second),
            )
    }
}

impl fmt::Display for BandTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year(),
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second
        )
    }
}

/// One decoded sensor notification
///
/// Heart rate and blood pressure use 0 as "no reading". The raw byte is kept;
/// use the `*_present` / `Option` accessors to tell the two apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SensorReading {
    pub heart_rate: u8,
    pub systolic: u8,
    pub diastolic: u8,
    pub steps: u32,
    pub timestamp: BandTimestamp,
}

impl SensorReading {
    pub fn heart_rate_present(&self) -> bool {
        self.heart_rate != 0
    }

    pub fn systolic_present(&self) -> bool {
        self.systolic != 0
    }

    pub fn diastolic_present(&self) -> bool {
        self.diastolic != 0
    }

    pub fn heart_rate_bpm(&self) -> Option<u8> {
        present(self.heart_rate)
    }

    /// (systolic, diastolic) in mmHg, each `None` when not measured
    pub fn blood_pressure(&self) -> (Option<u8>, Option<u8>) {
        (present(self.systolic), present(self.diastolic))
    }
}

/// Placeholder shown for a field the band did not measure
pub const NO_READING: &str = "--";

impl fmt::Display for SensorReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HR {} bpm, BP {}/{}, steps {}, at {}",
            display_or_placeholder(self.heart_rate),
            display_or_placeholder(self.systolic),
            display_or_placeholder(self.diastolic),
            self.steps,
            self.timestamp
        )
    }
}

fn present(raw: u8) -> Option<u8> {
    (raw != 0).then_some(raw)
}

fn display_or_placeholder(raw: u8) -> String {
    match present(raw) {
        Some(v) => v.to_string(),
        None => NO_READING.to_string(),
    }
}

/// Decode a sensor notification
///
/// # Frame Structure (>= 13 bytes)
///
/// ```text
/// [0]     : heart rate (bpm, 0 = no reading)
/// [1]     : systolic pressure (mmHg, 0 = no reading)
/// [2]     : diastolic pressure (mmHg, 0 = no reading)
/// [3-5]   : step count (u24 big-endian)
/// [6]     : year - 2000
/// [7]     : month
/// [8]     : day
/// [9]     : hour
/// [10]    : minute
/// [11]    : second
/// [12..]  : reserved
/// ```
pub fn decode_sensor_frame(bytes: &[u8]) -> Result<SensorReading, FrameError> {
    if bytes.len() < SENSOR_FRAME_MIN_LEN {
        return Err(FrameError::TooShort { len: bytes.len() });
    }

    let steps = u32::from_be_bytes([0, bytes[3], bytes[4], bytes[5]]);

    Ok(SensorReading {
        heart_rate: bytes[0],
        systolic: bytes[1],
        diastolic: bytes[2],
        steps,
        timestamp: BandTimestamp {
            year_offset: bytes[6],
            month: bytes[7],
            day: bytes[8],
            hour: bytes[9],
            minute: bytes[10],
            second: bytes[11],
        },
    })
}

/// Space separated upper-case hex, the way raw frames show up in logs
pub fn to_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse hex written as `"48 78 50"`, `"487850"` or `"48:78:50"`
pub fn parse_hex(input: &str) -> Option<Vec<u8>> {
    let digits: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':' && *c != '-')
        .collect();
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .unwrap_or(&digits);

    if digits.len() % 2 != 0 || !digits.is_ascii() {
        return None;
    }

    (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&digits[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_frame() -> [u8; 20] {
        let mut frame = [0u8; 20];
        frame[..12].copy_from_slice(&[72, 120, 80, 0x00, 0x03, 0xE8, 24, 5, 1, 8, 30, 0]);
        frame
    }

    #[test]
    fn test_decode_sample_frame() {
        let reading = decode_sensor_frame(&sample_frame()).unwrap();

        assert_eq!(reading.heart_rate, 72);
        assert_eq!(reading.systolic, 120);
        assert_eq!(reading.diastolic, 80);
        assert_eq!(reading.steps, 1000);
        assert_eq!(reading.timestamp.year(), 2024);
        assert_eq!(
            reading.timestamp.to_datetime(),
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap().and_hms_opt(8, 30, 0)
        );
        assert_eq!(reading.heart_rate_bpm(), Some(72));
        assert_eq!(reading.blood_pressure(), (Some(120), Some(80)));
    }

    #[test]
    fn test_decode_accepts_exact_minimum() {
        let frame = sample_frame();
        assert!(decode_sensor_frame(&frame[..SENSOR_FRAME_MIN_LEN]).is_ok());
    }

    #[test]
    fn test_decode_rejects_short_frames() {
        let frame = sample_frame();
        for len in 0..SENSOR_FRAME_MIN_LEN {
            assert_eq!(
                decode_sensor_frame(&frame[..len]),
                Err(FrameError::TooShort { len })
            );
        }
    }

    #[test]
    fn test_decode_full_width_step_counter() {
        let mut frame = sample_frame();
        frame[3..6].copy_from_slice(&[0xFF, 0xFF, 0xFF]);
        assert_eq!(decode_sensor_frame(&frame).unwrap().steps, 0x00FF_FFFF);
    }

    #[test]
    fn test_zero_vitals_are_absent() {
        let mut frame = sample_frame();
        frame[0] = 0;
        frame[2] = 0;
        frame[3..6].copy_from_slice(&[0, 0, 0]);
        let reading = decode_sensor_frame(&frame).unwrap();

        assert!(!reading.heart_rate_present());
        assert!(reading.systolic_present());
        assert!(!reading.diastolic_present());
        assert_eq!(reading.heart_rate_bpm(), None);
        assert_eq!(reading.steps, 0);
        assert_eq!(
            reading.to_string(),
            "HR -- bpm, BP 120/--, steps 0, at 2024-05-01 08:30:00"
        );
    }

    #[test]
    fn test_impossible_date_has_no_datetime() {
        let mut frame = sample_frame();
        frame[7] = 2;
        frame[8] = 30;
        let reading = decode_sensor_frame(&frame).unwrap();
        assert_eq!(reading.timestamp.to_datetime(), None);
    }

    #[test]
    fn test_time_sync_layout() {
        let now = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(8, 30, 59)
            .unwrap();
        let frame = encode_time_sync(&now);

        assert_eq!(frame.kind(), CommandKind::TimeSync);
        assert_eq!(&frame.as_bytes()[..7], &[0x00, 24, 5, 1, 8, 30, 59]);
        assert!(frame.as_bytes()[7..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_time_sync_clamps_old_years() {
        let now = NaiveDate::from_ymd_opt(1999, 12, 31)
            .unwrap()
            .and_hms_opt(23, 59, 0)
            .unwrap();
        assert_eq!(encode_time_sync(&now).as_bytes()[1], 21);
    }

    #[test]
    fn test_time_sync_truncates_far_future_year() {
        // 2300 - 2000 = 300 -> 300 & 0xFF = 44
        let now = NaiveDate::from_ymd_opt(2300, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(encode_time_sync(&now).as_bytes()[1], 44);
    }

    #[test]
    fn test_call_event_with_number() {
        let frame = encode_call_event(true, Some("5551234"));

        assert_eq!(frame.kind(), CommandKind::CallEvent);
        assert_eq!(&frame.as_bytes()[..3], &[0x01, 1, 7]);
        assert_eq!(&frame.as_bytes()[3..10], b"5551234");
        assert!(frame.as_bytes()[10..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_call_event_truncates_long_number() {
        let frame = encode_call_event(true, Some("123456789012345678"));

        assert_eq!(frame.as_bytes()[2], 17);
        assert_eq!(&frame.as_bytes()[3..20], b"12345678901234567");
    }

    #[test]
    fn test_call_event_disabled_or_missing_number() {
        let expected_tail = [0u8; 18];

        let idle = encode_call_event(false, Some("5551234"));
        assert_eq!(&idle.as_bytes()[..2], &[0x01, 0]);
        assert_eq!(&idle.as_bytes()[2..], &expected_tail);

        let anonymous = encode_call_event(true, None);
        assert_eq!(&anonymous.as_bytes()[..2], &[0x01, 1]);
        assert_eq!(&anonymous.as_bytes()[2..], &expected_tail);

        let empty = encode_call_event(true, Some(""));
        assert_eq!(&empty.as_bytes()[2..], &expected_tail);
    }

    #[test]
    fn test_hex_helpers() {
        assert_eq!(to_hex(&[0x00, 0x03, 0xE8]), "00 03 E8");
        assert_eq!(parse_hex("00 03 e8"), Some(vec![0x00, 0x03, 0xE8]));
        assert_eq!(parse_hex("0x0003E8"), Some(vec![0x00, 0x03, 0xE8]));
        assert_eq!(parse_hex("0"), None);
        assert_eq!(parse_hex("zz"), None);
    }
}
