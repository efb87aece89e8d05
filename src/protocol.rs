//! Decoder for the cuff's measurement notifications.
//!
//! A measurement is spread over two packets: a reading-start packet that
//! names the user slot and carries the pressures, followed by a short
//! continuation packet with pulse and flags that does not repeat the user.
//! The user named by the last reading-start packet is therefore kept as
//! session state and passed in by the caller.
//!
//! Packets are recognised by exact length plus a big-endian header made of
//! the first five bytes (or the first byte for the 5-byte continuation).

use bytes::Buf;

use crate::types::{DisplayUnits, ReadingKey, ReadingValue, User};

/// Header of the display-unit packet
pub const DISPLAY_UNITS_HEADER: u64 = 0xA5_0201_0700;
/// Length of the display-unit packet
pub const DISPLAY_UNITS_LEN: usize = 13;

/// Header of the reading-start packet
pub const READING_START_HEADER: u64 = 0xA5_2202_1300;
/// Length of the reading-start packet
pub const READING_START_LEN: usize = 20;

/// Leading byte of the reading-continuation packet
pub const CONTINUATION_LEAD: u8 = 0x00;
/// Length of the reading-continuation packet
pub const CONTINUATION_LEN: usize = 5;

/// Header of the device-error packet
pub const DEVICE_ERROR_HEADER: u64 = 0xA5_2202_0A00;
/// Length of the device-error packet
pub const DEVICE_ERROR_LEN: usize = 16;

/// Conversion factor from mmHg to kPa
pub const MMHG_TO_KPA: f64 = 0.13332;

/// Error code reported after a successful reading
pub const ERROR_CODE_OK: &str = "OK";

const HEADER_LEN: usize = 5;
const UNITS_OFFSET: usize = 10;
const USER_OFFSET: usize = 14;
const SYSTOLIC_OFFSET: usize = 15;
const DIASTOLIC_OFFSET: usize = 17;
const PULSE_OFFSET: usize = 1;
const FLAGS_OFFSET: usize = 3;
const ERROR_OFFSET: usize = 15;

const UNITS_KPA: u8 = 0x01;
const FLAG_MOTION: u8 = 0x01;
const FLAG_IRREGULAR_HEARTBEAT: u8 = 0x04;

/// A single field write produced by the decoder; `None` clears the field
pub type ReadingUpdate = (ReadingKey, Option<ReadingValue>);

/// A recognised notification packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packet {
    /// Display unit changed on the cuff
    DisplayUnits(DisplayUnits),
    /// First half of a measurement
    ReadingStart {
        /// User slot the measurement belongs to
        user: User,
        /// Systolic pressure in mmHg
        systolic: u8,
        /// Diastolic pressure in mmHg
        diastolic: u8,
    },
    /// Second half of a measurement, for the active user
    ReadingContinuation {
        /// Pulse in bpm
        pulse: u8,
        /// Flag byte (bit 0: motion, exactly 0x04: irregular heartbeat)
        flags: u8,
    },
    /// The cuff aborted the measurement
    DeviceError {
        /// Raw error byte, zero based
        code: u8,
    },
}

impl Packet {
    /// Recognise a raw notification buffer
    ///
    /// Returns `None` for anything that is not one of the known shapes,
    /// including known headers with the wrong length.
    #[must_use]
    pub fn parse(data: &[u8]) -> Option<Self> {
        let header = (data.len() >= HEADER_LEN).then(|| (&data[..HEADER_LEN]).get_uint(HEADER_LEN));

        match (data.len(), header) {
            (DISPLAY_UNITS_LEN, Some(DISPLAY_UNITS_HEADER)) => {
                let units = if data[UNITS_OFFSET] == UNITS_KPA {
                    DisplayUnits::Kpa
                } else {
                    DisplayUnits::Mmhg
                };
                Some(Self::DisplayUnits(units))
            }
            (READING_START_LEN, Some(READING_START_HEADER)) => {
                // A slot outside 0/1 would address a field that does not exist.
                let user = User::from_index(data[USER_OFFSET])?;
                Some(Self::ReadingStart {
                    user,
                    systolic: data[SYSTOLIC_OFFSET],
                    diastolic: data[DIASTOLIC_OFFSET],
                })
            }
            (CONTINUATION_LEN, _) if data[0] == CONTINUATION_LEAD => {
                Some(Self::ReadingContinuation {
                    pulse: data[PULSE_OFFSET],
                    flags: data[FLAGS_OFFSET],
                })
            }
            (DEVICE_ERROR_LEN, Some(DEVICE_ERROR_HEADER)) => Some(Self::DeviceError {
                code: data[ERROR_OFFSET],
            }),
            _ => None,
        }
    }

    /// Field writes for this packet
    ///
    /// A reading-start packet moves `active_user`; continuation and error
    /// packets are routed to it.
    #[must_use]
    pub fn updates(self, active_user: &mut Option<User>) -> Vec<ReadingUpdate> {
        match self {
            Self::DisplayUnits(units) => vec![(
                ReadingKey::DisplayUnits,
                Some(ReadingValue::Text(units.as_str().to_string())),
            )],
            Self::ReadingStart {
                user,
                systolic,
                diastolic,
            } => {
                *active_user = Some(user);
                vec![
                    (ReadingKey::Systolic(user), Some(ReadingValue::Integer(systolic))),
                    (ReadingKey::Diastolic(user), Some(ReadingValue::Integer(diastolic))),
                    (
                        ReadingKey::SystolicKpa(user),
                        Some(ReadingValue::Float(f64::from(systolic) * MMHG_TO_KPA)),
                    ),
                    (
                        ReadingKey::DiastolicKpa(user),
                        Some(ReadingValue::Float(f64::from(diastolic) * MMHG_TO_KPA)),
                    ),
                    (
                        ReadingKey::ErrorCode,
                        Some(ReadingValue::Text(ERROR_CODE_OK.to_string())),
                    ),
                ]
            }
            Self::ReadingContinuation { pulse, flags } => {
                let Some(user) = *active_user else {
                    return Vec::new();
                };
                vec![
                    (ReadingKey::Pulse(user), Some(ReadingValue::Integer(pulse))),
                    (
                        ReadingKey::MotionIndicator(user),
                        Some(ReadingValue::Bool(flags & FLAG_MOTION != 0)),
                    ),
                    (
                        ReadingKey::IrregularHeartbeat(user),
                        Some(ReadingValue::Bool(flags == FLAG_IRREGULAR_HEARTBEAT)),
                    ),
                ]
            }
            Self::DeviceError { code } => {
                let mut updates = vec![(
                    ReadingKey::ErrorCode,
                    Some(ReadingValue::Text(format_error_code(code))),
                )];
                if let Some(user) = *active_user {
                    updates.extend([
                        (ReadingKey::Systolic(user), None),
                        (ReadingKey::Diastolic(user), None),
                        (ReadingKey::Pulse(user), None),
                    ]);
                }
                updates
            }
        }
    }
}

/// Device error code as shown on the cuff (`4` => `"E05"`)
#[must_use]
pub fn format_error_code(code: u8) -> String {
    format!("E{:02}", u16::from(code) + 1)
}

/// Whether `code` is `"OK"` or a code [`format_error_code`] can produce
#[must_use]
pub fn is_error_code(code: &str) -> bool {
    if code == ERROR_CODE_OK {
        return true;
    }
    code.strip_prefix('E')
        .filter(|digits| (2..=3).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|digits| digits.parse::<u16>().ok())
        .is_some_and(|n| (1..=256).contains(&n))
}

/// Decode one notification buffer into field writes
///
/// Unrecognised buffers yield no writes and leave `active_user` untouched.
#[must_use]
pub fn decode(data: &[u8], active_user: &mut Option<User>) -> Vec<ReadingUpdate> {
    Packet::parse(data).map_or_else(Vec::new, |packet| packet.updates(active_user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::DeviceState;

    fn reading_start(user: u8, systolic: u8, diastolic: u8) -> Vec<u8> {
        let mut data = vec![0u8; READING_START_LEN];
        data[..5].copy_from_slice(&[0xA5, 0x22, 0x02, 0x13, 0x00]);
        data[USER_OFFSET] = user;
        data[SYSTOLIC_OFFSET] = systolic;
        data[DIASTOLIC_OFFSET] = diastolic;
        data
    }

    fn display_units(value: u8) -> Vec<u8> {
        let mut data = vec![0u8; DISPLAY_UNITS_LEN];
        data[..5].copy_from_slice(&[0xA5, 0x02, 0x01, 0x07, 0x00]);
        data[UNITS_OFFSET] = value;
        data
    }

    fn device_error(code: u8) -> Vec<u8> {
        let mut data = vec![0u8; DEVICE_ERROR_LEN];
        data[..5].copy_from_slice(&[0xA5, 0x22, 0x02, 0x0A, 0x00]);
        data[ERROR_OFFSET] = code;
        data
    }

    fn get(state: &DeviceState, key: ReadingKey) -> Option<ReadingValue> {
        state.readings().get(key).cloned()
    }

    #[test]
    fn test_reading_start_user_two() {
        let mut state = DeviceState::new();
        state.apply_notification(&reading_start(1, 120, 80));

        assert_eq!(state.active_user(), Some(User::Second));
        assert_eq!(
            get(&state, ReadingKey::Systolic(User::Second)),
            Some(ReadingValue::Integer(120))
        );
        assert_eq!(
            get(&state, ReadingKey::Diastolic(User::Second)),
            Some(ReadingValue::Integer(80))
        );

        let systolic_kpa = get(&state, ReadingKey::SystolicKpa(User::Second))
            .and_then(|v| v.as_float())
            .unwrap();
        let diastolic_kpa = get(&state, ReadingKey::DiastolicKpa(User::Second))
            .and_then(|v| v.as_float())
            .unwrap();
        assert!((systolic_kpa - 15.998).abs() < 0.001);
        assert!((diastolic_kpa - 10.666).abs() < 0.001);
        assert_eq!(state.readings().error_code(), Some("OK"));

        assert_eq!(get(&state, ReadingKey::Systolic(User::First)), None);
    }

    #[test]
    fn test_continuation_routes_to_active_user() {
        let mut state = DeviceState::new();
        state.apply_notification(&reading_start(1, 120, 80));
        state.apply_notification(&[0x00, 90, 0x00, 0x04, 0x00]);

        assert_eq!(
            get(&state, ReadingKey::Pulse(User::Second)),
            Some(ReadingValue::Integer(90))
        );
        assert_eq!(
            get(&state, ReadingKey::IrregularHeartbeat(User::Second)),
            Some(ReadingValue::Bool(true))
        );
        assert_eq!(
            get(&state, ReadingKey::MotionIndicator(User::Second)),
            Some(ReadingValue::Bool(false))
        );
        assert_eq!(get(&state, ReadingKey::Pulse(User::First)), None);
    }

    #[test]
    fn test_continuation_motion_flag() {
        let mut state = DeviceState::new();
        state.apply_notification(&reading_start(0, 118, 76));
        state.apply_notification(&[0x00, 64, 0xFF, 0x01, 0x00]);

        assert_eq!(
            get(&state, ReadingKey::MotionIndicator(User::First)),
            Some(ReadingValue::Bool(true))
        );
        assert_eq!(
            get(&state, ReadingKey::IrregularHeartbeat(User::First)),
            Some(ReadingValue::Bool(false))
        );
    }

    #[test]
    fn test_irregular_heartbeat_requires_exact_flag_byte() {
        let mut active_user = Some(User::First);
        let updates = decode(&[0x00, 70, 0x00, 0x05, 0x00], &mut active_user);

        assert!(updates.contains(&(
            ReadingKey::IrregularHeartbeat(User::First),
            Some(ReadingValue::Bool(false))
        )));
        assert!(updates.contains(&(
            ReadingKey::MotionIndicator(User::First),
            Some(ReadingValue::Bool(true))
        )));
    }

    #[test]
    fn test_continuation_without_active_user_is_ignored() {
        let mut state = DeviceState::new();
        let written = state.apply_notification(&[0x00, 90, 0x00, 0x04, 0x00]);

        assert!(written.is_empty());
        assert_eq!(state, DeviceState::new());
    }

    #[test]
    fn test_device_error_clears_active_user() {
        let mut state = DeviceState::new();
        state.apply_notification(&reading_start(0, 120, 80));
        state.apply_notification(&[0x00, 72, 0x00, 0x00, 0x00]);
        state.apply_notification(&device_error(4));

        assert_eq!(state.readings().error_code(), Some("E05"));
        assert_eq!(get(&state, ReadingKey::Systolic(User::First)), None);
        assert_eq!(get(&state, ReadingKey::Diastolic(User::First)), None);
        assert_eq!(get(&state, ReadingKey::Pulse(User::First)), None);
        // kPa values and flags are left as they were.
        assert!(get(&state, ReadingKey::SystolicKpa(User::First)).is_some());
        assert_eq!(state.active_user(), Some(User::First));
    }

    #[test]
    fn test_device_error_without_active_user() {
        let mut active_user = None;
        let updates = decode(&device_error(0), &mut active_user);

        assert_eq!(
            updates,
            vec![(ReadingKey::ErrorCode, Some(ReadingValue::Text("E01".to_string())))]
        );
    }

    #[test]
    fn test_reading_start_clears_error() {
        let mut state = DeviceState::new();
        state.apply_notification(&device_error(2));
        assert_eq!(state.readings().error_code(), Some("E03"));

        state.apply_notification(&reading_start(0, 130, 85));
        assert_eq!(state.readings().error_code(), Some("OK"));
    }

    #[test]
    fn test_display_units() {
        let mut state = DeviceState::new();

        state.apply_notification(&display_units(0x01));
        assert_eq!(state.readings().display_units(), Some(DisplayUnits::Kpa));

        state.apply_notification(&display_units(0x02));
        assert_eq!(state.readings().display_units(), Some(DisplayUnits::Mmhg));
    }

    #[test]
    fn test_error_code_formatting() {
        assert_eq!(format_error_code(4), "E05");
        assert_eq!(format_error_code(0), "E01");
        assert_eq!(format_error_code(10), "E11");
        assert_eq!(format_error_code(255), "E256");
    }

    #[test]
    fn test_is_error_code() {
        assert!(is_error_code("OK"));
        assert!(is_error_code("E05"));
        assert!(is_error_code("E256"));
        assert!(is_error_code(&format_error_code(99)));

        assert!(!is_error_code("banana"));
        assert!(!is_error_code("E5"));
        assert!(!is_error_code("E00"));
        assert!(!is_error_code("E257"));
        assert!(!is_error_code("E+12"));
        assert!(!is_error_code("ok"));
    }

    #[test]
    fn test_reading_start_is_idempotent() {
        let packet = reading_start(1, 142, 91);

        let mut once = DeviceState::new();
        once.apply_notification(&packet);

        let mut twice = DeviceState::new();
        twice.apply_notification(&packet);
        twice.apply_notification(&packet);

        assert_eq!(once, twice);
    }

    #[test]
    fn test_unrecognised_buffers_do_nothing() {
        let mut truncated_start = reading_start(0, 120, 80);
        truncated_start.pop();
        let mut long_units = display_units(0x01);
        long_units.push(0x00);

        let garbage: Vec<Vec<u8>> = vec![
            Vec::new(),
            vec![0x00],
            vec![0xA5, 0x22, 0x02],
            vec![0x01, 90, 0x00, 0x04, 0x00],
            vec![0x00, 90, 0x00, 0x04],
            truncated_start,
            long_units,
            reading_start(2, 120, 80),
            vec![0xFF; 20],
            vec![0xA5, 0x22, 0x02, 0x0A, 0x00, 0x04],
        ];

        let mut state = DeviceState::new();
        state.apply_notification(&reading_start(0, 120, 80));
        let before = state.clone();

        for data in &garbage {
            assert_eq!(Packet::parse(data), None, "{data:02X?}");
            assert!(state.apply_notification(data).is_empty());
        }
        assert_eq!(state, before);
    }
}
