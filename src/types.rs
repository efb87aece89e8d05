use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::Duration};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    BLOOD_PRESSURE_CHAR_UUID, CLIENT_CHARACTERISTIC_CONFIG_UUID, CUFF_MANUFACTURER_ID,
    HW_REVISION_CHAR_UUID, NOTIFY_ENABLE_VALUE, SW_REVISION_CHAR_UUID,
};

/// One of the two user memories of the cuff
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum User {
    /// User slot 0 (shown as "User 1" on the device)
    First = 0,
    /// User slot 1 (shown as "User 2" on the device)
    Second = 1,
}

impl User {
    /// Both user slots, in index order
    pub const ALL: [Self; 2] = [Self::First, Self::Second];

    /// Map a raw protocol index to a user slot
    #[must_use]
    pub const fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::First),
            1 => Some(Self::Second),
            _ => None,
        }
    }

    /// Raw protocol index of this slot
    #[must_use]
    pub const fn index(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "User {}", self.index() + 1)
    }
}

/// Pressure unit the cuff shows on its own display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayUnits {
    /// Millimetres of mercury
    Mmhg,
    /// Kilopascal
    Kpa,
}

impl DisplayUnits {
    /// Label used in the readings map
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mmhg => "mmHg",
            Self::Kpa => "kPa",
        }
    }

    /// Inverse of [`DisplayUnits::as_str`]
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        [Self::Mmhg, Self::Kpa]
            .into_iter()
            .find(|units| units.as_str() == label)
    }
}

impl fmt::Display for DisplayUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape of the value stored under a reading key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Raw 8-bit integer (mmHg, bpm)
    Integer,
    /// Derived floating point value (kPa)
    Float,
    /// Flag
    Boolean,
    /// Free text (units label, error code)
    Text,
}

/// Error returned when a string names no reading key
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown reading key: {0}")]
pub struct UnknownReadingKey(pub String);

/// The fixed set of fields a cuff reports
///
/// Keys are never added or removed at runtime; every [`crate::state::Readings`]
/// holds exactly [`ReadingKey::ALL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ReadingKey {
    /// Systolic pressure in mmHg
    Systolic(User),
    /// Diastolic pressure in mmHg
    Diastolic(User),
    /// Systolic pressure in kPa, derived from the mmHg value
    SystolicKpa(User),
    /// Diastolic pressure in kPa, derived from the mmHg value
    DiastolicKpa(User),
    /// Pulse in beats per minute
    Pulse(User),
    /// Irregular heartbeat detected during the measurement
    IrregularHeartbeat(User),
    /// Arm movement detected during the measurement
    MotionIndicator(User),
    /// Unit shown on the cuff display
    DisplayUnits,
    /// `"OK"` or the device error code (`"E05"`)
    ErrorCode,
}

impl ReadingKey {
    /// Every key, in canonical order
    pub const ALL: [Self; 16] = [
        Self::Systolic(User::First),
        Self::Diastolic(User::First),
        Self::SystolicKpa(User::First),
        Self::DiastolicKpa(User::First),
        Self::Pulse(User::First),
        Self::IrregularHeartbeat(User::First),
        Self::MotionIndicator(User::First),
        Self::Systolic(User::Second),
        Self::Diastolic(User::Second),
        Self::SystolicKpa(User::Second),
        Self::DiastolicKpa(User::Second),
        Self::Pulse(User::Second),
        Self::IrregularHeartbeat(User::Second),
        Self::MotionIndicator(User::Second),
        Self::DisplayUnits,
        Self::ErrorCode,
    ];

    /// Canonical field name, also the persistence key
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Systolic(User::First) => "systolic0",
            Self::Systolic(User::Second) => "systolic1",
            Self::Diastolic(User::First) => "diastolic0",
            Self::Diastolic(User::Second) => "diastolic1",
            Self::SystolicKpa(User::First) => "systolickpa0",
            Self::SystolicKpa(User::Second) => "systolickpa1",
            Self::DiastolicKpa(User::First) => "diastolickpa0",
            Self::DiastolicKpa(User::Second) => "diastolickpa1",
            Self::Pulse(User::First) => "pulse0",
            Self::Pulse(User::Second) => "pulse1",
            Self::IrregularHeartbeat(User::First) => "irregular_heartbeat0",
            Self::IrregularHeartbeat(User::Second) => "irregular_heartbeat1",
            Self::MotionIndicator(User::First) => "motion_indicator0",
            Self::MotionIndicator(User::Second) => "motion_indicator1",
            Self::DisplayUnits => "display_units",
            Self::ErrorCode => "error_code",
        }
    }

    /// Kind of value stored under this key
    #[must_use]
    pub const fn kind(self) -> ValueKind {
        match self {
            Self::Systolic(_) | Self::Diastolic(_) | Self::Pulse(_) => ValueKind::Integer,
            Self::SystolicKpa(_) | Self::DiastolicKpa(_) => ValueKind::Float,
            Self::IrregularHeartbeat(_) | Self::MotionIndicator(_) => ValueKind::Boolean,
            Self::DisplayUnits | Self::ErrorCode => ValueKind::Text,
        }
    }

    /// User slot the key belongs to, `None` for device-wide keys
    #[must_use]
    pub const fn user(self) -> Option<User> {
        match self {
            Self::Systolic(user)
            | Self::Diastolic(user)
            | Self::SystolicKpa(user)
            | Self::DiastolicKpa(user)
            | Self::Pulse(user)
            | Self::IrregularHeartbeat(user)
            | Self::MotionIndicator(user) => Some(user),
            Self::DisplayUnits | Self::ErrorCode => None,
        }
    }
}

impl fmt::Display for ReadingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ReadingKey {
    type Err = UnknownReadingKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.name() == s)
            .ok_or_else(|| UnknownReadingKey(s.to_string()))
    }
}

impl From<ReadingKey> for String {
    fn from(key: ReadingKey) -> Self {
        key.name().to_string()
    }
}

impl TryFrom<String> for ReadingKey {
    type Error = UnknownReadingKey;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A value stored in the readings map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReadingValue {
    /// Flag value
    Bool(bool),
    /// Raw protocol byte
    Integer(u8),
    /// Derived value
    Float(f64),
    /// Text value
    Text(String),
}

impl ReadingValue {
    /// Integer payload, if any
    #[must_use]
    pub const fn as_integer(&self) -> Option<u8> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    /// Float payload, if any
    #[must_use]
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// Flag payload, if any
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Text payload, if any
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for ReadingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Integer(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

/// Lifecycle state of the host process embedding the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostState {
    /// Host is still starting up
    Starting,
    /// Host is fully running
    Running,
    /// Host is shutting down
    Stopping,
}

/// State of the connection session cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    /// No transport session is open
    Idle,
    /// Opening a transport connection
    Connecting,
    /// Reading hardware/software revision strings
    VersionProbe,
    /// Notifications enabled, dwelling
    Subscribed,
    /// Disabling notifications before close
    Draining,
    /// Pausing after a fault
    Backoff,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::VersionProbe => write!(f, "Version Probe"),
            Self::Subscribed => write!(f, "Subscribed"),
            Self::Draining => write!(f, "Draining"),
            Self::Backoff => write!(f, "Backoff"),
        }
    }
}

/// Device information for registry-style consumers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Transport identity (MAC address, or a UUID on macOS)
    pub address: Option<String>,
    /// Signal strength (RSSI)
    pub rssi: i16,
    /// Hardware revision string
    pub hardware_version: Option<String>,
    /// Software revision string
    pub software_version: Option<String>,
}

/// Timing of the connect/subscribe/wait/unsubscribe cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionTimings {
    /// Upper bound on a single connect attempt in milliseconds
    pub connect_timeout_ms: u64,
    /// How long notifications are collected per session in milliseconds
    pub dwell_ms: u64,
    /// Upper bound on disabling notifications in milliseconds
    pub unsubscribe_timeout_ms: u64,
    /// Pause between two successful sessions in milliseconds
    pub cycle_pause_ms: u64,
    /// Pause after a failed session in milliseconds
    pub fault_backoff_ms: u64,
}

impl SessionTimings {
    /// Connect timeout as a [`Duration`]
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Dwell window as a [`Duration`]
    #[must_use]
    pub const fn dwell(&self) -> Duration {
        Duration::from_millis(self.dwell_ms)
    }

    /// Unsubscribe timeout as a [`Duration`]
    #[must_use]
    pub const fn unsubscribe_timeout(&self) -> Duration {
        Duration::from_millis(self.unsubscribe_timeout_ms)
    }

    /// Cycle pause as a [`Duration`]
    #[must_use]
    pub const fn cycle_pause(&self) -> Duration {
        Duration::from_millis(self.cycle_pause_ms)
    }

    /// Fault backoff as a [`Duration`]
    #[must_use]
    pub const fn fault_backoff(&self) -> Duration {
        Duration::from_millis(self.fault_backoff_ms)
    }
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            dwell_ms: 4_000,
            unsubscribe_timeout_ms: 10_000,
            cycle_pause_ms: 1_000,
            fault_backoff_ms: 20_000,
        }
    }
}

/// Monitor configuration
///
/// The defaults describe the Etekcity cuff; override the identifiers for
/// firmware variants that use other GATT handles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Vendor id expected in the advertisement manufacturer data
    pub manufacturer_id: u16,
    /// Characteristic carrying the measurement notifications
    pub blood_pressure_characteristic: Uuid,
    /// Hardware revision string characteristic
    pub hardware_revision_characteristic: Uuid,
    /// Software revision string characteristic
    pub software_revision_characteristic: Uuid,
    /// Client characteristic configuration descriptor
    pub client_config_descriptor: Uuid,
    /// Value written to the descriptor to enable notifications
    pub notify_enable_value: Vec<u8>,
    /// Cycle timing
    pub timings: SessionTimings,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            manufacturer_id: CUFF_MANUFACTURER_ID,
            blood_pressure_characteristic: BLOOD_PRESSURE_CHAR_UUID,
            hardware_revision_characteristic: HW_REVISION_CHAR_UUID,
            software_revision_characteristic: SW_REVISION_CHAR_UUID,
            client_config_descriptor: CLIENT_CHARACTERISTIC_CONFIG_UUID,
            notify_enable_value: NOTIFY_ENABLE_VALUE.to_vec(),
            timings: SessionTimings::default(),
        }
    }
}
