//! Presentation adapters over [`DeviceState`].
//!
//! Every reading key, plus the signal strength diagnostic, is described by a
//! [`SensorDescription`] and exposed through the [`Sensor`] trait. Sensors
//! differ only in how they render a value.

use serde::Serialize;
use std::fmt;

use crate::{
    state::{DeviceState, UNKNOWN_RSSI},
    types::{ReadingKey, ReadingValue, User, ValueKind},
};

/// Beats per minute
pub const UNIT_BPM: &str = "bpm";
/// Signal strength unit
pub const UNIT_DBM: &str = "dBm";

/// What a sensor reports on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKey {
    /// One of the decoded readings
    Reading(ReadingKey),
    /// Advertisement signal strength
    SignalStrength,
}

impl SensorKey {
    /// Stable key, used in unique ids
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Reading(key) => key.name(),
            Self::SignalStrength => "rssi",
        }
    }
}

impl fmt::Display for SensorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for SensorKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// Kind of quantity a sensor represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    /// Blood pressure
    Pressure,
    /// Radio signal strength
    SignalStrength,
    /// On means something went wrong during the measurement
    Problem,
}

/// Static presentation metadata of one sensor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SensorDescription {
    /// What the sensor reports on
    pub key: SensorKey,
    /// Human readable name
    pub name: String,
    /// Unit of measurement
    pub unit: Option<&'static str>,
    /// Quantity kind
    pub device_class: Option<DeviceClass>,
    /// Suggested number of decimals
    pub precision: Option<usize>,
    /// Whether hosts should enable the sensor without user action
    pub enabled_by_default: bool,
    /// Diagnostic sensors describe the device, not the measurement
    pub diagnostic: bool,
    /// Icon hint
    pub icon: Option<&'static str>,
}

impl SensorDescription {
    fn new(key: SensorKey, name: impl Into<String>) -> Self {
        Self {
            key,
            name: name.into(),
            unit: None,
            device_class: None,
            precision: None,
            enabled_by_default: true,
            diagnostic: false,
            icon: None,
        }
    }

    fn pressure(key: ReadingKey, name: String, unit: &'static str, precision: usize) -> Self {
        Self {
            unit: Some(unit),
            device_class: Some(DeviceClass::Pressure),
            precision: Some(precision),
            ..Self::new(SensorKey::Reading(key), name)
        }
    }

    fn problem(key: ReadingKey, name: String, icon: &'static str) -> Self {
        Self {
            device_class: Some(DeviceClass::Problem),
            icon: Some(icon),
            ..Self::new(SensorKey::Reading(key), name)
        }
    }

    const fn disabled(mut self) -> Self {
        self.enabled_by_default = false;
        self
    }

    const fn diagnostic(mut self) -> Self {
        self.diagnostic = true;
        self
    }
}

/// Read-only view of one value of the device state
pub trait Sensor: Send + Sync {
    /// Presentation metadata
    fn description(&self) -> &SensorDescription;

    /// Current value rendered for presentation, `None` when unknown
    fn current_value(&self, state: &DeviceState) -> Option<String>;

    /// Seed the device state from this sensor's last persisted value
    ///
    /// Returns whether the value was applied.
    fn restore(&self, _state: &mut DeviceState, _last_state: &str) -> bool {
        false
    }

    /// Unique id of this sensor for the device identified by `base`
    fn unique_id(&self, base: &str) -> String {
        format!("{base}-{}", self.description().key)
    }
}

/// Numeric or text reading
#[derive(Debug, Clone)]
pub struct MeasurementSensor {
    key: ReadingKey,
    description: SensorDescription,
}

impl MeasurementSensor {
    /// Wrap a description of a reading
    ///
    /// Returns `None` when the description is not about a reading.
    #[must_use]
    pub fn new(description: SensorDescription) -> Option<Self> {
        match description.key {
            SensorKey::Reading(key) => Some(Self { key, description }),
            SensorKey::SignalStrength => None,
        }
    }
}

impl Sensor for MeasurementSensor {
    fn description(&self) -> &SensorDescription {
        &self.description
    }

    fn current_value(&self, state: &DeviceState) -> Option<String> {
        let value = state.readings().get(self.key)?;
        Some(match (value, self.description.precision) {
            (ReadingValue::Float(v), Some(precision)) => format!("{v:.precision$}"),
            _ => value.to_string(),
        })
    }

    fn restore(&self, state: &mut DeviceState, last_state: &str) -> bool {
        state.restore_reading(self.key, last_state)
    }
}

/// On/off flag
#[derive(Debug, Clone)]
pub struct BinarySensor {
    key: ReadingKey,
    description: SensorDescription,
}

impl BinarySensor {
    /// Wrap a description of a boolean reading
    ///
    /// Returns `None` for non-boolean keys.
    #[must_use]
    pub fn new(description: SensorDescription) -> Option<Self> {
        match description.key {
            SensorKey::Reading(key) if key.kind() == ValueKind::Boolean => {
                Some(Self { key, description })
            }
            _ => None,
        }
    }

    /// Whether the flag is set, `None` when unknown
    #[must_use]
    pub fn is_on(&self, state: &DeviceState) -> Option<bool> {
        state.readings().get(self.key)?.as_bool()
    }
}

impl Sensor for BinarySensor {
    fn description(&self) -> &SensorDescription {
        &self.description
    }

    fn current_value(&self, state: &DeviceState) -> Option<String> {
        self.is_on(state)
            .map(|on| if on { "on" } else { "off" }.to_string())
    }

    fn restore(&self, state: &mut DeviceState, last_state: &str) -> bool {
        state.restore_reading(self.key, last_state)
    }
}

/// Last advertisement signal strength
#[derive(Debug, Clone)]
pub struct SignalStrengthSensor {
    description: SensorDescription,
}

impl Default for SignalStrengthSensor {
    fn default() -> Self {
        Self {
            description: SensorDescription {
                unit: Some(UNIT_DBM),
                device_class: Some(DeviceClass::SignalStrength),
                ..SensorDescription::new(SensorKey::SignalStrength, "Bluetooth Signal")
            }
            .diagnostic(),
        }
    }
}

impl Sensor for SignalStrengthSensor {
    fn description(&self) -> &SensorDescription {
        &self.description
    }

    fn current_value(&self, state: &DeviceState) -> Option<String> {
        (state.rssi() != UNKNOWN_RSSI).then(|| state.rssi().to_string())
    }
}

/// Descriptions of the per-user readings
fn user_descriptions(user: User) -> Vec<SensorDescription> {
    let mut descriptions = vec![
        SensorDescription::pressure(
            ReadingKey::Systolic(user),
            format!("Systolic Pressure {user}"),
            "mmHg",
            0,
        ),
        SensorDescription::pressure(
            ReadingKey::Diastolic(user),
            format!("Diastolic Pressure {user}"),
            "mmHg",
            0,
        ),
        SensorDescription::pressure(
            ReadingKey::SystolicKpa(user),
            format!("Systolic (kPa) {user}"),
            "kPa",
            1,
        )
        .disabled(),
        SensorDescription::pressure(
            ReadingKey::DiastolicKpa(user),
            format!("Diastolic (kPa) {user}"),
            "kPa",
            1,
        )
        .disabled(),
        SensorDescription {
            unit: Some(UNIT_BPM),
            precision: Some(0),
            icon: Some("mdi:heart-pulse"),
            ..SensorDescription::new(
                SensorKey::Reading(ReadingKey::Pulse(user)),
                format!("Pulse {user}"),
            )
        },
        SensorDescription::problem(
            ReadingKey::IrregularHeartbeat(user),
            format!("Irregular Heartbeat {user}"),
            "mdi:heart-multiple",
        ),
        SensorDescription::problem(
            ReadingKey::MotionIndicator(user),
            format!("Motion {user}"),
            "mdi:hand-wave-outline",
        ),
    ];

    // Only the first user memory is shown out of the box.
    if user != User::First {
        descriptions = descriptions.into_iter().map(SensorDescription::disabled).collect();
    }
    descriptions
}

/// Descriptions of every reading key, in canonical key order
#[must_use]
pub fn reading_descriptions() -> Vec<SensorDescription> {
    let mut descriptions: Vec<_> = User::ALL.into_iter().flat_map(user_descriptions).collect();
    descriptions.push(
        SensorDescription::new(SensorKey::Reading(ReadingKey::DisplayUnits), "Display Units")
            .disabled()
            .diagnostic(),
    );
    descriptions.push(
        SensorDescription {
            icon: Some("mdi:alert-circle-outline"),
            ..SensorDescription::new(SensorKey::Reading(ReadingKey::ErrorCode), "Error Code")
        }
        .diagnostic(),
    );
    descriptions
}

/// Every sensor of one cuff: one per reading key plus signal strength
#[must_use]
pub fn all_sensors() -> Vec<Box<dyn Sensor>> {
    let mut sensors: Vec<Box<dyn Sensor>> = reading_descriptions()
        .into_iter()
        .filter_map(|description| -> Option<Box<dyn Sensor>> {
            match description.key {
                SensorKey::Reading(key) if key.kind() == ValueKind::Boolean => {
                    BinarySensor::new(description).map(|s| Box::new(s) as Box<dyn Sensor>)
                }
                _ => MeasurementSensor::new(description).map(|s| Box::new(s) as Box<dyn Sensor>),
            }
        })
        .collect();
    sensors.push(Box::new(SignalStrengthSensor::default()));
    sensors
}
