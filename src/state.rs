//! Last-known values of one physical cuff.

use serde::{de::IgnoredAny, Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use tracing::debug;

use crate::{
    advertisement::AdvertisementMatch,
    protocol::{self, ReadingUpdate},
    types::{DeviceInfo, DisplayUnits, ReadingKey, ReadingValue, User, ValueKind},
};

/// Signal strength reported before any advertisement has been seen
pub const UNKNOWN_RSSI: i16 = -127;

/// Placeholder stored when a revision string cannot be read
pub const UNKNOWN_VERSION: &str = "Unknown";

/// Presentation states that carry no value and must not be restored
const IGNORED_STATES: [&str; 2] = ["unavailable", "unknown"];

/// Readings keyed by the fixed [`ReadingKey`] set
///
/// Every key exists from construction; only values change.
#[derive(Debug, Clone, PartialEq)]
pub struct Readings {
    values: BTreeMap<ReadingKey, Option<ReadingValue>>,
}

impl Readings {
    /// Value under `key`, `None` when unset
    #[must_use]
    pub fn get(&self, key: ReadingKey) -> Option<&ReadingValue> {
        self.values.get(&key).and_then(Option::as_ref)
    }

    /// Replace the value under `key`
    pub fn set(&mut self, key: ReadingKey, value: Option<ReadingValue>) {
        if let Some(slot) = self.values.get_mut(&key) {
            *slot = value;
        }
    }

    /// Iterate over every key and its value in canonical order
    pub fn iter(&self) -> impl Iterator<Item = (ReadingKey, Option<&ReadingValue>)> + '_ {
        self.values.iter().map(|(key, value)| (*key, value.as_ref()))
    }

    /// Display unit currently reported by the cuff
    #[must_use]
    pub fn display_units(&self) -> Option<DisplayUnits> {
        DisplayUnits::from_label(self.get(ReadingKey::DisplayUnits)?.as_text()?)
    }

    /// Error code currently reported by the cuff
    #[must_use]
    pub fn error_code(&self) -> Option<&str> {
        self.get(ReadingKey::ErrorCode)?.as_text()
    }
}

impl Default for Readings {
    fn default() -> Self {
        let mut values: BTreeMap<_, _> = ReadingKey::ALL.into_iter().map(|key| (key, None)).collect();
        values.insert(
            ReadingKey::DisplayUnits,
            Some(ReadingValue::Text(DisplayUnits::Mmhg.as_str().to_string())),
        );
        values.insert(
            ReadingKey::ErrorCode,
            Some(ReadingValue::Text(protocol::ERROR_CODE_OK.to_string())),
        );
        Self { values }
    }
}

impl Serialize for Readings {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.values.serialize(serializer)
    }
}

/// A persisted value before it is fitted to its key
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredValue {
    Value(ReadingValue),
    Other(IgnoredAny),
}

/// Snapshots are hydrated leniently: unknown keys and values that do not
/// fit their key are skipped, everything else is kept.
impl<'de> Deserialize<'de> for Readings {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let stored = BTreeMap::<String, Option<StoredValue>>::deserialize(deserializer)?;

        let mut readings = Self::default();
        for (name, value) in stored {
            let Ok(key) = name.parse::<ReadingKey>() else {
                debug!(key = %name, "ignoring unknown reading key");
                continue;
            };
            match value {
                None => readings.set(key, None),
                Some(StoredValue::Value(value)) => match fit_value(key, value) {
                    Some(value) => readings.set(key, Some(value)),
                    None => debug!(%key, "ignoring stored value of the wrong shape"),
                },
                Some(StoredValue::Other(_)) => debug!(%key, "ignoring stored value of the wrong shape"),
            }
        }
        Ok(readings)
    }
}

/// Fit a restored value to what `key` can hold, `None` when it cannot
fn fit_value(key: ReadingKey, value: ReadingValue) -> Option<ReadingValue> {
    match (key.kind(), value) {
        (ValueKind::Integer, ReadingValue::Integer(v)) => Some(ReadingValue::Integer(v)),
        (ValueKind::Integer, ReadingValue::Float(v)) => Some(v)
            .filter(|v| v.is_finite() && (0.0..=255.0).contains(v))
            .and_then(|v| u8::try_from(v.round() as i64).ok())
            .map(ReadingValue::Integer),
        (ValueKind::Float, ReadingValue::Float(v)) if v.is_finite() => Some(ReadingValue::Float(v)),
        (ValueKind::Float, ReadingValue::Integer(v)) => Some(ReadingValue::Float(f64::from(v))),
        (ValueKind::Boolean, ReadingValue::Bool(v)) => Some(ReadingValue::Bool(v)),
        (ValueKind::Text, ReadingValue::Text(text)) => {
            let valid = match key {
                ReadingKey::DisplayUnits => DisplayUnits::from_label(&text).is_some(),
                ReadingKey::ErrorCode => protocol::is_error_code(&text),
                _ => true,
            };
            valid.then_some(ReadingValue::Text(text))
        }
        _ => None,
    }
}

/// Authoritative snapshot of one cuff
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    address: Option<String>,
    rssi: i16,
    manufacturer_id: Option<u16>,
    manufacturer_payload: Vec<u8>,
    hw_version: Option<String>,
    sw_version: Option<String>,
    active_user: Option<User>,
    readings: Readings,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceState {
    /// Create an empty state with default readings
    #[must_use]
    pub fn new() -> Self {
        Self {
            address: None,
            rssi: UNKNOWN_RSSI,
            manufacturer_id: None,
            manufacturer_payload: Vec::new(),
            hw_version: None,
            sw_version: None,
            active_user: None,
            readings: Readings::default(),
        }
    }

    /// Transport identity of the cuff
    #[must_use]
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Last observed signal strength in dBm
    #[must_use]
    pub const fn rssi(&self) -> i16 {
        self.rssi
    }

    /// Vendor id of the last matched advertisement
    #[must_use]
    pub const fn manufacturer_id(&self) -> Option<u16> {
        self.manufacturer_id
    }

    /// Manufacturer payload of the last matched advertisement
    #[must_use]
    pub fn manufacturer_payload(&self) -> &[u8] {
        &self.manufacturer_payload
    }

    /// Hardware revision string
    #[must_use]
    pub fn hw_version(&self) -> Option<&str> {
        self.hw_version.as_deref()
    }

    /// Software revision string
    #[must_use]
    pub fn sw_version(&self) -> Option<&str> {
        self.sw_version.as_deref()
    }

    /// User the current measurement belongs to
    #[must_use]
    pub const fn active_user(&self) -> Option<User> {
        self.active_user
    }

    /// Current readings
    #[must_use]
    pub const fn readings(&self) -> &Readings {
        &self.readings
    }

    /// Whether both revision strings are already known
    #[must_use]
    pub fn has_versions(&self) -> bool {
        let known = |version: &Option<String>| version.as_deref().is_some_and(|v| !v.is_empty());
        known(&self.hw_version) && known(&self.sw_version)
    }

    /// Device information snapshot
    #[must_use]
    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            address: self.address.clone(),
            rssi: self.rssi,
            hardware_version: self.hw_version.clone(),
            software_version: self.sw_version.clone(),
        }
    }

    /// Record a matched advertisement
    ///
    /// Returns `false` without touching anything when the advertisement
    /// comes from another address than the one already bound.
    pub fn apply_advertisement(&mut self, matched: AdvertisementMatch) -> bool {
        match &self.address {
            Some(address) if *address != matched.address => return false,
            Some(_) => {}
            None => self.address = Some(matched.address),
        }
        self.rssi = matched.rssi;
        self.manufacturer_id = Some(matched.manufacturer_id);
        self.manufacturer_payload = matched.manufacturer_payload;
        true
    }

    /// Store the revision strings read from the device
    pub fn set_versions(&mut self, hw_version: Option<String>, sw_version: Option<String>) {
        if hw_version.is_some() {
            self.hw_version = hw_version;
        }
        if sw_version.is_some() {
            self.sw_version = sw_version;
        }
    }

    /// Mark both revision strings as unreadable
    pub fn set_versions_unknown(&mut self) {
        self.hw_version = Some(UNKNOWN_VERSION.to_string());
        self.sw_version = Some(UNKNOWN_VERSION.to_string());
    }

    /// Decode one notification buffer and apply it
    ///
    /// Returns the keys whose value was written; unrecognised buffers
    /// produce no writes.
    pub fn apply_notification(&mut self, data: &[u8]) -> Vec<ReadingKey> {
        let updates = protocol::decode(data, &mut self.active_user);
        self.apply_updates(updates)
    }

    /// Apply decoded updates
    pub fn apply_updates(&mut self, updates: Vec<ReadingUpdate>) -> Vec<ReadingKey> {
        updates
            .into_iter()
            .map(|(key, value)| {
                self.readings.set(key, value);
                key
            })
            .collect()
    }

    /// Seed a reading from a previously persisted presentation state
    ///
    /// `"unavailable"`, `"unknown"` and values that do not fit the key
    /// (wrong kind, out of range, unknown unit or error code) are ignored. Returns whether the value was applied.
    pub fn restore_reading(&mut self, key: ReadingKey, last_state: &str) -> bool {
        if IGNORED_STATES.contains(&last_state) {
            return false;
        }

        let candidate = match key.kind() {
            ValueKind::Integer | ValueKind::Float => {
                last_state.parse::<f64>().ok().map(ReadingValue::Float)
            }
            ValueKind::Boolean => match last_state {
                "on" | "true" => Some(ReadingValue::Bool(true)),
                "off" | "false" => Some(ReadingValue::Bool(false)),
                _ => None,
            },
            ValueKind::Text => Some(ReadingValue::Text(last_state.to_string())),
        };

        match candidate.and_then(|value| fit_value(key, value)) {
            Some(value) => {
                self.readings.set(key, Some(value));
                true
            }
            None => {
                debug!(key = %key, last_state, "ignoring unparseable restored state");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matched(address: &str, rssi: i16) -> AdvertisementMatch {
        AdvertisementMatch {
            address: address.to_string(),
            manufacturer_id: 0x06D0,
            manufacturer_payload: vec![0x01, 0x02],
            rssi,
        }
    }

    #[test]
    fn test_new_state_has_every_key() {
        let state = DeviceState::new();

        assert_eq!(state.readings().iter().count(), ReadingKey::ALL.len());
        assert_eq!(state.rssi(), UNKNOWN_RSSI);
        assert_eq!(state.readings().display_units(), Some(DisplayUnits::Mmhg));
        assert_eq!(state.readings().error_code(), Some("OK"));
        assert!(state.readings().get(ReadingKey::Pulse(User::First)).is_none());
        assert!(state.active_user().is_none());
    }

    #[test]
    fn test_advertisement_binds_address_once() {
        let mut state = DeviceState::new();

        assert!(state.apply_advertisement(matched("AA:BB:CC:DD:EE:FF", -60)));
        assert_eq!(state.address(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(state.rssi(), -60);
        assert_eq!(state.manufacturer_payload(), &[0x01, 0x02]);

        assert!(state.apply_advertisement(matched("AA:BB:CC:DD:EE:FF", -48)));
        assert_eq!(state.rssi(), -48);

        assert!(!state.apply_advertisement(matched("11:22:33:44:55:66", -30)));
        assert_eq!(state.address(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(state.rssi(), -48);
    }

    #[test]
    fn test_versions() {
        let mut state = DeviceState::new();
        assert!(!state.has_versions());

        state.set_versions(Some("1.0".to_string()), None);
        assert!(!state.has_versions());

        state.set_versions(None, Some("2.3.1".to_string()));
        assert!(state.has_versions());
        assert_eq!(state.device_info().hardware_version.as_deref(), Some("1.0"));

        state.set_versions_unknown();
        assert!(state.has_versions());
        assert_eq!(state.sw_version(), Some(UNKNOWN_VERSION));
    }

    #[test]
    fn test_restore_reading() {
        let mut state = DeviceState::new();

        assert!(state.restore_reading(ReadingKey::Systolic(User::First), "121"));
        assert!(state.restore_reading(ReadingKey::SystolicKpa(User::First), "16.1"));
        assert!(state.restore_reading(ReadingKey::IrregularHeartbeat(User::Second), "on"));
        assert!(state.restore_reading(ReadingKey::ErrorCode, "E03"));
        assert!(state.restore_reading(ReadingKey::DisplayUnits, "kPa"));

        let readings = state.readings();
        assert_eq!(
            readings.get(ReadingKey::Systolic(User::First)),
            Some(&ReadingValue::Integer(121))
        );
        assert_eq!(
            readings.get(ReadingKey::SystolicKpa(User::First)),
            Some(&ReadingValue::Float(16.1))
        );
        assert_eq!(
            readings.get(ReadingKey::IrregularHeartbeat(User::Second)),
            Some(&ReadingValue::Bool(true))
        );
        assert_eq!(readings.error_code(), Some("E03"));
        assert_eq!(readings.display_units(), Some(DisplayUnits::Kpa));
    }

    #[test]
    fn test_restore_ignores_unavailable_and_garbage() {
        let mut state = DeviceState::new();

        assert!(!state.restore_reading(ReadingKey::Pulse(User::First), "unavailable"));
        assert!(!state.restore_reading(ReadingKey::ErrorCode, "unknown"));
        assert!(!state.restore_reading(ReadingKey::Pulse(User::First), "fast"));
        assert!(!state.restore_reading(ReadingKey::Pulse(User::First), "999"));
        assert!(!state.restore_reading(ReadingKey::MotionIndicator(User::First), "maybe"));
        assert!(!state.restore_reading(ReadingKey::DisplayUnits, "furlongs"));
        assert!(!state.restore_reading(ReadingKey::ErrorCode, "banana"));
        assert!(!state.restore_reading(ReadingKey::SystolicKpa(User::First), "inf"));

        assert_eq!(state, DeviceState::new());
    }

    #[test]
    fn test_readings_serialize_with_field_names() {
        let mut state = DeviceState::new();
        state.restore_reading(ReadingKey::DiastolicKpa(User::Second), "10.7");

        let json = serde_json::to_value(state.readings()).unwrap();
        let object = json.as_object().unwrap();

        assert_eq!(object.len(), ReadingKey::ALL.len());
        assert_eq!(object["diastolickpa1"], serde_json::json!(10.7));
        assert_eq!(object["display_units"], serde_json::json!("mmHg"));
        assert!(object["pulse0"].is_null());

        let restored: Readings = serde_json::from_value(json).unwrap();
        assert_eq!(&restored, state.readings());
    }

    #[test]
    fn test_snapshot_with_unknown_keys_keeps_the_rest() {
        let readings: Readings = serde_json::from_str(
            r#"{"systolic0": 120, "diastolickap1": 10.7, "heart_rate": 61, "pulse0": 64}"#,
        )
        .unwrap();

        assert_eq!(
            readings.get(ReadingKey::Systolic(User::First)),
            Some(&ReadingValue::Integer(120))
        );
        assert_eq!(
            readings.get(ReadingKey::Pulse(User::First)),
            Some(&ReadingValue::Integer(64))
        );
        assert!(readings.get(ReadingKey::DiastolicKpa(User::Second)).is_none());
        assert_eq!(readings.error_code(), Some("OK"));
    }

    #[test]
    fn test_snapshot_values_must_fit_their_key() {
        let readings: Readings = serde_json::from_str(
            r#"{
                "systolic0": 300,
                "pulse0": "fast",
                "diastolic0": 81.0,
                "systolickpa0": 16,
                "motion_indicator0": "on",
                "irregular_heartbeat0": [1, 2],
                "display_units": "furlongs",
                "error_code": "banana"
            }"#,
        )
        .unwrap();

        assert!(readings.get(ReadingKey::Systolic(User::First)).is_none());
        assert!(readings.get(ReadingKey::Pulse(User::First)).is_none());
        assert_eq!(
            readings.get(ReadingKey::Diastolic(User::First)),
            Some(&ReadingValue::Integer(81))
        );
        assert_eq!(
            readings.get(ReadingKey::SystolicKpa(User::First)),
            Some(&ReadingValue::Float(16.0))
        );
        assert!(readings.get(ReadingKey::MotionIndicator(User::First)).is_none());
        assert!(readings.get(ReadingKey::IrregularHeartbeat(User::First)).is_none());
        assert_eq!(readings.display_units(), Some(DisplayUnits::Mmhg));
        assert_eq!(readings.error_code(), Some("OK"));
    }
}
