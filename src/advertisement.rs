//! Recognising the cuff from its advertisements.

use std::collections::HashMap;

/// One advertisement as delivered by a scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementObservation {
    /// Transport identity of the advertiser
    pub address: String,
    /// Manufacturer-specific data, keyed by vendor id
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    /// Signal strength in dBm
    pub rssi: i16,
}

/// Fields extracted from an advertisement that carries the vendor id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementMatch {
    /// Transport identity of the advertiser
    pub address: String,
    /// Matched vendor id
    pub manufacturer_id: u16,
    /// Manufacturer payload under the vendor id
    pub manufacturer_payload: Vec<u8>,
    /// Signal strength in dBm
    pub rssi: i16,
}

/// Matches advertisements against one vendor id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvertisementMatcher {
    manufacturer_id: u16,
}

impl AdvertisementMatcher {
    /// Create a matcher for `manufacturer_id`
    #[must_use]
    pub const fn new(manufacturer_id: u16) -> Self {
        Self { manufacturer_id }
    }

    /// Vendor id this matcher looks for
    #[must_use]
    pub const fn manufacturer_id(&self) -> u16 {
        self.manufacturer_id
    }

    /// Whether the observation carries the vendor id
    #[must_use]
    pub fn is_supported(&self, observation: &AdvertisementObservation) -> bool {
        observation
            .manufacturer_data
            .contains_key(&self.manufacturer_id)
    }

    /// Extract the cuff's fields, `None` for unrelated advertisers
    #[must_use]
    pub fn match_observation(
        &self,
        observation: &AdvertisementObservation,
    ) -> Option<AdvertisementMatch> {
        let payload = observation.manufacturer_data.get(&self.manufacturer_id)?;

        Some(AdvertisementMatch {
            address: observation.address.clone(),
            manufacturer_id: self.manufacturer_id,
            manufacturer_payload: payload.clone(),
            rssi: observation.rssi,
        })
    }
}
