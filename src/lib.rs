#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # Cufflinks 🩺
//!
//! A Rust library for reading Etekcity blood-pressure cuffs over Bluetooth Low Energy.
//!
//! The cuff does not keep a connection open. It advertises, accepts a short
//! connection, pushes its measurement as a handful of notifications and goes
//! quiet again. This library watches the advertisements, runs a repeating
//! connect / subscribe / wait / unsubscribe cycle against the cuff and decodes
//! every notification into a fixed set of readings for two user memories.
//!
//! ## Protocol Overview
//!
//! All measurement data arrives on one notify characteristic. Four buffer
//! shapes are recognised by their 40-bit big-endian header and exact length:
//!
//! - **Display units** (13 bytes): which unit the cuff shows (mmHg or kPa)
//! - **Reading start** (20 bytes): user slot, systolic and diastolic pressure
//! - **Reading continuation** (5 bytes, leading `0x00`): pulse and the
//!   motion / irregular heartbeat flags, for the user of the last reading start
//! - **Device error** (16 bytes): error code shown as `E01`..`E256`
//!
//! Anything else is ignored. See [`protocol`] for the exact offsets.
//!
//! ## Session Cycle
//!
//! Once started, [`CuffMonitor`] repeats until stopped:
//!
//! 1. connect (10 s timeout) and verify the link
//! 2. read the hardware/software revision strings, once per device
//! 3. subscribe to notifications and decode them for 4 s
//! 4. unsubscribe (10 s timeout) and disconnect
//! 5. pause 1 s, or 20 s after any fault
//!
//! Faults never end the cycle; they only mark the device unavailable until
//! the next good session.
//!
//! ## Quick Start
//!
//! ```no_run
//! use cufflinks::{ble::BleTransport, CuffMonitor, HostState, MonitorConfig, ReadingKey, User};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = BleTransport::new().await?;
//!     transport.start_scan().await?;
//!     let mut observations = transport.observations().await?;
//!
//!     let monitor = CuffMonitor::new(transport, MonitorConfig::default());
//!
//!     // Feed advertisements; the first one from a cuff starts the cycle
//!     while let Some(observation) = observations.next().await {
//!         monitor.observe_advertisement(&observation, HostState::Running).await;
//!
//!         let readings = monitor.readings().await;
//!         if let Some(systolic) = readings.get(ReadingKey::Systolic(User::First)) {
//!             println!("Systolic: {systolic} mmHg");
//!         }
//!     }
//!
//!     monitor.stop().await;
//!     Ok(())
//! }
//! ```

/// Advertisement matching
pub mod advertisement;
/// Bluetooth Low Energy transport
pub mod ble;
/// Error types and handling
pub mod error;
/// Connection session cycle
pub mod monitor;
/// Notification decoding
pub mod protocol;
/// Poll scheduling
pub mod scheduler;
/// Presentation adapters
pub mod sensor;
/// Device state store
pub mod state;
/// Transport abstraction
pub mod transport;
/// Type definitions and data structures
pub mod types;

// Re-export the main types for convenient usage
pub use advertisement::{AdvertisementMatch, AdvertisementMatcher, AdvertisementObservation};
pub use error::{CuffError, Result};
pub use monitor::{CuffMonitor, EventSink, MonitorEvent, TracingSink};
pub use sensor::{all_sensors, Sensor, SensorDescription};
pub use state::{DeviceState, Readings};
pub use types::{
    DeviceInfo, DisplayUnits, HostState, MonitorConfig, ReadingKey, ReadingValue, SessionPhase,
    SessionTimings, User,
};

use uuid::Uuid;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Etekcity Bluetooth SIG company identifier
///
/// Present as the key of the manufacturer-specific data in every cuff
/// advertisement.
pub const CUFF_MANUFACTURER_ID: u16 = 0x06D0;

/// Vendor characteristic carrying the measurement notifications
pub const BLOOD_PRESSURE_CHAR_UUID: Uuid = Uuid::from_u128(0x0000_fff1_0000_1000_8000_0080_5f9b_34fb);

/// Hardware Revision String (0x2A27)
pub const HW_REVISION_CHAR_UUID: Uuid = Uuid::from_u128(0x0000_2a27_0000_1000_8000_0080_5f9b_34fb);

/// Software Revision String (0x2A28)
pub const SW_REVISION_CHAR_UUID: Uuid = Uuid::from_u128(0x0000_2a28_0000_1000_8000_0080_5f9b_34fb);

/// Client Characteristic Configuration descriptor (0x2902)
pub const CLIENT_CHARACTERISTIC_CONFIG_UUID: Uuid =
    Uuid::from_u128(0x0000_2902_0000_1000_8000_0080_5f9b_34fb);

/// Descriptor value that enables notifications
pub const NOTIFY_ENABLE_VALUE: [u8; 2] = [0x01, 0x00];
