use async_trait::async_trait;
use btleplug::{
    api::{
        BDAddr, Central, CentralEvent, Characteristic, Manager as _, Peripheral as _,
        PeripheralProperties, ScanFilter,
    },
    platform::{Adapter, Manager, Peripheral},
};
use futures::{
    future,
    stream::{BoxStream, StreamExt},
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    advertisement::AdvertisementObservation,
    error::{CuffError, Result},
    state::UNKNOWN_RSSI,
    transport::{Notification, NotificationStream, Transport, TransportSession},
};

/// `btleplug`-backed transport for the cuff
pub struct BleTransport {
    #[allow(dead_code)]
    manager: Manager,
    adapter: Adapter,
}

impl BleTransport {
    /// Open the first Bluetooth adapter
    ///
    /// # Errors
    ///
    /// Returns [`CuffError::DeviceNotFound`] if no Bluetooth adapters are available,
    /// or [`CuffError::Ble`] if the adapter cannot be initialized.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(CuffError::DeviceNotFound)?;

        Ok(Self { manager, adapter })
    }

    /// Start scanning for advertisements
    ///
    /// # Errors
    ///
    /// Returns [`CuffError::Ble`] if the adapter refuses to scan.
    pub async fn start_scan(&self) -> Result<()> {
        info!("Starting scan for blood-pressure cuffs...");
        self.adapter.start_scan(ScanFilter::default()).await?;
        Ok(())
    }

    /// Stop scanning
    ///
    /// # Errors
    ///
    /// Returns [`CuffError::Ble`] if the adapter fails to stop.
    pub async fn stop_scan(&self) -> Result<()> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    /// Stream of advertisement observations from the adapter
    ///
    /// Every discovery, update and manufacturer-data event is turned into an
    /// observation carrying the peripheral's current properties.
    ///
    /// # Errors
    ///
    /// Returns [`CuffError::Ble`] if the adapter event stream cannot be opened.
    pub async fn observations(&self) -> Result<BoxStream<'static, AdvertisementObservation>> {
        let adapter = self.adapter.clone();
        let events = self.adapter.events().await?;

        Ok(events
            .filter_map(move |event| {
                let adapter = adapter.clone();
                async move {
                    let id = match event {
                        CentralEvent::DeviceDiscovered(id)
                        | CentralEvent::DeviceUpdated(id)
                        | CentralEvent::ManufacturerDataAdvertisement { id, .. } => id,
                        _ => return None,
                    };
                    let peripheral = adapter.peripheral(&id).await.ok()?;
                    let properties = peripheral.properties().await.ok()??;
                    let identity =
                        transport_identity(properties.address, || peripheral.id().to_string());
                    Some(observation_from_properties(identity, properties))
                }
            })
            .boxed())
    }

    async fn find_peripheral(&self, address: &str) -> Result<Option<Peripheral>> {
        for peripheral in self.adapter.peripherals().await? {
            let identity =
                transport_identity(peripheral.address(), || peripheral.id().to_string());
            if identity.eq_ignore_ascii_case(address) {
                return Ok(Some(peripheral));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl Transport for BleTransport {
    type Session = BleSession;

    async fn connect(&self, address: &str) -> Result<BleSession> {
        let peripheral = self
            .find_peripheral(address)
            .await?
            .ok_or(CuffError::DeviceNotFound)?;

        // Dropped mid-connect (timeout or stop): tear the link down again.
        let guard = ConnectGuard::new(peripheral.clone());

        if !peripheral.is_connected().await? {
            peripheral
                .connect()
                .await
                .map_err(|e| CuffError::ConnectionFailed(e.to_string()))?;
        }
        peripheral.discover_services().await?;

        guard.disarm();
        debug!(address, "connected, services discovered");
        Ok(BleSession { peripheral })
    }

    async fn is_reachable(&self, address: &str) -> bool {
        matches!(self.find_peripheral(address).await, Ok(Some(_)))
    }
}

/// Link that can be torn down from a detached task
#[async_trait]
trait LinkTeardown: Send + Sync + 'static {
    async fn tear_down(&self) -> Result<()>;
}

#[async_trait]
impl LinkTeardown for Peripheral {
    async fn tear_down(&self) -> Result<()> {
        self.disconnect().await?;
        Ok(())
    }
}

/// Disconnects a half-open peripheral unless disarmed
struct ConnectGuard<P: LinkTeardown> {
    peripheral: Option<P>,
}

impl<P: LinkTeardown> ConnectGuard<P> {
    const fn new(peripheral: P) -> Self {
        Self {
            peripheral: Some(peripheral),
        }
    }

    fn disarm(mut self) {
        self.peripheral = None;
    }
}

impl<P: LinkTeardown> Drop for ConnectGuard<P> {
    fn drop(&mut self) {
        let Some(peripheral) = self.peripheral.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        debug!("connect abandoned, disconnecting");
        runtime.spawn(async move {
            if let Err(e) = peripheral.tear_down().await {
                debug!(error = %e, "disconnect after abandoned connect failed");
            }
        });
    }
}

/// Open connection to a cuff
pub struct BleSession {
    peripheral: Peripheral,
}

impl BleSession {
    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(CuffError::CharacteristicNotFound(uuid))
    }
}

#[async_trait]
impl TransportSession for BleSession {
    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn read_characteristic(&self, characteristic: Uuid) -> Result<Vec<u8>> {
        let characteristic = self.characteristic(characteristic)?;
        Ok(self.peripheral.read(&characteristic).await?)
    }

    async fn start_notify(&mut self, characteristic: Uuid) -> Result<NotificationStream> {
        let target = self.characteristic(characteristic)?;
        let notifications = self.peripheral.notifications().await?;
        self.peripheral.subscribe(&target).await?;

        Ok(notifications
            .filter(move |n| future::ready(n.uuid == characteristic))
            .map(|n| Notification {
                characteristic: n.uuid,
                value: n.value,
            })
            .boxed())
    }

    async fn write_descriptor(
        &self,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> Result<()> {
        let target = self.characteristic(characteristic)?;
        let descriptor = target
            .descriptors
            .iter()
            .find(|d| d.uuid == descriptor)
            .cloned()
            .ok_or(CuffError::DescriptorNotFound {
                characteristic,
                descriptor,
            })?;

        self.peripheral.write_descriptor(&descriptor, value).await?;
        Ok(())
    }

    async fn stop_notify(&mut self, characteristic: Uuid) -> Result<()> {
        let target = self.characteristic(characteristic)?;
        self.peripheral.unsubscribe(&target).await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

/// MAC address, or the platform peripheral id where the MAC is hidden (macOS)
fn transport_identity(address: BDAddr, fallback: impl FnOnce() -> String) -> String {
    if address == BDAddr::default() {
        fallback()
    } else {
        address.to_string()
    }
}

fn observation_from_properties(
    address: String,
    properties: PeripheralProperties,
) -> AdvertisementObservation {
    AdvertisementObservation {
        address,
        manufacturer_data: properties.manufacturer_data,
        rssi: properties.rssi.unwrap_or(UNKNOWN_RSSI),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BLOOD_PRESSURE_CHAR_UUID, CLIENT_CHARACTERISTIC_CONFIG_UUID};
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    #[derive(Clone, Default)]
    struct CountingLink {
        teardowns: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl LinkTeardown for CountingLink {
        async fn tear_down(&self) -> Result<()> {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_abandoned_connect_is_torn_down() {
        let link = CountingLink::default();

        drop(ConnectGuard::new(link.clone()));
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(link.teardowns.load(Ordering::SeqCst), 1);

        ConnectGuard::new(link.clone()).disarm();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert_eq!(link.teardowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_guard_without_runtime_does_not_panic() {
        let link = CountingLink::default();
        drop(ConnectGuard::new(link.clone()));
        assert_eq!(link.teardowns.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_transport_identity() {
        let address = BDAddr::from([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        assert_eq!(
            transport_identity(address, || "unused".to_string()),
            "AA:BB:CC:DD:EE:FF"
        );

        let hidden = BDAddr::default();
        assert_eq!(
            transport_identity(hidden, || "5F2C8E1A-0000-4000-8000-000000000001".to_string()),
            "5F2C8E1A-0000-4000-8000-000000000001"
        );
    }

    #[test]
    fn test_observation_from_properties() {
        let properties = PeripheralProperties {
            rssi: Some(-58),
            manufacturer_data: HashMap::from([(0x06D0, vec![0x01])]),
            ..Default::default()
        };
        let observation = observation_from_properties("AA:BB:CC:DD:EE:FF".to_string(), properties);

        assert_eq!(observation.rssi, -58);
        assert_eq!(observation.manufacturer_data[&0x06D0], vec![0x01]);

        let silent = observation_from_properties("x".to_string(), PeripheralProperties::default());
        assert_eq!(silent.rssi, UNKNOWN_RSSI);
    }

    #[test]
    fn test_uuid_constants() {
        assert_eq!(
            BLOOD_PRESSURE_CHAR_UUID.to_string(),
            "0000fff1-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            CLIENT_CHARACTERISTIC_CONFIG_UUID.to_string(),
            "00002902-0000-1000-8000-00805f9b34fb"
        );
    }
}
