use futures::StreamExt;
use std::sync::Arc;
use tokio::{
    sync::{Mutex, RwLock},
    task::JoinHandle,
    time::{sleep, timeout, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    advertisement::{AdvertisementMatcher, AdvertisementObservation},
    ble::BleTransport,
    error::{CuffError, Result},
    scheduler::{AlwaysPoll, PollPolicy, PollScheduler},
    state::{DeviceState, Readings},
    transport::{Notification, NotificationStream, Transport, TransportSession},
    types::{DeviceInfo, HostState, MonitorConfig, ReadingKey, SessionPhase},
};

/// Structured events emitted by the monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    /// The session cycle moved to another phase
    PhaseChanged(SessionPhase),
    /// Notifications are flowing again
    Available,
    /// A session failed, or the monitor was stopped, while available
    Unavailable,
    /// A notification changed these readings
    ReadingsUpdated(Vec<ReadingKey>),
    /// A session ended in a recoverable fault
    SessionFault(String),
}

/// Receiver of [`MonitorEvent`]s
pub trait EventSink: Send + Sync {
    /// Called synchronously from the session task
    fn on_event(&self, event: &MonitorEvent);
}

/// Default sink, forwards events to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_event(&self, event: &MonitorEvent) {
        match event {
            MonitorEvent::Available => info!("Device is now available"),
            MonitorEvent::Unavailable => info!("Device is unavailable"),
            MonitorEvent::PhaseChanged(phase) => debug!(%phase, "session phase changed"),
            MonitorEvent::ReadingsUpdated(keys) => debug!(?keys, "readings updated"),
            MonitorEvent::SessionFault(error) => debug!(%error, "session fault"),
        }
    }
}

/// Continuously monitors one blood-pressure cuff
///
/// `CuffMonitor` owns the device state and a single background task that
/// runs the connect, subscribe, wait, unsubscribe, pause cycle for as long
/// as the monitor has not been stopped. Transport faults never end the
/// cycle; they only make the device unavailable until the next successful
/// session.
///
/// The cycle is started by the first advertisement for which a poll is
/// warranted (see [`CuffMonitor::observe_advertisement`]) or explicitly
/// with [`CuffMonitor::start`].
///
/// # Examples
///
/// ```no_run
/// use cufflinks::{ble::BleTransport, CuffMonitor, HostState, MonitorConfig};
/// use futures::StreamExt;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let transport = BleTransport::new().await?;
///     transport.start_scan().await?;
///     let mut observations = transport.observations().await?;
///
///     let monitor = CuffMonitor::new(transport, MonitorConfig::default());
///     while let Some(observation) = observations.next().await {
///         monitor.observe_advertisement(&observation, HostState::Running).await;
///     }
///     Ok(())
/// }
/// ```
pub struct CuffMonitor<T: Transport = BleTransport> {
    inner: Arc<Inner<T>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct Inner<T: Transport> {
    transport: T,
    config: MonitorConfig,
    matcher: AdvertisementMatcher,
    scheduler: PollScheduler<Box<dyn PollPolicy>>,
    state: RwLock<DeviceState>,
    phase: RwLock<SessionPhase>,
    available: RwLock<bool>,
    last_poll: RwLock<Option<Instant>>,
    sink: Arc<dyn EventSink>,
    stop: CancellationToken,
}

impl<T: Transport> CuffMonitor<T> {
    /// Create a monitor that reports events through [`TracingSink`]
    #[must_use]
    pub fn new(transport: T, config: MonitorConfig) -> Self {
        Self::with_event_sink(transport, config, Arc::new(TracingSink))
    }

    /// Create a monitor with a custom event sink
    #[must_use]
    pub fn with_event_sink(transport: T, config: MonitorConfig, sink: Arc<dyn EventSink>) -> Self {
        Self::with_poll_policy(transport, config, sink, AlwaysPoll)
    }

    /// Create a monitor with a custom event sink and polling policy
    #[must_use]
    pub fn with_poll_policy(
        transport: T,
        config: MonitorConfig,
        sink: Arc<dyn EventSink>,
        policy: impl PollPolicy + 'static,
    ) -> Self {
        let matcher = AdvertisementMatcher::new(config.manufacturer_id);
        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                matcher,
                scheduler: PollScheduler::new(Box::new(policy)),
                state: RwLock::new(DeviceState::new()),
                phase: RwLock::new(SessionPhase::Idle),
                available: RwLock::new(false),
                last_poll: RwLock::new(None),
                sink,
                stop: CancellationToken::new(),
            }),
            task: Mutex::new(None),
        }
    }

    /// Monitor configuration
    #[must_use]
    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    /// Snapshot of the whole device state
    pub async fn state(&self) -> DeviceState {
        self.inner.state.read().await.clone()
    }

    /// Snapshot of the readings
    pub async fn readings(&self) -> Readings {
        self.inner.state.read().await.readings().clone()
    }

    /// Transport identity of the cuff, once matched
    pub async fn address(&self) -> Option<String> {
        self.inner.state.read().await.address().map(str::to_owned)
    }

    /// Last observed signal strength in dBm
    pub async fn rssi(&self) -> i16 {
        self.inner.state.read().await.rssi()
    }

    /// Hardware revision string
    pub async fn hw_version(&self) -> Option<String> {
        self.inner.state.read().await.hw_version().map(str::to_owned)
    }

    /// Software revision string
    pub async fn sw_version(&self) -> Option<String> {
        self.inner.state.read().await.sw_version().map(str::to_owned)
    }

    /// Device information snapshot
    pub async fn device_info(&self) -> DeviceInfo {
        self.inner.state.read().await.device_info()
    }

    /// Current phase of the session cycle
    pub async fn phase(&self) -> SessionPhase {
        *self.inner.phase.read().await
    }

    /// Whether the last session reached the subscribed phase without fault
    pub async fn is_available(&self) -> bool {
        *self.inner.available.read().await
    }

    /// Whether the session cycle task is running
    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Whether [`CuffMonitor::stop`] has been requested
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.stop.is_cancelled()
    }

    /// Seed a reading from a persisted presentation state before live data arrives
    pub async fn restore_reading(&self, key: ReadingKey, last_state: &str) -> bool {
        self.inner.state.write().await.restore_reading(key, last_state)
    }

    /// Handle one advertisement observation
    ///
    /// Advertisements without the vendor id, or from another address than
    /// the bound one, are ignored. A matching advertisement refreshes the
    /// advertisement fields and starts the session cycle when the host is
    /// running and the device is reachable. Returns whether a cycle was
    /// started by this call.
    pub async fn observe_advertisement(
        &self,
        observation: &AdvertisementObservation,
        host_state: HostState,
    ) -> bool {
        let Some(matched) = self.inner.matcher.match_observation(observation) else {
            return false;
        };
        if !self.inner.state.write().await.apply_advertisement(matched) {
            debug!(address = %observation.address, "ignoring advertisement from another cuff");
            return false;
        }
        if self.is_stopped() || self.is_running().await {
            return false;
        }

        let last_poll = *self.inner.last_poll.read().await;
        let since_last_poll = last_poll.map(|at| at.elapsed().as_secs_f64());
        let connectable = self.inner.transport.is_reachable(&observation.address).await;

        if !self
            .inner
            .scheduler
            .poll_warranted(host_state, since_last_poll, connectable)
        {
            return false;
        }
        self.start().await
    }

    /// Start the session cycle
    ///
    /// Does nothing if the cycle is already running or the monitor has been
    /// stopped. Returns whether a new cycle task was spawned.
    pub async fn start(&self) -> bool {
        if self.is_stopped() {
            return false;
        }

        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return false;
        }

        info!("Starting session cycle");
        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(async move { inner.run().await }));
        true
    }

    /// Stop the session cycle for good
    ///
    /// Pending waits are abandoned immediately; an open session is closed
    /// before this returns. The monitor cannot be restarted.
    pub async fn stop(&self) {
        self.inner.stop.cancel();

        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "session task ended abnormally");
            }
        }

        self.inner.set_available(false).await;
        self.inner.set_phase(SessionPhase::Idle).await;
        info!("Session cycle stopped");
    }
}

impl<T: Transport> Drop for CuffMonitor<T> {
    fn drop(&mut self) {
        self.inner.stop.cancel();
    }
}

impl<T: Transport> Inner<T> {
    async fn run(&self) {
        let timings = &self.config.timings;

        while !self.stop.is_cancelled() {
            match self.run_session().await {
                Ok(()) => {
                    self.set_phase(SessionPhase::Idle).await;
                    self.pause(timings.cycle_pause()).await;
                }
                Err(e) if !e.is_recoverable() => break,
                Err(e) => {
                    debug!(error = %e, "Session failed; backing off");
                    self.sink.on_event(&MonitorEvent::SessionFault(e.to_string()));
                    self.set_available(false).await;
                    self.set_phase(SessionPhase::Backoff).await;
                    self.pause(timings.fault_backoff()).await;
                }
            }
        }
    }

    /// Sleep unless stopped first
    async fn pause(&self, duration: std::time::Duration) {
        tokio::select! {
            () = self.stop.cancelled() => {}
            () = sleep(duration) => {}
        }
    }

    async fn run_session(&self) -> Result<()> {
        let address = self
            .state
            .read()
            .await
            .address()
            .map(str::to_owned)
            .ok_or(CuffError::DeviceNotFound)?;
        let timings = &self.config.timings;

        self.set_phase(SessionPhase::Connecting).await;
        *self.last_poll.write().await = Some(Instant::now());
        debug!(%address, "Connecting to device");

        let connect = timeout(timings.connect_timeout(), self.transport.connect(&address));
        let mut session = tokio::select! {
            () = self.stop.cancelled() => return Err(CuffError::Stopped),
            result = connect => result.map_err(|_| CuffError::Timeout {
                timeout_ms: timings.connect_timeout_ms,
            })??,
        };

        let result = self.drive_session(&mut session, &address).await;

        if let Err(e) = session.disconnect().await {
            debug!(error = %e, "disconnect failed");
        }
        result
    }

    async fn drive_session(&self, session: &mut T::Session, address: &str) -> Result<()> {
        if !session.is_connected().await {
            return Err(CuffError::ConnectionVerificationFailed {
                address: address.to_string(),
            });
        }

        self.probe_versions(session).await;

        let characteristic = self.config.blood_pressure_characteristic;
        debug!("Starting notifications");
        let mut notifications = session.start_notify(characteristic).await?;
        session
            .write_descriptor(
                characteristic,
                self.config.client_config_descriptor,
                &self.config.notify_enable_value,
            )
            .await?;

        self.set_phase(SessionPhase::Subscribed).await;
        self.set_available(true).await;
        self.dwell(&mut notifications).await;
        drop(notifications);

        self.set_phase(SessionPhase::Draining).await;
        debug!("Pausing notification processing");
        let timeout_ms = self.config.timings.unsubscribe_timeout_ms;
        match timeout(
            self.config.timings.unsubscribe_timeout(),
            session.stop_notify(characteristic),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(CuffError::Timeout { timeout_ms }),
        }
    }

    /// Read the revision strings once; failures store "Unknown" and are not fatal
    async fn probe_versions(&self, session: &T::Session) {
        let (need_hw, need_sw) = {
            let state = self.state.read().await;
            (
                state.hw_version().is_none_or(str::is_empty),
                state.sw_version().is_none_or(str::is_empty),
            )
        };
        if !need_hw && !need_sw {
            return;
        }

        self.set_phase(SessionPhase::VersionProbe).await;
        let result = async {
            let hw_version = if need_hw {
                debug!("Reading hardware version");
                Some(read_string(session, self.config.hardware_revision_characteristic).await?)
            } else {
                None
            };
            let sw_version = if need_sw {
                debug!("Reading software version");
                Some(read_string(session, self.config.software_revision_characteristic).await?)
            } else {
                None
            };
            Ok::<_, CuffError>((hw_version, sw_version))
        }
        .await;

        let mut state = self.state.write().await;
        match result {
            Ok((hw_version, sw_version)) => state.set_versions(hw_version, sw_version),
            Err(e) => {
                warn!(error = %e, "Error reading version info");
                state.set_versions_unknown();
            }
        }
    }

    /// Feed notifications to the decoder until the dwell window closes
    async fn dwell(&self, notifications: &mut NotificationStream) {
        let window = sleep(self.config.timings.dwell());
        tokio::pin!(window);

        loop {
            tokio::select! {
                () = self.stop.cancelled() => break,
                () = &mut window => break,
                next = notifications.next() => match next {
                    Some(notification) => self.handle_notification(&notification).await,
                    None => {
                        debug!("notification stream closed");
                        break;
                    }
                },
            }
        }
    }

    async fn handle_notification(&self, notification: &Notification) {
        debug!(
            characteristic = %notification.characteristic,
            data = ?notification.value,
            "Notification"
        );

        let written = self
            .state
            .write()
            .await
            .apply_notification(&notification.value);
        if !written.is_empty() {
            self.sink.on_event(&MonitorEvent::ReadingsUpdated(written));
        }
    }

    async fn set_phase(&self, phase: SessionPhase) {
        let mut current = self.phase.write().await;
        if *current != phase {
            *current = phase;
            self.sink.on_event(&MonitorEvent::PhaseChanged(phase));
        }
    }

    async fn set_available(&self, available: bool) {
        let mut current = self.available.write().await;
        if *current != available {
            *current = available;
            self.sink.on_event(if available {
                &MonitorEvent::Available
            } else {
                &MonitorEvent::Unavailable
            });
        }
    }
}

async fn read_string<S: TransportSession>(session: &S, characteristic: Uuid) -> Result<String> {
    let raw = session.read_characteristic(characteristic).await?;
    Ok(String::from_utf8(raw)?.trim_end_matches('\0').to_string())
}
