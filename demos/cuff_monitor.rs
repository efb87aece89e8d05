use cufflinks::{
    all_sensors, ble::BleTransport, CuffMonitor, EventSink, HostState, MonitorConfig,
    MonitorEvent, Result, TracingSink,
};
use futures::StreamExt;
use std::{sync::Arc, time::Duration};
use tokio::time::interval;
use tracing::{error, info};

/// Logs through tracing and prints a line whenever a measurement arrives
struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn on_event(&self, event: &MonitorEvent) {
        TracingSink.on_event(event);
        if let MonitorEvent::ReadingsUpdated(keys) = event {
            println!("📥 Updated: {keys:?}");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    info!("🩺 Cufflinks Monitor Example");

    let transport = match BleTransport::new().await {
        Ok(transport) => transport,
        Err(e) => {
            error!("❌ No Bluetooth adapter: {}", e);
            return Err(e);
        }
    };
    transport.start_scan().await?;
    let mut observations = transport.observations().await?;

    let monitor =
        CuffMonitor::with_event_sink(transport, MonitorConfig::default(), Arc::new(ConsoleSink));
    let sensors = all_sensors();

    info!("🔍 Waiting for a blood-pressure cuff to advertise...");
    info!("Press Ctrl+C to stop monitoring");

    let mut report_interval = interval(Duration::from_secs(10));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("🛑 Stopping monitor...");
                break;
            }
            observation = observations.next() => {
                let Some(observation) = observation else {
                    error!("❌ Advertisement stream ended");
                    break;
                };
                monitor.observe_advertisement(&observation, HostState::Running).await;
            }
            _ = report_interval.tick() => {
                let state = monitor.state().await;
                let address = state.address().unwrap_or("no cuff yet");
                println!("\n📊 {address} ({})", monitor.phase().await);
                for sensor in sensors.iter().filter(|s| s.description().enabled_by_default) {
                    let value = sensor.current_value(&state).unwrap_or_else(|| "-".to_string());
                    let unit = sensor.description().unit.unwrap_or("");
                    println!("  {:28} {value} {unit}", sensor.description().name);
                }
            }
        }
    }

    monitor.stop().await;
    info!("✅ Monitor stopped");

    Ok(())
}
