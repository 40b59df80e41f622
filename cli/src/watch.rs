use crate::settings::Settings;
use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use respeaker_types::Parameter;
use respeaker_usb::client::RespeakerClient;
use respeaker_usb::discovery::{DiscoveryEvent, RespeakerDiscovery};
use respeaker_usb::field::Field;
use respeaker_usb::service::{RespeakerService, ServiceEvent};
use std::sync::Arc;
use std::time::Duration;
use strum::IntoEnumIterator;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;

/// Mirrors every parameter into a field and logs each change until Ctrl+C or a disconnect.
pub async fn watch(settings: &Settings, interval: Option<Duration>) -> Result<()> {
    let mut config = settings.service_config();
    if let Some(interval) = interval {
        config.poll_interval = interval;
    }

    let client = Arc::new(RespeakerClient::new(settings.client_config()));
    let service = RespeakerService::new(client, config);
    let mut events = service.subscribe();

    let fields: Vec<(Arc<Field>, Parameter)> = Parameter::iter()
        .map(|parameter| (Field::new(parameter.name(), 0.), parameter))
        .collect();
    for (field, _) in &fields {
        let name = field.name().to_string();
        field.on_change(move |value| info!("{} = {}", name, value));
    }

    service
        .register(
            fields
                .iter()
                .map(|(field, parameter)| (field.clone(), parameter.descriptor())),
        )
        .context("Unable to start polling")?;
    service
        .connect()
        .context("Unable to connect to the ReSpeaker")?;

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Stopping..");
                break;
            }
            event = events.recv() => match event {
                Ok(ServiceEvent::Connected) => info!("Connected, watching {} parameters", fields.len()),
                Ok(ServiceEvent::Polled) => debug!("Poll complete"),
                Ok(ServiceEvent::Error(message)) => error!("{}", message),
                Ok(ServiceEvent::Disconnected) => {
                    warn!("Device disconnected");
                    break;
                }
                Err(RecvError::Lagged(count)) => warn!("Missed {} service events", count),
                Err(RecvError::Closed) => break,
            }
        }
    }

    service.close();
    Ok(())
}

/// Logs devices arriving and leaving the bus until Ctrl+C.
pub async fn discover(settings: &Settings) -> Result<()> {
    let config = settings.discovery_config();
    let interval = config.interval;

    let discovery = RespeakerDiscovery::new(config);
    let mut events = discovery.subscribe();
    discovery
        .start()
        .context("Unable to start the discovery thread")?;
    info!("Watching for devices, press Ctrl+C to stop");

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(DiscoveryEvent::Discovered(device)) => println!(
                    "+ bus {:03} address {:03} {} ({} interfaces)",
                    device.key.bus_number, device.key.address, device.mode, device.num_interfaces
                ),
                Ok(DiscoveryEvent::Removed(key)) => {
                    println!("- bus {:03} address {:03}", key.bus_number, key.address)
                }
                Err(RecvError::Lagged(count)) => warn!("Missed {} discovery events", count),
                Err(RecvError::Closed) => break,
            }
        }
    }

    discovery.stop();
    if !discovery.join(interval * 2) {
        warn!("Discovery thread did not stop in time");
    }
    Ok(())
}
