use crate::device::base::{UsbBackend, UsbDevice};
use crate::device::default_backend;
use crate::dfu::{DfuConfig, DfuDeviceInfo, RespeakerDfu};
use crate::worker::Worker;
use log::{debug, info, warn};
use parking_lot::Mutex;
use respeaker_types::{DeviceMode, PID_RESPEAKER, VID_RESPEAKER};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus_number: u8,
    pub address: u8,
    pub interface_number: u8,
}

impl DeviceKey {
    pub fn from_info(info: &DfuDeviceInfo) -> Self {
        Self {
            vendor_id: info.device.vendor_id(),
            product_id: info.device.product_id(),
            bus_number: info.device.bus_number(),
            address: info.device.address(),
            interface_number: info.interface_number,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub key: DeviceKey,
    pub device: UsbDevice,
    pub mode: DeviceMode,
    pub num_interfaces: u8,
}

impl From<DfuDeviceInfo> for DiscoveredDevice {
    fn from(info: DfuDeviceInfo) -> Self {
        Self {
            key: DeviceKey::from_info(&info),
            mode: info.mode(),
            num_interfaces: info.num_interfaces,
            device: info.device,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Discovered(DiscoveredDevice),
    Removed(DeviceKey),
}

pub type Snapshot = BTreeMap<DeviceKey, DiscoveredDevice>;

pub fn snapshot_of(devices: Vec<DfuDeviceInfo>) -> Snapshot {
    devices
        .into_iter()
        .map(DiscoveredDevice::from)
        .map(|device| (device.key, device))
        .collect()
}

/// Events turning `previous` into `next`: additions first, then removals, each in key order.
pub fn diff(previous: &Snapshot, next: &Snapshot) -> Vec<DiscoveryEvent> {
    let added = next
        .iter()
        .filter(|(key, _)| !previous.contains_key(key))
        .map(|(_, device)| DiscoveryEvent::Discovered(device.clone()));

    let removed = previous
        .keys()
        .filter(|key| !next.contains_key(key))
        .map(|key| DiscoveryEvent::Removed(*key));

    added.chain(removed).collect()
}

#[derive(Clone, Debug)]
pub struct DiscoveryConfig {
    pub vendor_id: u16,
    pub product_id: u16,
    pub interval: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            vendor_id: VID_RESPEAKER,
            product_id: PID_RESPEAKER,
            interval: Duration::from_millis(500),
        }
    }
}

struct DiscoveryInner {
    dfu: RespeakerDfu,
    known: Mutex<Snapshot>,
    events: broadcast::Sender<DiscoveryEvent>,
}

impl DiscoveryInner {
    fn scan(&self) {
        let devices = match self.dfu.find_devices() {
            Ok(devices) => devices,
            Err(error) => {
                debug!("Device scan failed, keeping previous snapshot: {}", error);
                return;
            }
        };

        let next = snapshot_of(devices);
        let events = {
            let mut known = self.known.lock();
            let events = diff(&known, &next);
            *known = next;
            events
        };

        for event in events {
            match &event {
                DiscoveryEvent::Discovered(device) => info!(
                    "ReSpeaker found on bus {} address {} ({})",
                    device.key.bus_number, device.key.address, device.mode
                ),
                DiscoveryEvent::Removed(key) => info!(
                    "ReSpeaker removed from bus {} address {}",
                    key.bus_number, key.address
                ),
            }

            // Nobody listening is not an error.
            let _ = self.events.send(event);
        }
    }
}

/// Watches the bus for devices entering or leaving, in either runtime or DFU mode.
pub struct RespeakerDiscovery {
    inner: Arc<DiscoveryInner>,
    interval: Duration,
    worker: Mutex<Option<Worker>>,
}

impl RespeakerDiscovery {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self::with_backend(default_backend(), config)
    }

    pub fn with_backend(backend: Arc<dyn UsbBackend>, config: DiscoveryConfig) -> Self {
        let dfu_config = DfuConfig {
            vendor_id: config.vendor_id,
            product_id: config.product_id,
            ..Default::default()
        };
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            inner: Arc::new(DiscoveryInner {
                dfu: RespeakerDfu::with_backend(backend, dfu_config),
                known: Mutex::new(Snapshot::new()),
                events,
            }),
            interval: config.interval,
            worker: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.inner.events.subscribe()
    }

    /// Starts scanning. The first scan reports every attached device as discovered.
    pub fn start(&self) -> std::io::Result<()> {
        let mut worker = self.worker.lock();
        if let Some(running) = worker.as_ref() {
            if !running.is_finished() && !running.is_stopping() {
                return Ok(());
            }
        }

        if let Some(mut previous) = worker.take() {
            previous.stop();
            if !previous.join(self.interval * 2) {
                warn!("Previous discovery thread is still running");
            }
        }

        self.inner.known.lock().clear();

        let inner = self.inner.clone();
        let interval = self.interval;
        *worker = Some(Worker::spawn("respeaker-discovery", move |stop| loop {
            inner.scan();
            if stop.wait(interval) {
                break;
            }
        })?);

        debug!("Discovery started");
        Ok(())
    }

    /// Signals the scan thread to stop, without waiting for it.
    pub fn stop(&self) {
        if let Some(worker) = self.worker.lock().as_ref() {
            worker.stop();
        }
    }

    /// Waits up to `timeout` for the scan thread to exit, returning whether it has.
    pub fn join(&self, timeout: Duration) -> bool {
        let mut worker = self.worker.lock();
        let Some(running) = worker.as_mut() else {
            return true;
        };

        let exited = running.join(timeout);
        if exited {
            *worker = None;
        }
        exited
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner.known.lock().clone()
    }
}

impl Drop for RespeakerDiscovery {
    fn drop(&mut self) {
        self.stop();
        self.join(self.interval * 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBus;

    fn snapshot(devices: &[UsbDevice]) -> Snapshot {
        snapshot_of(
            devices
                .iter()
                .map(|device| DfuDeviceInfo {
                    interface_number: device.dfu_interface().map_or(0, |i| i.number),
                    num_interfaces: device.num_interfaces(),
                    device: device.clone(),
                })
                .collect(),
        )
    }

    #[test]
    fn first_diff_discovers_everything() {
        let next = snapshot(&[MockBus::runtime_device(1, 2), MockBus::dfu_device(1, 3)]);
        let events = diff(&Snapshot::new(), &next);

        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|event| matches!(event, DiscoveryEvent::Discovered(_))));
    }

    #[test]
    fn diff_reports_added_and_removed() {
        let a = MockBus::runtime_device(1, 2);
        let b = MockBus::runtime_device(1, 3);
        let c = MockBus::dfu_device(1, 4);

        let previous = snapshot(&[a, b.clone()]);
        let next = snapshot(&[b, c]);
        let events = diff(&previous, &next);

        let removed_key = *previous.keys().next().unwrap();
        assert_eq!(removed_key.address, 2);

        assert_eq!(events.len(), 2);
        match &events[0] {
            DiscoveryEvent::Discovered(device) => {
                assert_eq!(device.key.address, 4);
                assert_eq!(device.mode, DeviceMode::Dfu);
                assert_eq!(device.num_interfaces, 1);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(events[1], DiscoveryEvent::Removed(removed_key));
    }

    #[test]
    fn unchanged_snapshot_is_quiet() {
        let devices = snapshot(&[MockBus::runtime_device(1, 2)]);
        assert!(diff(&devices, &devices).is_empty());
    }
}
