mod common;

use assert_matches::assert_matches;
use common::{next_event, WAIT};
use respeaker_types::DeviceMode;
use respeaker_usb::discovery::{DiscoveryConfig, DiscoveryEvent, RespeakerDiscovery};
use respeaker_usb::mock::MockBus;
use std::sync::Arc;
use std::time::Duration;

fn discovery(bus: &MockBus) -> RespeakerDiscovery {
    RespeakerDiscovery::with_backend(
        Arc::new(bus.clone()),
        DiscoveryConfig {
            interval: Duration::from_millis(5),
            ..Default::default()
        },
    )
}

fn discovered_address(event: Option<DiscoveryEvent>) -> u8 {
    match event {
        Some(DiscoveryEvent::Discovered(device)) => device.key.address,
        other => panic!("expected a discovery, got {other:?}"),
    }
}

#[test]
fn reports_arrivals_and_departures() {
    let bus = MockBus::new();
    bus.plug(MockBus::runtime_device(1, 2));
    bus.plug(MockBus::runtime_device(1, 3));

    let discovery = discovery(&bus);
    let mut events = discovery.subscribe();
    discovery.start().unwrap();

    let mut first = vec![
        discovered_address(next_event(&mut events, WAIT)),
        discovered_address(next_event(&mut events, WAIT)),
    ];
    first.sort();
    assert_eq!(first, vec![2, 3]);
    assert_eq!(discovery.snapshot().len(), 2);

    bus.unplug(1, 2);
    bus.plug(MockBus::dfu_device(1, 4));

    match next_event(&mut events, WAIT) {
        Some(DiscoveryEvent::Discovered(device)) => {
            assert_eq!(device.key.address, 4);
            assert_eq!(device.mode, DeviceMode::Dfu);
        }
        other => panic!("expected a discovery, got {other:?}"),
    }
    assert_matches!(
        next_event(&mut events, WAIT),
        Some(DiscoveryEvent::Removed(key)) if key.address == 2
    );

    let snapshot = discovery.snapshot();
    let addresses: Vec<u8> = snapshot.keys().map(|key| key.address).collect();
    assert_eq!(addresses, vec![3, 4]);

    discovery.stop();
    assert!(discovery.join(WAIT));
    assert!(!discovery.is_running());
}

#[test]
fn failed_scans_are_skipped() {
    let bus = MockBus::new();
    bus.push_scan(Err(rusb::Error::Io));
    bus.plug(MockBus::runtime_device(1, 2));

    let discovery = discovery(&bus);
    let mut events = discovery.subscribe();
    discovery.start().unwrap();

    assert_eq!(discovered_address(next_event(&mut events, WAIT)), 2);

    // A failure between two good scans changes nothing.
    bus.push_scan(Err(rusb::Error::Io));
    assert_eq!(next_event(&mut events, Duration::from_millis(50)), None);
    assert_eq!(discovery.snapshot().len(), 1);
}

#[test]
fn restart_announces_everything_again() {
    let bus = MockBus::new();
    bus.plug(MockBus::runtime_device(1, 2));

    let discovery = discovery(&bus);
    let mut events = discovery.subscribe();

    discovery.start().unwrap();
    discovery.start().unwrap();
    assert_eq!(discovered_address(next_event(&mut events, WAIT)), 2);

    discovery.stop();
    assert!(discovery.join(WAIT));

    discovery.start().unwrap();
    assert_eq!(discovered_address(next_event(&mut events, WAIT)), 2);
    assert_eq!(next_event(&mut events, Duration::from_millis(30)), None);
}

#[test]
fn events_without_subscribers_are_dropped() {
    let bus = MockBus::new();
    bus.plug(MockBus::runtime_device(1, 2));

    let discovery = discovery(&bus);
    discovery.start().unwrap();
    std::thread::sleep(Duration::from_millis(20));

    assert!(discovery.is_running());
    assert_eq!(discovery.snapshot().len(), 1);
}
