#![allow(dead_code)]

use respeaker_usb::client::{ClientConfig, RespeakerClient};
use respeaker_usb::dfu::{DfuConfig, RespeakerDfu};
use respeaker_usb::mock::MockBus;
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::broadcast::Receiver;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn client(bus: &MockBus) -> RespeakerClient {
    RespeakerClient::with_backend(Arc::new(bus.clone()), ClientConfig::default())
}

pub fn dfu(bus: &MockBus) -> RespeakerDfu {
    RespeakerDfu::with_backend(
        Arc::new(bus.clone()),
        DfuConfig {
            reenumeration_interval: Duration::from_millis(1),
            reenumeration_timeout: Duration::from_millis(250),
            ..Default::default()
        },
    )
}

/// Waits for the next event, skipping over any the receiver lagged behind on.
pub fn next_event<T: Clone>(events: &mut Receiver<T>, timeout: Duration) -> Option<T> {
    let deadline = Instant::now() + timeout;
    loop {
        match events.try_recv() {
            Ok(event) => return Some(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Closed) => return None,
            Err(TryRecvError::Empty) => {
                if Instant::now() >= deadline {
                    return None;
                }
                sleep(Duration::from_millis(1));
            }
        }
    }
}

/// Collects events until one matches `last`, which is included.
pub fn events_until<T: Clone>(
    events: &mut Receiver<T>,
    timeout: Duration,
    last: impl Fn(&T) -> bool,
) -> Vec<T> {
    let deadline = Instant::now() + timeout;
    let mut seen = vec![];
    while let Some(event) = next_event(events, deadline.saturating_duration_since(Instant::now())) {
        let done = last(&event);
        seen.push(event);
        if done {
            break;
        }
    }
    seen
}
