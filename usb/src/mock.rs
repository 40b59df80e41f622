//! A scripted, in-memory USB bus.
//!
//! Devices are plugged in and pulled out by the test, parameter reads are answered from a
//! value store that parameter writes update, and every successful control transfer is
//! recorded for inspection.

use crate::commands::{DfuRequest, PIXEL_RING_INDEX, VENDOR_REQUEST};
use crate::device::base::{ControlHandle, UsbBackend, UsbDevice, UsbInterface};
use byteorder::{ByteOrder, LittleEndian};
use parking_lot::Mutex;
use respeaker_types::{PID_RESPEAKER, VID_RESPEAKER};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

const VENDOR_IN: u8 = 0xC0;
const VENDOR_OUT: u8 = 0x40;
const CLASS_IN: u8 = 0xA1;
const CLASS_OUT: u8 = 0x21;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transfer {
    pub bus_number: u8,
    pub address: u8,
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,

    // Payload of an OUT transfer, empty for IN transfers.
    pub data: Vec<u8>,
    pub length: usize,
}

impl Transfer {
    pub fn is_in(&self) -> bool {
        self.request_type & 0x80 != 0
    }
}

#[derive(Default)]
struct MockState {
    devices: Vec<UsbDevice>,
    scans: VecDeque<Result<Vec<UsbDevice>, rusb::Error>>,
    dfu_replacement: Option<UsbDevice>,

    parameters: HashMap<(u16, u8), f64>,
    raw_reads: HashMap<(u16, u16), Vec<u8>>,
    read_failure: Option<rusb::Error>,

    dfu_statuses: VecDeque<[u8; 6]>,
    dfu_state: u8,

    kernel_drivers: HashSet<(u8, u8, u8)>,
    fail_detach: bool,
    claimed: Vec<(u8, u8, u8)>,
    open_handles: usize,

    transfers: Vec<Transfer>,
}

impl MockState {
    fn is_present(&self, bus_number: u8, address: u8) -> bool {
        self.devices
            .iter()
            .any(|device| device.is_at(bus_number, address))
    }

    fn store_parameter(&mut self, group_id: u16, payload: &[u8]) {
        if payload.len() < 12 {
            return;
        }

        let offset = LittleEndian::read_i32(&payload[0..4]) as u8;
        let value = match LittleEndian::read_i32(&payload[8..12]) {
            1 => LittleEndian::read_i32(&payload[4..8]) as f64,
            _ => LittleEndian::read_f32(&payload[4..8]) as f64,
        };
        self.parameters.insert((group_id, offset), value);
    }

    fn reenumerate(&mut self, bus_number: u8, address: u8) {
        let Some(replacement) = self.dfu_replacement.take() else {
            return;
        };

        self.devices
            .retain(|device| !device.is_at(bus_number, address));
        self.claimed
            .retain(|(bus, addr, _)| !(*bus == bus_number && *addr == address));
        self.devices.push(replacement);
    }

    fn parameter_response(&self, group_id: u16, value: u16) -> Vec<u8> {
        if let Some(raw) = self.raw_reads.get(&(group_id, value)) {
            return raw.clone();
        }

        let offset = (value & 0x3F) as u8;
        let is_int = value & 0x40 != 0;
        let stored = self
            .parameters
            .get(&(group_id, offset))
            .copied()
            .unwrap_or_default();

        let (hi, lo) = encode_parameter(stored, is_int);
        let mut response = vec![0; 8];
        LittleEndian::write_i32(&mut response[0..4], hi);
        LittleEndian::write_i32(&mut response[4..8], lo);
        response
    }
}

// Splits a value into the device's (mantissa, exponent) pair, keeping 30 bits of mantissa.
fn encode_parameter(value: f64, is_int: bool) -> (i32, i32) {
    if is_int {
        return (value as i32, 0);
    }
    if value == 0.0 {
        return (0, 0);
    }

    let exponent = value.abs().log2().floor() as i32 - 29;
    ((value / 2f64.powi(exponent)).round() as i32, exponent)
}

// Tracks how many control transfers are inside the mock at once. Kept apart from the state
// lock so overlapping callers are visible.
#[derive(Default)]
struct Traffic {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    latency_us: AtomicU64,
}

impl Traffic {
    fn enter(&self) -> InFlight<'_> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);

        let latency = self.latency_us.load(Ordering::Relaxed);
        if latency > 0 {
            sleep(Duration::from_micros(latency));
        }
        InFlight(self)
    }
}

struct InFlight<'a>(&'a Traffic);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct MockBus {
    state: Arc<Mutex<MockState>>,
    traffic: Arc<Traffic>,
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBus {
    pub fn new() -> Self {
        let state = MockState {
            dfu_state: 2,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            traffic: Arc::new(Traffic::default()),
        }
    }

    /// A device running its runtime firmware: audio, vendor control and DFU interfaces.
    pub fn runtime_device(bus_number: u8, address: u8) -> UsbDevice {
        UsbDevice::new(
            bus_number,
            address,
            VID_RESPEAKER,
            PID_RESPEAKER,
            vec![
                UsbInterface::new(0, 0x01, 0x01),
                UsbInterface::new(1, 0x01, 0x02),
                UsbInterface::new(2, 0x01, 0x02),
                UsbInterface::new(3, 0xFF, 0x00),
                UsbInterface::new(4, 0xFE, 0x01),
            ],
        )
    }

    /// A device in DFU mode, exposing only the DFU interface.
    pub fn dfu_device(bus_number: u8, address: u8) -> UsbDevice {
        UsbDevice::new(
            bus_number,
            address,
            VID_RESPEAKER,
            PID_RESPEAKER,
            vec![UsbInterface::new(0, 0xFE, 0x01)],
        )
    }

    pub fn plug(&self, device: UsbDevice) {
        self.state.lock().devices.push(device);
    }

    pub fn unplug(&self, bus_number: u8, address: u8) {
        let mut state = self.state.lock();
        state
            .devices
            .retain(|device| !device.is_at(bus_number, address));
        state
            .claimed
            .retain(|(bus, addr, _)| !(*bus == bus_number && *addr == address));
    }

    /// On the next RESETINTODFU request the device drops off the bus and `device` appears.
    pub fn reenumerate_on_dfu_reset(&self, device: UsbDevice) {
        self.state.lock().dfu_replacement = Some(device);
    }

    /// Queues the result of one enumeration, consumed before the plugged devices are used.
    pub fn push_scan(&self, scan: Result<Vec<UsbDevice>, rusb::Error>) {
        self.state.lock().scans.push_back(scan);
    }

    pub fn set_parameter(&self, group_id: u16, offset: u8, value: f64) {
        self.state
            .lock()
            .parameters
            .insert((group_id, offset), value);
    }

    pub fn parameter(&self, group_id: u16, offset: u8) -> Option<f64> {
        self.state
            .lock()
            .parameters
            .get(&(group_id, offset))
            .copied()
    }

    /// Answers reads of `(wIndex, wValue)` with exactly `response`.
    pub fn set_raw_read(&self, index: u16, value: u16, response: Vec<u8>) {
        self.state.lock().raw_reads.insert((index, value), response);
    }

    /// Makes every parameter read fail with `error`, or succeed again with `None`.
    pub fn fail_reads(&self, error: Option<rusb::Error>) {
        self.state.lock().read_failure = error;
    }

    /// Queues one GETSTATUS response. Without one queued the device reports success.
    pub fn push_dfu_status(&self, status: [u8; 6]) {
        self.state.lock().dfu_statuses.push_back(status);
    }

    pub fn set_dfu_state(&self, state: u8) {
        self.state.lock().dfu_state = state;
    }

    pub fn attach_kernel_driver(&self, bus_number: u8, address: u8, interface: u8) {
        self.state
            .lock()
            .kernel_drivers
            .insert((bus_number, address, interface));
    }

    pub fn kernel_driver_attached(&self, bus_number: u8, address: u8, interface: u8) -> bool {
        self.state
            .lock()
            .kernel_drivers
            .contains(&(bus_number, address, interface))
    }

    pub fn fail_detach(&self, fail: bool) {
        self.state.lock().fail_detach = fail;
    }

    pub fn transfers(&self) -> Vec<Transfer> {
        self.state.lock().transfers.clone()
    }

    pub fn clear_transfers(&self) {
        self.state.lock().transfers.clear();
    }

    /// `(bus, address, interface)` of every claimed interface.
    pub fn claimed_interfaces(&self) -> Vec<(u8, u8, u8)> {
        self.state.lock().claimed.clone()
    }

    pub fn open_handles(&self) -> usize {
        self.state.lock().open_handles
    }

    /// Makes every control transfer take at least `latency`.
    pub fn set_transfer_latency(&self, latency: Duration) {
        self.traffic
            .latency_us
            .store(latency.as_micros() as u64, Ordering::Relaxed);
    }

    /// The most control transfers ever seen in progress at the same time.
    pub fn peak_transfers_in_flight(&self) -> usize {
        self.traffic.peak.load(Ordering::SeqCst)
    }
}

impl UsbBackend for MockBus {
    fn devices(&self, vendor_id: u16, product_id: u16) -> Result<Vec<UsbDevice>, rusb::Error> {
        let mut state = self.state.lock();
        let devices = match state.scans.pop_front() {
            Some(scan) => scan?,
            None => state.devices.clone(),
        };

        Ok(devices
            .into_iter()
            .filter(|device| device.vendor_id() == vendor_id && device.product_id() == product_id)
            .collect())
    }

    fn open(&self, device: &UsbDevice) -> Result<Box<dyn ControlHandle>, rusb::Error> {
        let mut state = self.state.lock();
        if !state.is_present(device.bus_number(), device.address()) {
            return Err(rusb::Error::NoDevice);
        }
        state.open_handles += 1;

        Ok(Box::new(MockHandle {
            state: self.state.clone(),
            traffic: self.traffic.clone(),
            bus_number: device.bus_number(),
            address: device.address(),
            claimed: vec![],
        }))
    }
}

struct MockHandle {
    state: Arc<Mutex<MockState>>,
    traffic: Arc<Traffic>,
    bus_number: u8,
    address: u8,
    claimed: Vec<u8>,
}

impl MockHandle {
    fn key(&self, interface: u8) -> (u8, u8, u8) {
        (self.bus_number, self.address, interface)
    }

    fn transfer(&self, request_type: u8, request: u8, value: u16, index: u16) -> Transfer {
        Transfer {
            bus_number: self.bus_number,
            address: self.address,
            request_type,
            request,
            value,
            index,
            data: vec![],
            length: 0,
        }
    }
}

impl ControlHandle for MockHandle {
    fn kernel_driver_active(&mut self, interface: u8) -> Result<bool, rusb::Error> {
        Ok(self
            .state
            .lock()
            .kernel_drivers
            .contains(&self.key(interface)))
    }

    fn detach_kernel_driver(&mut self, interface: u8) -> Result<(), rusb::Error> {
        let key = self.key(interface);
        let mut state = self.state.lock();
        if state.fail_detach {
            return Err(rusb::Error::NotSupported);
        }
        state.kernel_drivers.remove(&key);
        Ok(())
    }

    fn claim_interface(&mut self, interface: u8) -> Result<(), rusb::Error> {
        let key = self.key(interface);
        let mut state = self.state.lock();
        if !state.is_present(self.bus_number, self.address) {
            return Err(rusb::Error::NoDevice);
        }
        if state.claimed.contains(&key) {
            return Err(rusb::Error::Busy);
        }

        state.claimed.push(key);
        self.claimed.push(interface);
        Ok(())
    }

    fn release_interface(&mut self, interface: u8) -> Result<(), rusb::Error> {
        let key = self.key(interface);
        self.claimed.retain(|claimed| *claimed != interface);

        let mut state = self.state.lock();
        if !state.is_present(self.bus_number, self.address) {
            return Err(rusb::Error::NoDevice);
        }
        match state.claimed.iter().position(|claimed| *claimed == key) {
            Some(position) => {
                state.claimed.remove(position);
                Ok(())
            }
            None => Err(rusb::Error::NotFound),
        }
    }

    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<usize, rusb::Error> {
        let _in_flight = self.traffic.enter();
        let mut state = self.state.lock();
        if !state.is_present(self.bus_number, self.address) {
            return Err(rusb::Error::NoDevice);
        }

        let mut transfer = self.transfer(request_type, request, value, index);
        transfer.data = data.to_vec();
        transfer.length = data.len();
        state.transfers.push(transfer);

        match request_type {
            VENDOR_OUT if request == VENDOR_REQUEST && index != PIXEL_RING_INDEX => {
                state.store_parameter(index, data);
            }
            CLASS_OUT if request == DfuRequest::ResetIntoDfu.id() => {
                state.reenumerate(self.bus_number, self.address);
            }
            _ => {}
        }
        Ok(data.len())
    }

    fn read_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, rusb::Error> {
        let _in_flight = self.traffic.enter();
        let mut state = self.state.lock();
        if !state.is_present(self.bus_number, self.address) {
            return Err(rusb::Error::NoDevice);
        }

        let response = match request_type {
            VENDOR_IN if request == VENDOR_REQUEST => {
                if let Some(error) = state.read_failure {
                    return Err(error);
                }
                state.parameter_response(index, value)
            }
            CLASS_IN if request == DfuRequest::GetStatus.id() => {
                let dfu_state = state.dfu_state;
                state
                    .dfu_statuses
                    .pop_front()
                    .unwrap_or([0, 0, 0, 0, dfu_state, 0])
                    .to_vec()
            }
            CLASS_IN if request == DfuRequest::GetState.id() => vec![state.dfu_state],
            _ => return Err(rusb::Error::Pipe),
        };

        let mut transfer = self.transfer(request_type, request, value, index);
        transfer.length = buf.len();
        state.transfers.push(transfer);

        let length = response.len().min(buf.len());
        buf[..length].copy_from_slice(&response[..length]);
        Ok(length)
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.open_handles -= 1;
        for interface in &self.claimed {
            let key = (self.bus_number, self.address, *interface);
            state.claimed.retain(|claimed| *claimed != key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    #[test]
    fn overlapping_transfers_are_counted() {
        let bus = MockBus::new();
        bus.plug(MockBus::runtime_device(1, 2));
        bus.set_transfer_latency(Duration::from_millis(50));

        let handles = [
            bus.open(&MockBus::runtime_device(1, 2)).unwrap(),
            bus.open(&MockBus::runtime_device(1, 2)).unwrap(),
        ];
        let barrier = Barrier::new(2);
        std::thread::scope(|scope| {
            for mut handle in handles {
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    let mut buf = [0; 8];
                    handle
                        .read_control(VENDOR_IN, 0, 0xC0, 19, &mut buf, Duration::from_secs(1))
                        .unwrap();
                });
            }
        });

        assert_eq!(bus.peak_transfers_in_flight(), 2);
    }

    #[test]
    fn float_encoding_is_exact_for_f32_values() {
        for value in [0.25f32, 1.0, 6.0, 16.0, 0.9, 1e-9, 999.5, -3.75] {
            let (hi, lo) = encode_parameter(value as f64, false);
            assert_eq!(hi as f64 * 2f64.powi(lo), value as f64, "{value}");
        }
    }

    #[test]
    fn reads_fail_once_unplugged() {
        let bus = MockBus::new();
        bus.plug(MockBus::runtime_device(1, 2));
        let mut handle = bus.open(&MockBus::runtime_device(1, 2)).unwrap();
        bus.unplug(1, 2);

        let mut buf = [0; 8];
        assert_eq!(
            handle.read_control(VENDOR_IN, 0, 0xC0, 19, &mut buf, Duration::from_secs(1)),
            Err(rusb::Error::NoDevice)
        );
        drop(handle);
        assert_eq!(bus.open_handles(), 0);
    }

    #[test]
    fn scripted_scans_come_first() {
        let bus = MockBus::new();
        bus.plug(MockBus::runtime_device(1, 2));
        bus.push_scan(Err(rusb::Error::Io));

        assert_eq!(
            bus.devices(VID_RESPEAKER, PID_RESPEAKER),
            Err(rusb::Error::Io)
        );
        assert_eq!(bus.devices(VID_RESPEAKER, PID_RESPEAKER).unwrap().len(), 1);
        assert!(bus.devices(VID_RESPEAKER, 0x1234).unwrap().is_empty());
    }
}
