use crate::commands::DfuRequest;
use crate::device::base::{
    class_request, detach_kernel_driver, ControlHandle, UsbBackend, UsbDevice,
};
use crate::device::default_backend;
use crate::dfu::firmware::read_block;
use crate::dfu::status::STATUS_LENGTH;
use crate::error::{CommandError, ConnectError};
use log::{debug, info, warn};
use parking_lot::Mutex;
use respeaker_types::{DeviceMode, PID_RESPEAKER, VID_RESPEAKER};
use rusb::Direction;
use std::io::{self, ErrorKind};
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

pub mod firmware;
pub mod status;

pub use firmware::FirmwareSource;
pub use status::{DfuState, DfuStatus};

pub const DEFAULT_BLOCK_SIZE: usize = 64;

const RUNTIME_INTERFACE_COUNT: u8 = 5;
const DFU_INTERFACE_COUNT: u8 = 1;

#[derive(Clone, Debug)]
pub struct DfuConfig {
    pub vendor_id: u16,
    pub product_id: u16,
    pub timeout: Duration,
    pub reenumeration_interval: Duration,
    pub reenumeration_timeout: Duration,
    pub detach_kernel_drivers: bool,
}

impl Default for DfuConfig {
    fn default() -> Self {
        Self {
            vendor_id: VID_RESPEAKER,
            product_id: PID_RESPEAKER,
            timeout: Duration::from_secs(120),
            reenumeration_interval: Duration::from_millis(500),
            reenumeration_timeout: Duration::from_secs(20),
            detach_kernel_drivers: true,
        }
    }
}

/// A device exposing a DFU interface, as seen during a single scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DfuDeviceInfo {
    pub device: UsbDevice,
    pub interface_number: u8,
    pub num_interfaces: u8,
}

impl DfuDeviceInfo {
    pub fn mode(&self) -> DeviceMode {
        DeviceMode::from_interface_count(self.num_interfaces)
    }
}

struct Connection {
    handle: Box<dyn ControlHandle>,
    info: DfuDeviceInfo,
}

impl Connection {
    fn out_request(
        &mut self,
        request: DfuRequest,
        value: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<(), CommandError> {
        self.handle.write_control(
            class_request(Direction::Out),
            request.id(),
            value,
            self.info.interface_number as u16,
            data,
            timeout,
        )?;
        Ok(())
    }

    fn in_request(
        &mut self,
        request: DfuRequest,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, CommandError> {
        Ok(self.handle.read_control(
            class_request(Direction::In),
            request.id(),
            0,
            self.info.interface_number as u16,
            buf,
            timeout,
        )?)
    }

    fn get_status(&mut self, timeout: Duration) -> Result<DfuStatus, CommandError> {
        let mut data = [0; STATUS_LENGTH];
        let length = self.in_request(DfuRequest::GetStatus, &mut data, timeout)?;
        DfuStatus::parse(&data[..length])
    }

    fn release(mut self) {
        let interface = self.info.interface_number;
        if let Err(error) = self.handle.release_interface(interface) {
            // The device may already have reset and left the bus.
            debug!("Unable to release DFU interface {}: {}", interface, error);
        }
    }
}

/// Drives the device's firmware update interface.
///
/// The controller only remembers which interface it has claimed, the DFU state machine itself
/// lives on the device and is queried with [`RespeakerDfu::get_status`] and
/// [`RespeakerDfu::get_state`]. All requests on one controller are serialised.
pub struct RespeakerDfu {
    backend: Arc<dyn UsbBackend>,
    config: DfuConfig,
    connection: Mutex<Option<Connection>>,
}

impl RespeakerDfu {
    pub fn new(config: DfuConfig) -> Self {
        Self::with_backend(default_backend(), config)
    }

    pub fn with_backend(backend: Arc<dyn UsbBackend>, config: DfuConfig) -> Self {
        Self {
            backend,
            config,
            connection: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &DfuConfig {
        &self.config
    }

    pub fn find_devices(&self) -> Result<Vec<DfuDeviceInfo>, rusb::Error> {
        let devices = self
            .backend
            .devices(self.config.vendor_id, self.config.product_id)?;

        Ok(devices
            .into_iter()
            .filter_map(|device| {
                let interface_number = device.dfu_interface()?.number;
                Some(DfuDeviceInfo {
                    interface_number,
                    num_interfaces: device.num_interfaces(),
                    device,
                })
            })
            .collect())
    }

    pub fn is_available(&self) -> bool {
        match self
            .backend
            .devices(self.config.vendor_id, self.config.product_id)
        {
            Ok(devices) => !devices.is_empty(),
            Err(error) => {
                debug!("Unable to enumerate devices: {}", error);
                false
            }
        }
    }

    /// Claims the DFU interface of the only attached device. A device still running its
    /// runtime firmware is first reset into DFU mode when `require_dfu_mode` is set.
    pub fn connect(&self, require_dfu_mode: bool) -> Result<(), ConnectError> {
        let mut connection = self.connection.lock();
        if connection.is_some() {
            return Ok(());
        }

        let mut info = self.single_device()?;
        if info.mode() == DeviceMode::Runtime && require_dfu_mode {
            info!("Device is in runtime mode, resetting into DFU");

            let mut runtime = self.claim(info)?;
            let reset =
                runtime.out_request(DfuRequest::ResetIntoDfu, 0, &[], self.config.timeout);
            runtime.release();
            reset?;

            info = self.reenumerate_into_dfu(self.config.reenumeration_timeout)?;
        }

        *connection = Some(self.claim(info)?);
        Ok(())
    }

    pub fn disconnect(&self) {
        if let Some(connection) = self.connection.lock().take() {
            connection.release();
            info!("Released DFU interface");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.lock().is_some()
    }

    pub fn interface_number(&self) -> Option<u8> {
        self.connection
            .lock()
            .as_ref()
            .map(|connection| connection.info.interface_number)
    }

    pub fn num_interfaces(&self) -> u8 {
        self.connection
            .lock()
            .as_ref()
            .map_or(0, |connection| connection.info.num_interfaces)
    }

    pub fn enter_dfu_mode(&self, timeout: Duration) -> Result<(), ConnectError> {
        let mut connection = self.connection.lock();
        let active = connection.as_mut().ok_or(CommandError::NotConnected)?;
        if active.info.num_interfaces == DFU_INTERFACE_COUNT {
            return Ok(());
        }

        active.out_request(DfuRequest::ResetIntoDfu, 0, &[], self.config.timeout)?;
        if let Some(runtime) = connection.take() {
            runtime.release();
        }

        let info = self.reenumerate_into_dfu(timeout)?;
        *connection = Some(self.claim(info)?);
        Ok(())
    }

    pub fn leave_dfu_and_reboot(&self) -> Result<(), CommandError> {
        self.request(DfuRequest::ResetFromDfu)
    }

    pub fn revert_to_factory(&self) -> Result<(), CommandError> {
        self.request(DfuRequest::RevertFactory)
    }

    pub fn reset_device(&self) -> Result<(), CommandError> {
        self.request(DfuRequest::ResetDevice)
    }

    pub fn save_state(&self) -> Result<(), CommandError> {
        self.request(DfuRequest::SaveState)
    }

    pub fn restore_state(&self) -> Result<(), CommandError> {
        self.request(DfuRequest::RestoreState)
    }

    pub fn abort_transfer(&self) -> Result<(), CommandError> {
        self.request(DfuRequest::Abort)
    }

    pub fn clear_status(&self) -> Result<(), CommandError> {
        self.request(DfuRequest::ClearStatus)
    }

    /// Streams a firmware image to the device in `block_size` chunks, checking the device
    /// status after every block. The image is always followed by an empty block, which marks
    /// the end of the download. `on_progress` is called with the block number and its length
    /// once the device has accepted it.
    ///
    /// The device is left in DFU mode, call [`RespeakerDfu::leave_dfu_and_reboot`] to run the
    /// new firmware.
    pub fn download_firmware<'a>(
        &self,
        source: impl Into<FirmwareSource<'a>>,
        block_size: usize,
        mut on_progress: impl FnMut(u32, usize),
    ) -> Result<(), CommandError> {
        let mut connection = self.connection.lock();
        let active = connection.as_mut().ok_or(CommandError::NotConnected)?;
        if block_size == 0 {
            return Err(CommandError::Io(io::Error::new(
                ErrorKind::InvalidInput,
                "block size must be at least one byte",
            )));
        }

        let mut reader = source.into().open()?;
        let mut block = Vec::with_capacity(block_size);
        let mut block_number: u32 = 0;
        let mut total = 0;

        loop {
            read_block(&mut reader, &mut block, block_size)?;

            // wValue is 16 bits, larger images simply wrap the block counter.
            active.out_request(
                DfuRequest::Download,
                block_number as u16,
                &block,
                self.config.timeout,
            )?;

            let status = active.get_status(self.config.timeout)?;
            if let Err(error) = status.check() {
                warn!("Device rejected firmware block {}: {}", block_number, error);
                return Err(error);
            }

            debug!("Block {} accepted ({} bytes)", block_number, block.len());
            on_progress(block_number, block.len());
            total += block.len();

            if block.is_empty() {
                break;
            }
            block_number += 1;
        }

        info!("Firmware download complete, {} bytes", total);
        Ok(())
    }

    pub fn get_status(&self) -> Result<DfuStatus, CommandError> {
        let mut connection = self.connection.lock();
        let active = connection.as_mut().ok_or(CommandError::NotConnected)?;
        active.get_status(self.config.timeout)
    }

    pub fn get_state(&self) -> Result<DfuState, CommandError> {
        let mut connection = self.connection.lock();
        let active = connection.as_mut().ok_or(CommandError::NotConnected)?;

        let mut data = [0; 1];
        let length = active.in_request(DfuRequest::GetState, &mut data, self.config.timeout)?;
        if length < 1 {
            return Err(CommandError::MalformedResponse {
                expected: 1,
                received: length,
            });
        }
        Ok(DfuState::from_code(data[0]))
    }

    pub fn wait_for_runtime_device(&self, timeout: Duration) -> Result<(), ConnectError> {
        self.wait_for_reenumeration(RUNTIME_INTERFACE_COUNT, timeout)
    }

    pub fn wait_for_dfu_device(&self, timeout: Duration) -> Result<(), ConnectError> {
        self.wait_for_reenumeration(DFU_INTERFACE_COUNT, timeout)
    }

    fn request(&self, request: DfuRequest) -> Result<(), CommandError> {
        let mut connection = self.connection.lock();
        let active = connection.as_mut().ok_or(CommandError::NotConnected)?;

        debug!("Sending DFU request {:?}", request);
        active.out_request(request, 0, &[], self.config.timeout)
    }

    fn single_device(&self) -> Result<DfuDeviceInfo, ConnectError> {
        let mut devices = self.find_devices()?;
        match devices.len() {
            0 => Err(ConnectError::DeviceNotFound),
            1 => Ok(devices.remove(0)),
            count => Err(ConnectError::MultipleDevicesFound(count)),
        }
    }

    fn claim(&self, info: DfuDeviceInfo) -> Result<Connection, ConnectError> {
        let mut handle = self.backend.open(&info.device)?;
        if self.config.detach_kernel_drivers {
            detach_kernel_driver(handle.as_mut(), info.interface_number);
        }
        handle.claim_interface(info.interface_number)?;

        info!(
            "Claimed DFU interface {} on bus {} address {} ({} interfaces)",
            info.interface_number,
            info.device.bus_number(),
            info.device.address(),
            info.num_interfaces
        );
        Ok(Connection { handle, info })
    }

    fn reenumerate_into_dfu(&self, timeout: Duration) -> Result<DfuDeviceInfo, ConnectError> {
        self.wait_for_dfu_device(timeout)?;
        self.find_devices()?
            .into_iter()
            .next()
            .ok_or(ConnectError::DeviceNotFound)
    }

    fn wait_for_reenumeration(&self, expected: u8, timeout: Duration) -> Result<(), ConnectError> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            sleep(self.config.reenumeration_interval);

            match self.find_devices() {
                Ok(devices) => {
                    if devices.first().map(|info| info.num_interfaces) == Some(expected) {
                        return Ok(());
                    }
                }
                Err(error) => debug!("Scan failed while waiting for device: {}", error),
            }
        }

        warn!("Timed out waiting for a device with {} interfaces", expected);
        Err(ConnectError::DeviceNotFound)
    }
}
