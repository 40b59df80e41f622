use crate::commands::VENDOR_REQUEST;
use crate::device::base::{detach_kernel_driver, vendor_request, ControlHandle, UsbBackend};
use crate::device::default_backend;
use crate::error::{CommandError, ConnectError};
use crate::parameters::{
    decode_read, encode_write, read_request_value, validate_write, READ_RESPONSE_LENGTH,
};
use crate::pixel_ring::PixelRing;
use log::{debug, info};
use parking_lot::Mutex;
use respeaker_types::{Parameter, ParameterDescriptor, ValueType, PID_RESPEAKER, VID_RESPEAKER};
use rusb::Direction;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub vendor_id: u16,
    pub product_id: u16,
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            vendor_id: VID_RESPEAKER,
            product_id: PID_RESPEAKER,
            timeout: Duration::from_secs(100),
        }
    }
}

/// Reads and writes device parameters over vendor control transfers.
///
/// Every method takes `&self`, a single lock around the handle serialises access to the
/// hardware so a client can be shared between the poll thread and callers.
pub struct RespeakerClient {
    backend: Arc<dyn UsbBackend>,
    config: ClientConfig,
    handle: Mutex<Option<Box<dyn ControlHandle>>>,
}

impl RespeakerClient {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_backend(default_backend(), config)
    }

    pub fn with_backend(backend: Arc<dyn UsbBackend>, config: ClientConfig) -> Self {
        Self {
            backend,
            config,
            handle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
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

    pub fn is_connected(&self) -> bool {
        self.handle.lock().is_some()
    }

    pub fn connect(&self) -> Result<(), ConnectError> {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Ok(());
        }

        let device = self
            .backend
            .devices(self.config.vendor_id, self.config.product_id)?
            .into_iter()
            .next()
            .ok_or(ConnectError::DeviceNotFound)?;

        let mut opened = self.backend.open(&device)?;
        for interface in device.all_interface_numbers() {
            detach_kernel_driver(opened.as_mut(), *interface);
        }

        info!(
            "Connected to ReSpeaker at bus {} address {}",
            device.bus_number(),
            device.address()
        );
        *handle = Some(opened);
        Ok(())
    }

    pub fn disconnect(&self) {
        if self.handle.lock().take().is_some() {
            info!("Disconnected from ReSpeaker");
        }
    }

    pub fn read_value(
        &self,
        group_id: u16,
        offset: u8,
        value_type: ValueType,
    ) -> Result<f64, CommandError> {
        let mut guard = self.handle.lock();
        let handle = guard.as_mut().ok_or(CommandError::NotConnected)?;

        let mut response = [0; READ_RESPONSE_LENGTH];
        let length = handle.read_control(
            vendor_request(Direction::In),
            VENDOR_REQUEST,
            read_request_value(offset, value_type),
            group_id,
            &mut response,
            self.config.timeout,
        )?;

        let value = decode_read(value_type, &response[..length])?;
        debug!("Read {}:{} = {}", group_id, offset, value);
        Ok(value)
    }

    pub fn write_value(
        &self,
        group_id: u16,
        offset: u8,
        value_type: ValueType,
        value: f64,
    ) -> Result<(), CommandError> {
        let payload = encode_write(offset, value_type, value);
        debug!("Writing {}:{} = {}", group_id, offset, value);
        self.write_vendor(0, group_id, &payload)
    }

    pub fn read_parameter(&self, descriptor: &ParameterDescriptor) -> Result<f64, CommandError> {
        self.read_value(descriptor.group_id, descriptor.offset, descriptor.value_type)
    }

    /// Writes a value after checking it against the descriptor's access mode and bounds.
    /// Nothing is sent to the device when the check fails.
    pub fn write_parameter(
        &self,
        descriptor: &ParameterDescriptor,
        value: f64,
    ) -> Result<(), CommandError> {
        validate_write(descriptor, value)?;
        self.write_value(
            descriptor.group_id,
            descriptor.offset,
            descriptor.value_type,
            value,
        )
    }

    pub fn read(&self, parameter: Parameter) -> Result<f64, CommandError> {
        self.read_parameter(&parameter.descriptor())
    }

    pub fn write(&self, parameter: Parameter, value: f64) -> Result<(), CommandError> {
        self.write_parameter(&parameter.descriptor(), value)
    }

    /// Direction of the dominant sound source, in degrees.
    pub fn direction_of_arrival(&self) -> Result<u16, CommandError> {
        Ok(self.read(Parameter::DoaAngle)? as u16)
    }

    pub fn voice_activity(&self) -> Result<bool, CommandError> {
        Ok(self.read(Parameter::VoiceActivity)? != 0.)
    }

    pub fn speech_detected(&self) -> Result<bool, CommandError> {
        Ok(self.read(Parameter::SpeechDetected)? != 0.)
    }

    pub fn pixel_ring(&self) -> PixelRing<'_> {
        PixelRing::new(self)
    }

    pub(crate) fn write_vendor(
        &self,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> Result<(), CommandError> {
        let mut guard = self.handle.lock();
        let handle = guard.as_mut().ok_or(CommandError::NotConnected)?;

        handle.write_control(
            vendor_request(Direction::Out),
            VENDOR_REQUEST,
            value,
            index,
            data,
            self.config.timeout,
        )?;
        Ok(())
    }
}
