use crate::device::base::{ControlHandle, UsbBackend, UsbDevice, UsbInterface};
use log::debug;
use rusb::{Device, DeviceDescriptor, DeviceHandle, GlobalContext};
use std::time::Duration;

#[derive(Copy, Clone, Debug, Default)]
pub struct LibUsbBackend;

impl LibUsbBackend {
    fn find_device(device: &UsbDevice) -> Result<Device<GlobalContext>, rusb::Error> {
        for usb_device in rusb::devices()?.iter() {
            if usb_device.bus_number() == device.bus_number
                && usb_device.address() == device.address
            {
                return Ok(usb_device);
            }
        }
        Err(rusb::Error::NoDevice)
    }

    fn describe(device: &Device<GlobalContext>, descriptor: &DeviceDescriptor) -> UsbDevice {
        let mut interfaces = vec![];
        match device.active_config_descriptor() {
            Ok(config) => {
                for interface in config.interfaces() {
                    // The first alternate setting carries the class of the interface.
                    if let Some(setting) = interface.descriptors().next() {
                        interfaces.push(UsbInterface::new(
                            interface.number(),
                            setting.class_code(),
                            setting.sub_class_code(),
                        ));
                    }
                }
            }
            Err(error) => {
                debug!("Unable to read active configuration of {:?}: {}", device, error);
            }
        }

        let mut all_interface_numbers = vec![];
        for index in 0..descriptor.num_configurations() {
            if let Ok(config) = device.config_descriptor(index) {
                for interface in config.interfaces() {
                    if !all_interface_numbers.contains(&interface.number()) {
                        all_interface_numbers.push(interface.number());
                    }
                }
            }
        }

        UsbDevice {
            bus_number: device.bus_number(),
            address: device.address(),
            vendor_id: descriptor.vendor_id(),
            product_id: descriptor.product_id(),
            interfaces,
            all_interface_numbers,
        }
    }
}

impl UsbBackend for LibUsbBackend {
    fn devices(&self, vendor_id: u16, product_id: u16) -> Result<Vec<UsbDevice>, rusb::Error> {
        let mut found_devices = vec![];

        for device in rusb::devices()?.iter() {
            if let Ok(descriptor) = device.device_descriptor() {
                if descriptor.vendor_id() == vendor_id && descriptor.product_id() == product_id {
                    found_devices.push(Self::describe(&device, &descriptor));
                }
            }
        }

        Ok(found_devices)
    }

    fn open(&self, device: &UsbDevice) -> Result<Box<dyn ControlHandle>, rusb::Error> {
        let handle = Self::find_device(device)?.open()?;
        debug!("Opened {:?}", handle.device());
        Ok(Box::new(LibUsbHandle { handle }))
    }
}

struct LibUsbHandle {
    handle: DeviceHandle<GlobalContext>,
}

impl ControlHandle for LibUsbHandle {
    fn kernel_driver_active(&mut self, interface: u8) -> Result<bool, rusb::Error> {
        self.handle.kernel_driver_active(interface)
    }

    fn detach_kernel_driver(&mut self, interface: u8) -> Result<(), rusb::Error> {
        self.handle.detach_kernel_driver(interface)
    }

    fn claim_interface(&mut self, interface: u8) -> Result<(), rusb::Error> {
        self.handle.claim_interface(interface)
    }

    fn release_interface(&mut self, interface: u8) -> Result<(), rusb::Error> {
        self.handle.release_interface(interface)
    }

    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, rusb::Error> {
        self.handle
            .write_control(request_type, request, value, index, data, timeout)
    }

    fn read_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, rusb::Error> {
        self.handle
            .read_control(request_type, request, value, index, buf, timeout)
    }
}
