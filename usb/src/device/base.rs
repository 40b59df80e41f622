use log::debug;
use rusb::{Direction, Recipient, RequestType};
use std::time::Duration;

pub const DFU_INTERFACE_CLASS: u8 = 0xFE;
pub const DFU_INTERFACE_SUBCLASS: u8 = 0x01;

// Everything that touches the bus goes through these two traits, so the client, DFU controller
// and discovery can run against libusb or against the in-memory bus in `mock`.
pub trait UsbBackend: Send + Sync {
    fn devices(&self, vendor_id: u16, product_id: u16) -> Result<Vec<UsbDevice>, rusb::Error>;
    fn open(&self, device: &UsbDevice) -> Result<Box<dyn ControlHandle>, rusb::Error>;
}

pub trait ControlHandle: Send {
    fn kernel_driver_active(&mut self, interface: u8) -> Result<bool, rusb::Error>;
    fn detach_kernel_driver(&mut self, interface: u8) -> Result<(), rusb::Error>;
    fn claim_interface(&mut self, interface: u8) -> Result<(), rusb::Error>;
    fn release_interface(&mut self, interface: u8) -> Result<(), rusb::Error>;

    fn write_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, rusb::Error>;

    fn read_control(
        &mut self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, rusb::Error>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UsbInterface {
    pub number: u8,
    pub class: u8,
    pub subclass: u8,
}

impl UsbInterface {
    pub fn new(number: u8, class: u8, subclass: u8) -> Self {
        Self {
            number,
            class,
            subclass,
        }
    }

    pub fn is_dfu(&self) -> bool {
        self.class == DFU_INTERFACE_CLASS && self.subclass == DFU_INTERFACE_SUBCLASS
    }
}

/// A snapshot of a device on the bus, located again by bus number and address when opened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UsbDevice {
    pub(crate) bus_number: u8,
    pub(crate) address: u8,
    pub(crate) vendor_id: u16,
    pub(crate) product_id: u16,

    // Interfaces of the active configuration.
    pub(crate) interfaces: Vec<UsbInterface>,

    // Interface numbers across every configuration.
    pub(crate) all_interface_numbers: Vec<u8>,
}

impl UsbDevice {
    pub fn new(
        bus_number: u8,
        address: u8,
        vendor_id: u16,
        product_id: u16,
        interfaces: Vec<UsbInterface>,
    ) -> Self {
        let all_interface_numbers = interfaces.iter().map(|i| i.number).collect();
        Self {
            bus_number,
            address,
            vendor_id,
            product_id,
            interfaces,
            all_interface_numbers,
        }
    }

    pub fn bus_number(&self) -> u8 {
        self.bus_number
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    pub fn product_id(&self) -> u16 {
        self.product_id
    }

    pub fn interfaces(&self) -> &[UsbInterface] {
        &self.interfaces
    }

    pub fn all_interface_numbers(&self) -> &[u8] {
        &self.all_interface_numbers
    }

    pub fn num_interfaces(&self) -> u8 {
        self.interfaces.len() as u8
    }

    pub fn dfu_interface(&self) -> Option<&UsbInterface> {
        self.interfaces.iter().find(|interface| interface.is_dfu())
    }

    pub fn is_at(&self, bus_number: u8, address: u8) -> bool {
        self.bus_number == bus_number && self.address == address
    }
}

pub(crate) fn vendor_request(direction: Direction) -> u8 {
    rusb::request_type(direction, RequestType::Vendor, Recipient::Device)
}

pub(crate) fn class_request(direction: Direction) -> u8 {
    rusb::request_type(direction, RequestType::Class, Recipient::Interface)
}

pub(crate) fn detach_kernel_driver(handle: &mut dyn ControlHandle, interface: u8) {
    match handle.kernel_driver_active(interface) {
        Ok(true) => {
            if let Err(error) = handle.detach_kernel_driver(interface) {
                // Not every platform supports detaching, carry on without it.
                debug!("Unable to detach kernel driver from interface {interface}: {error}");
            } else {
                debug!("Detached kernel driver from interface {interface}");
            }
        }
        Ok(false) => {}
        Err(error) => {
            debug!("Unable to query kernel driver on interface {interface}: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_types() {
        assert_eq!(vendor_request(Direction::In), 0xC0);
        assert_eq!(vendor_request(Direction::Out), 0x40);
        assert_eq!(class_request(Direction::In), 0xA1);
        assert_eq!(class_request(Direction::Out), 0x21);
    }

    #[test]
    fn locates_dfu_interface() {
        let device = UsbDevice::new(
            1,
            4,
            0x2886,
            0x0018,
            vec![
                UsbInterface::new(0, 0x01, 0x01),
                UsbInterface::new(1, 0xFF, 0x00),
                UsbInterface::new(3, 0xFE, 0x01),
            ],
        );
        assert_eq!(device.num_interfaces(), 3);
        assert_eq!(device.dfu_interface().map(|i| i.number), Some(3));
        assert_eq!(device.all_interface_numbers(), &[0, 1, 3]);
    }
}
