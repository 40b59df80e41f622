use crate::device::base::UsbBackend;
use std::sync::Arc;

pub mod base;

// Linux / MacOS / Windows (with WinUSB) all reach the device through libusb.
mod libusb;
pub use crate::device::libusb::device::LibUsbBackend;

pub fn default_backend() -> Arc<dyn UsbBackend> {
    Arc::new(LibUsbBackend)
}
