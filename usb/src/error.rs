#[derive(thiserror::Error, Debug)]
pub enum ConnectError {
    #[error("No ReSpeaker device was found")]
    DeviceNotFound,

    #[error("Found {0} ReSpeaker DFU interfaces, expected exactly one")]
    MultipleDevicesFound(usize),

    #[error("USB error: {0}")]
    UsbError(#[from] rusb::Error),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Device unresponsive, please replug: {0}")]
    Unresponsive(#[source] CommandError),
}

#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    #[error("Not connected to a ReSpeaker device")]
    NotConnected,

    #[error("Parameter {group_id}:{offset} is read only")]
    ParameterAccess { group_id: u16, offset: u8 },

    #[error("Parameter {group_id}:{offset} value {value} outside [{min}..{max}]")]
    ParameterRange {
        group_id: u16,
        offset: u8,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("DFU status {code}: {description}")]
    DfuStatus { code: u8, description: &'static str },

    #[error("USB error: {0}")]
    UsbError(#[from] rusb::Error),

    #[error("Malformed response from device, expected {expected} bytes, received {received}")]
    MalformedResponse { expected: usize, received: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
