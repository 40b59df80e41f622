// bRequest for every vendor transfer to the runtime firmware, parameter or LED.
pub const VENDOR_REQUEST: u8 = 0;

// wIndex that routes a vendor write to the LED ring rather than a parameter group.
pub const PIXEL_RING_INDEX: u16 = 0x1C;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PixelRingCommand {
    Trace,
    Colour,
    Listen,
    Speak,
    Think,
    Spin,
    Show,
    SetBrightness,
    SetPalette,
    SetVadLed,
    SetVolume,
}

impl PixelRingCommand {
    pub fn id(&self) -> u16 {
        match self {
            PixelRingCommand::Trace => 0,
            PixelRingCommand::Colour => 1,
            PixelRingCommand::Listen => 2,
            PixelRingCommand::Speak => 3,
            PixelRingCommand::Think => 4,
            PixelRingCommand::Spin => 5,
            PixelRingCommand::Show => 6,
            PixelRingCommand::SetBrightness => 0x20,
            PixelRingCommand::SetPalette => 0x21,
            PixelRingCommand::SetVadLed => 0x22,
            PixelRingCommand::SetVolume => 0x23,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DfuRequest {
    // Standard DFU class requests
    Detach,
    Download,
    Upload,
    GetStatus,
    ClearStatus,
    GetState,
    Abort,

    // XMOS vendor extensions
    ResetDevice,
    RevertFactory,
    ResetIntoDfu,
    ResetFromDfu,
    SaveState,
    RestoreState,
}

impl DfuRequest {
    pub fn id(&self) -> u8 {
        match self {
            DfuRequest::Detach => 0,
            DfuRequest::Download => 1,
            DfuRequest::Upload => 2,
            DfuRequest::GetStatus => 3,
            DfuRequest::ClearStatus => 4,
            DfuRequest::GetState => 5,
            DfuRequest::Abort => 6,
            DfuRequest::ResetDevice => 0xF0,
            DfuRequest::RevertFactory => 0xF1,
            DfuRequest::ResetIntoDfu => 0xF2,
            DfuRequest::ResetFromDfu => 0xF3,
            DfuRequest::SaveState => 0xF5,
            DfuRequest::RestoreState => 0xF6,
        }
    }
}
