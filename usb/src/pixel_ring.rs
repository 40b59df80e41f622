use crate::client::RespeakerClient;
use crate::commands::{PixelRingCommand, PIXEL_RING_INDEX};
use crate::error::CommandError;
use std::fmt::{Display, Formatter};
use std::num::ParseIntError;
use std::str::FromStr;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Colour {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Colour {
    pub fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    pub fn to_rgb(&self) -> u32 {
        (self.red as u32) << 16 | (self.green as u32) << 8 | self.blue as u32
    }

    // The ring expects a trailing pad byte after every colour.
    pub fn to_bytes(&self) -> [u8; 4] {
        [self.red, self.green, self.blue, 0]
    }
}

impl From<u32> for Colour {
    fn from(rgb: u32) -> Self {
        Self {
            red: (rgb >> 16) as u8,
            green: (rgb >> 8) as u8,
            blue: rgb as u8,
        }
    }
}

impl From<(u8, u8, u8)> for Colour {
    fn from((red, green, blue): (u8, u8, u8)) -> Self {
        Self { red, green, blue }
    }
}

impl FromStr for Colour {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim_start_matches('#');
        Ok(Colour::from(u32::from_str_radix(hex, 16)? & 0xFFFFFF))
    }
}

impl Display for Colour {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:06X}", self.to_rgb())
    }
}

/// Drives the LED ring. Borrowed from a connected client, it shares that client's handle
/// and lock.
pub struct PixelRing<'a> {
    client: &'a RespeakerClient,
}

impl<'a> PixelRing<'a> {
    pub(crate) fn new(client: &'a RespeakerClient) -> Self {
        Self { client }
    }

    fn send(&self, command: PixelRingCommand, data: &[u8]) -> Result<(), CommandError> {
        self.client
            .write_vendor(command.id(), PIXEL_RING_INDEX, data)
    }

    // Commands that carry no data still send a single zero byte.
    fn trigger(&self, command: PixelRingCommand) -> Result<(), CommandError> {
        self.send(command, &[0])
    }

    pub fn trace(&self) -> Result<(), CommandError> {
        self.trigger(PixelRingCommand::Trace)
    }

    pub fn set_colour(&self, colour: impl Into<Colour>) -> Result<(), CommandError> {
        self.send(PixelRingCommand::Colour, &colour.into().to_bytes())
    }

    pub fn off(&self) -> Result<(), CommandError> {
        self.set_colour(Colour::default())
    }

    pub fn listen(&self) -> Result<(), CommandError> {
        self.trigger(PixelRingCommand::Listen)
    }

    pub fn speak(&self) -> Result<(), CommandError> {
        self.trigger(PixelRingCommand::Speak)
    }

    pub fn think(&self) -> Result<(), CommandError> {
        self.trigger(PixelRingCommand::Think)
    }

    pub fn spin(&self) -> Result<(), CommandError> {
        self.trigger(PixelRingCommand::Spin)
    }

    /// Sends raw LED data as-is, an empty slice included.
    pub fn show(&self, data: &[u8]) -> Result<(), CommandError> {
        self.send(PixelRingCommand::Show, data)
    }

    pub fn set_brightness(&self, brightness: u8) -> Result<(), CommandError> {
        self.send(PixelRingCommand::SetBrightness, &[brightness])
    }

    pub fn set_colour_palette(
        &self,
        first: impl Into<Colour>,
        second: impl Into<Colour>,
    ) -> Result<(), CommandError> {
        let mut palette = [0; 8];
        palette[..4].copy_from_slice(&first.into().to_bytes());
        palette[4..].copy_from_slice(&second.into().to_bytes());
        self.send(PixelRingCommand::SetPalette, &palette)
    }

    pub fn set_vad_led(&self, enabled: bool) -> Result<(), CommandError> {
        self.send(PixelRingCommand::SetVadLed, &[enabled as u8])
    }

    pub fn set_volume(&self, volume: u8) -> Result<(), CommandError> {
        self.send(PixelRingCommand::SetVolume, &[volume])
    }
}
