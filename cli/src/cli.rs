use clap::{Args, Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;
use respeaker_types::Parameter;
use respeaker_usb::pixel_ring::Colour;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(about, version, author)]
pub struct Cli {
    /// Minimum log level to print out
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LevelFilter,

    /// Location of the settings file on disk
    #[arg(long, default_value_os_t = default_config_location(), global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: SubCommands,
}

fn default_config_location() -> PathBuf {
    match ProjectDirs::from("io", "ReSpeaker", "ReSpeaker-Utility") {
        Some(dirs) => dirs.config_dir().join("settings.json"),
        None => PathBuf::from("settings.json"),
    }
}

#[derive(Subcommand, Debug)]
pub enum SubCommands {
    /// List attached devices and the mode they're running in
    List,

    /// Print the parameter table
    Params {
        /// Print the table as JSON
        #[arg(long)]
        json: bool,
    },

    /// Read a parameter from the device
    Get {
        /// Parameter name, for example AGCGAIN
        parameter: Parameter,
    },

    /// Write a parameter to the device
    Set {
        /// Parameter name, for example AGCGAIN
        parameter: Parameter,

        #[arg(allow_negative_numbers = true)]
        value: f64,
    },

    /// Control the LED ring
    Led {
        #[command(subcommand)]
        command: LedCommands,
    },

    /// Mirror every parameter and log changes until interrupted
    Watch {
        /// Poll interval in milliseconds, overrides the settings file
        #[arg(long)]
        interval_ms: Option<u64>,
    },

    /// Log devices arriving and leaving until interrupted
    Discover,

    /// Firmware update commands
    Dfu {
        #[command(subcommand)]
        command: DfuCommands,
    },

    /// Print the settings currently in effect
    Settings,
}

#[derive(Subcommand, Debug)]
pub enum LedCommands {
    /// Follow the direction of arrival
    Trace,
    Off,
    Listen,
    Speak,
    Think,
    Spin,

    /// Set every LED to a single colour
    Colour {
        /// Hex RGB value, for example FF8000
        colour: Colour,
    },

    Brightness {
        /// 0 - 31
        #[arg(value_parser = clap::value_parser!(u8).range(0..=31))]
        level: u8,
    },

    /// Set the two colours used by the think and speak patterns
    Palette { first: Colour, second: Colour },

    /// Toggle the voice activity LED
    Vad {
        #[arg(value_enum)]
        state: Toggle,
    },

    Volume {
        /// 0 - 12
        #[arg(value_parser = clap::value_parser!(u8).range(0..=12))]
        level: u8,
    },
}

#[derive(Subcommand, Debug)]
pub enum DfuCommands {
    /// Reset the device into DFU mode, write a firmware image, then reboot it
    Flash(FlashArgs),

    /// Print the DFU status and state
    Status,

    /// Leave DFU mode and boot the firmware
    Reboot,

    /// Revert the device to its factory firmware
    Factory,

    /// Reset the device
    Reset,
}

#[derive(Args, Debug)]
pub struct FlashArgs {
    /// Firmware image to write
    pub file: PathBuf,

    #[arg(long, default_value_t = respeaker_usb::dfu::DEFAULT_BLOCK_SIZE)]
    pub block_size: usize,

    /// Leave the device in DFU mode once the image is written
    #[arg(long)]
    pub no_reboot: bool,
}

#[derive(ValueEnum, Copy, Clone, Eq, PartialEq, Debug)]
pub enum Toggle {
    On,
    Off,
}

#[repr(usize)]
#[derive(ValueEnum, Copy, Clone, Eq, PartialEq, Debug)]
pub enum LevelFilter {
    /// A level lower than all log levels.
    Off,
    /// Corresponds to the `Error` log level.
    Error,
    /// Corresponds to the `Warn` log level.
    Warn,
    /// Corresponds to the `Info` log level.
    Info,
    /// Corresponds to the `Debug` log level.
    Debug,
    /// Corresponds to the `Trace` log level.
    Trace,
}

impl From<LevelFilter> for log::LevelFilter {
    fn from(level: LevelFilter) -> Self {
        match level {
            LevelFilter::Off => log::LevelFilter::Off,
            LevelFilter::Error => log::LevelFilter::Error,
            LevelFilter::Warn => log::LevelFilter::Warn,
            LevelFilter::Info => log::LevelFilter::Info,
            LevelFilter::Debug => log::LevelFilter::Debug,
            LevelFilter::Trace => log::LevelFilter::Trace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parameter_names_are_case_insensitive() {
        let cli = Cli::try_parse_from(["respeaker", "set", "agcgain", "12.5"]).unwrap();
        match cli.command {
            SubCommands::Set { parameter, value } => {
                assert_eq!(parameter, Parameter::AgcGain);
                assert_eq!(value, 12.5);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn unknown_parameter_is_rejected() {
        assert!(Cli::try_parse_from(["respeaker", "get", "NOTAPARAMETER"]).is_err());
    }

    #[test]
    fn led_arguments() {
        let cli = Cli::try_parse_from(["respeaker", "led", "palette", "#FF0000", "0000ff"]).unwrap();
        match cli.command {
            SubCommands::Led {
                command: LedCommands::Palette { first, second },
            } => {
                assert_eq!(first, Colour::new(0xFF, 0, 0));
                assert_eq!(second, Colour::new(0, 0, 0xFF));
            }
            other => panic!("unexpected command {other:?}"),
        }

        assert!(Cli::try_parse_from(["respeaker", "led", "brightness", "32"]).is_err());
    }
}
