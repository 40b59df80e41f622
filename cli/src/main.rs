mod cli;
mod dfu;
mod settings;
mod watch;

use crate::cli::{Cli, LedCommands, SubCommands, Toggle};
use crate::settings::Settings;
use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{debug, info};
use respeaker_types::{Parameter, ParameterDescriptor};
use respeaker_usb::client::RespeakerClient;
use respeaker_usb::dfu::RespeakerDfu;
use serde::Serialize;
use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode};
use std::time::Duration;
use strum::IntoEnumIterator;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Serialize)]
struct ParameterEntry {
    name: &'static str,

    #[serde(flatten)]
    descriptor: ParameterDescriptor,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args: Cli = Cli::parse();

    CombinedLogger::init(vec![TermLogger::new(
        args.log_level.into(),
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )])
    .context("Could not configure the logger")?;

    debug!("ReSpeaker Utility v{}", VERSION);
    let settings = Settings::read(&args.config)?;

    match args.command {
        SubCommands::List => list(&settings)?,
        SubCommands::Params { json } => params(json)?,
        SubCommands::Get { parameter } => {
            let client = connect(&settings)?;
            let value = client
                .read(parameter)
                .with_context(|| format!("Unable to read {}", parameter))?;
            println!("{} = {}", parameter, value);
        }
        SubCommands::Set { parameter, value } => {
            let client = connect(&settings)?;
            client
                .write(parameter, value)
                .with_context(|| format!("Unable to write {}", parameter))?;

            let stored = client
                .read(parameter)
                .with_context(|| format!("Unable to read back {}", parameter))?;
            println!("{} = {}", parameter, stored);
        }
        SubCommands::Led { command } => {
            let client = connect(&settings)?;
            led(&client, command).context("Unable to update the LED ring")?;
        }
        SubCommands::Watch { interval_ms } => {
            watch::watch(&settings, interval_ms.map(Duration::from_millis)).await?
        }
        SubCommands::Discover => watch::discover(&settings).await?,
        SubCommands::Dfu { command } => dfu::run(&settings, command).await?,
        SubCommands::Settings => println!("{}", serde_json::to_string_pretty(&settings)?),
    }

    Ok(())
}

fn connect(settings: &Settings) -> Result<RespeakerClient> {
    let client = RespeakerClient::new(settings.client_config());
    client
        .connect()
        .context("Unable to connect to the ReSpeaker")?;
    Ok(client)
}

fn list(settings: &Settings) -> Result<()> {
    let devices = RespeakerDfu::new(settings.dfu_config())
        .find_devices()
        .context("Unable to enumerate USB devices")?;

    if devices.is_empty() {
        bail!("No ReSpeaker devices found");
    }

    for info in devices {
        println!(
            "Bus {:03} Address {:03}: {} mode, {} interfaces, DFU interface {}",
            info.device.bus_number(),
            info.device.address(),
            info.mode(),
            info.num_interfaces,
            info.interface_number
        );
    }
    Ok(())
}

fn params(json: bool) -> Result<()> {
    if json {
        let entries: Vec<ParameterEntry> = Parameter::iter()
            .map(|parameter| ParameterEntry {
                name: parameter.name(),
                descriptor: parameter.descriptor(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for parameter in Parameter::iter() {
        println!("{:<22} {}", parameter.name(), parameter.descriptor());
    }
    Ok(())
}

fn led(client: &RespeakerClient, command: LedCommands) -> Result<()> {
    let ring = client.pixel_ring();
    match command {
        LedCommands::Trace => ring.trace()?,
        LedCommands::Off => ring.off()?,
        LedCommands::Listen => ring.listen()?,
        LedCommands::Speak => ring.speak()?,
        LedCommands::Think => ring.think()?,
        LedCommands::Spin => ring.spin()?,
        LedCommands::Colour { colour } => {
            ring.set_colour(colour)?;
            info!("LED ring set to {}", colour);
        }
        LedCommands::Brightness { level } => ring.set_brightness(level)?,
        LedCommands::Palette { first, second } => ring.set_colour_palette(first, second)?,
        LedCommands::Vad { state } => ring.set_vad_led(state == Toggle::On)?,
        LedCommands::Volume { level } => ring.set_volume(level)?,
    }
    Ok(())
}
