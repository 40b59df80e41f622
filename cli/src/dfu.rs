use crate::cli::{DfuCommands, FlashArgs};
use crate::settings::Settings;
use anyhow::{bail, Context, Result};
use log::{info, warn};
use respeaker_usb::dfu::RespeakerDfu;

pub async fn run(settings: &Settings, command: DfuCommands) -> Result<()> {
    let dfu = RespeakerDfu::new(settings.dfu_config());

    // Everything here blocks on the bus, and flashing takes a while.
    tokio::task::spawn_blocking(move || match command {
        DfuCommands::Flash(args) => flash(&dfu, &args),
        DfuCommands::Status => status(&dfu),
        DfuCommands::Reboot => runtime_request(&dfu, RespeakerDfu::leave_dfu_and_reboot),
        DfuCommands::Factory => runtime_request(&dfu, RespeakerDfu::revert_to_factory),
        DfuCommands::Reset => runtime_request(&dfu, RespeakerDfu::reset_device),
    })
    .await?
}

fn flash(dfu: &RespeakerDfu, args: &FlashArgs) -> Result<()> {
    if args.block_size == 0 {
        bail!("Block size must be at least one byte");
    }

    let size = std::fs::metadata(&args.file)
        .with_context(|| format!("Unable to read {}", args.file.to_string_lossy()))?
        .len() as usize;

    dfu.connect(true)
        .context("Unable to put the device into DFU mode")?;
    info!(
        "Writing {} ({} bytes) in {} byte blocks",
        args.file.to_string_lossy(),
        size,
        args.block_size
    );

    let mut written = 0;
    let mut reported = 0;
    dfu.download_firmware(args.file.as_path(), args.block_size, |_, length| {
        written += length;
        let percent = if size == 0 { 100 } else { written * 100 / size };
        if percent >= reported + 10 {
            reported = percent - percent % 10;
            info!("{}% written", percent);
        }
    })
    .context("Firmware download failed")?;

    if args.no_reboot {
        info!("Firmware written, device left in DFU mode");
        dfu.disconnect();
        return Ok(());
    }

    dfu.leave_dfu_and_reboot()
        .context("Unable to reboot the device")?;
    dfu.disconnect();

    info!("Waiting for the device to restart..");
    match dfu.wait_for_runtime_device(dfu.config().reenumeration_timeout) {
        Ok(()) => info!("Firmware update complete"),
        Err(error) => warn!("Device did not come back in runtime mode: {}", error),
    }
    Ok(())
}

fn status(dfu: &RespeakerDfu) -> Result<()> {
    dfu.connect(false)
        .context("Unable to connect to the DFU interface")?;

    let status = dfu.get_status().context("Unable to read DFU status")?;
    let state = dfu.get_state().context("Unable to read DFU state")?;
    println!(
        "Interface {} ({} interfaces)",
        dfu.interface_number().unwrap_or_default(),
        dfu.num_interfaces()
    );
    println!("Status: {:#04x} {}", status.status, status.description);
    println!("State: {}", state);
    println!("Poll timeout: {}ms", status.poll_timeout_ms);

    dfu.disconnect();
    Ok(())
}

fn runtime_request<E>(dfu: &RespeakerDfu, request: fn(&RespeakerDfu) -> Result<(), E>) -> Result<()>
where
    E: std::error::Error + Send + Sync + 'static,
{
    dfu.connect(false)
        .context("Unable to connect to the DFU interface")?;
    let result = request(dfu).context("Device rejected the request");
    dfu.disconnect();
    result
}
