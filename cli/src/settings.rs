use anyhow::{Context, Result};
use respeaker_types::{PID_RESPEAKER, VID_RESPEAKER};
use respeaker_usb::client::ClientConfig;
use respeaker_usb::dfu::DfuConfig;
use respeaker_usb::discovery::DiscoveryConfig;
use respeaker_usb::service::ServiceConfig;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::path::Path;
use std::time::Duration;

/// Settings read from disk. They are only ever read, the device's own state isn't persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub vendor_id: u16,
    pub product_id: u16,
    pub poll_interval_ms: u64,
    pub discovery_interval_ms: u64,
    pub transfer_timeout_secs: u64,
    pub dfu_timeout_secs: u64,
    pub reenumeration_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            vendor_id: VID_RESPEAKER,
            product_id: PID_RESPEAKER,
            poll_interval_ms: 250,
            discovery_interval_ms: 500,
            transfer_timeout_secs: 100,
            dfu_timeout_secs: 120,
            reenumeration_timeout_secs: 20,
        }
    }
}

impl Settings {
    pub fn read(path: &Path) -> Result<Settings> {
        match File::open(path) {
            Ok(reader) => serde_json::from_reader(BufReader::new(reader)).context(format!(
                "Could not parse settings file at {}",
                path.to_string_lossy()
            )),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(Settings::default()),
            Err(error) => Err(error).context(format!(
                "Could not open settings file for reading at {}",
                path.to_string_lossy()
            )),
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            timeout: Duration::from_secs(self.transfer_timeout_secs),
        }
    }

    pub fn dfu_config(&self) -> DfuConfig {
        DfuConfig {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            timeout: Duration::from_secs(self.dfu_timeout_secs),
            reenumeration_timeout: Duration::from_secs(self.reenumeration_timeout_secs),
            ..Default::default()
        }
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            ..Default::default()
        }
    }

    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            interval: Duration::from_millis(self.discovery_interval_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_gives_defaults() {
        let directory = tempfile::tempdir().unwrap();
        let settings = Settings::read(&directory.path().join("settings.json")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "poll_interval_ms": 40, "product_id": 24 }}"#).unwrap();

        let settings = Settings::read(file.path()).unwrap();
        assert_eq!(settings.poll_interval_ms, 40);
        assert_eq!(settings.product_id, 24);
        assert_eq!(settings.vendor_id, VID_RESPEAKER);

        assert_eq!(
            settings.service_config().poll_interval,
            Duration::from_millis(40)
        );
        assert_eq!(settings.client_config().product_id, 24);
        assert_eq!(settings.dfu_config().product_id, 24);
        assert_eq!(settings.discovery_config().product_id, 24);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let error = Settings::read(file.path()).unwrap_err();
        assert!(error.to_string().contains("Could not parse settings file"));
    }

    #[test]
    fn defaults_match_the_libraries() {
        let settings = Settings::default();
        assert_eq!(
            settings.client_config().timeout,
            ClientConfig::default().timeout
        );
        assert_eq!(settings.dfu_config().timeout, DfuConfig::default().timeout);
        assert_eq!(
            settings.dfu_config().reenumeration_timeout,
            DfuConfig::default().reenumeration_timeout
        );
        assert_eq!(
            settings.service_config().poll_interval,
            ServiceConfig::default().poll_interval
        );
        assert_eq!(
            settings.discovery_config().interval,
            DiscoveryConfig::default().interval
        );
    }
}
