//! Runtime settings.
//!
//! Every field has the stock-app default; a TOML file supplies only
//! the values the user cares to override (usually `ble_address` and
//! the credentials).

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::BlackbirdError;

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Where records, session and history files land.
    pub data_dir: PathBuf,
    /// Bluetooth address of the device, e.g. `AA:BB:CC:DD:EE:FF`.
    pub ble_address: Option<String>,
    /// Seconds between passes in loop mode.
    pub sync_interval_secs: u64,

    pub base_url: String,

    // client registration parameters sent to bk_setClient
    pub app_version: String,
    pub client_type: String,
    pub client_detail: String,
    pub imei: String,
    pub channel_id: String,
    pub user_agent: String,

    pub device_sn: String,
    pub device_type: String,

    // optional auto-login credentials
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            ble_address: None,
            sync_interval_secs: 300,
            base_url: "https://client.blackbirdsport.com".to_string(),
            app_version: "1.0.13".to_string(),
            client_type: "android".to_string(),
            client_detail: "Android 7.1.2; SM-G965N Build/N2G48H".to_string(),
            imei: "123456789012345".to_string(),
            channel_id: "111".to_string(),
            user_agent: "Dalvik/2.1.0 (Linux; U; Android 7.1.2; SM-G965N Build/N2G48H)"
                .to_string(),
            device_sn: "BB16_2_00000000".to_string(),
            device_type: "BB16".to_string(),
            username: None,
            password: None,
        }
    }
}

impl Settings {
    /// Loads settings from a TOML file, or the defaults when no path
    /// is given.
    pub fn load(path: Option<&Path>) -> Result<Settings, BlackbirdError> {
        match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                Ok(toml::from_str(&text)?)
            }
            None => Ok(Settings::default()),
        }
    }

    pub fn session_file(&self) -> PathBuf {
        self.data_dir.join(".session.json")
    }

    pub fn history_file(&self) -> PathBuf {
        self.data_dir.join("uploaded_records.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults_elsewhere() {
        let settings: Settings = toml::from_str(
            r#"
            ble_address = "AA:BB:CC:DD:EE:FF"
            data_dir = "/tmp/bb16"
            "#,
        )
        .unwrap();
        assert_eq!(settings.ble_address.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(settings.data_dir, PathBuf::from("/tmp/bb16"));
        assert_eq!(settings.base_url, "https://client.blackbirdsport.com");
        assert_eq!(settings.device_type, "BB16");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<Settings>("no_such_key = 1").is_err());
    }

    #[test]
    fn derived_paths_live_under_the_data_dir() {
        let settings = Settings::default();
        assert_eq!(settings.session_file(), PathBuf::from("data/.session.json"));
        assert_eq!(
            settings.history_file(),
            PathBuf::from("data/uploaded_records.json")
        );
    }
}
