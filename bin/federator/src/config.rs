use std::{fs, path::PathBuf};

use anyhow::{bail, Context};
use federator_btc_client::BtcClientConfig;
use federator_common::logging::LoggingConfig;
use federator_coordinator::RegistryConfig;
use serde::{Deserialize, Serialize};

/// The configuration local to one federator.
///
/// These values are not consensus-critical: federators may run with different settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Config {
    /// Connection to the bitcoind node watching the federation address.
    pub btc_client: BtcClientConfig,

    /// Where the local master key comes from.
    pub keys: KeysConfig,

    /// Limits of the in-flight candidate registry.
    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Number of runtime worker threads.
    pub num_threads: Option<u8>,
}

/// Source of the local extended private key. Exactly one field must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct KeysConfig {
    /// File holding the base58 `xprv`.
    pub master_xprv_path: Option<PathBuf>,

    /// The base58 `xprv` itself.
    pub master_xprv: Option<String>,
}

impl KeysConfig {
    /// Reads the encoded master private key.
    pub(crate) fn load(&self) -> anyhow::Result<String> {
        match (&self.master_xprv_path, &self.master_xprv) {
            (Some(path), None) => fs::read_to_string(path)
                .with_context(|| format!("cannot read master key from {}", path.display())),
            (None, Some(xprv)) => Ok(xprv.clone()),
            (Some(_), Some(_)) => {
                bail!("set only one of keys.master_xprv_path and keys.master_xprv")
            }
            (None, None) => bail!("one of keys.master_xprv_path or keys.master_xprv is required"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_config_serde_toml() {
        let config = r#"
            num_threads = 4

            [btc_client]
            url = "http://localhost:18443/wallet/federation"
            user = "user"
            pass = "password"
            timeout_ms = 5000

            [keys]
            master_xprv_path = "master.xprv"

            [registry]
            capacity = 16
            expiry_secs = 600

            [logging]
            otlp_url = "http://localhost:4317"
            log_line_num = true
        "#;

        let config = toml::from_str::<Config>(config);
        assert!(
            config.is_ok(),
            "must be able to deserialize config from toml but got: {}",
            config.unwrap_err()
        );

        let config = config.unwrap();
        assert_eq!(config.registry.capacity, 16);
        assert_eq!(config.btc_client.timeout_ms, 5000);

        let serialized = toml::to_string(&config).unwrap();
        let deserialized = toml::from_str::<Config>(&serialized).unwrap();
        assert_eq!(
            deserialized, config,
            "must be able to serialize and deserialize config to toml"
        );
    }

    #[test]
    fn optional_sections_default() {
        let config: Config = toml::from_str(
            r#"
            [btc_client]
            url = "http://localhost:18443"
            user = "user"
            pass = "password"

            [keys]
            master_xprv = "xprv"
            "#,
        )
        .expect("must parse");

        assert_eq!(config.registry, RegistryConfig::default());
        assert_eq!(config.logging, LoggingConfig::default());
        assert!(config.num_threads.is_none());
    }

    #[test]
    fn master_key_sources() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "tprv-from-file").unwrap();

        let from_file = KeysConfig {
            master_xprv_path: Some(file.path().to_path_buf()),
            master_xprv: None,
        };
        assert_eq!(from_file.load().unwrap().trim(), "tprv-from-file");

        let inline = KeysConfig {
            master_xprv_path: None,
            master_xprv: Some("tprv-inline".to_string()),
        };
        assert_eq!(inline.load().unwrap(), "tprv-inline");

        assert!(KeysConfig::default().load().is_err());
        assert!(KeysConfig {
            master_xprv_path: from_file.master_xprv_path.clone(),
            master_xprv: inline.master_xprv.clone(),
        }
        .load()
        .is_err());
    }
}
