//! Publisher configuration
//!
//! Loaded from TOML:
//!
//! ```toml
//! [publisher.udp]
//! bind_address = "0.0.0.0:2000"
//!
//! [publisher.tcp]
//! bind_address = "0.0.0.0:2002"
//! max_connections = 254
//!
//! [engine]
//! max_key_len = 255
//! abort_on_protocol_violation = true
//!
//! [[chains]]
//! name = "routes"
//! ```

use crate::error::{NotifError, NotifResult};
use notif_codec::{DEFAULT_PUBLISHER_TCP_PORT, DEFAULT_PUBLISHER_UDP_PORT, NOTIF_NAME_SIZE, TLV_MAX_VALUE_LEN};
use notif_network::{TcpServerConfig, UdpConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct NotifConfig {
    pub publisher: PublisherSettings,
    pub engine: EngineSettings,
    pub chains: Vec<ChainSettings>,
}

/// Listeners that accept subscriber requests
///
/// Without a `[publisher]` table both listeners run on the default ports.
/// Inside the table, a listener that is not mentioned is disabled.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PublisherSettings {
    #[serde(default)]
    pub udp: Option<UdpConfig>,
    #[serde(default)]
    pub tcp: Option<TcpServerConfig>,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            udp: Some(UdpConfig {
                bind_address: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PUBLISHER_UDP_PORT)),
                ..Default::default()
            }),
            tcp: Some(TcpServerConfig {
                bind_address: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PUBLISHER_TCP_PORT)),
                ..Default::default()
            }),
        }
    }
}

impl PublisherSettings {
    /// Both listeners on ephemeral loopback ports
    pub fn loopback() -> Self {
        let any_port = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
        Self {
            udp: Some(UdpConfig {
                bind_address: any_port,
                ..Default::default()
            }),
            tcp: Some(TcpServerConfig {
                bind_address: any_port,
                ..Default::default()
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Longest key accepted on subscribe
    pub max_key_len: usize,
    /// Abort the process on a request that breaks the protocol instead of
    /// dropping it
    pub abort_on_protocol_violation: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_key_len: TLV_MAX_VALUE_LEN,
            abort_on_protocol_violation: true,
        }
    }
}

/// Chain created at startup
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainSettings {
    pub name: String,
    /// Filter notifications by byte-wise key equality
    #[serde(default = "default_compare_keys")]
    pub compare_keys: bool,
}

fn default_compare_keys() -> bool {
    true
}

impl NotifConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> NotifResult<Self> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            NotifError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> NotifResult<Self> {
        let config: Self =
            toml::from_str(contents).map_err(|e| NotifError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Ephemeral loopback listeners, no preconfigured chains
    pub fn loopback_defaults() -> Self {
        Self {
            publisher: PublisherSettings::loopback(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> NotifResult<()> {
        if self.engine.max_key_len == 0 || self.engine.max_key_len > TLV_MAX_VALUE_LEN {
            return Err(NotifError::Config(format!(
                "max_key_len must be within 1..={}",
                TLV_MAX_VALUE_LEN
            )));
        }

        let mut seen = HashSet::new();
        for chain in &self.chains {
            if chain.name.is_empty() || chain.name.len() > NOTIF_NAME_SIZE {
                return Err(NotifError::Config(format!(
                    "Chain name '{}' must be 1..={} bytes",
                    chain.name, NOTIF_NAME_SIZE
                )));
            }
            if !seen.insert(chain.name.as_str()) {
                return Err(NotifError::Config(format!("Chain '{}' configured twice", chain.name)));
            }
        }
        Ok(())
    }
}
