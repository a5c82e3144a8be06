//! Zone configuration
//!
//! ```toml
//! [[zone]]
//! name = "example.com."
//! device = "wg0"
//! encoder = "b32"
//!
//! [zone.self]
//! endpoint = "203.0.113.1:51820"
//! allowed_ips = ["10.0.0.1/32"]
//! ```
//!
//! A `[zone.self]` table, even an empty one, makes the zone serve the local
//! device as a peer. Everything is validated here so that nothing about the
//! configuration can fail once queries are being answered.

use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;

use ipnetwork::IpNetwork;
use serde::Deserialize;

use crate::discovery::encoder::{Encoder, EncoderError};
use crate::discovery::zone::{Zone, ZoneError, Zones};

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Toml(toml::de::Error),
    NoZones,
    MissingField { zone: String, field: &'static str },
    Encoder { zone: String, source: EncoderError },
    Endpoint { zone: String, value: String },
    AllowedIp { zone: String, value: String },
    Zone(ZoneError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "failed to read configuration: {}", e),
            ConfigError::Toml(e) => write!(f, "failed to parse configuration: {}", e),
            ConfigError::NoZones => write!(f, "no zones configured"),
            ConfigError::MissingField { zone, field } => {
                write!(f, "zone {:?}: missing {}", zone, field)
            }
            ConfigError::Encoder { zone, source } => write!(f, "zone {}: {}", zone, source),
            ConfigError::Endpoint { zone, value } => {
                write!(f, "zone {}: invalid self endpoint {:?}", zone, value)
            }
            ConfigError::AllowedIp { zone, value } => {
                write!(f, "zone {}: invalid self allowed IP {:?}", zone, value)
            }
            ConfigError::Zone(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Toml(e) => Some(e),
            ConfigError::Encoder { source, .. } => Some(source),
            ConfigError::Zone(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Toml(e)
    }
}

impl From<ZoneError> for ConfigError {
    fn from(e: ZoneError) -> Self {
        ConfigError::Zone(e)
    }
}

type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    zone: Vec<ZoneConfig>,
}

/// One zone as written in the configuration
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ZoneConfig {
    pub name: String,
    pub device: String,
    #[serde(default)]
    pub encoder: Option<String>,
    #[serde(default, rename = "self")]
    pub serve_self: Option<SelfConfig>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SelfConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub allowed_ips: Vec<String>,
}

impl ZoneConfig {
    pub fn build(&self) -> Result<Zone> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::MissingField {
                zone: self.name.clone(),
                field: "name",
            });
        }
        if self.device.trim().is_empty() {
            return Err(ConfigError::MissingField {
                zone: self.name.clone(),
                field: "device",
            });
        }

        let mut zone = Zone::new(self.name.trim(), self.device.trim());

        if let Some(ref setting) = self.encoder {
            zone.encoder = setting.parse::<Encoder>().map_err(|source| ConfigError::Encoder {
                zone: zone.name.clone(),
                source,
            })?;
        }

        if let Some(ref serve_self) = self.serve_self {
            zone.serve_self = true;

            if let Some(ref endpoint) = serve_self.endpoint {
                let addr = endpoint.trim().parse::<SocketAddr>().map_err(|_| {
                    ConfigError::Endpoint {
                        zone: zone.name.clone(),
                        value: endpoint.clone(),
                    }
                })?;
                zone.self_endpoint = Some(addr);
            }

            zone.self_allowed_ips = serve_self
                .allowed_ips
                .iter()
                .map(|value| {
                    parse_prefix(value).ok_or_else(|| ConfigError::AllowedIp {
                        zone: zone.name.clone(),
                        value: value.clone(),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
        }

        Ok(zone)
    }
}

/// Parse a CIDR and reduce it to its network address
pub fn parse_prefix(value: &str) -> Option<IpNetwork> {
    let net: IpNetwork = value.trim().parse().ok()?;
    IpNetwork::new(net.network(), net.prefix()).ok()
}

pub fn build_zones(configs: &[ZoneConfig]) -> Result<Zones> {
    if configs.is_empty() {
        return Err(ConfigError::NoZones);
    }

    let mut zones = Zones::new();
    for config in configs {
        zones.add(config.build()?)?;
    }

    Ok(zones)
}

pub fn parse_zones(text: &str) -> Result<Zones> {
    let file: ConfigFile = toml::from_str(text)?;
    build_zones(&file.zone)
}

pub fn load_zones<P: AsRef<Path>>(path: P) -> Result<Zones> {
    let text = fs::read_to_string(path.as_ref())?;
    let zones = parse_zones(&text)?;

    log::info!(
        "Loaded {} zone(s) from {}",
        zones.len(),
        path.as_ref().display()
    );

    Ok(zones)
}
