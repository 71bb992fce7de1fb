use crate::{
    error::ConfigError,
    types::{HeightBounds, TimeoutConfig},
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Prefix shared by all environment settings
pub const ENV_PREFIX: &str = "DESK_";

/// Hardware address of the desk
///
/// Linux and Windows identify peripherals by MAC address
/// (`XX:XX:XX:XX:XX:XX`); CoreBluetooth hands out per-host UUIDs instead.
/// Both forms are accepted and stored upper-cased, with `-` in MAC addresses
/// normalized to `:`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DeskAddress {
    /// Bluetooth device address
    Mac(String),
    /// Platform peripheral identifier
    PeripheralId(String),
}

impl DeskAddress {
    /// Normalized textual form
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Mac(s) | Self::PeripheralId(s) => s,
        }
    }

    /// Whether a peripheral with the given address and id is this desk
    #[must_use]
    pub fn matches(&self, address: &str, id: &str) -> bool {
        match self {
            Self::Mac(mac) => mac.eq_ignore_ascii_case(address),
            Self::PeripheralId(uuid) => uuid.eq_ignore_ascii_case(id),
        }
    }
}

fn is_mac(value: &str) -> bool {
    let parts: Vec<&str> = value.split(':').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}

impl FromStr for DeskAddress {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let mac = trimmed.replace('-', ":").to_ascii_uppercase();
        if is_mac(&mac) {
            return Ok(Self::Mac(mac));
        }

        uuid::Uuid::parse_str(trimmed)
            .ok()
            .filter(|_| trimmed.len() == 36)
            .map(|id| Self::PeripheralId(id.hyphenated().to_string().to_ascii_uppercase()))
            .ok_or_else(|| ConfigError::InvalidAddress(s.to_string()))
    }
}

impl TryFrom<String> for DeskAddress {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DeskAddress> for String {
    fn from(value: DeskAddress) -> Self {
        match value {
            DeskAddress::Mac(s) | DeskAddress::PeripheralId(s) => s,
        }
    }
}

impl fmt::Display for DeskAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the driver and service need to run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeskConfig {
    /// Desk display name
    pub name: String,
    /// Hardware address of the desk
    pub address: DeskAddress,
    /// Preferred adapter (matched against the adapter description, e.g. `hci0`)
    pub adapter: Option<String>,
    /// Allowed heights
    pub bounds: HeightBounds,
    /// BLE timeouts
    pub timeouts: TimeoutConfig,
    /// Distance from target at which a move counts as done
    pub stop_tolerance_mm: i32,
    /// How often a stalled move is re-issued before it is abandoned
    pub max_nudges: u32,
}

impl DeskConfig {
    /// Configuration with defaults for everything but the address
    #[must_use]
    pub fn new(address: DeskAddress) -> Self {
        Self {
            name: "my_desk".to_string(),
            address,
            adapter: None,
            bounds: HeightBounds::default(),
            timeouts: TimeoutConfig::default(),
            stop_tolerance_mm: 1,
            max_nudges: 5,
        }
    }

    /// Load configuration from `DESK_*` environment variables
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingAddress`] if `DESK_MAC_ADDRESS` is unset,
    /// or another [`ConfigError`] for malformed values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    ///
    /// Keys are the full variable names, e.g. `DESK_MIN_HEIGHT`.
    ///
    /// # Errors
    ///
    /// See [`DeskConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |suffix: &str| {
            lookup(&format!("{ENV_PREFIX}{suffix}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let address = get("MAC_ADDRESS")
            .ok_or(ConfigError::MissingAddress)?
            .parse::<DeskAddress>()?;

        let mut config = Self::new(address);

        if let Some(name) = get("NAME") {
            config.name = name;
        }
        config.adapter = get("ADAPTER_NAME");

        parse_into(&get, "MIN_HEIGHT", &mut config.bounds.min_mm)?;
        parse_into(&get, "MAX_HEIGHT", &mut config.bounds.max_mm)?;
        parse_into(&get, "SCAN_TIMEOUT_MS", &mut config.timeouts.scan_timeout_ms)?;
        parse_into(
            &get,
            "CONNECT_TIMEOUT_MS",
            &mut config.timeouts.connect_timeout_ms,
        )?;
        parse_into(&get, "WRITE_TIMEOUT_MS", &mut config.timeouts.write_timeout_ms)?;
        parse_into(&get, "STOP_TOLERANCE_MM", &mut config.stop_tolerance_mm)?;
        parse_into(&get, "MAX_NUDGES", &mut config.max_nudges)?;

        config.validate()?;
        Ok(config)
    }

    /// Check internal consistency
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidBounds`] if `min_mm >= max_mm`, or
    /// [`ConfigError::InvalidValue`] for a negative tolerance.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bounds.min_mm >= self.bounds.max_mm {
            return Err(ConfigError::InvalidBounds {
                min_mm: self.bounds.min_mm,
                max_mm: self.bounds.max_mm,
            });
        }
        if self.stop_tolerance_mm < 0 {
            return Err(ConfigError::InvalidValue {
                key: format!("{ENV_PREFIX}STOP_TOLERANCE_MM"),
                value: self.stop_tolerance_mm.to_string(),
            });
        }
        Ok(())
    }
}

fn parse_into<T, G>(get: &G, suffix: &str, slot: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    if let Some(value) = get(suffix) {
        *slot = value.parse().map_err(|_| ConfigError::InvalidValue {
            key: format!("{ENV_PREFIX}{suffix}"),
            value,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_address_parsing() {
        let mac: DeskAddress = "fd:46:77:a9:30:ca".parse().unwrap();
        assert_eq!(mac, DeskAddress::Mac("FD:46:77:A9:30:CA".to_string()));

        let dashed: DeskAddress = "FD-46-77-A9-30-CA".parse().unwrap();
        assert_eq!(dashed, mac);

        let id: DeskAddress = "0c6e3937-78b4-ba7e-a934-d4c5c9edec2a".parse().unwrap();
        assert_eq!(
            id,
            DeskAddress::PeripheralId("0C6E3937-78B4-BA7E-A934-D4C5C9EDEC2A".to_string())
        );

        for invalid in ["", "FD:46:77:A9:30", "FD:46:77:A9:30:XY", "not-an-address"] {
            assert!(
                invalid.parse::<DeskAddress>().is_err(),
                "address {invalid:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_address_matching() {
        let mac: DeskAddress = "FD:46:77:A9:30:CA".parse().unwrap();
        assert!(mac.matches("fd:46:77:a9:30:ca", "whatever"));
        assert!(!mac.matches("00:11:22:33:44:55", "FD:46:77:A9:30:CA"));

        let id: DeskAddress = "0C6E3937-78B4-BA7E-A934-D4C5C9EDEC2A".parse().unwrap();
        assert!(id.matches("00:00:00:00:00:00", "0c6e3937-78b4-ba7e-a934-d4c5c9edec2a"));
    }

    #[test]
    fn test_missing_address_is_fatal() {
        let result = DeskConfig::from_lookup(lookup(&[("DESK_MIN_HEIGHT", "650")]));
        assert_eq!(result, Err(ConfigError::MissingAddress));
    }

    #[test]
    fn test_defaults() {
        let config =
            DeskConfig::from_lookup(lookup(&[("DESK_MAC_ADDRESS", "FD:46:77:A9:30:CA")])).unwrap();
        assert_eq!(config.bounds, HeightBounds::new(600, 1400));
        assert_eq!(config.timeouts, TimeoutConfig::default());
        assert_eq!(config.stop_tolerance_mm, 1);
        assert_eq!(config.max_nudges, 5);
        assert_eq!(config.name, "my_desk");
        assert!(config.adapter.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = DeskConfig::from_lookup(lookup(&[
            ("DESK_MAC_ADDRESS", "FD:46:77:A9:30:CA"),
            ("DESK_ADAPTER_NAME", "hci1"),
            ("DESK_MIN_HEIGHT", "650"),
            ("DESK_MAX_HEIGHT", "1270"),
            ("DESK_CONNECT_TIMEOUT_MS", "2500"),
            ("DESK_NAME", "office"),
        ]))
        .unwrap();
        assert_eq!(config.adapter.as_deref(), Some("hci1"));
        assert_eq!(config.bounds, HeightBounds::new(650, 1270));
        assert_eq!(config.timeouts.connect_timeout_ms, 2500);
        assert_eq!(config.name, "office");
    }

    #[test]
    fn test_invalid_values() {
        let result = DeskConfig::from_lookup(lookup(&[
            ("DESK_MAC_ADDRESS", "FD:46:77:A9:30:CA"),
            ("DESK_MAX_HEIGHT", "tall"),
        ]));
        assert_eq!(
            result,
            Err(ConfigError::InvalidValue {
                key: "DESK_MAX_HEIGHT".to_string(),
                value: "tall".to_string(),
            })
        );

        let result = DeskConfig::from_lookup(lookup(&[
            ("DESK_MAC_ADDRESS", "FD:46:77:A9:30:CA"),
            ("DESK_MIN_HEIGHT", "1400"),
            ("DESK_MAX_HEIGHT", "600"),
        ]));
        assert_eq!(
            result,
            Err(ConfigError::InvalidBounds {
                min_mm: 1400,
                max_mm: 600,
            })
        );
    }

    #[test]
    fn test_config_serde() {
        let config = DeskConfig::new("FD:46:77:A9:30:CA".parse().unwrap());
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"FD:46:77:A9:30:CA\""));
        let back: DeskConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
