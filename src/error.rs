use thiserror::Error;
use uuid::Uuid;

/// Failures while establishing the BLE link to the desk
#[derive(Error, Debug)]
pub enum ConnectError {
    /// No usable Bluetooth adapter on this host
    #[error("No Bluetooth adapter available")]
    AdapterUnavailable,

    /// The configured address did not show up during the scan
    #[error("Desk {address} not found")]
    DeviceNotFound {
        /// Configured desk address
        address: String,
    },

    /// Scanning or connecting took longer than the configured timeout
    #[error("Connection timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// The peripheral does not expose a characteristic the desk protocol needs
    #[error("Characteristic {uuid} not found on desk")]
    MissingCharacteristic {
        /// UUID of the missing characteristic
        uuid: Uuid,
    },

    /// The initial height read could not be decoded
    #[error("Desk reported a malformed height ({len} bytes)")]
    MalformedHeight {
        /// Payload length received
        len: usize,
    },

    /// Bluetooth stack error
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),
}

/// Failures while writing a command to the desk
#[derive(Error, Debug)]
pub enum WriteError {
    /// There is no active link
    #[error("Desk is not connected")]
    NotConnected,

    /// The peripheral or the stack refused the write
    #[error("Desk rejected write: {0}")]
    Rejected(String),

    /// The write did not complete in time
    #[error("Write timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },
}

/// Input rejected before it can touch desk state
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Height outside the configured bounds
    #[error("Height {height_mm}mm is outside {min_mm}..={max_mm}mm")]
    HeightOutOfBounds {
        /// Requested height
        height_mm: i32,
        /// Lower bound
        min_mm: i32,
        /// Upper bound
        max_mm: i32,
    },

    /// A preset with this name already exists
    #[error("Preset '{name}' already exists")]
    DuplicateName {
        /// Preset name
        name: String,
    },

    /// Preset names must not be blank
    #[error("Preset name must not be empty")]
    EmptyName,
}

/// Startup configuration problems
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No desk address configured
    #[error("No desk address configured (set DESK_MAC_ADDRESS)")]
    MissingAddress,

    /// The address is neither a MAC address nor a peripheral UUID
    #[error("Invalid desk address '{0}': expected XX:XX:XX:XX:XX:XX or a UUID")]
    InvalidAddress(String),

    /// A setting could not be parsed
    #[error("Invalid value '{value}' for {key}")]
    InvalidValue {
        /// Setting name
        key: String,
        /// Offending value
        value: String,
    },

    /// Minimum height is not below maximum height
    #[error("Invalid height bounds: min {min_mm}mm must be below max {max_mm}mm")]
    InvalidBounds {
        /// Lower bound
        min_mm: i32,
        /// Upper bound
        max_mm: i32,
    },
}

/// Errors returned by desk operations
#[derive(Error, Debug)]
pub enum DeskError {
    /// Connecting to the desk failed
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// Writing a command failed
    #[error(transparent)]
    Write(#[from] WriteError),

    /// Request failed validation
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Configuration is unusable
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No preset with that name
    #[error("Preset '{name}' not found")]
    PresetNotFound {
        /// Preset name
        name: String,
    },

    /// The control loop has shut down
    #[error("Desk service is not running")]
    ServiceStopped,
}

/// Result type for desk operations
pub type Result<T> = std::result::Result<T, DeskError>;

impl DeskError {
    /// Check if this error indicates a connection issue
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::Write(WriteError::NotConnected)
        )
    }

    /// Check if the request was rejected before reaching the desk
    #[must_use]
    pub const fn is_validation_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Check if a named resource was missing
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::PresetNotFound { .. })
    }
}
