use crate::{error::ValidationError, protocol::Direction};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Allowed desk heights in millimeters, inclusive on both ends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeightBounds {
    /// Lowest allowed height
    pub min_mm: i32,
    /// Highest allowed height
    pub max_mm: i32,
}

impl HeightBounds {
    /// Create new bounds
    #[must_use]
    pub const fn new(min_mm: i32, max_mm: i32) -> Self {
        Self { min_mm, max_mm }
    }

    /// Check whether a height lies within bounds
    #[must_use]
    pub const fn contains(&self, height_mm: i32) -> bool {
        height_mm >= self.min_mm && height_mm <= self.max_mm
    }

    /// Clamp a height into bounds
    #[must_use]
    pub fn clamp(&self, height_mm: i32) -> i32 {
        height_mm.clamp(self.min_mm, self.max_mm)
    }

    /// Reject heights outside bounds
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::HeightOutOfBounds`] for out-of-range heights.
    pub fn validate(&self, height_mm: i32) -> Result<i32, ValidationError> {
        if self.contains(height_mm) {
            Ok(height_mm)
        } else {
            Err(ValidationError::HeightOutOfBounds {
                height_mm,
                min_mm: self.min_mm,
                max_mm: self.max_mm,
            })
        }
    }
}

impl Default for HeightBounds {
    fn default() -> Self {
        Self::new(600, 1400)
    }
}

/// State of the BLE link as seen by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// No link
    Disconnected,
    /// Link being established
    Connecting,
    /// Link up and subscribed to height notifications
    Connected,
    /// Last connect or write failed
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// Move-to-target control loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovePhase {
    /// No move in progress
    Idle,
    /// Connecting before a move
    Connecting,
    /// Driving toward the target
    Moving,
    /// Target reached, stop being written
    StoppingAtTarget,
    /// Last move was abandoned after a failure
    Error,
}

impl fmt::Display for MovePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Moving => write!(f, "Moving"),
            Self::StoppingAtTarget => write!(f, "StoppingAtTarget"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// Snapshot of the desk as last observed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeskState {
    /// Display name
    pub name: String,
    /// Last reported height; `None` until the first connect
    pub current_height_mm: Option<i32>,
    /// Height the control loop is driving toward
    pub target_height_mm: Option<i32>,
    /// Link status
    pub connection_status: ConnectionStatus,
    /// True between a move command and the matching stop
    pub is_moving: bool,
    /// Control loop state
    pub phase: MovePhase,
    /// Direction of the active move
    pub direction: Option<Direction>,
    /// Last reported speed
    pub speed: Option<i16>,
    /// Preset that started the active or last move
    pub active_preset: Option<String>,
    /// Incremented for every accepted height request
    pub move_generation: u64,
    /// Description of the most recent failure
    pub last_error: Option<String>,
}

impl DeskState {
    /// Fresh state for a process that has not talked to the desk yet
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            current_height_mm: None,
            target_height_mm: None,
            connection_status: ConnectionStatus::Disconnected,
            is_moving: false,
            phase: MovePhase::Idle,
            direction: None,
            speed: None,
            active_preset: None,
            move_generation: 0,
            last_error: None,
        }
    }

    /// Drop any active move without touching the link status
    pub fn clear_move(&mut self) {
        self.target_height_mm = None;
        self.direction = None;
        self.is_moving = false;
    }
}

impl Default for DeskState {
    fn default() -> Self {
        Self::new("my_desk")
    }
}

/// Named height preset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    /// Unique name
    pub name: String,
    /// Height in millimeters
    pub height_mm: i32,
}

impl Preset {
    /// Create new preset
    #[must_use]
    pub fn new(name: impl Into<String>, height_mm: i32) -> Self {
        Self {
            name: name.into(),
            height_mm,
        }
    }
}

/// BLE operation timeouts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// How long to scan for the desk in milliseconds
    pub scan_timeout_ms: u64,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Per-write timeout in milliseconds
    pub write_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            scan_timeout_ms: 5_000,
            connect_timeout_ms: 10_000,
            write_timeout_ms: 3_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds() {
        let bounds = HeightBounds::default();
        assert!(bounds.contains(600));
        assert!(bounds.contains(1400));
        assert!(!bounds.contains(599));
        assert!(!bounds.contains(1401));

        assert_eq!(bounds.clamp(1500), 1400);
        assert_eq!(bounds.clamp(100), 600);
        assert_eq!(bounds.clamp(900), 900);
    }

    #[test]
    fn test_bounds_validation() {
        let bounds = HeightBounds::new(600, 1400);
        assert_eq!(bounds.validate(900), Ok(900));
        assert_eq!(
            bounds.validate(1500),
            Err(ValidationError::HeightOutOfBounds {
                height_mm: 1500,
                min_mm: 600,
                max_mm: 1400,
            })
        );
    }

    #[test]
    fn test_initial_state() {
        let state = DeskState::default();
        assert_eq!(state.name, "my_desk");
        assert_eq!(state.connection_status, ConnectionStatus::Disconnected);
        assert_eq!(state.phase, MovePhase::Idle);
        assert!(state.current_height_mm.is_none());
        assert!(state.target_height_mm.is_none());
        assert!(!state.is_moving);
    }

    #[test]
    fn test_clear_move_keeps_link_status() {
        let mut state = DeskState::default();
        state.connection_status = ConnectionStatus::Connected;
        state.target_height_mm = Some(900);
        state.direction = Some(Direction::Up);
        state.is_moving = true;

        state.clear_move();

        assert_eq!(state.connection_status, ConnectionStatus::Connected);
        assert!(state.target_height_mm.is_none());
        assert!(state.direction.is_none());
        assert!(!state.is_moving);
    }

    #[test]
    fn test_timeout_config_defaults() {
        let config = TimeoutConfig::default();
        assert_eq!(config.scan_timeout_ms, 5_000);
        assert_eq!(config.connect_timeout_ms, 10_000);
        assert_eq!(config.write_timeout_ms, 3_000);
    }

    #[test]
    fn test_state_serializes() {
        let state = DeskState::default();
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["connection_status"], "Disconnected");
        assert_eq!(json["phase"], "Idle");
        assert!(json["target_height_mm"].is_null());
    }
}
