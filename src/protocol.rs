use crate::codec::{mm_to_raw, raw_to_mm};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of every control payload in bytes
pub const PAYLOAD_SIZE: usize = 2;

/// Opcodes accepted on the command characteristic
///
/// Values match the Linak DPG firmware bit for bit; the desk silently ignores
/// anything else.
pub mod opcode {
    /// Move the desk up
    pub const MOVE_UP: u16 = 71;
    /// Move the desk down
    pub const MOVE_DOWN: u16 = 70;
    /// Stop any movement
    pub const STOP: u16 = 255;
    /// Wake the controller from standby
    pub const WAKE_UP: u16 = 254;
    /// Stop value for the reference input characteristic
    pub const REFERENCE_STOP: u16 = 32769;
}

/// Characteristic a payload is written to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Movement/control opcodes
    Command,
    /// Absolute target height
    ReferenceInput,
}

/// Direction of travel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Toward the maximum height
    Up,
    /// Toward the minimum height
    Down,
}

impl Direction {
    /// Direction needed to get from `current_mm` to `target_mm`
    ///
    /// Returns `None` when both are equal.
    #[must_use]
    pub const fn towards(current_mm: i32, target_mm: i32) -> Option<Self> {
        if target_mm > current_mm {
            Some(Self::Up)
        } else if target_mm < current_mm {
            Some(Self::Down)
        } else {
            None
        }
    }

    /// Movement command for this direction
    #[must_use]
    pub const fn command(self) -> Command {
        match self {
            Self::Up => Command::MoveUp,
            Self::Down => Command::MoveDown,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
        }
    }
}

/// Commands understood by the desk controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Start moving up
    MoveUp,
    /// Start moving down
    MoveDown,
    /// Stop all movement
    Stop,
    /// Wake the controller
    WakeUp,
    /// Drive to an absolute raw height (used to recall a stored height)
    MoveTo {
        /// Target in raw device units
        raw: u16,
    },
}

/// One encoded write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Destination characteristic
    pub channel: Channel,
    /// Little-endian payload
    pub payload: Bytes,
}

impl Frame {
    fn new(channel: Channel, value: u16) -> Self {
        let mut buf = BytesMut::with_capacity(PAYLOAD_SIZE);
        buf.put_u16_le(value);
        Self {
            channel,
            payload: buf.freeze(),
        }
    }
}

impl Command {
    /// Recall a stored height
    ///
    /// Returns `None` if the height lies below the controller's zero point and
    /// has no raw representation.
    #[must_use]
    pub fn recall(height_mm: i32) -> Option<Self> {
        u16::try_from(mm_to_raw(height_mm))
            .ok()
            .map(|raw| Self::MoveTo { raw })
    }

    /// Encode into the writes the desk expects, in order
    ///
    /// A stop is sent on both characteristics so that neither a manual move
    /// nor a reference move keeps running.
    #[must_use]
    pub fn frames(&self) -> Vec<Frame> {
        match self {
            Self::MoveUp => vec![Frame::new(Channel::Command, opcode::MOVE_UP)],
            Self::MoveDown => vec![Frame::new(Channel::Command, opcode::MOVE_DOWN)],
            Self::WakeUp => vec![Frame::new(Channel::Command, opcode::WAKE_UP)],
            Self::Stop => vec![
                Frame::new(Channel::Command, opcode::STOP),
                Frame::new(Channel::ReferenceInput, opcode::REFERENCE_STOP),
            ],
            Self::MoveTo { raw } => vec![Frame::new(Channel::ReferenceInput, *raw)],
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MoveUp => write!(f, "move-up"),
            Self::MoveDown => write!(f, "move-down"),
            Self::Stop => write!(f, "stop"),
            Self::WakeUp => write!(f, "wake-up"),
            Self::MoveTo { raw } => write!(f, "move-to({raw})"),
        }
    }
}

/// Decoded height notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeightSample {
    /// Height in millimeters
    pub height_mm: i32,
    /// Reported speed, 0 when at rest; absent on short payloads
    pub speed: Option<i16>,
}

impl HeightSample {
    /// Sample at the given height with unknown speed
    #[must_use]
    pub const fn at(height_mm: i32) -> Self {
        Self {
            height_mm,
            speed: None,
        }
    }

    /// Whether the desk reported that it is standing still
    #[must_use]
    pub const fn is_at_rest(&self) -> bool {
        matches!(self.speed, Some(0))
    }
}

/// Parse a height characteristic value
///
/// Layout: `u16` LE raw height, optionally followed by `i16` LE speed.
/// Returns `None` if fewer than two bytes are present.
#[must_use]
pub fn parse_height(data: &[u8]) -> Option<HeightSample> {
    let mut buf = data;
    if buf.remaining() < 2 {
        return None;
    }

    let raw = buf.get_u16_le();
    let speed = if buf.remaining() >= 2 {
        Some(buf.get_i16_le())
    } else {
        None
    };

    Some(HeightSample {
        height_mm: raw_to_mm(i32::from(raw)),
        speed,
    })
}
