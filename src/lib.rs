#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

//! # desklink
//!
//! A Rust library for driving Linak-based standing desks (IKEA Idasen and
//! friends) over Bluetooth Low Energy.
//!
//! The desk only understands "move up", "move down" and "stop"; it has no
//! notion of a target height. [`DeskService`] closes that loop: it starts a
//! move in the right direction, watches the height notifications the desk
//! streams back, and stops as soon as the target is reached or passed.
//!
//! ## Layers
//!
//! - [`codec`]: raw device units to millimetres and back
//! - [`protocol`]: command payloads and notification decoding
//! - [`transport`]: the [`DeskTransport`] seam, with [`BleTransport`] as the
//!   btleplug implementation
//! - [`service`]: the control loop, the only owner of desk state
//! - [`presets`]: named heights stored next to the desk state
//!
//! ## Safety Warning
//!
//! ⚠️ **Important**: This library moves furniture. Keep the area under and
//! around the desk clear, and keep [`DeskService::stop`] within reach of
//! whoever triggers a move.
//!
//! ## Quick Start
//!
//! ```no_run
//! use desklink::{BleTransport, DeskConfig, DeskService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // DESK_MAC_ADDRESS=FD:46:77:A9:30:CA
//!     let config = DeskConfig::from_env()?;
//!     let desk = DeskService::start(BleTransport::new(&config).await?, &config).await;
//!
//!     // Stand up
//!     desk.apply_preset("Standing").await?;
//!
//!     // Changed our mind
//!     desk.set_height(900).await?;
//!
//!     Ok(())
//! }
//! ```

/// Bluetooth Low Energy transport
pub mod ble;
/// Conversion between raw device units and millimetres
pub mod codec;
/// Runtime configuration
pub mod config;
/// Error types and handling
pub mod error;
/// Named height presets
pub mod presets;
/// Command payloads and notification parsing
pub mod protocol;
/// Desk control loop
pub mod service;
/// Shared desk state
pub mod state;
/// Link abstraction between the service and the desk
pub mod transport;
/// Type definitions and data structures
pub mod types;

// Re-export the main types for convenient usage
pub use ble::BleTransport;
pub use config::{DeskAddress, DeskConfig};
pub use error::{ConfigError, ConnectError, DeskError, Result, ValidationError, WriteError};
pub use presets::PresetStore;
pub use protocol::{Command, Direction, HeightSample};
pub use service::{DeskService, MoveOutcome};
pub use state::SharedState;
pub use transport::{Connected, DeskTransport, EventSender, LinkId, TransportEvent};
pub use types::{ConnectionStatus, DeskState, HeightBounds, MovePhase, Preset, TimeoutConfig};

use uuid::Uuid;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Height characteristic (read/notify)
///
/// Streams the current raw height, optionally followed by the current speed.
pub const HEIGHT_CHAR_UUID: Uuid = Uuid::from_u128(0x99fa_0021_338a_1024_8a49_009c_0215_f78a);

/// Control characteristic for movement opcodes (write)
pub const COMMAND_CHAR_UUID: Uuid = Uuid::from_u128(0x99fa_0002_338a_1024_8a49_009c_0215_f78a);

/// Reference input characteristic (write)
///
/// Takes an absolute raw height to drive to, or the reference stop value.
pub const REFERENCE_INPUT_CHAR_UUID: Uuid =
    Uuid::from_u128(0x99fa_0031_338a_1024_8a49_009c_0215_f78a);
