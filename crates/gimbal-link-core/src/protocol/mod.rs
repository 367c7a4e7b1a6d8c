//! Gimbal Serial Protocol
//!
//! Implements the framed, acknowledged command protocol spoken with the gimbal
//! microcontroller over a half-duplex serial link.

pub mod commands;
mod dispatcher;
mod error;
pub mod packet;
pub mod serial;
pub mod transport;

pub use commands::{Command, CommandTable};
pub use dispatcher::{DispatchState, Dispatcher, LinkStats};
pub use error::{Axis, ErrorClass, LinkError};
pub use packet::{AckResult, Codec, Frame, GimbalState};
pub use serial::{list_ports, PortInfo};
pub use transport::{LinkState, SerialTransport, SharedLink, Transport};

/// Default baud rate for the gimbal controller
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default wait for an acknowledgement in milliseconds
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 100;

/// Default number of attempts per command
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Start-of-frame marker
pub const START_BYTE: u8 = 0xA5;

/// End-of-frame marker
pub const END_BYTE: u8 = 0x5A;

/// Length of every frame, in both directions
pub const FRAME_LEN: usize = 12;

/// Set on the echoed command code when the microcontroller rejects a command
pub const NACK_FLAG: u8 = 0x80;
