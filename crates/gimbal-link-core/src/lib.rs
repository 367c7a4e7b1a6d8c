//! # gimbal-link Core Library
//!
//! Reliable command link from a tracking host to a gimbal microcontroller.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Fixed-length frame codec with CRC-8 checksums
//! - Serial transport with timed reads and single-writer access
//! - Command dispatch with bounded retry on lost or corrupted frames
//! - A relay that forwards tracking-service output to the gimbal
//!
//! ## Example
//!
//! ```rust,no_run
//! use gimbal_link_core::{config::LinkConfig, protocol::{Command, Dispatcher}};
//!
//! let config = LinkConfig::for_port("/dev/ttyTHS0");
//! let dispatcher = Dispatcher::open(&config)?;
//! let ack = dispatcher.process_one_packet(Command::SearchTarget, 12.5, -3.25)?;
//! println!("acknowledged: {}", ack.success);
//! # Ok::<(), gimbal_link_core::protocol::LinkError>(())
//! ```

pub mod config;
pub mod protocol;
pub mod relay;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{AngleLimits, LinkConfig, RetryPolicy};
    pub use crate::protocol::{
        AckResult, Command, CommandTable, Dispatcher, LinkError, SerialTransport, Transport,
    };
    pub use crate::relay::{GimbalRelay, PoseMessage, TrackedPose, Tracker, TrackerError};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
