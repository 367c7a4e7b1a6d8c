//! Pose relay
//!
//! Glue between the message bus, the remote tracking service and the serial
//! link. Each incoming pose is handed to the tracker; only a successful
//! tracking answer reaches the gimbal.
//!
//! Both the bus and the tracker live outside this crate. The bus calls
//! [`GimbalRelay::on_pose`] from its subscription callback; the tracker is
//! anything implementing [`Tracker`].

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::{AckResult, Command, Dispatcher, LinkError};

/// How long to wait for the tracking service to come up before each call
pub const DEFAULT_TRACKER_WAIT: Duration = Duration::from_secs(5);

/// Errors reported by a [`Tracker`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("Tracking service not available after {0:?}")]
    Unavailable(Duration),

    #[error("Tracking service call failed: {0}")]
    CallFailed(String),
}

/// Errors from relaying one pose
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Pose message needs yaw and pitch, got {0} value(s)")]
    MalformedPose(usize),

    #[error(transparent)]
    Tracking(#[from] TrackerError),

    #[error(transparent)]
    Dispatch(#[from] LinkError),
}

/// Pose received from the bus
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseMessage {
    /// Requested yaw
    pub yaw: f64,
    /// Requested pitch
    pub pitch: f64,
}

impl PoseMessage {
    /// Read yaw and pitch from the first two values of a float array message
    pub fn from_slice(data: &[f64]) -> Result<Self, RelayError> {
        match data {
            [yaw, pitch, ..] => Ok(Self {
                yaw: *yaw,
                pitch: *pitch,
            }),
            _ => Err(RelayError::MalformedPose(data.len())),
        }
    }
}

/// Pose adjusted by the tracking service
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackedPose {
    /// Yaw to send to the gimbal
    pub new_yaw: f64,
    /// Pitch to send to the gimbal
    pub new_pitch: f64,
}

/// Remote tracking service
pub trait Tracker: Send + Sync {
    /// Block until the service is reachable or `timeout` passes
    fn wait_ready(&self, timeout: Duration) -> Result<(), TrackerError>;

    /// Ask the service to adjust a pose
    fn track(&self, yaw: f64, pitch: f64) -> Result<TrackedPose, TrackerError>;
}

/// Forwards tracked poses to the gimbal
pub struct GimbalRelay<T> {
    tracker: T,
    dispatcher: Arc<Dispatcher>,
    command: Command,
    tracker_wait: Duration,
}

impl<T: Tracker> GimbalRelay<T> {
    /// Relay poses with `command` over a shared dispatcher
    pub fn new(tracker: T, dispatcher: Arc<Dispatcher>, command: Command) -> Self {
        Self {
            tracker,
            dispatcher,
            command,
            tracker_wait: DEFAULT_TRACKER_WAIT,
        }
    }

    /// Override how long to wait for the tracker
    pub fn with_tracker_wait(mut self, wait: Duration) -> Self {
        self.tracker_wait = wait;
        self
    }

    /// Handle one raw bus message
    pub fn on_message(&self, data: &[f64]) -> Result<AckResult, RelayError> {
        self.on_pose(PoseMessage::from_slice(data)?)
    }

    /// Track a pose and send the result to the gimbal
    pub fn on_pose(&self, pose: PoseMessage) -> Result<AckResult, RelayError> {
        self.tracker.wait_ready(self.tracker_wait)?;
        let tracked = self.tracker.track(pose.yaw, pose.pitch).map_err(|e| {
            tracing::warn!(yaw = pose.yaw, pitch = pose.pitch, "tracking failed: {e}");
            e
        })?;

        tracing::debug!(
            yaw = tracked.new_yaw,
            pitch = tracked.new_pitch,
            command = %self.command,
            "relaying tracked pose"
        );
        let ack = self.dispatcher.process_one_packet(
            self.command,
            tracked.new_yaw as f32,
            tracked.new_pitch as f32,
        )?;
        Ok(ack)
    }
}
