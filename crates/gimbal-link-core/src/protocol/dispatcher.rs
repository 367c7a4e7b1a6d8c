//! Command dispatch
//!
//! Runs one logical command end to end: validate, encode, then write and wait
//! for the acknowledgement, retrying lost or corrupted frames a bounded number
//! of times.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

use super::{
    packet::start_offset, AckResult, Codec, Command, Frame, LinkError, LinkState,
    SerialTransport, SharedLink, Transport, FRAME_LEN,
};
use crate::config::{LinkConfig, RetryPolicy};

/// Progress of a single dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// Nothing started yet
    Idle,
    /// Validating and encoding the command
    Encoding,
    /// Writing the frame
    Sending,
    /// Waiting for the response frame
    AwaitingAck,
    /// Checking the response frame
    Decoding,
    /// Dropping input before the next attempt
    Retry,
    /// Acknowledged (ACK or NACK)
    Done,
    /// Gave up
    Failed,
}

/// Cumulative link counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Frames written
    pub tx_frames: u64,
    /// Well-formed response frames read
    pub rx_frames: u64,
    /// Bytes written
    pub tx_bytes: u64,
    /// Bytes read, including noise and partial frames
    pub rx_bytes: u64,
    /// Attempts that were repeated after a transient error
    pub retries: u64,
    /// Dispatches that ended in an error after I/O started
    pub failures: u64,
}

/// Sends commands to the gimbal microcontroller over a shared link
pub struct Dispatcher {
    codec: Codec,
    policy: RetryPolicy,
    link: SharedLink,
    stats: Mutex<LinkStats>,
}

impl Dispatcher {
    /// Create a dispatcher over an already open transport
    pub fn new(config: &LinkConfig, transport: Box<dyn Transport>) -> Result<Self, LinkError> {
        let table = config
            .command_table()
            .map_err(|e| LinkError::InvalidCommand(e.to_string()))?;
        Ok(Self::with_parts(
            Codec::new(table, config.limits),
            config.retry_policy(),
            transport,
        ))
    }

    /// Open the configured serial port and create a dispatcher on it
    pub fn open(config: &LinkConfig) -> Result<Self, LinkError> {
        let transport = SerialTransport::open(&config.port_name, config.baud_rate)?;
        Self::new(config, Box::new(transport))
    }

    /// Assemble a dispatcher from its parts
    pub fn with_parts(codec: Codec, policy: RetryPolicy, transport: Box<dyn Transport>) -> Self {
        Self {
            codec,
            policy,
            link: SharedLink::new(transport),
            stats: Mutex::new(LinkStats::default()),
        }
    }

    /// The codec used for every frame
    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    /// The retry policy in effect
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Snapshot of the link counters
    pub fn stats(&self) -> LinkStats {
        *self.stats.lock()
    }

    /// State of the underlying link
    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    /// Close the link and open it again, after a fatal error
    pub fn reconnect(&self) -> Result<(), LinkError> {
        let mut link = self.link.lock();
        link.close();
        link.reopen()
    }

    /// Close the link
    pub fn close(&self) {
        self.link.lock().close();
    }

    /// Send one command and wait for its acknowledgement
    ///
    /// Input errors are returned as-is before any I/O. Every error after I/O
    /// started is wrapped in [`LinkError::DispatchFailed`] with the number of
    /// attempts made. A NACK from the microcontroller is a successful exchange
    /// and comes back as `Ok` with `success == false`.
    pub fn process_one_packet(
        &self,
        command: Command,
        yaw: f32,
        pitch: f32,
    ) -> Result<AckResult, LinkError> {
        let mut state = DispatchState::Idle;
        advance(&mut state, DispatchState::Encoding);
        let frame = self.codec.encode(command, yaw, pitch)?;
        let code = frame[1];

        let mut link = self.link.lock();
        let mut attempts = 0;
        loop {
            attempts += 1;
            advance(&mut state, DispatchState::Sending);

            let err = match self.attempt(&mut **link, &frame, code, &mut state) {
                Ok(ack) => {
                    advance(&mut state, DispatchState::Done);
                    tracing::debug!(%command, attempts, success = ack.success, "command acknowledged");
                    return Ok(ack);
                }
                Err(e) => e,
            };

            if err.is_transient() && attempts < self.policy.max_retries {
                advance(&mut state, DispatchState::Retry);
                tracing::warn!(%command, attempt = attempts, "transient link error, retrying: {err}");
                self.stats.lock().retries += 1;
                match link.discard_input() {
                    Ok(()) => continue,
                    Err(discard_err) => {
                        return Err(self.fail(&mut state, command, attempts, discard_err))
                    }
                }
            }

            return Err(self.fail(&mut state, command, attempts, err));
        }
    }

    /// One write and one acknowledgement read
    fn attempt(
        &self,
        link: &mut dyn Transport,
        frame: &[u8],
        code: u8,
        state: &mut DispatchState,
    ) -> Result<AckResult, LinkError> {
        link.write(frame)?;
        {
            let mut stats = self.stats.lock();
            stats.tx_frames += 1;
            stats.tx_bytes += frame.len() as u64;
        }

        advance(state, DispatchState::AwaitingAck);
        let mut received = 0;
        let response = read_frame(link, self.policy.ack_timeout, &mut received);
        {
            let mut stats = self.stats.lock();
            stats.rx_bytes += received;
            if response.is_ok() {
                stats.rx_frames += 1;
            }
        }
        let response = response?;

        advance(state, DispatchState::Decoding);
        let ack = self.codec.decode(&response)?;
        if ack.code != code {
            return Err(LinkError::FramingError(format!(
                "response echoes code {:#04x}, expected {:#04x}",
                ack.code, code
            )));
        }
        Ok(ack)
    }

    fn fail(
        &self,
        state: &mut DispatchState,
        command: Command,
        attempts: u32,
        last: LinkError,
    ) -> LinkError {
        advance(state, DispatchState::Failed);
        tracing::error!(%command, attempts, "dispatch failed: {last}");
        self.stats.lock().failures += 1;
        LinkError::DispatchFailed {
            attempts,
            last: Box::new(last),
        }
    }
}

fn advance(state: &mut DispatchState, next: DispatchState) {
    tracing::trace!("dispatch {:?} -> {:?}", state, next);
    *state = next;
}

/// Read one response frame within `timeout`
///
/// Bytes that cannot start a valid frame are dropped up to the next start
/// marker and the rest of the frame is read against the same deadline. A
/// candidate that fails its markers or checksum is only reported once no later
/// start marker is left to try. Every byte taken off the link is added to
/// `received`, skipped noise included.
fn read_frame(
    link: &mut dyn Transport,
    timeout: Duration,
    received: &mut u64,
) -> Result<Vec<u8>, LinkError> {
    let deadline = Instant::now() + timeout;
    let mut buf: Vec<u8> = Vec::with_capacity(FRAME_LEN);

    loop {
        if buf.len() < FRAME_LEN {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match link.read_exact(FRAME_LEN - buf.len(), remaining) {
                Ok(more) => {
                    *received += more.len() as u64;
                    buf.extend_from_slice(&more);
                }
                Err(LinkError::Timeout { partial, .. }) => {
                    *received += partial.len() as u64;
                    buf.extend_from_slice(&partial);
                    return Err(LinkError::Timeout {
                        partial: buf,
                        expected: FRAME_LEN,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        let skip = match start_offset(&buf) {
            Some(0) => match Frame::from_bytes(&buf) {
                Ok(_) => return Ok(buf),
                Err(e) => match start_offset(&buf[1..]) {
                    Some(next) => next + 1,
                    None => return Err(e),
                },
            },
            Some(offset) => offset,
            None => buf.len(),
        };
        tracing::debug!("skipping {} byte(s) before next start marker", skip);
        buf.drain(..skip);
    }
}
