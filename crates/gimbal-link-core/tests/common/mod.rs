//! Mock transport shared by the integration tests

#![allow(dead_code)]

use gimbal_link_core::protocol::{Frame, LinkError, LinkState, Transport, FRAME_LEN, NACK_FLAG};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// What the mock microcontroller does when it receives a frame
#[derive(Debug, Clone)]
pub enum Reply {
    /// Echo the command back as an ACK with the given pose
    Ack { yaw: f32, pitch: f32 },
    /// Echo the command back with the NACK flag
    Nack,
    /// Put these exact bytes on the wire
    Raw(Vec<u8>),
    /// Say nothing
    Silence,
}

/// Line activity seen by the mock, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Write(Vec<u8>),
    Read(Vec<u8>),
}

/// Which fatal error a write should fail with
#[derive(Debug, Clone, Copy)]
pub enum WriteFault {
    PortUnavailable,
    Disconnect,
}

#[derive(Default)]
struct Inner {
    script: VecDeque<Reply>,
    /// Reply used once the script is exhausted
    fallback: Option<Reply>,
    rx: VecDeque<u8>,
    log: Vec<Event>,
    write_fault: Option<WriteFault>,
    closed: bool,
    reopens: usize,
}

/// Scripted stand-in for the serial link; clones share state
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<Inner>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply to successive writes in order
    pub fn with_script(replies: Vec<Reply>) -> Self {
        let mock = Self::new();
        mock.inner.lock().script = replies.into();
        mock
    }

    /// Reply to every write the same way
    pub fn always(reply: Reply) -> Self {
        let mock = Self::new();
        mock.inner.lock().fallback = Some(reply);
        mock
    }

    pub fn fail_writes(&self, fault: WriteFault) {
        self.inner.lock().write_fault = Some(fault);
    }

    pub fn log(&self) -> Vec<Event> {
        self.inner.lock().log.clone()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.log()
            .into_iter()
            .filter_map(|e| match e {
                Event::Write(bytes) => Some(bytes),
                Event::Read(_) => None,
            })
            .collect()
    }

    pub fn reopens(&self) -> usize {
        self.inner.lock().reopens
    }

    pub fn boxed(&self) -> Box<dyn Transport> {
        Box::new(self.clone())
    }
}

fn respond(frame: &[u8], reply: Reply) -> Vec<u8> {
    let code = frame[1];
    match reply {
        Reply::Ack { yaw, pitch } => Frame { code, yaw, pitch }.to_bytes().to_vec(),
        Reply::Nack => Frame {
            code: code | NACK_FLAG,
            yaw: f32::NAN,
            pitch: f32::NAN,
        }
        .to_bytes()
        .to_vec(),
        Reply::Raw(bytes) => bytes,
        Reply::Silence => Vec::new(),
    }
}

impl Transport for MockTransport {
    fn write(&mut self, frame: &[u8]) -> Result<(), LinkError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(LinkError::LinkClosed);
        }
        match inner.write_fault {
            Some(WriteFault::PortUnavailable) => {
                return Err(LinkError::PortUnavailable {
                    port: "/dev/mock".into(),
                    reason: "device unplugged".into(),
                })
            }
            Some(WriteFault::Disconnect) => {
                inner.closed = true;
                return Err(LinkError::Io(io::Error::from(io::ErrorKind::BrokenPipe)));
            }
            None => {}
        }

        assert_eq!(frame.len(), FRAME_LEN, "dispatcher wrote a partial frame");
        inner.log.push(Event::Write(frame.to_vec()));
        let reply = inner
            .script
            .pop_front()
            .or_else(|| inner.fallback.clone())
            .unwrap_or(Reply::Silence);
        let bytes = respond(frame, reply);
        inner.rx.extend(bytes);
        Ok(())
    }

    fn read_exact(&mut self, n: usize, _timeout: Duration) -> Result<Vec<u8>, LinkError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(LinkError::LinkClosed);
        }
        if inner.rx.len() < n {
            let partial: Vec<u8> = inner.rx.drain(..).collect();
            return Err(LinkError::Timeout {
                partial,
                expected: n,
            });
        }
        let bytes: Vec<u8> = inner.rx.drain(..n).collect();
        inner.log.push(Event::Read(bytes.clone()));
        Ok(bytes)
    }

    fn discard_input(&mut self) -> Result<(), LinkError> {
        self.inner.lock().rx.clear();
        Ok(())
    }

    fn state(&self) -> LinkState {
        if self.inner.lock().closed {
            LinkState::Closed
        } else {
            LinkState::Open
        }
    }

    fn close(&mut self) {
        self.inner.lock().closed = true;
    }

    fn reopen(&mut self) -> Result<(), LinkError> {
        let mut inner = self.inner.lock();
        inner.closed = false;
        inner.write_fault = None;
        inner.reopens += 1;
        Ok(())
    }
}
