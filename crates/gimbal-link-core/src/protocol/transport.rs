//! Byte transport to the microcontroller
//!
//! [`Transport`] is the seam between the dispatcher and the physical link;
//! [`SerialTransport`] is the real implementation and tests plug in scripted
//! transports. [`SharedLink`] serializes access so one exchange holds the line
//! from the first byte written to the last byte of the response.

use parking_lot::{Mutex, MutexGuard};
use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use super::{
    serial::{clear_buffers, configure_port, open_port},
    LinkError,
};

/// Handle read timeout used while polling for response bytes
const POLL_TIMEOUT: Duration = Duration::from_millis(5);

/// Open/closed state of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Device handle held
    Open,
    /// No handle; every operation fails with [`LinkError::LinkClosed`]
    Closed,
}

/// Blocking, frame-oriented access to the link
pub trait Transport: Send {
    /// Write every byte of `frame` or fail
    fn write(&mut self, frame: &[u8]) -> Result<(), LinkError>;

    /// Read exactly `n` bytes, giving up after `timeout`
    ///
    /// On expiry returns [`LinkError::Timeout`] carrying the bytes that did arrive.
    fn read_exact(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>, LinkError>;

    /// Drop any bytes waiting in the input buffer
    fn discard_input(&mut self) -> Result<(), LinkError>;

    /// Current link state
    fn state(&self) -> LinkState;

    /// Release the underlying device
    fn close(&mut self);

    /// Reopen a closed link
    fn reopen(&mut self) -> Result<(), LinkError>;
}

/// Serial port transport
pub struct SerialTransport {
    port_name: String,
    baud_rate: u32,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Open and configure the serial device
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self, LinkError> {
        let port = Self::open_configured(port_name, baud_rate)?;
        tracing::info!(port = port_name, baud_rate, "serial link open");
        Ok(Self {
            port_name: port_name.to_string(),
            baud_rate,
            port: Some(port),
        })
    }

    /// Name of the serial device
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    fn open_configured(port_name: &str, baud_rate: u32) -> Result<Box<dyn SerialPort>, LinkError> {
        let mut port = open_port(port_name, baud_rate, POLL_TIMEOUT)?;
        // Dropping `port` on error releases the device
        configure_port(port.as_mut())?;
        clear_buffers(port.as_mut())?;
        Ok(port)
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>, LinkError> {
        self.port.as_mut().ok_or(LinkError::LinkClosed)
    }

    /// Close the link after an I/O error and hand the error back
    fn fail(&mut self, err: std::io::Error) -> LinkError {
        tracing::error!(port = %self.port_name, "serial I/O error, closing link: {err}");
        self.close();
        LinkError::Io(err)
    }
}

impl Transport for SerialTransport {
    fn write(&mut self, frame: &[u8]) -> Result<(), LinkError> {
        let port = self.port_mut()?;
        tracing::trace!("tx {:02x?}", frame);
        if let Err(e) = port.write_all(frame).and_then(|_| port.flush()) {
            return Err(self.fail(e));
        }
        Ok(())
    }

    fn read_exact(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>, LinkError> {
        let port = self.port_mut()?;
        let start = Instant::now();
        let mut buf = vec![0u8; n];
        let mut offset = 0;

        while offset < n {
            if start.elapsed() > timeout {
                buf.truncate(offset);
                tracing::debug!("read timed out after {} of {} bytes", offset, n);
                return Err(LinkError::Timeout {
                    partial: buf,
                    expected: n,
                });
            }

            match port.read(&mut buf[offset..]) {
                Ok(0) => {
                    let eof = std::io::Error::from(std::io::ErrorKind::UnexpectedEof);
                    return Err(self.fail(eof));
                }
                Ok(read) => {
                    tracing::trace!("rx {:02x?}", &buf[offset..offset + read]);
                    offset += read;
                }
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::TimedOut
                        || e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::Interrupted =>
                {
                    continue;
                }
                Err(e) => return Err(self.fail(e)),
            }
        }
        Ok(buf)
    }

    fn discard_input(&mut self) -> Result<(), LinkError> {
        let port = self.port_mut()?;
        if let Err(e) = port.clear(serialport::ClearBuffer::Input) {
            return Err(self.fail(e.into()));
        }
        Ok(())
    }

    fn state(&self) -> LinkState {
        if self.port.is_some() {
            LinkState::Open
        } else {
            LinkState::Closed
        }
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            tracing::info!(port = %self.port_name, "serial link closed");
        }
    }

    fn reopen(&mut self) -> Result<(), LinkError> {
        if self.port.is_some() {
            return Ok(());
        }
        self.port = Some(Self::open_configured(&self.port_name, self.baud_rate)?);
        tracing::info!(port = %self.port_name, "serial link reopened");
        Ok(())
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// A transport shared between callers
///
/// Holding the guard returned by [`SharedLink::lock`] is the only way to reach
/// the transport, so a whole write/ack exchange runs without interleaving.
pub struct SharedLink {
    inner: Mutex<Box<dyn Transport>>,
}

impl SharedLink {
    /// Wrap a transport
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            inner: Mutex::new(transport),
        }
    }

    /// Block until the link is free and take it
    pub fn lock(&self) -> MutexGuard<'_, Box<dyn Transport>> {
        self.inner.lock()
    }

    /// Current link state (waits for any exchange in flight)
    pub fn state(&self) -> LinkState {
        self.inner.lock().state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Frame, FRAME_LEN};
    use serialport::{ClearBuffer, DataBits, FlowControl, Parity, StopBits};
    use std::io;

    /// Port whose buffers can never be cleared
    struct StuckPort;

    impl Read for StuckPort {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::TimedOut))
        }
    }

    impl Write for StuckPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SerialPort for StuckPort {
        fn name(&self) -> Option<String> {
            Some("/dev/stuck".into())
        }
        fn baud_rate(&self) -> serialport::Result<u32> {
            Ok(115_200)
        }
        fn data_bits(&self) -> serialport::Result<DataBits> {
            Ok(DataBits::Eight)
        }
        fn flow_control(&self) -> serialport::Result<FlowControl> {
            Ok(FlowControl::None)
        }
        fn parity(&self) -> serialport::Result<Parity> {
            Ok(Parity::None)
        }
        fn stop_bits(&self) -> serialport::Result<StopBits> {
            Ok(StopBits::One)
        }
        fn timeout(&self) -> Duration {
            POLL_TIMEOUT
        }
        fn set_baud_rate(&mut self, _baud_rate: u32) -> serialport::Result<()> {
            Ok(())
        }
        fn set_data_bits(&mut self, _data_bits: DataBits) -> serialport::Result<()> {
            Ok(())
        }
        fn set_flow_control(&mut self, _flow_control: FlowControl) -> serialport::Result<()> {
            Ok(())
        }
        fn set_parity(&mut self, _parity: Parity) -> serialport::Result<()> {
            Ok(())
        }
        fn set_stop_bits(&mut self, _stop_bits: StopBits) -> serialport::Result<()> {
            Ok(())
        }
        fn set_timeout(&mut self, _timeout: Duration) -> serialport::Result<()> {
            Ok(())
        }
        fn write_request_to_send(&mut self, _level: bool) -> serialport::Result<()> {
            Ok(())
        }
        fn write_data_terminal_ready(&mut self, _level: bool) -> serialport::Result<()> {
            Ok(())
        }
        fn read_clear_to_send(&mut self) -> serialport::Result<bool> {
            Ok(true)
        }
        fn read_data_set_ready(&mut self) -> serialport::Result<bool> {
            Ok(true)
        }
        fn read_ring_indicator(&mut self) -> serialport::Result<bool> {
            Ok(false)
        }
        fn read_carrier_detect(&mut self) -> serialport::Result<bool> {
            Ok(true)
        }
        fn bytes_to_read(&self) -> serialport::Result<u32> {
            Ok(0)
        }
        fn bytes_to_write(&self) -> serialport::Result<u32> {
            Ok(0)
        }
        fn clear(&self, _buffer_to_clear: ClearBuffer) -> serialport::Result<()> {
            Err(serialport::Error::new(
                serialport::ErrorKind::Io(io::ErrorKind::BrokenPipe),
                "device gone",
            ))
        }
        fn try_clone(&self) -> serialport::Result<Box<dyn SerialPort>> {
            Ok(Box::new(StuckPort))
        }
        fn set_break(&self) -> serialport::Result<()> {
            Ok(())
        }
        fn clear_break(&self) -> serialport::Result<()> {
            Ok(())
        }
    }

    fn stuck_transport() -> SerialTransport {
        SerialTransport {
            port_name: "/dev/stuck".into(),
            baud_rate: 115_200,
            port: Some(Box::new(StuckPort)),
        }
    }

    #[test]
    fn test_open_missing_device_fails() {
        let result = SerialTransport::open("/dev/gimbal-link-does-not-exist", 115_200);
        assert!(matches!(result, Err(LinkError::PortUnavailable { .. })));
    }

    #[test]
    fn test_failed_discard_closes_link() {
        let mut transport = stuck_transport();
        assert_eq!(transport.state(), LinkState::Open);

        let err = transport.discard_input().unwrap_err();
        assert!(matches!(err, LinkError::Io(_)));
        assert!(err.is_fatal());
        assert_eq!(transport.state(), LinkState::Closed);
        assert!(matches!(transport.write(&[0u8; 4]), Err(LinkError::LinkClosed)));
    }

    #[test]
    fn test_failed_buffer_clear_on_open_is_unavailable() {
        let mut port = StuckPort;
        assert!(matches!(
            clear_buffers(&mut port),
            Err(LinkError::PortUnavailable { port, .. }) if port == "/dev/stuck"
        ));
    }

    #[cfg(unix)]
    mod pty {
        use super::*;
        use serialport::TTYPort;
        use std::io::{Read, Write};
        use std::thread;

        /// Open a pseudo-terminal pair and a transport on its slave end
        fn open_pair() -> (TTYPort, SerialTransport) {
            let (master, slave) = TTYPort::pair().unwrap();
            let name = slave.name().unwrap();
            drop(slave);
            let transport = SerialTransport::open(&name, 115_200).unwrap();
            (master, transport)
        }

        #[test]
        fn test_read_timeout_keeps_partial_bytes() {
            let (mut master, mut transport) = open_pair();
            master.write_all(&[1, 2, 3, 4, 5]).unwrap();
            master.flush().unwrap();

            let err = transport
                .read_exact(FRAME_LEN, Duration::from_millis(50))
                .unwrap_err();
            match err {
                LinkError::Timeout { partial, expected } => {
                    assert_eq!(partial, vec![1, 2, 3, 4, 5]);
                    assert_eq!(expected, FRAME_LEN);
                }
                other => panic!("unexpected error: {other}"),
            }
            assert_eq!(transport.state(), LinkState::Open);
        }

        #[test]
        fn test_close_then_reopen() {
            let (mut master, mut transport) = open_pair();

            transport.close();
            assert_eq!(transport.state(), LinkState::Closed);
            assert!(matches!(transport.write(&[0xA5]), Err(LinkError::LinkClosed)));
            assert!(matches!(
                transport.read_exact(1, Duration::from_millis(10)),
                Err(LinkError::LinkClosed)
            ));
            assert!(matches!(transport.discard_input(), Err(LinkError::LinkClosed)));

            transport.reopen().unwrap();
            assert_eq!(transport.state(), LinkState::Open);
            master.write_all(&[7, 8]).unwrap();
            master.flush().unwrap();
            assert_eq!(
                transport.read_exact(2, Duration::from_millis(200)).unwrap(),
                vec![7, 8]
            );
        }

        #[cfg(target_os = "linux")]
        #[test]
        fn test_hangup_closes_link() {
            let (master, mut transport) = open_pair();
            drop(master);

            let err = transport
                .read_exact(FRAME_LEN, Duration::from_millis(100))
                .unwrap_err();
            assert!(matches!(err, LinkError::Io(_)), "{err}");
            assert_eq!(transport.state(), LinkState::Closed);
        }

        #[test]
        fn test_dispatch_over_pty() {
            use crate::config::LinkConfig;
            use crate::protocol::{Command, Dispatcher};

            let (mut master, transport) = open_pair();
            let name = transport.port_name().to_string();

            let controller = thread::spawn(move || {
                master.set_timeout(Duration::from_secs(2)).unwrap();
                let mut request = [0u8; FRAME_LEN];
                master.read_exact(&mut request).unwrap();
                let sent = Frame::from_bytes(&request).unwrap();
                let reply = Frame {
                    code: sent.code,
                    yaw: sent.yaw + 1.0,
                    pitch: sent.pitch,
                };
                master.write_all(&reply.to_bytes()).unwrap();
                master.flush().unwrap();
                sent
            });

            let mut config = LinkConfig::for_port(&name);
            config.ack_timeout_ms = 1_000;
            let dispatcher = Dispatcher::new(&config, Box::new(transport)).unwrap();
            let ack = dispatcher
                .process_one_packet(Command::TrackTarget, 10.0, -2.0)
                .unwrap();

            let sent = controller.join().unwrap();
            assert_eq!(sent.code, 0x02);
            assert!(ack.success);
            assert_eq!(ack.command, Some(Command::TrackTarget));
            let state = ack.state.unwrap();
            assert_eq!((state.yaw, state.pitch), (11.0, -2.0));
            assert_eq!(dispatcher.stats().rx_frames, 1);
        }
    }
}
