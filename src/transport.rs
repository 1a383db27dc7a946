use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

/// Upper bound on waiting for a query's response line.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(2);
const QUERY_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Command/response link to the instrument.
///
/// Reads never block past the transport's own liveness rules: a read may
/// return fewer bytes than asked for, `Ok(0)` once the current response is
/// exhausted, or [`TransportError::WouldBlock`] when nothing has arrived yet
/// and the caller should wait for the next readiness notification.
pub trait Transport {
    /// Send one command. The transport appends its own line terminator.
    fn send(&mut self, command: &str) -> Result<(), TransportError>;

    /// Read up to `buf.len()` bytes into `buf`.
    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Mark the start of a logical read transaction.
    fn read_begin(&mut self) -> Result<(), TransportError>;

    /// Whether the logical read transaction has been fully consumed.
    fn read_complete(&mut self) -> bool;

    /// Send a query and read a single newline-terminated response line.
    fn query(&mut self, command: &str) -> Result<String, TransportError> {
        self.query_within(command, QUERY_TIMEOUT)
    }

    /// Like [`query`](Self::query), giving up with
    /// [`TransportError::Timeout`] when the line has not arrived within
    /// `timeout`.
    fn query_within(&mut self, command: &str, timeout: Duration) -> Result<String, TransportError> {
        self.send(command)?;

        let start = Instant::now();
        let mut response = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.read_data(&mut byte) {
                Ok(0) => {
                    return Err(TransportError::Closed {
                        command: command.to_string(),
                    })
                }
                Ok(_) => {
                    if byte[0] == b'\n' {
                        break;
                    }
                    response.push(byte[0]);
                }
                Err(TransportError::WouldBlock) => {
                    if start.elapsed() > timeout {
                        return Err(TransportError::Timeout(timeout));
                    }
                    std::thread::sleep(QUERY_POLL_INTERVAL);
                }
                Err(e) => return Err(e),
            }
        }

        let response = String::from_utf8(response)?;
        log::trace!("{} -> {}", command, response.trim());
        Ok(response.trim().to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No data available yet")]
    WouldBlock,

    #[error("Timeout error: no data received within {0:?}")]
    Timeout(Duration),

    #[error("Short read: requested {requested} bytes but got {received}")]
    ShortRead { requested: usize, received: usize },

    #[error("Response to '{command}' ended before its terminator")]
    Closed { command: String },

    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Settings for opening a [`SerialTransport`].
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    /// Deadline for one `read_data` call to fill its buffer.
    pub read_timeout: Duration,
}

impl SerialConfig {
    pub fn new(port: &str) -> Self {
        Self {
            port: port.to_string(),
            baud_rate: 9600,
            read_timeout: Duration::from_secs(2),
        }
    }

    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }
}

/// RS-232 link to the scope.
#[derive(Debug)]
pub struct SerialTransport {
    serial: Box<dyn SerialPort>,
    read_timeout: Duration,
    in_transaction: bool,
}

impl SerialTransport {
    pub fn open(config: &SerialConfig) -> Result<Self, TransportError> {
        log::debug!(
            "Opening {} at {} baud",
            config.port,
            config.baud_rate
        );
        let serial = serialport::new(&config.port, config.baud_rate)
            .timeout(Duration::from_millis(10))
            .open()?;

        let mut transport = Self {
            serial,
            read_timeout: config.read_timeout,
            in_transaction: false,
        };
        transport.flush()?;
        Ok(transport)
    }

    /// Drop anything still sitting in the port buffers.
    pub fn flush(&mut self) -> Result<(), TransportError> {
        self.serial.clear(serialport::ClearBuffer::All)?;
        Ok(())
    }
}

impl Transport for SerialTransport {
    fn send(&mut self, command: &str) -> Result<(), TransportError> {
        log::trace!("Sending '{}'", command);
        let command_with_newline = format!("{command}\n");
        self.serial.write_all(command_with_newline.as_bytes())?;
        Ok(())
    }

    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let start = Instant::now();
        let mut filled = 0;

        while filled < buf.len() {
            match self.serial.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::TimedOut => {
                    if start.elapsed() >= self.read_timeout {
                        break;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        if filled == 0 && !buf.is_empty() {
            return Err(TransportError::Timeout(self.read_timeout));
        }
        Ok(filled)
    }

    fn read_begin(&mut self) -> Result<(), TransportError> {
        self.in_transaction = true;
        Ok(())
    }

    fn read_complete(&mut self) -> bool {
        if !self.in_transaction {
            return true;
        }
        match self.serial.bytes_to_read() {
            Ok(0) => {
                self.in_transaction = false;
                true
            }
            Ok(pending) => {
                log::debug!("{} bytes still pending in the read transaction", pending);
                false
            }
            Err(e) => {
                log::warn!("Could not query pending bytes: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_transport::MockTransport;

    #[test]
    fn test_query_reads_one_line() {
        let mut transport = MockTransport::new().respond("ACQ:STATE?", "1\n");
        assert_eq!(transport.query("ACQ:STATE?").unwrap(), "1");
        assert_eq!(transport.sent(), vec!["ACQ:STATE?".to_string()]);
    }

    #[test]
    fn test_query_without_terminator_is_closed() {
        let mut transport = MockTransport::new().respond("ACQ:STOPA?", "SEQ");
        assert!(matches!(
            transport.query("ACQ:STOPA?"),
            Err(TransportError::Closed { .. })
        ));
    }

    #[test]
    fn test_query_waits_out_readiness_gaps() {
        let mut transport = MockTransport::new()
            .respond("CH1:SCA?", "5.0E-1\n")
            .would_block_before_reads([true, true]);
        assert_eq!(transport.query("CH1:SCA?").unwrap(), "5.0E-1");
    }

    #[test]
    fn test_query_gives_up_when_nothing_arrives() {
        let mut transport = MockTransport::new()
            .respond("CH1:SCA?", "5.0E-1\n")
            .would_block_before_reads(std::iter::repeat(true).take(10_000));
        let timeout = Duration::from_millis(20);
        assert!(matches!(
            transport.query_within("CH1:SCA?", timeout),
            Err(TransportError::Timeout(t)) if t == timeout
        ));
    }

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("/dev/ttyUSB0")
            .baud_rate(19200)
            .read_timeout(Duration::from_millis(500));
        assert_eq!(config.port, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 19200);
        assert_eq!(config.read_timeout, Duration::from_millis(500));
    }
}
