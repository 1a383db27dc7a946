use crate::accumulator::{ReadAccumulator, ReadPoll};
use crate::transport::{Transport, TransportError};

/// Curve length at the default 2500-point record length.
pub const BLOCK_SIZE: usize = 2500;

#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Expected block marker '#', got 0x{0:02x}")]
    MissingMarker(u8),

    #[error("Invalid block length digit count 0x{0:02x}")]
    InvalidDigitCount(u8),

    #[error("Invalid block length '{0}'")]
    InvalidLength(String),

    #[error("Block announces {announced} bytes, expected {expected}")]
    LengthMismatch { announced: usize, expected: usize },

    #[error("Response ended after {read} of {expected} block bytes")]
    Truncated { read: usize, expected: usize },
}

/// Raw digitizer codes of one channel, exactly one block long.
///
/// Calibration consumes the block, so a buffer is never calibrated twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock {
    bytes: Vec<u8>,
}

impl RawBlock {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Codes as the signed bytes the digitizer produced.
    pub fn codes(&self) -> impl Iterator<Item = i8> + '_ {
        self.bytes.iter().map(|&b| i8::from_ne_bytes([b]))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Marker,
    Length { digits: usize },
    Payload,
    Terminator,
}

/// Reads `#<n><len>`, the block, then its terminator, across any number of
/// fragments and readiness callbacks.
#[derive(Debug)]
pub struct BlockReader {
    acc: ReadAccumulator,
    block_size: usize,
    stage: Stage,
    payload_start: usize,
}

impl BlockReader {
    pub fn new(block_size: usize) -> Self {
        Self::with_surplus(ReadAccumulator::new(), block_size)
    }

    /// Continue from bytes the header reader already consumed.
    pub fn with_surplus(surplus: ReadAccumulator, block_size: usize) -> Self {
        Self {
            acc: surplus,
            block_size,
            stage: Stage::Marker,
            payload_start: 0,
        }
    }

    /// Payload bytes received so far.
    pub fn payload_read(&self) -> usize {
        match self.stage {
            Stage::Marker | Stage::Length { .. } => 0,
            Stage::Payload | Stage::Terminator => self
                .acc
                .cursor()
                .saturating_sub(self.payload_start)
                .min(self.block_size),
        }
    }

    pub fn poll<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
    ) -> Result<ReadPoll<RawBlock>, BlockError> {
        loop {
            match self.stage {
                Stage::Marker => {
                    if !self.fill(transport, 2)? {
                        return Ok(ReadPoll::Pending);
                    }
                    let marker = self.acc.filled();
                    if marker[0] != b'#' {
                        return Err(BlockError::MissingMarker(marker[0]));
                    }
                    let digits = match marker[1] {
                        d @ b'1'..=b'9' => usize::from(d - b'0'),
                        other => return Err(BlockError::InvalidDigitCount(other)),
                    };
                    self.stage = Stage::Length { digits };
                }
                Stage::Length { digits } => {
                    if !self.fill(transport, 2 + digits)? {
                        return Ok(ReadPoll::Pending);
                    }
                    let text = String::from_utf8_lossy(&self.acc.filled()[2..2 + digits]).into_owned();
                    let announced: usize = text
                        .parse()
                        .map_err(|_| BlockError::InvalidLength(text.clone()))?;
                    if announced != self.block_size {
                        return Err(BlockError::LengthMismatch {
                            announced,
                            expected: self.block_size,
                        });
                    }
                    self.payload_start = 2 + digits;
                    log::debug!("Requesting: {} bytes.", self.block_size);
                    self.stage = Stage::Payload;
                }
                Stage::Payload => {
                    if !self.fill(transport, self.payload_start + self.block_size)? {
                        return Ok(ReadPoll::Pending);
                    }
                    self.stage = Stage::Terminator;
                }
                Stage::Terminator => {
                    let end = self.payload_start + self.block_size;
                    if !self.fill(transport, end + 1)? {
                        return Ok(ReadPoll::Pending);
                    }
                    let filled = self.acc.filled();
                    if filled[end] != b'\n' {
                        log::debug!("Unexpected block terminator 0x{:02x}", filled[end]);
                    }
                    if filled.len() > end + 1 {
                        log::warn!("Dropping {} bytes after the block", filled.len() - end - 1);
                    }

                    let mut bytes = std::mem::take(&mut self.acc).into_bytes();
                    bytes.truncate(end);
                    bytes.drain(..self.payload_start);
                    self.stage = Stage::Marker;
                    self.payload_start = 0;
                    log::debug!("Transfer has been completed.");
                    return Ok(ReadPoll::Ready(RawBlock::new(bytes)));
                }
            }
        }
    }

    /// Read until the accumulator holds `target` bytes. `Ok(false)` means
    /// the transport had nothing to give for now.
    fn fill<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        target: usize,
    ) -> Result<bool, BlockError> {
        self.acc.set_target(target);
        while !self.acc.is_complete() {
            let requested = self.acc.remaining();
            let received = match transport.read_data(self.acc.spare(requested)) {
                Err(TransportError::WouldBlock) => return Ok(false),
                result => result?,
            };
            if received == 0 {
                return Err(BlockError::Truncated {
                    read: self.payload_read(),
                    expected: self.block_size,
                });
            }
            self.acc.advance(received);
            log::trace!("Received block: {} bytes.", received);
        }
        Ok(true)
    }
}
