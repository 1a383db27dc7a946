use crate::accumulator::{ReadAccumulator, ReadPoll};
use crate::preamble::{FIELD_DELIMITER, HEADER_FIELDS};
use crate::transport::{Transport, TransportError};

/// First probe size. Headers are at least 100 bytes and rarely above 175.
pub const INITIAL_PROBE: usize = 100;

/// Size of the next probe once `found` delimiters have been seen.
///
/// Every field still missing is at least one character plus its delimiter,
/// so asking for twice the number of missing delimiters never reads past the
/// last one.
pub fn next_probe_size(found: usize) -> usize {
    let remaining = HEADER_FIELDS.saturating_sub(found);
    if remaining <= 1 {
        remaining
    } else {
        remaining * 2
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HeaderReadError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Response ended after {found} of 16 header delimiters")]
    MissingDelimiters { found: usize },
}

/// Header bytes up to and including the last delimiter, plus whatever the
/// final probe pulled in beyond it.
#[derive(Debug)]
pub struct CompletedHeader {
    pub header: Vec<u8>,
    pub surplus: ReadAccumulator,
}

/// Accumulates a header whose length is only known by its delimiter count.
#[derive(Debug)]
pub struct HeaderReader {
    acc: ReadAccumulator,
    found: usize,
    probe: usize,
    header_end: Option<usize>,
}

impl Default for HeaderReader {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaderReader {
    pub fn new() -> Self {
        Self {
            acc: ReadAccumulator::new(),
            found: 0,
            probe: INITIAL_PROBE,
            header_end: None,
        }
    }

    pub fn delimiters_found(&self) -> usize {
        self.found
    }

    pub fn bytes_read(&self) -> usize {
        self.acc.cursor()
    }

    /// Read probes until the sixteenth delimiter shows up.
    ///
    /// Returns `Pending` only when the transport has nothing yet; the bytes
    /// and delimiter count gathered so far are kept for the next call. A
    /// probe answered with fewer bytes than requested is fatal.
    pub fn poll<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
    ) -> Result<ReadPoll<CompletedHeader>, HeaderReadError> {
        while self.found < HEADER_FIELDS {
            log::debug!("Searching header delimiters, {} found so far", self.found);

            let requested = self.probe;
            let start = self.acc.cursor();
            self.acc.set_target(start + requested);

            let received = match transport.read_data(self.acc.spare(requested)) {
                Err(TransportError::WouldBlock) => return Ok(ReadPoll::Pending),
                result => result?,
            };
            if received == 0 {
                return Err(HeaderReadError::MissingDelimiters { found: self.found });
            }
            if received < requested {
                log::error!(
                    "Read error while reading data header: {} of {} bytes",
                    received,
                    requested
                );
                return Err(TransportError::ShortRead {
                    requested,
                    received,
                }
                .into());
            }
            self.acc.advance(received);

            for (offset, &byte) in self.acc.filled()[start..].iter().enumerate() {
                if byte == FIELD_DELIMITER {
                    self.found += 1;
                    if self.found == HEADER_FIELDS {
                        self.header_end = Some(start + offset + 1);
                        break;
                    }
                }
            }
            self.probe = next_probe_size(self.found);
        }

        let end = self.header_end.unwrap_or_else(|| self.acc.cursor());
        let mut header = std::mem::take(&mut self.acc);
        let surplus = header.split_off(end);
        log::debug!(
            "Header complete: {} bytes, {} bytes past it",
            end,
            surplus.cursor()
        );

        Ok(ReadPoll::Ready(CompletedHeader {
            header: header.into_bytes(),
            surplus,
        }))
    }
}
