//! Scripted transport for exercising the acquisition engine without hardware.
//!
//! Responses are registered per command and queued into the inbound stream
//! when that command is sent. Read sizes can be capped to simulate a
//! fragmenting link, and readiness gaps can be injected to simulate
//! notifications that arrive before any data does.

use crate::transport::{Transport, TransportError};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Default)]
pub struct MockTransport {
    responses: HashMap<String, VecDeque<Vec<u8>>>,
    inbound: VecDeque<u8>,
    read_limit: Option<usize>,
    would_block: VecDeque<bool>,
    failing_command: Option<(String, usize)>,
    hold_transaction_open: bool,
    sent: Vec<String>,
    read_requests: Vec<usize>,
    read_begins: usize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `response` to be emitted the next time `command` is sent.
    /// Registering the same command again queues a further response.
    pub fn respond(mut self, command: &str, response: impl AsRef<[u8]>) -> Self {
        self.responses
            .entry(command.to_string())
            .or_default()
            .push_back(response.as_ref().to_vec());
        self
    }

    /// Cap every read at `limit` bytes.
    pub fn read_limit(mut self, limit: usize) -> Self {
        self.read_limit = Some(limit);
        self
    }

    /// For each upcoming read, `true` makes it report `WouldBlock` first.
    pub fn would_block_before_reads(mut self, pattern: impl IntoIterator<Item = bool>) -> Self {
        self.would_block.extend(pattern);
        self
    }

    /// Make sending `command` fail with a broken pipe.
    pub fn fail_on_send(self, command: &str) -> Self {
        self.fail_on_send_after(command, 0)
    }

    /// Let `command` go through `successes` times, then fail every send of it.
    pub fn fail_on_send_after(mut self, command: &str, successes: usize) -> Self {
        self.failing_command = Some((command.to_string(), successes));
        self
    }

    /// Never report the read transaction as complete.
    pub fn hold_transaction_open(mut self) -> Self {
        self.hold_transaction_open = true;
        self
    }

    /// Push bytes directly into the inbound stream.
    pub fn push_inbound(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes);
    }

    /// Every command sent so far, in order.
    pub fn sent(&self) -> Vec<String> {
        self.sent.clone()
    }

    /// Requested size of every read that reached the inbound stream.
    pub fn read_requests(&self) -> &[usize] {
        &self.read_requests
    }

    pub fn read_begins(&self) -> usize {
        self.read_begins
    }

    pub fn pending_bytes(&self) -> usize {
        self.inbound.len()
    }
}

impl Transport for MockTransport {
    fn send(&mut self, command: &str) -> Result<(), TransportError> {
        if let Some((failing, successes)) = self.failing_command.as_mut() {
            if failing.as_str() == command {
                if *successes == 0 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::BrokenPipe,
                        format!("mock failure sending '{command}'"),
                    )
                    .into());
                }
                *successes -= 1;
            }
        }
        self.sent.push(command.to_string());
        if let Some(response) = self
            .responses
            .get_mut(command)
            .and_then(VecDeque::pop_front)
        {
            self.inbound.extend(response);
        }
        Ok(())
    }

    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if self.would_block.pop_front().unwrap_or(false) {
            return Err(TransportError::WouldBlock);
        }
        self.read_requests.push(buf.len());

        let n = buf
            .len()
            .min(self.inbound.len())
            .min(self.read_limit.unwrap_or(usize::MAX));
        for (slot, byte) in buf.iter_mut().zip(self.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn read_begin(&mut self) -> Result<(), TransportError> {
        self.read_begins += 1;
        Ok(())
    }

    fn read_complete(&mut self) -> bool {
        !self.hold_transaction_open && self.inbound.is_empty()
    }
}
