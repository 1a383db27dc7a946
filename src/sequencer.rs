//! Capture sequencing: channel selection, frame boundaries and capture modes.
//!
//! The sequencer is driven from the outside. [`CaptureSequencer::start`]
//! issues the commands for the first channel and every later step happens in
//! [`CaptureSequencer::on_readable`], called whenever the transport signals
//! that response bytes may be available. Each call reads as far as the
//! transport allows and returns; partial headers and blocks are kept for the
//! next call.
//!
//! ```text
//! Idle -> FrameBegin -> ChannelSelecting -> AwaitingHeader -> AwaitingBlock
//!      -> ChannelDone -> ChannelSelecting | FrameDone
//!      -> FrameBegin | SequenceDone
//! ```

use crate::accumulator::ReadPoll;
use crate::block_reader::{BlockError, BlockReader, RawBlock, BLOCK_SIZE};
use crate::calibration::{CalibrationStrategy, Calibrator};
use crate::channel::ChannelDescriptor;
use crate::commands::{RunState, ScopeCommand};
use crate::header_reader::{HeaderReadError, HeaderReader};
use crate::preamble::{parse_header, HeaderError, ParsedHeader};
use crate::transport::{Transport, TransportError};
use crate::waveform::ChannelWaveform;
use std::time::Duration;

/// Delay between issuing a waveform query and the first read attempt.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_micros(6250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    /// Re-arm the trigger for every frame, leave the instrument free-running
    /// afterwards.
    #[default]
    Live,
    /// Acquire and leave the instrument halted on the last acquisition.
    SingleShot,
    /// Read what the instrument currently shows.
    DisplaySnapshot,
}

impl CaptureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureMode::Live => "live",
            CaptureMode::SingleShot => "single-shot",
            CaptureMode::DisplaySnapshot => "display",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionConfig {
    /// Frames to capture. 0 keeps capturing until stopped.
    pub limit_frames: u64,
    pub mode: CaptureMode,
    /// Curve length in bytes, fixed by the record length.
    pub block_size: usize,
    pub settle_delay: Duration,
    pub calibration: CalibrationStrategy,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            limit_frames: 1,
            mode: CaptureMode::default(),
            block_size: BLOCK_SIZE,
            settle_delay: DEFAULT_SETTLE_DELAY,
            calibration: CalibrationStrategy::default(),
        }
    }
}

impl AcquisitionConfig {
    pub fn limit_frames(mut self, limit_frames: u64) -> Self {
        self.limit_frames = limit_frames;
        self
    }

    pub fn mode(mut self, mode: CaptureMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    pub fn calibration(mut self, calibration: CalibrationStrategy) -> Self {
        self.calibration = calibration;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SequencerState {
    #[default]
    Idle,
    FrameBegin,
    ChannelSelecting,
    AwaitingHeader,
    AwaitingBlock,
    ChannelDone,
    FrameDone,
    SequenceDone,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AcquisitionEvent {
    FrameBegin { frame: u64 },
    Waveform(ChannelWaveform),
    FrameEnd { frame: u64 },
    SequenceEnd,
}

/// Receiver of everything a capture produces.
pub trait DataSink {
    fn accept(&mut self, event: AcquisitionEvent);
}

impl DataSink for Vec<AcquisitionEvent> {
    fn accept(&mut self, event: AcquisitionEvent) {
        self.push(event);
    }
}

/// Adapts a closure into a [`DataSink`].
pub struct FnSink<F>(pub F);

impl<F: FnMut(AcquisitionEvent)> DataSink for FnSink<F> {
    fn accept(&mut self, event: AcquisitionEvent) {
        (self.0)(event);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("Failed reading waveform header: {0}")]
    HeaderRead(#[from] HeaderReadError),

    #[error("Malformed waveform header: {0}")]
    Header(#[from] HeaderError),

    #[error("Failed reading waveform block: {0}")]
    Block(#[from] BlockError),

    #[error("Read should have been completed")]
    ReadNotComplete,

    #[error("No enabled channels to capture")]
    NoEnabledChannels,

    #[error("Can't {action} while {state:?}")]
    InvalidState {
        action: &'static str,
        state: SequencerState,
    },
}

/// Bookkeeping for one capture, from start to sequence end.
#[derive(Debug, Clone)]
pub struct AcquisitionSession {
    channels: Vec<ChannelDescriptor>,
    cursor: usize,
    frames_captured: u64,
    limit_frames: u64,
    mode: CaptureMode,
    prior: RunState,
    forced_single: bool,
    frame_open: bool,
}

impl AcquisitionSession {
    fn new(channels: Vec<ChannelDescriptor>, config: &AcquisitionConfig) -> Self {
        Self {
            channels,
            cursor: 0,
            frames_captured: 0,
            limit_frames: config.limit_frames,
            mode: config.mode,
            prior: RunState::default(),
            forced_single: false,
            frame_open: false,
        }
    }

    /// Enabled channels in capture order.
    pub fn channels(&self) -> &[ChannelDescriptor] {
        &self.channels
    }

    pub fn current_channel(&self) -> Option<&ChannelDescriptor> {
        self.channels.get(self.cursor)
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured
    }

    pub fn limit_frames(&self) -> u64 {
        self.limit_frames
    }

    pub fn mode(&self) -> CaptureMode {
        self.mode
    }

    /// Acquisition state found on the instrument when the capture started.
    pub fn prior_state(&self) -> RunState {
        self.prior
    }

    /// Whether the capture switched the instrument to single-sequence mode.
    pub fn forced_single_sequence(&self) -> bool {
        self.forced_single
    }

    /// Multi-frame and triggered captures need one acquisition per frame.
    fn needs_trigger_sync(&self) -> bool {
        self.mode != CaptureMode::DisplaySnapshot || self.limit_frames != 1
    }

    fn limit_reached(&self) -> bool {
        self.limit_frames != 0 && self.frames_captured >= self.limit_frames
    }
}

#[derive(Debug)]
enum ReadStage {
    Settling,
    Header(HeaderReader),
    Block {
        reader: BlockReader,
        header: ParsedHeader,
    },
}

#[derive(Debug)]
pub struct CaptureSequencer {
    config: AcquisitionConfig,
    calibrator: Calibrator,
    session: AcquisitionSession,
    state: SequencerState,
    read: Option<ReadStage>,
}

impl CaptureSequencer {
    pub fn new(
        channels: &[ChannelDescriptor],
        config: AcquisitionConfig,
    ) -> Result<Self, AcquisitionError> {
        let enabled: Vec<ChannelDescriptor> =
            channels.iter().filter(|ch| ch.enabled).cloned().collect();
        if enabled.is_empty() {
            return Err(AcquisitionError::NoEnabledChannels);
        }
        Ok(Self {
            calibrator: Calibrator::new(config.calibration),
            session: AcquisitionSession::new(enabled, &config),
            config,
            state: SequencerState::Idle,
            read: None,
        })
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn session(&self) -> &AcquisitionSession {
        &self.session
    }

    pub fn config(&self) -> &AcquisitionConfig {
        &self.config
    }

    pub fn is_done(&self) -> bool {
        self.state == SequencerState::SequenceDone
    }

    /// Prepare the instrument, open the first frame and query the first
    /// channel.
    pub fn start<T, S>(&mut self, transport: &mut T, sink: &mut S) -> Result<(), AcquisitionError>
    where
        T: Transport + ?Sized,
        S: DataSink + ?Sized,
    {
        if self.state != SequencerState::Idle {
            return Err(AcquisitionError::InvalidState {
                action: "start a capture",
                state: self.state,
            });
        }
        log::info!(
            "Starting {} capture of {} channel(s), frame limit {}",
            self.session.mode.as_str(),
            self.session.channels.len(),
            self.session.limit_frames
        );

        if let Err(e) = self.prepare_instrument(transport) {
            return Err(self.abort_with(e, transport, sink));
        }
        self.begin_frame(transport, sink)
            .map_err(|e| self.abort_with(e, transport, sink))
    }

    /// Advance as far as the available response bytes allow.
    ///
    /// Returns the state the sequencer is left in. Any error has already
    /// closed the open frame and ended the sequence by the time it is
    /// returned.
    pub fn on_readable<T, S>(
        &mut self,
        transport: &mut T,
        sink: &mut S,
    ) -> Result<SequencerState, AcquisitionError>
    where
        T: Transport + ?Sized,
        S: DataSink + ?Sized,
    {
        #[cfg(feature = "cpu-profiling")]
        let _zone = tracy_client::Client::running()
            .map(|client| client.span(tracy_client::span_location!("on_readable"), 0));

        match self.state {
            SequencerState::AwaitingHeader | SequencerState::AwaitingBlock => {}
            SequencerState::SequenceDone => return Ok(self.state),
            state => {
                return Err(AcquisitionError::InvalidState {
                    action: "handle readable data",
                    state,
                })
            }
        }

        let span = tracing::debug_span!(
            "channel_read",
            channel = self.session.cursor,
            frame = self.session.frames_captured
        );
        let _enter = span.enter();

        match self.advance(transport, sink) {
            Ok(()) => Ok(self.state),
            Err(e) => Err(self.abort_with(e, transport, sink)),
        }
    }

    /// Stop a running capture: close the open frame, put the instrument back
    /// the way it was found and end the sequence.
    pub fn stop<T, S>(&mut self, transport: &mut T, sink: &mut S)
    where
        T: Transport + ?Sized,
        S: DataSink + ?Sized,
    {
        if self.state == SequencerState::SequenceDone {
            return;
        }
        log::info!("Stopping capture after {} frame(s)", self.session.frames_captured);
        self.wind_down(transport, sink);
    }

    fn prepare_instrument<T>(&mut self, transport: &mut T) -> Result<(), AcquisitionError>
    where
        T: Transport + ?Sized,
    {
        let state = transport.query(&ScopeCommand::QueryRunState.to_string())?;
        let stop_after = transport.query(&ScopeCommand::QueryStopAfter.to_string())?;
        self.session.prior = RunState::parse(&state, &stop_after);
        log::debug!(
            "Instrument state before capture: running={}, single_sequence={}",
            self.session.prior.running,
            self.session.prior.single_sequence
        );

        send(transport, ScopeCommand::BinaryEncoding)?;
        send(transport, ScopeCommand::ByteWidth)?;

        if self.session.needs_trigger_sync() {
            if self.session.prior.single_sequence {
                log::debug!("Already in single-sequence mode");
            } else {
                // Set before stopping so a failure past this point still restores.
                self.session.forced_single = true;
                if self.session.prior.running {
                    send(transport, ScopeCommand::Stop)?;
                }
                send(transport, ScopeCommand::SingleSequence)?;
            }
        }
        Ok(())
    }

    fn begin_frame<T, S>(&mut self, transport: &mut T, sink: &mut S) -> Result<(), AcquisitionError>
    where
        T: Transport + ?Sized,
        S: DataSink + ?Sized,
    {
        self.state = SequencerState::FrameBegin;
        self.session.cursor = 0;
        let frame = self.session.frames_captured;
        log::debug!("Frame {} begins", frame);
        sink.accept(AcquisitionEvent::FrameBegin { frame });
        self.session.frame_open = true;

        if self.session.needs_trigger_sync() {
            send(transport, ScopeCommand::Run)?;
        }
        self.select_channel(transport)
    }

    fn select_channel<T>(&mut self, transport: &mut T) -> Result<(), AcquisitionError>
    where
        T: Transport + ?Sized,
    {
        self.state = SequencerState::ChannelSelecting;
        let index = match self.session.current_channel() {
            Some(channel) => channel.index,
            None => {
                return Err(AcquisitionError::InvalidState {
                    action: "select a channel",
                    state: self.state,
                })
            }
        };
        log::debug!("Start reading data from channel CH{}", index + 1);

        send(transport, ScopeCommand::SelectSource(index))?;
        // Without trigger sync the first query reads back what is on screen.
        let showing_display = self.session.mode == CaptureMode::DisplaySnapshot
            && !self.session.needs_trigger_sync()
            && self.session.frames_captured == 0
            && self.session.cursor == 0;
        if !showing_display {
            send(transport, ScopeCommand::Wait)?;
        }
        send(transport, ScopeCommand::QueryWaveform)?;

        self.read = Some(ReadStage::Settling);
        self.state = SequencerState::AwaitingHeader;
        Ok(())
    }

    fn advance<T, S>(&mut self, transport: &mut T, sink: &mut S) -> Result<(), AcquisitionError>
    where
        T: Transport + ?Sized,
        S: DataSink + ?Sized,
    {
        loop {
            match self.read.take() {
                Some(ReadStage::Settling) => {
                    if !self.config.settle_delay.is_zero() {
                        std::thread::sleep(self.config.settle_delay);
                    }
                    transport.read_begin()?;
                    self.read = Some(ReadStage::Header(HeaderReader::new()));
                }
                Some(ReadStage::Header(mut reader)) => match reader.poll(transport)? {
                    ReadPoll::Pending => {
                        self.read = Some(ReadStage::Header(reader));
                        return Ok(());
                    }
                    ReadPoll::Ready(completed) => {
                        let header = parse_header(&completed.header)?;
                        if header.preamble.point_count != self.config.block_size {
                            log::warn!(
                                "Preamble announces {} points, reading {} byte block",
                                header.preamble.point_count,
                                self.config.block_size
                            );
                        }
                        self.state = SequencerState::AwaitingBlock;
                        self.read = Some(ReadStage::Block {
                            reader: BlockReader::with_surplus(completed.surplus, self.config.block_size),
                            header,
                        });
                    }
                },
                Some(ReadStage::Block { mut reader, header }) => match reader.poll(transport)? {
                    ReadPoll::Pending => {
                        self.read = Some(ReadStage::Block { reader, header });
                        return Ok(());
                    }
                    ReadPoll::Ready(block) => {
                        if !transport.read_complete() {
                            log::error!("Read should have been completed");
                            return Err(AcquisitionError::ReadNotComplete);
                        }
                        self.state = SequencerState::ChannelDone;
                        self.emit_waveform(block, header, sink)?;
                        return self.next_channel(transport, sink);
                    }
                },
                None => {
                    return Err(AcquisitionError::InvalidState {
                        action: "read without a pending query",
                        state: self.state,
                    })
                }
            }
        }
    }

    fn emit_waveform<S>(
        &mut self,
        block: RawBlock,
        header: ParsedHeader,
        sink: &mut S,
    ) -> Result<(), AcquisitionError>
    where
        S: DataSink + ?Sized,
    {
        let channel = match self.session.current_channel() {
            Some(channel) => channel,
            None => {
                return Err(AcquisitionError::InvalidState {
                    action: "calibrate",
                    state: self.state,
                })
            }
        };
        let calibrated = self
            .calibrator
            .calibrate(block, &header.preamble, &header.report, channel);
        log::debug!(
            "{}: {} samples in {}",
            channel.name(),
            calibrated.samples.len(),
            calibrated.unit.symbol()
        );
        sink.accept(AcquisitionEvent::Waveform(ChannelWaveform {
            channel: channel.index,
            frame: self.session.frames_captured,
            samples: calibrated.samples,
            unit: calibrated.unit,
            digits: calibrated.digits,
            x_increment: header.preamble.x_increment,
            x_zero: header.preamble.x_zero,
            x_unit: header.preamble.x_unit,
            decode_report: header.report,
        }));
        Ok(())
    }

    fn next_channel<T, S>(&mut self, transport: &mut T, sink: &mut S) -> Result<(), AcquisitionError>
    where
        T: Transport + ?Sized,
        S: DataSink + ?Sized,
    {
        self.session.cursor += 1;
        if self.session.cursor < self.session.channels.len() {
            log::debug!("Doing another channel");
            return self.select_channel(transport);
        }

        self.state = SequencerState::FrameDone;
        let frame = self.session.frames_captured;
        sink.accept(AcquisitionEvent::FrameEnd { frame });
        self.session.frame_open = false;
        self.session.frames_captured += 1;

        if self.session.limit_reached() {
            self.finish(transport, sink)
        } else {
            log::debug!("Doing another frame");
            self.begin_frame(transport, sink)
        }
    }

    fn finish<T, S>(&mut self, transport: &mut T, sink: &mut S) -> Result<(), AcquisitionError>
    where
        T: Transport + ?Sized,
        S: DataSink + ?Sized,
    {
        match self.session.mode {
            CaptureMode::Live | CaptureMode::DisplaySnapshot => {
                send(transport, ScopeCommand::FreeRun)?;
                send(transport, ScopeCommand::Run)?;
            }
            CaptureMode::SingleShot => log::debug!("Leaving instrument halted"),
        }
        log::info!("Capture complete, {} frame(s)", self.session.frames_captured);
        self.end_sequence(sink);
        Ok(())
    }

    fn abort_with<T, S>(
        &mut self,
        error: AcquisitionError,
        transport: &mut T,
        sink: &mut S,
    ) -> AcquisitionError
    where
        T: Transport + ?Sized,
        S: DataSink + ?Sized,
    {
        log::error!("Aborting capture: {}", error);
        self.wind_down(transport, sink);
        error
    }

    fn wind_down<T, S>(&mut self, transport: &mut T, sink: &mut S)
    where
        T: Transport + ?Sized,
        S: DataSink + ?Sized,
    {
        self.read = None;
        if self.session.frame_open {
            sink.accept(AcquisitionEvent::FrameEnd {
                frame: self.session.frames_captured,
            });
            self.session.frame_open = false;
        }

        if self.session.forced_single {
            if let Err(e) = self.restore_prior(transport) {
                log::warn!("Could not restore acquisition state: {}", e);
            }
        }
        self.end_sequence(sink);
    }

    fn restore_prior<T>(&mut self, transport: &mut T) -> Result<(), TransportError>
    where
        T: Transport + ?Sized,
    {
        send(transport, ScopeCommand::FreeRun)?;
        if self.session.prior.running {
            send(transport, ScopeCommand::Run)?;
        }
        Ok(())
    }

    fn end_sequence<S>(&mut self, sink: &mut S)
    where
        S: DataSink + ?Sized,
    {
        self.state = SequencerState::SequenceDone;
        sink.accept(AcquisitionEvent::SequenceEnd);
    }
}

fn send<T: Transport + ?Sized>(transport: &mut T, command: ScopeCommand) -> Result<(), TransportError> {
    log::trace!("Sending {}", command);
    transport.send(&command.to_string())
}
