use crate::channel::ChannelDescriptor;
use crate::commands::ScopeCommand;
use crate::sequencer::{
    AcquisitionConfig, AcquisitionError, CaptureSequencer, DataSink, SequencerState,
};
use crate::transport::{Transport, TransportError};
use crate::trigger_config::{TriggerConfig, TriggerConfigError, TriggerPosition};

/// Analog inputs on a TDS2000B-class instrument.
pub const ANALOG_CHANNELS: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum TekScopeError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    TriggerConfig(#[from] TriggerConfigError),

    #[error("Unexpected response '{response}' to '{command}'")]
    UnexpectedResponse { command: String, response: String },

    #[error("No channel CH{0}")]
    NoSuchChannel(usize),
}

/// Instrument handle with no capture in flight.
pub struct IdleTekScope<T: Transport> {
    transport: T,
    channels: Vec<ChannelDescriptor>,
}

impl<T: Transport> IdleTekScope<T> {
    /// Wrap a connected transport. All analog channels start enabled with
    /// unit scale until [`read_vertical_config`](Self::read_vertical_config)
    /// is called.
    pub fn new(transport: T) -> Self {
        Self::with_channels(
            transport,
            (0..ANALOG_CHANNELS).map(ChannelDescriptor::new).collect(),
        )
    }

    pub fn with_channels(transport: T, channels: Vec<ChannelDescriptor>) -> Self {
        Self {
            transport,
            channels,
        }
    }

    pub fn channels(&self) -> &[ChannelDescriptor] {
        &self.channels
    }

    pub fn set_channel_enabled(&mut self, index: usize, enabled: bool) -> Result<(), TekScopeError> {
        let channel = self
            .channels
            .iter_mut()
            .find(|ch| ch.index == index)
            .ok_or(TekScopeError::NoSuchChannel(index + 1))?;
        channel.enabled = enabled;
        Ok(())
    }

    /// Show exactly the enabled channels on the instrument.
    pub fn apply_channel_selection(&mut self) -> Result<(), TekScopeError> {
        for channel in &self.channels {
            self.transport
                .send(&ScopeCommand::ShowChannel(channel.index, channel.enabled).to_string())?;
        }
        Ok(())
    }

    /// Refresh volts/div, vertical position and probe attenuation of every
    /// channel from the instrument.
    pub fn read_vertical_config(&mut self) -> Result<(), TekScopeError> {
        for i in 0..self.channels.len() {
            let index = self.channels[i].index;
            let scale = query_float(&mut self.transport, ScopeCommand::QueryVerticalScale(index))?;
            let position = query_float(&mut self.transport, ScopeCommand::QueryVerticalPosition(index))?;
            let attenuation = query_float(&mut self.transport, ScopeCommand::QueryProbe(index))?;
            log::debug!(
                "CH{}: {} V/div, position {}, probe x{}",
                index + 1,
                scale,
                position,
                attenuation
            );

            let channel = &mut self.channels[i];
            channel.vertical_scale = scale;
            channel.vertical_offset = position;
            channel.attenuation = attenuation;
        }
        Ok(())
    }

    /// Record length in points, which is also the curve length in bytes at
    /// one byte per point.
    pub fn read_record_length(&mut self) -> Result<usize, TekScopeError> {
        let command = ScopeCommand::QueryRecordLength;
        let value = query_float(&mut self.transport, command)?;
        if value < 1.0 || value.fract() != 0.0 {
            return Err(TekScopeError::UnexpectedResponse {
                command: command.to_string(),
                response: value.to_string(),
            });
        }
        Ok(value as usize)
    }

    /// Current horizontal trigger position as a fraction of the record.
    pub fn read_trigger_position(&mut self) -> Result<TriggerPosition, TekScopeError> {
        let timebase = query_float(&mut self.transport, ScopeCommand::QueryTimebase)?;
        let seconds = query_float(&mut self.transport, ScopeCommand::QueryHorizontalPosition)?;
        let position = TriggerPosition::from_seconds(seconds, timebase)?;
        log::debug!(
            "Trigger at {:.3} of the record ({} s/div, offset {} s)",
            position.fraction(),
            timebase,
            seconds
        );
        Ok(position)
    }

    /// Validate and send a trigger configuration. Nothing is sent if the
    /// configuration is rejected.
    pub fn apply_trigger<C: TriggerConfig>(&mut self, trigger: C) -> Result<(), TekScopeError> {
        for command in trigger.into_trigger_commands().into_commands() {
            log::debug!("Trigger: {}", command);
            self.transport.send(&command)?;
        }
        Ok(())
    }

    /// Start a capture of the enabled channels.
    ///
    /// On failure the idle handle is handed back. If the first frame was
    /// already opened, the sink has seen it closed and the sequence ended.
    pub fn start_capture<S: DataSink + ?Sized>(
        mut self,
        config: AcquisitionConfig,
        sink: &mut S,
    ) -> Result<CapturingTekScope<T>, (IdleTekScope<T>, AcquisitionError)> {
        let mut sequencer = match CaptureSequencer::new(&self.channels, config) {
            Ok(sequencer) => sequencer,
            Err(e) => return Err((self, e)),
        };
        match sequencer.start(&mut self.transport, sink) {
            Ok(()) => Ok(CapturingTekScope {
                transport: self.transport,
                channels: self.channels,
                sequencer,
            }),
            Err(e) => Err((self, e)),
        }
    }

    pub fn transport(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }
}

/// Instrument handle while a capture sequence runs.
pub struct CapturingTekScope<T: Transport> {
    transport: T,
    channels: Vec<ChannelDescriptor>,
    sequencer: CaptureSequencer,
}

impl<T: Transport> CapturingTekScope<T> {
    /// Handle one readiness notification.
    pub fn poll<S: DataSink + ?Sized>(
        &mut self,
        sink: &mut S,
    ) -> Result<SequencerState, AcquisitionError> {
        self.sequencer.on_readable(&mut self.transport, sink)
    }

    pub fn sequencer(&self) -> &CaptureSequencer {
        &self.sequencer
    }

    pub fn is_done(&self) -> bool {
        self.sequencer.is_done()
    }

    /// Hand back the idle handle once the sequence has ended.
    pub fn try_get_result(self) -> Result<IdleTekScope<T>, CapturingTekScope<T>> {
        if self.is_done() {
            Ok(self.into_idle())
        } else {
            Err(self)
        }
    }

    /// Poll until the sequence ends.
    pub fn wait<S: DataSink + ?Sized>(
        mut self,
        sink: &mut S,
    ) -> Result<IdleTekScope<T>, (IdleTekScope<T>, AcquisitionError)> {
        while !self.is_done() {
            if let Err(e) = self.poll(sink) {
                return Err((self.into_idle(), e));
            }
        }
        Ok(self.into_idle())
    }

    /// Stop the capture, closing the open frame and restoring the
    /// acquisition mode found at start.
    pub fn abort<S: DataSink + ?Sized>(mut self, sink: &mut S) -> IdleTekScope<T> {
        self.sequencer.stop(&mut self.transport, sink);
        self.into_idle()
    }

    fn into_idle(self) -> IdleTekScope<T> {
        IdleTekScope {
            transport: self.transport,
            channels: self.channels,
        }
    }
}

fn query_float<T: Transport + ?Sized>(
    transport: &mut T,
    command: ScopeCommand,
) -> Result<f64, TekScopeError> {
    let command = command.to_string();
    let response = transport.query(&command)?;
    // Tolerate a verbose "CH1:SCALE 1.0E0" style reply.
    let value = response
        .split_whitespace()
        .last()
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite());
    value.ok_or(TekScopeError::UnexpectedResponse { command, response })
}
