//! # TekScope RS
//!
//! Streaming waveform acquisition for Tektronix TDS2000B-class oscilloscopes.
//!
//! The instrument answers a `WAVF?` query with a 16-field preamble followed by
//! a binary curve block. This library reads both incrementally as response
//! bytes arrive, turns raw digitizer codes into calibrated values and drives
//! multi-channel, multi-frame capture sequences.
//!
//! ## Features
//!
//! - **Resumable reads**: header and block readers keep their progress across
//!   readiness notifications, so a capture never blocks waiting for bytes
//! - **Preamble decoding**: every header field is decoded with a documented
//!   default, and decode problems are reported instead of aborting
//! - **Capture modes**: live, single-shot and display-snapshot sequencing, with
//!   the instrument's trigger mode restored when the capture ends
//! - **Trigger configuration**: edge triggers built with builder patterns and
//!   validated before anything is sent
//! - **DataFrame output**: waveforms convert to `polars` frames
//! - **Hardware-free testing**: [`MockTransport`] scripts instrument replies
//!
//! ## Examples
//!
//! ### Capturing from a serial-attached instrument
//!
//! ```rust,no_run
//! use tekscope_rs::{
//!     AcquisitionConfig, AcquisitionEvent, CaptureMode, IdleTekScope, SerialConfig, SerialTransport,
//! };
//!
//! let transport = SerialTransport::open(&SerialConfig::new("/dev/ttyUSB0"))?;
//! let mut scope = IdleTekScope::new(transport);
//! scope.read_vertical_config()?;
//!
//! let config = AcquisitionConfig::default()
//!     .mode(CaptureMode::SingleShot)
//!     .limit_frames(3);
//! let mut events: Vec<AcquisitionEvent> = Vec::new();
//! let capture = scope.start_capture(config, &mut events).map_err(|(_, e)| e)?;
//! let _scope = capture.wait(&mut events).map_err(|(_, e)| e)?;
//! println!("Received {} events", events.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Edge Trigger
//!
//! ```rust
//! use tekscope_rs::trigger_config::{EdgeTrigger, TriggerConfig, TriggerSource};
//!
//! let trigger = EdgeTrigger::start_capturing_when(TriggerSource::Ch1)
//!     .falling_edge()
//!     .at_level(1.5)
//!     .into_trigger()
//!     .unwrap();
//!
//! let commands = trigger.into_trigger_commands();
//! assert_eq!(commands.commands()[2], "TRIG:MAI:LEV 1.500");
//! ```
//!
//! ### Scripted instrument
//!
//! ```rust
//! use tekscope_rs::{
//!     AcquisitionConfig, AcquisitionEvent, ChannelDescriptor, IdleTekScope, MockTransport,
//! };
//! use std::time::Duration;
//!
//! let header = "1;8;BIN;RI;MSB;64;\"CH1\";Y;4.0e-7;0;0.0;\"s\";3.9e-3;0.0;0.0;\"Volts\";";
//! let mut response = header.as_bytes().to_vec();
//! response.extend_from_slice(b"#264");
//! response.extend_from_slice(&[127; 64]);
//! response.push(b'\n');
//!
//! let mock = MockTransport::new()
//!     .respond("ACQ:STATE?", "0\n")
//!     .respond("ACQ:STOPA?", "SEQUENCE\n")
//!     .respond("WAVF?", response);
//! let scope = IdleTekScope::with_channels(mock, vec![ChannelDescriptor::new(0)]);
//!
//! let config = AcquisitionConfig::default()
//!     .block_size(64)
//!     .settle_delay(Duration::ZERO);
//! let mut events: Vec<AcquisitionEvent> = Vec::new();
//! let capture = scope.start_capture(config, &mut events).map_err(|(_, e)| e).unwrap();
//! capture.wait(&mut events).map_err(|(_, e)| e).unwrap();
//!
//! let AcquisitionEvent::Waveform(waveform) = &events[1] else {
//!     unreachable!()
//! };
//! assert!((waveform.samples[0] - 0.4953).abs() < 1e-4);
//! assert_eq!(events.last(), Some(&AcquisitionEvent::SequenceEnd));
//! ```

pub mod accumulator;
pub mod block_reader;
pub mod calibration;
pub mod channel;
pub mod commands;
pub mod header_reader;
pub mod mock_transport;
pub mod preamble;
pub mod sequencer;
pub mod tek_scope;
pub mod transport;
pub mod trigger_config;
pub mod waveform;

// Re-export the main types for convenience
pub use trigger_config::{
    EdgeTrigger, EdgeTriggerBuilder, TriggerConfigError, TriggerPosition, TriggerSlope,
    TriggerSource,
};

pub use transport::{SerialConfig, SerialTransport, Transport, TransportError};

pub use mock_transport::MockTransport;

pub use sequencer::{
    AcquisitionConfig, AcquisitionError, AcquisitionEvent, AcquisitionSession, CaptureMode,
    CaptureSequencer, DataSink, FnSink, SequencerState,
};

pub use tek_scope::{CapturingTekScope, IdleTekScope, TekScopeError};

pub use channel::ChannelDescriptor;
pub use calibration::CalibrationStrategy;
pub use preamble::{WavePreamble, XUnit, YUnit};
pub use waveform::ChannelWaveform;
