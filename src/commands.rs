//! Wire spellings of the commands the acquisition engine issues.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScopeCommand {
    /// Select channel `index` (zero-based) as the waveform source.
    SelectSource(usize),
    /// Query preamble and curve in one response.
    QueryWaveform,
    SingleSequence,
    FreeRun,
    Run,
    Stop,
    /// Hold further commands until pending operations complete.
    Wait,
    BinaryEncoding,
    ByteWidth,
    QueryRunState,
    QueryStopAfter,
    QueryVerticalScale(usize),
    QueryVerticalPosition(usize),
    QueryProbe(usize),
    QueryRecordLength,
    /// Horizontal scale in seconds per division.
    QueryTimebase,
    /// Trigger offset from the screen centre in seconds.
    QueryHorizontalPosition,
    /// Turn the display (and acquisition) of channel `index` on or off.
    ShowChannel(usize, bool),
}

impl fmt::Display for ScopeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelectSource(index) => write!(f, "DAT:SOU CH{}", index + 1),
            Self::QueryWaveform => f.write_str("WAVF?"),
            Self::SingleSequence => f.write_str("ACQ:STOPA SEQ"),
            Self::FreeRun => f.write_str("ACQ:STOPA RUNST"),
            Self::Run => f.write_str("ACQ:STATE RUN"),
            Self::Stop => f.write_str("ACQ:STATE STOP"),
            Self::Wait => f.write_str("*WAI"),
            // signed integer, most significant byte first
            Self::BinaryEncoding => f.write_str("DAT:ENC RIB"),
            Self::ByteWidth => f.write_str("DAT:WID 1"),
            Self::QueryRunState => f.write_str("ACQ:STATE?"),
            Self::QueryStopAfter => f.write_str("ACQ:STOPA?"),
            Self::QueryVerticalScale(index) => write!(f, "CH{}:SCA?", index + 1),
            Self::QueryVerticalPosition(index) => write!(f, "CH{}:POS?", index + 1),
            Self::QueryProbe(index) => write!(f, "CH{}:PROBE?", index + 1),
            Self::QueryRecordLength => f.write_str("HOR:RECO?"),
            Self::QueryTimebase => f.write_str("HOR:MAI:SCA?"),
            Self::QueryHorizontalPosition => f.write_str("HOR:MAI:POS?"),
            Self::ShowChannel(index, on) => {
                write!(f, "SEL:CH{} {}", index + 1, if *on { "ON" } else { "OFF" })
            }
        }
    }
}

/// Acquisition state reported by the instrument before a capture starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunState {
    pub running: bool,
    pub single_sequence: bool,
}

impl RunState {
    pub fn parse(state: &str, stop_after: &str) -> Self {
        let state = state.trim();
        let running = state == "1"
            || state.eq_ignore_ascii_case("RUN")
            || state.eq_ignore_ascii_case("ON");
        let single_sequence = stop_after
            .trim()
            .get(..3)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("SEQ"));
        Self {
            running,
            single_sequence,
        }
    }
}
