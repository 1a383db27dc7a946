/// Horizontal divisions across the screen.
const NUM_HDIV: f64 = 10.0;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TriggerConfigError {
    #[error("Can't set a trigger level on the AC line source")]
    LevelOnAcLine,

    #[error("Trigger level {0} is not a finite voltage")]
    InvalidLevel(f64),

    #[error("Horizontal trigger position {0} outside 0.0..=1.0")]
    PositionOutOfRange(f64),

    #[error("Timebase {0} s/div is not usable")]
    InvalidTimebase(f64),
}

pub trait TriggerConfig {
    fn into_trigger_commands(self) -> StringifiedTriggerConfig;
}

/// Ready-to-send trigger commands, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringifiedTriggerConfig {
    commands: Vec<String>,
}

impl StringifiedTriggerConfig {
    pub fn into_commands(self) -> Vec<String> {
        self.commands
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Ch1,
    Ch2,
    Ch3,
    Ch4,
    Ext,
    ExtDiv5,
    ExtDiv10,
    AcLine,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ch1 => "CH1",
            Self::Ch2 => "CH2",
            Self::Ch3 => "CH3",
            Self::Ch4 => "CH4",
            Self::Ext => "EXT",
            Self::ExtDiv5 => "EXT5",
            Self::ExtDiv10 => "EXT10",
            Self::AcLine => "LINE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSlope {
    Rising,
    Falling,
}

impl TriggerSlope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rising => "RISE",
            Self::Falling => "FALL",
        }
    }
}

#[derive(Debug)]
pub struct EdgeTriggerBuilder {
    source: TriggerSource,
    slope: TriggerSlope,
    level: Option<f64>,
}

impl EdgeTriggerBuilder {
    pub fn rising_edge(mut self) -> Self {
        self.slope = TriggerSlope::Rising;
        self
    }

    pub fn falling_edge(mut self) -> Self {
        self.slope = TriggerSlope::Falling;
        self
    }

    /// Trigger level in volts. Leave unset to keep the instrument's level.
    pub fn at_level(mut self, volts: f64) -> Self {
        self.level = Some(volts);
        self
    }

    pub fn into_trigger(self) -> Result<EdgeTrigger, TriggerConfigError> {
        if let Some(level) = self.level {
            if self.source == TriggerSource::AcLine {
                return Err(TriggerConfigError::LevelOnAcLine);
            }
            if !level.is_finite() {
                return Err(TriggerConfigError::InvalidLevel(level));
            }
        }
        Ok(EdgeTrigger {
            source: self.source,
            slope: self.slope,
            level: self.level,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeTrigger {
    pub source: TriggerSource,
    pub slope: TriggerSlope,
    pub level: Option<f64>,
}

impl EdgeTrigger {
    pub fn start_capturing_when(source: TriggerSource) -> EdgeTriggerBuilder {
        EdgeTriggerBuilder {
            source,
            slope: TriggerSlope::Rising,
            level: None,
        }
    }
}

impl TriggerConfig for EdgeTrigger {
    fn into_trigger_commands(self) -> StringifiedTriggerConfig {
        let mut commands = vec![
            format!("TRIG:MAI:EDGE:SOU {}", self.source.as_str()),
            format!("TRIG:MAI:EDGE:SLO {}", self.slope.as_str()),
        ];
        if let Some(level) = self.level {
            commands.push(format!("TRIG:MAI:LEV {level:.3}"));
        }
        StringifiedTriggerConfig { commands }
    }
}

/// Where the trigger sits on screen, as a fraction of the record (0.5 is
/// centred).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerPosition {
    fraction: f64,
    timebase: f64,
}

impl TriggerPosition {
    pub fn new(fraction: f64, timebase: f64) -> Result<Self, TriggerConfigError> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(TriggerConfigError::PositionOutOfRange(fraction));
        }
        if !(timebase.is_finite() && timebase > 0.0) {
            return Err(TriggerConfigError::InvalidTimebase(timebase));
        }
        Ok(Self { fraction, timebase })
    }

    /// Position from an offset read back from the instrument.
    pub fn from_seconds(seconds: f64, timebase: f64) -> Result<Self, TriggerConfigError> {
        if !(timebase.is_finite() && timebase > 0.0) {
            return Err(TriggerConfigError::InvalidTimebase(timebase));
        }
        Self::new(Self::fraction_from_seconds(seconds, timebase), timebase)
    }

    pub fn fraction(&self) -> f64 {
        self.fraction
    }

    pub fn timebase(&self) -> f64 {
        self.timebase
    }

    /// Offset of the trigger from the screen centre in seconds.
    pub fn seconds(&self) -> f64 {
        -(self.fraction - 0.5) * self.timebase * NUM_HDIV
    }

    /// Inverse of [`seconds`](Self::seconds).
    pub fn fraction_from_seconds(seconds: f64, timebase: f64) -> f64 {
        -seconds / (timebase * NUM_HDIV) + 0.5
    }
}

impl TriggerConfig for TriggerPosition {
    fn into_trigger_commands(self) -> StringifiedTriggerConfig {
        StringifiedTriggerConfig {
            commands: vec![format!("HOR:MAI:POS {:.3e}", self.seconds())],
        }
    }
}
