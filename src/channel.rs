/// Analog input as seen by the acquisition engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelDescriptor {
    /// Zero-based; `CH1` is index 0.
    pub index: usize,
    pub enabled: bool,
    /// Volts per division.
    pub vertical_scale: f64,
    /// Vertical position, in the units the instrument reports it.
    pub vertical_offset: f64,
    pub attenuation: f64,
}

impl ChannelDescriptor {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            enabled: true,
            vertical_scale: 1.0,
            vertical_offset: 0.0,
            attenuation: 1.0,
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn vertical_scale(mut self, volts_per_div: f64) -> Self {
        self.vertical_scale = volts_per_div;
        self
    }

    pub fn vertical_offset(mut self, offset: f64) -> Self {
        self.vertical_offset = offset;
        self
    }

    pub fn attenuation(mut self, attenuation: f64) -> Self {
        self.attenuation = attenuation;
        self
    }

    /// Instrument-facing name, e.g. `CH1`.
    pub fn name(&self) -> String {
        format!("CH{}", self.index + 1)
    }
}
