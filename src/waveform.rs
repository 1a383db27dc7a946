use crate::preamble::{DecodeReport, Quantity, XUnit, YUnit};
use polars::prelude::*;

/// One calibrated channel capture.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelWaveform {
    /// Zero-based channel index.
    pub channel: usize,
    /// Zero-based frame the capture belongs to.
    pub frame: u64,
    pub samples: Vec<f32>,
    pub unit: YUnit,
    /// Suggested number of decimals when displaying samples.
    pub digits: i32,
    pub x_increment: f64,
    pub x_zero: f64,
    pub x_unit: XUnit,
    /// Header fields that fell back to their defaults for this read.
    pub decode_report: DecodeReport,
}

impl ChannelWaveform {
    pub fn quantity(&self) -> Quantity {
        self.unit.quantity()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Position of every sample along the x axis.
    pub fn x_values(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.samples.len()).map(|i| self.x_zero + i as f64 * self.x_increment)
    }

    /// Samples as a two-column frame: x axis (`time` or `frequency`) and the
    /// calibrated values named after their unit.
    pub fn to_lazy_frame(&self) -> Result<LazyFrame, PolarsError> {
        #[cfg(feature = "cpu-profiling")]
        let _zone = tracy_client::Client::running()
            .map(|client| client.span(tracy_client::span_location!("to_lazy_frame"), 0));

        let x_name = match self.x_unit {
            XUnit::Seconds => "time",
            XUnit::Hertz => "frequency",
        };
        let x: Vec<f64> = self.x_values().collect();

        let df = DataFrame::new(vec![
            Series::new(x_name.into(), x).into(),
            Series::new(self.unit.symbol().into(), self.samples.as_slice()).into(),
        ])?;
        Ok(df.lazy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waveform() -> ChannelWaveform {
        ChannelWaveform {
            channel: 0,
            frame: 0,
            samples: vec![0.0, 0.5, 1.0, 0.5],
            unit: YUnit::Volts,
            digits: 1,
            x_increment: 1.0e-3,
            x_zero: -2.0e-3,
            x_unit: XUnit::Seconds,
            decode_report: DecodeReport::default(),
        }
    }

    #[test]
    fn test_x_values() {
        let x: Vec<f64> = waveform().x_values().collect();
        assert_eq!(x.len(), 4);
        assert!((x[0] + 2.0e-3).abs() < 1e-12);
        assert!((x[3] - 1.0e-3).abs() < 1e-12);
    }

    #[test]
    fn test_lazy_frame_columns() {
        let df = waveform().to_lazy_frame().unwrap().collect().unwrap();
        assert_eq!(df.height(), 4);
        assert_eq!(df.width(), 2);
        let max = df
            .column("V")
            .unwrap()
            .f32()
            .unwrap()
            .into_no_null_iter()
            .fold(f32::NEG_INFINITY, f32::max);
        assert!((max - 1.0).abs() < f32::EPSILON);
        assert!(df.column("time").is_ok());
    }
}
