//! Raw digitizer codes to physical values.
//!
//! Two strategies exist. [`CalibrationStrategy::Preamble`] uses the scale and
//! offsets the instrument sent with the curve:
//!
//! ```text
//! value = (code - YOFF) * YMULT + YZERO
//! ```
//!
//! [`CalibrationStrategy::VerticalScale`] ignores the preamble and derives
//! volts from the channel's volts/div setting, assuming 8 codes per division:
//!
//! ```text
//! value = (code / 8) * volts_per_div - vertical_offset
//! ```

use crate::block_reader::RawBlock;
use crate::channel::ChannelDescriptor;
use crate::preamble::{DecodeReport, HeaderField, WavePreamble, YUnit};

const CODES_PER_DIVISION: f64 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CalibrationStrategy {
    #[default]
    Preamble,
    VerticalScale,
}

/// Calibrated samples plus the unit and display precision that go with them.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibrated {
    pub samples: Vec<f32>,
    pub unit: YUnit,
    pub digits: i32,
    pub strategy: CalibrationStrategy,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Calibrator {
    strategy: CalibrationStrategy,
}

impl Calibrator {
    pub fn new(strategy: CalibrationStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> CalibrationStrategy {
        self.strategy
    }

    /// Calibrate one block.
    ///
    /// Preamble calibration needs a usable `YMULT`; when that field failed to
    /// decode the vertical-scale strategy is used instead.
    pub fn calibrate(
        &self,
        block: RawBlock,
        preamble: &WavePreamble,
        report: &DecodeReport,
        channel: &ChannelDescriptor,
    ) -> Calibrated {
        let strategy = match self.strategy {
            CalibrationStrategy::Preamble if report.has_error(HeaderField::YMultiplier) => {
                log::warn!(
                    "{}: no usable YMULT in preamble, falling back to volts/div calibration",
                    channel.name()
                );
                CalibrationStrategy::VerticalScale
            }
            strategy => strategy,
        };

        let (samples, unit) = match strategy {
            CalibrationStrategy::Preamble => (calibrate_with_preamble(block, preamble), preamble.y_unit),
            CalibrationStrategy::VerticalScale => (calibrate_with_vertical_scale(block, channel), YUnit::Volts),
        };

        Calibrated {
            samples,
            unit,
            digits: precision_digits(channel.vertical_scale),
            strategy,
        }
    }
}

pub fn calibrate_with_preamble(block: RawBlock, preamble: &WavePreamble) -> Vec<f32> {
    block
        .codes()
        .map(|code| ((f64::from(code) - preamble.y_offset) * preamble.y_multiplier + preamble.y_zero) as f32)
        .collect()
}

pub fn calibrate_with_vertical_scale(block: RawBlock, channel: &ChannelDescriptor) -> Vec<f32> {
    block
        .codes()
        .map(|code| {
            (f64::from(code) / CODES_PER_DIVISION * channel.vertical_scale - channel.vertical_offset) as f32
        })
        .collect()
}

/// Number of decimal digits worth displaying for a given volts/div.
pub fn precision_digits(vertical_scale: f64) -> i32 {
    if !(vertical_scale.is_finite() && vertical_scale > 0.0) {
        return 0;
    }
    let exponent = vertical_scale.log10();
    -(exponent.trunc() as i32) + i32::from(exponent < 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preamble::XUnit;
    use proptest::prelude::*;

    fn preamble(y_multiplier: f64, y_zero: f64, y_offset: f64) -> WavePreamble {
        WavePreamble {
            point_count: 2500,
            x_increment: 4.0e-7,
            x_zero: 0.0,
            x_unit: XUnit::Seconds,
            y_multiplier,
            y_zero,
            y_offset,
            y_unit: YUnit::Volts,
        }
    }

    #[test]
    fn test_preamble_calibration() {
        let block = RawBlock::new(vec![127, 0, 0x80]);
        let values = calibrate_with_preamble(block, &preamble(3.9e-3, 0.0, 0.0));
        assert!((values[0] - 0.4953).abs() < 1e-4);
        assert!(values[1].abs() < f32::EPSILON);
        assert!((values[2] + 0.4992).abs() < 1e-4);
    }

    #[test]
    fn test_preamble_offsets() {
        let block = RawBlock::new(vec![10]);
        let values = calibrate_with_preamble(block, &preamble(0.5, 1.0, -2.0));
        assert!((values[0] - 7.0).abs() < 1e-6);
    }

    #[test]
    fn test_vertical_scale_calibration() {
        let channel = ChannelDescriptor::new(0).vertical_scale(2.0).vertical_offset(0.5);
        let values = calibrate_with_vertical_scale(RawBlock::new(vec![16, 0xf8]), &channel);
        assert!((values[0] - 3.5).abs() < 1e-6);
        assert!((values[1] + 2.5).abs() < 1e-6);
    }

    #[test]
    fn test_falls_back_without_multiplier() {
        let mut report = DecodeReport::default();
        report.errors.push(crate::preamble::FieldDecodeError {
            field: HeaderField::YMultiplier,
            token: "?".to_string(),
        });
        let channel = ChannelDescriptor::new(1).vertical_scale(1.0);
        let calibrated = Calibrator::default().calibrate(
            RawBlock::new(vec![8]),
            &preamble(0.0, 0.0, 0.0),
            &report,
            &channel,
        );
        assert_eq!(calibrated.strategy, CalibrationStrategy::VerticalScale);
        assert_eq!(calibrated.unit, YUnit::Volts);
        assert!((calibrated.samples[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_precision_digits() {
        assert_eq!(precision_digits(5.0), 0);
        assert_eq!(precision_digits(1.0), 0);
        assert_eq!(precision_digits(10.0), -1);
        assert_eq!(precision_digits(0.5), 1);
        assert_eq!(precision_digits(0.05), 2);
        assert_eq!(precision_digits(0.002), 3);
        assert_eq!(precision_digits(0.0), 0);
    }

    proptest! {
        #[test]
        fn prop_preamble_calibration_is_affine(
            raw in proptest::collection::vec(any::<u8>(), 1..64),
            y_multiplier in -1.0e2f64..1.0e2,
            y_zero in -10.0f64..10.0,
            y_offset in -128.0f64..128.0,
        ) {
            let pre = preamble(y_multiplier, y_zero, y_offset);
            let values = calibrate_with_preamble(RawBlock::new(raw.clone()), &pre);
            prop_assert_eq!(values.len(), raw.len());
            for (value, byte) in values.iter().zip(&raw) {
                let code = f64::from(i8::from_ne_bytes([*byte]));
                let expected = (code - y_offset) * y_multiplier + y_zero;
                prop_assert!((f64::from(*value) - expected).abs() <= 1e-3 * expected.abs().max(1.0));
            }
        }
    }
}
