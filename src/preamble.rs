//! Waveform preamble schema and decoder.
//!
//! A `WAVF?` response opens with sixteen `;`-separated ASCII fields:
//!
//! ```text
//! BYT_Nr;BIT_Nr;ENCdg;BN_Fmt;BYT_Or;NR_Pt;WFID;PT_FMT;XINcr;PT_Off;XZERo;XUNit;YMUlt;YZEro;YOFf;YUNit;#<block>
//! ```
//!
//! Field decode problems never abort a read on their own: the field falls back
//! to a fixed default and the problem is recorded in a [`DecodeReport`]. Only
//! a wrong field count or a non-positive point count is fatal.

use std::fmt;

pub const HEADER_FIELDS: usize = 16;
pub const FIELD_DELIMITER: u8 = b';';

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HeaderError {
    #[error("Expected 16 header fields, found {found}")]
    FieldCount { found: usize },

    #[error("Invalid point count {0}")]
    InvalidPointCount(i64),
}

/// Enumerated header field with a fixed token table.
pub trait WireToken: Copy + PartialEq + Sized + 'static {
    const TOKENS: &'static [(Self, &'static str)];
    const DEFAULT: Self;

    fn from_token(token: &str) -> Option<Self> {
        Self::TOKENS
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(token))
            .map(|(value, _)| *value)
    }

    fn as_str(self) -> &'static str {
        Self::TOKENS
            .iter()
            .find(|(value, _)| *value == self)
            .map_or("NULL", |(_, name)| *name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataEncoding {
    Ascii,
    Binary,
}

impl WireToken for DataEncoding {
    const TOKENS: &'static [(Self, &'static str)] = &[(Self::Ascii, "ASC"), (Self::Binary, "BIN")];
    const DEFAULT: Self = Self::Ascii;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    /// `RI`
    SignedInteger,
    /// `RP`
    PositiveInteger,
}

impl WireToken for DataFormat {
    const TOKENS: &'static [(Self, &'static str)] =
        &[(Self::SignedInteger, "RI"), (Self::PositiveInteger, "RP")];
    const DEFAULT: Self = Self::SignedInteger;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LsbFirst,
    MsbFirst,
}

impl WireToken for ByteOrder {
    const TOKENS: &'static [(Self, &'static str)] = &[(Self::LsbFirst, "LSB"), (Self::MsbFirst, "MSB")];
    const DEFAULT: Self = Self::LsbFirst;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointFormat {
    /// Min/max pairs (peak detect).
    Envelope,
    /// One value per point.
    Y,
}

impl WireToken for PointFormat {
    const TOKENS: &'static [(Self, &'static str)] = &[(Self::Envelope, "ENV"), (Self::Y, "Y")];
    const DEFAULT: Self = Self::Y;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XUnit {
    Seconds,
    Hertz,
}

impl WireToken for XUnit {
    const TOKENS: &'static [(Self, &'static str)] = &[(Self::Seconds, "s"), (Self::Hertz, "Hz")];
    const DEFAULT: Self = Self::Seconds;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YUnit {
    Unknown,
    UnknownMasked,
    Volts,
    Decibels,
    Amps,
    VoltAmps,
    VoltVolts,
    AmpAmps,
}

impl WireToken for YUnit {
    const TOKENS: &'static [(Self, &'static str)] = &[
        (Self::Unknown, "U"),
        (Self::UnknownMasked, "?"),
        (Self::Volts, "Volts"),
        (Self::Decibels, "dB"),
        // select models only
        (Self::Amps, "A"),
        (Self::AmpAmps, "AA"),
        (Self::VoltAmps, "VA"),
        (Self::VoltVolts, "VV"),
    ];
    const DEFAULT: Self = Self::Unknown;
}

/// Physical quantity measured along the y axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Voltage,
    Current,
    Power,
    Dimensionless,
    Unknown,
}

impl YUnit {
    pub fn quantity(self) -> Quantity {
        match self {
            Self::Volts => Quantity::Voltage,
            Self::Amps => Quantity::Current,
            Self::VoltAmps => Quantity::Power,
            Self::Decibels | Self::VoltVolts | Self::AmpAmps => Quantity::Dimensionless,
            Self::Unknown | Self::UnknownMasked => Quantity::Unknown,
        }
    }

    /// Short unit symbol, also used as the value column name.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Volts => "V",
            Self::Amps => "A",
            Self::VoltAmps => "VA",
            Self::Decibels => "dB",
            Self::VoltVolts => "V/V",
            Self::AmpAmps => "A/A",
            Self::Unknown | Self::UnknownMasked => "value",
        }
    }
}

/// The sixteen preamble fields, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderField {
    ByteWidth,
    BitWidth,
    Encoding,
    Format,
    ByteOrder,
    PointCount,
    WaveformId,
    PointFormat,
    XIncrement,
    PointOffset,
    XZero,
    XUnit,
    YMultiplier,
    YZero,
    YOffset,
    YUnit,
}

impl fmt::Display for HeaderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ByteWidth => "BYT_NR",
            Self::BitWidth => "BIT_NR",
            Self::Encoding => "ENCDG",
            Self::Format => "BN_FMT",
            Self::ByteOrder => "BYT_OR",
            Self::PointCount => "NR_PT",
            Self::WaveformId => "WFID",
            Self::PointFormat => "PT_FMT",
            Self::XIncrement => "XINCR",
            Self::PointOffset => "PT_OFF",
            Self::XZero => "XZERO",
            Self::XUnit => "XUNIT",
            Self::YMultiplier => "YMULT",
            Self::YZero => "YZERO",
            Self::YOffset => "YOFF",
            Self::YUnit => "YUNIT",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecodeError {
    pub field: HeaderField,
    pub token: String,
}

/// Advisory decode problems collected while parsing one header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeReport {
    pub errors: Vec<FieldDecodeError>,
}

impl DecodeReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_error(&self, field: HeaderField) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    fn flag(&mut self, field: HeaderField, token: &str) {
        log::debug!("Could not decode {} from '{}'", field, token);
        self.errors.push(FieldDecodeError {
            field,
            token: token.to_string(),
        });
    }
}

/// Calibration record for one channel read.
#[derive(Debug, Clone, PartialEq)]
pub struct WavePreamble {
    pub point_count: usize,
    pub x_increment: f64,
    pub x_zero: f64,
    pub x_unit: XUnit,
    pub y_multiplier: f64,
    pub y_zero: f64,
    pub y_offset: f64,
    pub y_unit: YUnit,
}

/// Transfer-format fields that do not feed calibration.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferFormat {
    pub byte_width: i64,
    pub bit_width: i64,
    pub encoding: DataEncoding,
    pub format: DataFormat,
    pub byte_order: ByteOrder,
    pub waveform_id: String,
    pub point_format: PointFormat,
    pub point_offset: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedHeader {
    pub format: TransferFormat,
    pub preamble: WavePreamble,
    pub report: DecodeReport,
}

/// Parse the bytes in front of the block marker.
///
/// A single trailing delimiter is accepted and ignored.
pub fn parse_header(header: &[u8]) -> Result<ParsedHeader, HeaderError> {
    let text = String::from_utf8_lossy(header);
    let text = text
        .strip_suffix(FIELD_DELIMITER as char)
        .unwrap_or(&text);

    let fields: Vec<&str> = text.split(FIELD_DELIMITER as char).map(str::trim).collect();
    log::debug!("Header split into {} fields", fields.len());
    if fields.len() != HEADER_FIELDS {
        return Err(HeaderError::FieldCount {
            found: fields.len(),
        });
    }

    let mut report = DecodeReport::default();
    let mut decoder = FieldDecoder {
        fields: fields.into_iter(),
        report: &mut report,
    };

    let byte_width = decoder.int(HeaderField::ByteWidth, 1);
    let bit_width = decoder.int(HeaderField::BitWidth, 8);
    let encoding: DataEncoding = decoder.token(HeaderField::Encoding);
    let format: DataFormat = decoder.token(HeaderField::Format);
    let byte_order: ByteOrder = decoder.token(HeaderField::ByteOrder);
    let point_count = decoder.int(HeaderField::PointCount, -1);
    let waveform_id = decoder.string();
    let point_format: PointFormat = decoder.token(HeaderField::PointFormat);
    let x_increment = decoder.float(HeaderField::XIncrement, 1.0);
    let point_offset = decoder.int(HeaderField::PointOffset, 0);
    let x_zero = decoder.float(HeaderField::XZero, 0.0);
    let x_unit: XUnit = decoder.token(HeaderField::XUnit);
    let y_multiplier = decoder.float(HeaderField::YMultiplier, 0.0);
    let y_zero = decoder.float(HeaderField::YZero, 0.0);
    let y_offset = decoder.float(HeaderField::YOffset, 0.0);
    let y_unit: YUnit = decoder.token(HeaderField::YUnit);

    if point_count <= 0 {
        return Err(HeaderError::InvalidPointCount(point_count));
    }
    let point_count = usize::try_from(point_count).map_err(|_| HeaderError::InvalidPointCount(point_count))?;

    log::debug!(
        "Header parsed as: {};{};{};{};{};{};\"{}\";{};{:.2e};{};{:.2e};\"{}\";{:.2e};{:.2e};{:.2e};\"{}\" ({} advisory errors)",
        byte_width,
        bit_width,
        encoding.as_str(),
        format.as_str(),
        byte_order.as_str(),
        point_count,
        waveform_id,
        point_format.as_str(),
        x_increment,
        point_offset,
        x_zero,
        x_unit.as_str(),
        y_multiplier,
        y_zero,
        y_offset,
        y_unit.as_str(),
        report.errors.len()
    );
    if !report.is_clean() {
        log::warn!(
            "Header decoded with defaults for: {}",
            report
                .errors
                .iter()
                .map(|e| e.field.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    Ok(ParsedHeader {
        format: TransferFormat {
            byte_width,
            bit_width,
            encoding,
            format,
            byte_order,
            waveform_id,
            point_format,
            point_offset,
        },
        preamble: WavePreamble {
            point_count,
            x_increment,
            x_zero,
            x_unit,
            y_multiplier,
            y_zero,
            y_offset,
            y_unit,
        },
        report,
    })
}

struct FieldDecoder<'a, I> {
    fields: I,
    report: &'a mut DecodeReport,
}

impl<'a, I: Iterator<Item = &'a str>> FieldDecoder<'_, I> {
    fn next(&mut self) -> &'a str {
        // the field count was checked before decoding started
        self.fields.next().unwrap_or_default()
    }

    fn int(&mut self, field: HeaderField, default: i64) -> i64 {
        let token = self.next();
        match parse_rational(token) {
            Some((p, q)) if p % q == 0 => p / q,
            _ => {
                self.report.flag(field, token);
                default
            }
        }
    }

    fn float(&mut self, field: HeaderField, default: f64) -> f64 {
        let token = self.next();
        match token.parse::<f64>() {
            Ok(value) if value.is_finite() => value,
            _ => {
                self.report.flag(field, token);
                default
            }
        }
    }

    fn token<T: WireToken>(&mut self, field: HeaderField) -> T {
        let token = self.next();
        T::from_token(unquote(token)).unwrap_or_else(|| {
            self.report.flag(field, token);
            T::DEFAULT
        })
    }

    fn string(&mut self) -> String {
        unquote(self.next()).to_string()
    }
}

fn unquote(token: &str) -> &str {
    token
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(token)
}

/// Parse a decimal number with optional fraction and exponent as `p / q`.
pub fn parse_rational(token: &str) -> Option<(i64, i64)> {
    let token = token.trim();
    let (mantissa, exponent) = match token.find(['e', 'E']) {
        Some(at) => (&token[..at], token[at + 1..].parse::<i32>().ok()?),
        None => (token, 0),
    };

    let (negative, digits) = match mantissa.as_bytes().first()? {
        b'-' => (true, &mantissa[1..]),
        b'+' => (false, &mantissa[1..]),
        _ => (false, mantissa),
    };
    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let mut p: i64 = 0;
    for b in whole.bytes().chain(fraction.bytes()) {
        p = p.checked_mul(10)?.checked_add(i64::from(b - b'0'))?;
    }
    let scale = exponent - i32::try_from(fraction.len()).ok()?;
    let mut q: i64 = 1;
    if scale >= 0 {
        p = p.checked_mul(10i64.checked_pow(scale.unsigned_abs())?)?;
    } else {
        q = 10i64.checked_pow(scale.unsigned_abs())?;
    }

    Some((if negative { -p } else { p }, q))
}
