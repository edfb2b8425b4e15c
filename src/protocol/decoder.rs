// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/emberwatch

//! Stateless decoder for the field-unit wire protocol
//!
//! Field units speak a line-oriented TCP protocol with four variants:
//!
//! - *separate*: tagged lines - `ID,<serial>,<loc_id>`, `TH,<hex>`,
//!   `SN,<adc1>,<adc2>,<flame>`
//! - *embedded*: any of the above prefixed with `<loc_id>|`
//! - *continuous*: an untagged line of exactly 3072 hex characters
//!   (one full thermal frame, no separators)
//! - *no_loc*: the separate variant without an `ID` line; the caller
//!   falls back to the peer address as the identity key
//!
//! The decoder is total: malformed input always yields a [`ParseError`],
//! never a panic, and one call never consumes more than one packet line.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Thermal frame width in cells
pub const THERMAL_COLS: usize = 32;
/// Thermal frame height in cells
pub const THERMAL_ROWS: usize = 24;
/// Total cells per thermal frame
pub const THERMAL_CELLS: usize = THERMAL_COLS * THERMAL_ROWS;

/// Hex characters per 16-bit cell
const HEX_PER_CELL: usize = 4;

/// Wire format variant detected for a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketFormat {
    /// Tagged lines, identity sent as its own `ID` line
    Separate,
    /// Location id carried as a `<loc_id>|` prefix on each line
    Embedded,
    /// Untagged 3072-char hex thermal frame
    Continuous,
    /// No identity on the wire; peer address is the identity key
    NoLoc,
}

/// Thermal cell interpretation: signedness plus linear calibration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThermalCalibration {
    /// Interpret raw 16-bit cells as two's-complement
    pub signed: bool,
    /// Multiplier applied to the raw value
    pub scale: f64,
    /// Offset added after scaling, in degrees C
    pub offset: f64,
}

impl Default for ThermalCalibration {
    fn default() -> Self {
        // MLX90640-style centidegree encoding
        Self {
            signed: true,
            scale: 0.01,
            offset: 0.0,
        }
    }
}

/// One decoded 32x24 thermal frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThermalFrame {
    /// Raw 16-bit cell values as received, row-major
    pub raw: Vec<u16>,
    /// Calibrated temperatures in degrees C, row-major
    pub celsius: Vec<f64>,
}

impl ThermalFrame {
    /// Calibrated temperature at (row, col), if in range
    pub fn cell(&self, row: usize, col: usize) -> Option<f64> {
        if row >= THERMAL_ROWS || col >= THERMAL_COLS {
            return None;
        }
        self.celsius.get(row * THERMAL_COLS + col).copied()
    }

    /// Hottest cell in the frame
    pub fn max_celsius(&self) -> f64 {
        self.celsius.iter().copied().fold(f64::MIN, f64::max)
    }
}

/// One decoded gas/smoke/flame sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    /// Gas channel ADC counts
    pub adc1: u32,
    /// Smoke channel ADC counts
    pub adc2: u32,
    /// Flame detector tripped
    pub flame: bool,
    /// Receive timestamp
    pub timestamp: DateTime<Utc>,
}

/// A typed record produced by the decoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DecodedRecord {
    /// Unit identity announcement
    Identity {
        /// Field-unit serial number
        serial: String,
        /// Location the unit reports for
        loc_id: String,
    },
    /// Full thermal frame
    Thermal(ThermalFrame),
    /// Gas/smoke/flame sample
    Sample(SensorSample),
}

/// Decode output: the record plus where it came from on the wire
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    /// Detected wire variant
    pub format: PacketFormat,
    /// Location id carried in the packet itself (embedded variant)
    pub loc_id: Option<String>,
    /// The decoded record
    pub record: DecodedRecord,
}

/// Decode failure; always recoverable at the connection level
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    /// Empty line
    #[error("empty packet")]
    Empty,
    /// Line matched no known variant
    #[error("unrecognized packet format")]
    UnknownFormat,
    /// Wrong field count in a tagged record
    #[error("expected {expected} fields, got {actual}")]
    FieldCount {
        /// Fields the record type requires
        expected: usize,
        /// Fields actually present
        actual: usize,
    },
    /// Thermal frame with the wrong cell count
    #[error("thermal frame has {actual} cells, expected {expected}")]
    FrameLength {
        /// Cells a frame must carry
        expected: usize,
        /// Cells the hex body encodes
        actual: usize,
    },
    /// Non-hex character inside a thermal frame body
    #[error("invalid hex digit at offset {offset}")]
    InvalidHex {
        /// Byte offset within the hex body
        offset: usize,
    },
    /// A field failed numeric/boolean parsing
    #[error("invalid value for {field}: {value:?}")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// Offending text
        value: String,
    },
}

/// Stateless packet decoder
///
/// Holds only the thermal calibration; every call is independent.
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    calibration: ThermalCalibration,
}

impl Decoder {
    /// Decoder with the given thermal calibration
    pub fn new(calibration: ThermalCalibration) -> Self {
        Self { calibration }
    }

    /// Decode one packet line, auto-detecting the wire variant
    pub fn decode(&self, packet: &[u8]) -> Result<Decoded, ParseError> {
        let line = std::str::from_utf8(packet)
            .map_err(|_| ParseError::UnknownFormat)?
            .trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return Err(ParseError::Empty);
        }

        // Embedded variant: location prefix before the first '|'
        if let Some((prefix, body)) = line.split_once('|') {
            if prefix.is_empty() {
                return Err(ParseError::InvalidField {
                    field: "loc_id",
                    value: String::new(),
                });
            }
            let record = self.decode_body(body)?;
            return Ok(Decoded {
                format: PacketFormat::Embedded,
                loc_id: Some(prefix.to_string()),
                record,
            });
        }

        // Continuous variant: one untagged run of hex, exactly one frame
        if !line.contains(',') {
            if !line.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(ParseError::UnknownFormat);
            }
            let frame = self.decode_thermal_hex(line)?;
            return Ok(Decoded {
                format: PacketFormat::Continuous,
                loc_id: None,
                record: DecodedRecord::Thermal(frame),
            });
        }

        let record = self.decode_body(line)?;
        Ok(Decoded {
            format: PacketFormat::Separate,
            loc_id: None,
            record,
        })
    }

    /// Decode a tagged record body (shared by separate and embedded)
    fn decode_body(&self, body: &str) -> Result<DecodedRecord, ParseError> {
        let (tag, rest) = body.split_once(',').ok_or(ParseError::UnknownFormat)?;
        match tag {
            "ID" => {
                let fields: Vec<&str> = rest.split(',').collect();
                if fields.len() != 2 {
                    return Err(ParseError::FieldCount {
                        expected: 2,
                        actual: fields.len(),
                    });
                }
                if fields[0].is_empty() {
                    return Err(ParseError::InvalidField {
                        field: "serial",
                        value: String::new(),
                    });
                }
                if fields[1].is_empty() {
                    return Err(ParseError::InvalidField {
                        field: "loc_id",
                        value: String::new(),
                    });
                }
                Ok(DecodedRecord::Identity {
                    serial: fields[0].to_string(),
                    loc_id: fields[1].to_string(),
                })
            }
            "TH" => Ok(DecodedRecord::Thermal(self.decode_thermal_hex(rest)?)),
            "SN" => Ok(DecodedRecord::Sample(Self::decode_sample(rest)?)),
            _ => Err(ParseError::UnknownFormat),
        }
    }

    /// Decode a 3072-char hex body into a calibrated frame
    fn decode_thermal_hex(&self, hex: &str) -> Result<ThermalFrame, ParseError> {
        if hex.len() % HEX_PER_CELL != 0 || hex.len() / HEX_PER_CELL != THERMAL_CELLS {
            // Round up so a trailing partial cell is counted
            let actual = (hex.len() + HEX_PER_CELL - 1) / HEX_PER_CELL;
            return Err(ParseError::FrameLength {
                expected: THERMAL_CELLS,
                actual,
            });
        }

        let bytes = hex.as_bytes();
        let mut raw = Vec::with_capacity(THERMAL_CELLS);
        let mut celsius = Vec::with_capacity(THERMAL_CELLS);
        for cell in 0..THERMAL_CELLS {
            let start = cell * HEX_PER_CELL;
            let mut value: u16 = 0;
            for (i, &b) in bytes[start..start + HEX_PER_CELL].iter().enumerate() {
                let digit = (b as char)
                    .to_digit(16)
                    .ok_or(ParseError::InvalidHex { offset: start + i })?;
                value = (value << 4) | digit as u16;
            }
            raw.push(value);
            celsius.push(self.calibrate(value));
        }

        Ok(ThermalFrame { raw, celsius })
    }

    /// Apply signedness and linear calibration to one raw cell
    fn calibrate(&self, raw: u16) -> f64 {
        let value = if self.calibration.signed {
            raw as i16 as f64
        } else {
            raw as f64
        };
        value * self.calibration.scale + self.calibration.offset
    }

    /// Decode the 3-field sensor CSV
    fn decode_sample(rest: &str) -> Result<SensorSample, ParseError> {
        let fields: Vec<&str> = rest.split(',').collect();
        if fields.len() != 3 {
            return Err(ParseError::FieldCount {
                expected: 3,
                actual: fields.len(),
            });
        }
        let adc1 = fields[0].parse::<u32>().map_err(|_| ParseError::InvalidField {
            field: "adc1",
            value: fields[0].to_string(),
        })?;
        let adc2 = fields[1].parse::<u32>().map_err(|_| ParseError::InvalidField {
            field: "adc2",
            value: fields[1].to_string(),
        })?;
        let flame = match fields[2] {
            "1" | "true" => true,
            "0" | "false" => false,
            other => {
                return Err(ParseError::InvalidField {
                    field: "flame",
                    value: other.to_string(),
                })
            }
        };
        Ok(SensorSample {
            adc1,
            adc2,
            flame,
            timestamp: Utc::now(),
        })
    }

    /// Encode an identity line (separate variant)
    pub fn encode_identity(serial: &str, loc_id: &str) -> String {
        format!("ID,{},{}", serial, loc_id)
    }

    /// Encode a thermal frame as a tagged line, exact to the raw cells
    pub fn encode_thermal(frame: &ThermalFrame) -> String {
        let mut out = String::with_capacity(3 + frame.raw.len() * HEX_PER_CELL);
        out.push_str("TH,");
        for &cell in &frame.raw {
            out.push_str(&format!("{:04X}", cell));
        }
        out
    }

    /// Encode a thermal frame as an untagged continuous line
    pub fn encode_thermal_continuous(frame: &ThermalFrame) -> String {
        let mut out = String::with_capacity(frame.raw.len() * HEX_PER_CELL);
        for &cell in &frame.raw {
            out.push_str(&format!("{:04X}", cell));
        }
        out
    }

    /// Encode a sensor sample line
    pub fn encode_sample(sample: &SensorSample) -> String {
        format!(
            "SN,{},{},{}",
            sample.adc1,
            sample.adc2,
            if sample.flame { 1 } else { 0 }
        )
    }

    /// Wrap any encoded body in the embedded-variant location prefix
    pub fn encode_embedded(loc_id: &str, body: &str) -> String {
        format!("{}|{}", loc_id, body)
    }
}
