//! Wire protocol - packet formats, decoder, and encoders

mod decoder;

pub use decoder::{
    Decoded, DecodedRecord, Decoder, PacketFormat, ParseError, SensorSample, ThermalCalibration,
    ThermalFrame, THERMAL_CELLS, THERMAL_COLS, THERMAL_ROWS,
};
