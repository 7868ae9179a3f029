//! Classification of inbound CAN sub-frames.
//!
//! The gateway forwards every frame it sees on the bus. Most are status
//! broadcasts (`d0 == 0xFE`) reporting the current state of one device;
//! [`classify`] turns those into [`Reading`]s for the state store and
//! labels everything else so the IO task can log it.

use crate::can::CanFrame;

/// `d0` of status broadcasts.
pub const D0_STATUS: u8 = 0xFE;
/// `d0` of frames sent by client applications.
pub const D0_CLIENT_APP: u8 = 0x10;
/// `d0` of debug frames.
pub const D0_DEBUG: u8 = 0x11;

/// Status report types carried in `d1`.
pub mod status_type {
    /// Integer temperatures.
    pub const TEMP: u8 = 0x05;
    /// Float temperatures, sensors 1-3.
    pub const TEMP_F_1_3: u8 = 0x06;
    /// Float temperatures, sensors 4-6.
    pub const TEMP_F_4_6: u8 = 0x07;
    /// Byte values, channels 1-6.
    pub const BYTE_1_6: u8 = 0x0C;
    /// Byte values, channels 7-12.
    pub const BYTE_7_12: u8 = 0x0D;
    /// Byte values, channels 13-18.
    pub const BYTE_13_18: u8 = 0x0E;
    /// Input and output bitmaps.
    pub const BINARY: u8 = 0x0F;
    /// Date and time broadcast.
    pub const DATE_TIME: u8 = 0x10;
    /// NTP synchronisation report.
    pub const NTP: u8 = 0x11;
    /// Radio module report.
    pub const RADIO: u8 = 0x2A;
}

/// A device state report extracted from a status broadcast.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    /// Input and output bitmaps, 24 bits each.
    Binary { inputs: u32, outputs: u32 },

    /// Six byte values starting at 1-based channel `offset`.
    Bytes { offset: usize, values: [u8; 6] },

    /// Three float temperatures starting at 1-based sensor `offset`.
    FloatTemperatures {
        offset: usize,
        values: [Option<f32>; 3],
    },

    /// Integer temperatures. Decoded for logging only.
    Temperatures(Vec<i16>),
}

/// Status broadcasts that carry no channel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusInfo {
    DateTime,
    Ntp,
    Radio,
    /// A status type this driver does not interpret.
    Unimplemented(u8),
}

/// What an inbound sub-frame is.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    /// A device state report.
    Reading(Reading),
    /// A status broadcast with no channel state.
    Status(StatusInfo),
    /// A frame sent by another client application.
    ClientApp,
    /// A debug frame.
    Debug,
    /// Any other `d0`.
    Unknown(u8),
}

/// Classify one sub-frame.
///
/// # Example
///
/// ```
/// use ampio_ip::can::CanFrame;
/// use ampio_ip::decoder::{classify, Classification, Reading};
///
/// let frame = CanFrame::new(0x1305, 8, &[0xFE, 0x0F, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00]);
/// assert_eq!(
///     classify(&frame),
///     Classification::Reading(Reading::Binary { inputs: 5, outputs: 0 })
/// );
/// ```
pub fn classify(frame: &CanFrame) -> Classification {
    match frame.d0() {
        D0_STATUS => classify_status(frame),
        D0_CLIENT_APP => Classification::ClientApp,
        D0_DEBUG => Classification::Debug,
        other => Classification::Unknown(other),
    }
}

fn classify_status(frame: &CanFrame) -> Classification {
    use status_type::*;

    let reading = match frame.status_type() {
        BINARY => Reading::Binary {
            inputs: frame.inputs(),
            outputs: frame.outputs(),
        },
        BYTE_1_6 => bytes_at(frame, 1),
        BYTE_7_12 => bytes_at(frame, 7),
        BYTE_13_18 => bytes_at(frame, 13),
        TEMP_F_1_3 => float_temps_at(frame, 1),
        TEMP_F_4_6 => float_temps_at(frame, 4),
        TEMP => Reading::Temperatures(frame.temperatures()),
        DATE_TIME => return Classification::Status(StatusInfo::DateTime),
        NTP => return Classification::Status(StatusInfo::Ntp),
        RADIO => return Classification::Status(StatusInfo::Radio),
        other => return Classification::Status(StatusInfo::Unimplemented(other)),
    };
    Classification::Reading(reading)
}

fn bytes_at(frame: &CanFrame, offset: usize) -> Reading {
    Reading::Bytes {
        offset,
        values: frame.byte_values(),
    }
}

fn float_temps_at(frame: &CanFrame, offset: usize) -> Reading {
    Reading::FloatTemperatures {
        offset,
        values: frame.float_temperatures(),
    }
}
