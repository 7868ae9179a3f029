//! 13-byte CAN sub-frames carried inside type-0 transport frames.
//!
//! # Layout
//!
//! ```text
//! <mac:u32 LE> <length> <d0> <d1> <d2> <d3> <d4> <d5> <d6> <d7>
//! ```
//!
//! For status broadcasts `d0` is `0xFE` and `d1` selects the report type.
//! Outbound commands to devices carry the target MAC big-endian in
//! `d0..d3` (the "mac2" field).

use std::fmt;

use ampio_core::{format_bytes, format_mac};

/// Size of one CAN sub-frame.
pub const SUBFRAME_LEN: usize = 13;

/// Offset of `d0` within a sub-frame.
const DATA_OFFSET: usize = 5;

/// Mask applied to input/output bitmaps.
pub const BITMAP_MASK: u32 = 0x00FF_FFFF;

/// Raw offset of float temperature readings, in tenths of a degree.
const TEMP_F_OFFSET: i32 = 1000;

/// Offset of integer temperature readings, in degrees.
const TEMP_OFFSET: i16 = 100;

/// One CAN sub-frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CanFrame([u8; SUBFRAME_LEN]);

impl CanFrame {
    /// Wrap raw sub-frame bytes.
    pub fn from_bytes(bytes: [u8; SUBFRAME_LEN]) -> Self {
        Self(bytes)
    }

    /// Wrap a slice, which must be exactly [`SUBFRAME_LEN`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    /// Build a sub-frame from its fields. `data` beyond eight bytes is
    /// ignored; missing bytes are zero.
    pub fn new(mac: u32, length: u8, data: &[u8]) -> Self {
        let mut frame = Self::default();
        frame.set_mac(mac);
        frame.set_length(length);
        for (i, &b) in data.iter().take(8).enumerate() {
            frame.set_data(i, b);
        }
        frame
    }

    pub fn as_bytes(&self) -> &[u8; SUBFRAME_LEN] {
        &self.0
    }

    /// Sending device MAC (little-endian, bytes 0..4).
    pub fn mac(&self) -> u32 {
        u32::from_le_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    pub fn set_mac(&mut self, mac: u32) {
        self.0[..4].copy_from_slice(&mac.to_le_bytes());
    }

    pub fn length(&self) -> u8 {
        self.0[4]
    }

    pub fn set_length(&mut self, length: u8) {
        self.0[4] = length;
    }

    /// The eight data bytes `d0..d7`.
    pub fn data(&self) -> &[u8] {
        &self.0[DATA_OFFSET..]
    }

    /// Set data byte `d<index>`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is greater than 7.
    pub fn set_data(&mut self, index: usize, value: u8) {
        assert!(index < 8, "CAN data index {index} out of range");
        self.0[DATA_OFFSET + index] = value;
    }

    /// `d0`: message class (`0xFE` for status broadcasts).
    pub fn d0(&self) -> u8 {
        self.0[5]
    }

    /// `d1`: status report type.
    pub fn status_type(&self) -> u8 {
        self.0[6]
    }

    /// Target MAC for device-addressed frames (big-endian, `d0..d3`).
    pub fn mac2(&self) -> u32 {
        u32::from_be_bytes([self.0[5], self.0[6], self.0[7], self.0[8]])
    }

    pub fn set_mac2(&mut self, mac: u32) {
        self.0[5..9].copy_from_slice(&mac.to_be_bytes());
    }

    /// Input bitmap: `d4 << 16 | d3 << 8 | d2`.
    pub fn inputs(&self) -> u32 {
        u32::from_le_bytes([self.0[7], self.0[8], self.0[9], 0])
    }

    /// Output bitmap: `d7 << 16 | d6 << 8 | d5`.
    pub fn outputs(&self) -> u32 {
        u32::from_le_bytes([self.0[10], self.0[11], self.0[12], 0])
    }

    /// The six value bytes `d2..d7` of a byte report.
    pub fn byte_values(&self) -> [u8; 6] {
        let mut values = [0u8; 6];
        values.copy_from_slice(&self.0[7..13]);
        values
    }

    /// Integer temperatures: every non-zero byte of `d2..d7`, minus 100.
    pub fn temperatures(&self) -> Vec<i16> {
        self.0[7..13]
            .iter()
            .filter(|&&b| b != 0)
            .map(|&b| i16::from(b) - TEMP_OFFSET)
            .collect()
    }

    /// Float temperatures from the little-endian pairs `d2d3`, `d4d5`, `d6d7`.
    ///
    /// A zero pair means the sensor is absent; it keeps its position so
    /// slot numbering stays stable.
    pub fn float_temperatures(&self) -> [Option<f32>; 3] {
        let mut values = [None; 3];
        for (slot, pair) in self.0[7..13].chunks_exact(2).enumerate() {
            let raw = u16::from_le_bytes([pair[0], pair[1]]);
            if raw != 0 {
                values[slot] = Some((i32::from(raw) - TEMP_F_OFFSET) as f32 / 10.0);
            }
        }
        values
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[CAN] mac={} len={} data={}",
            format_mac(self.mac()),
            self.length(),
            format_bytes(self.data())
        )
    }
}

/// Split a type-0 transport payload into sub-frames.
///
/// A trailing fragment shorter than [`SUBFRAME_LEN`] is ignored.
pub fn subframes(payload: &[u8]) -> impl Iterator<Item = CanFrame> + '_ {
    payload
        .chunks_exact(SUBFRAME_LEN)
        .filter_map(CanFrame::from_slice)
}

/// Encode a sub-frame from its fields.
///
/// # Example
///
/// ```
/// use ampio_ip::can::encode_can_subframe;
///
/// let bytes = encode_can_subframe(0x1234, 8, &[0xFE, 0x0F]);
/// assert_eq!(bytes[..7], [0x34, 0x12, 0x00, 0x00, 0x08, 0xFE, 0x0F]);
/// assert_eq!(bytes[7..], [0; 6]);
/// ```
pub fn encode_can_subframe(mac: u32, length: u8, data: &[u8]) -> [u8; SUBFRAME_LEN] {
    *CanFrame::new(mac, length, data).as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(mac: u32, kind: u8, values: [u8; 6]) -> CanFrame {
        let mut data = vec![0xFE, kind];
        data.extend_from_slice(&values);
        CanFrame::new(mac, 8, &data)
    }

    #[test]
    fn field_accessors() {
        let frame = CanFrame::from_bytes([
            0x78, 0x56, 0x34, 0x12, 0x08, 0xFE, 0x0F, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06,
        ]);
        assert_eq!(frame.mac(), 0x1234_5678);
        assert_eq!(frame.length(), 8);
        assert_eq!(frame.d0(), 0xFE);
        assert_eq!(frame.status_type(), 0x0F);
        assert_eq!(frame.data(), &[0xFE, 0x0F, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06]);
        assert_eq!(frame.mac2(), 0xFE0F_0102);
    }

    #[test]
    fn binary_bitmaps() {
        let frame = status(0x10, 0x0F, [0x05, 0x00, 0x80, 0x01, 0x02, 0x03]);
        assert_eq!(frame.inputs(), 0x80_0005);
        assert_eq!(frame.outputs(), 0x03_0201);
        assert!(frame.inputs() <= BITMAP_MASK);
    }

    #[test]
    fn byte_values_are_d2_to_d7() {
        let frame = status(0x10, 0x0C, [10, 20, 30, 40, 50, 60]);
        assert_eq!(frame.byte_values(), [10, 20, 30, 40, 50, 60]);
    }

    #[test]
    fn integer_temperatures_skip_zero() {
        let frame = status(0x10, 0x05, [121, 0, 100, 0, 0, 95]);
        assert_eq!(frame.temperatures(), vec![21, 0, -5]);
    }

    #[test]
    fn float_temperatures_decode_pairs() {
        // 1215 -> 21.5, absent, 995 -> -0.5
        let frame = status(0x10, 0x06, [0xBF, 0x04, 0x00, 0x00, 0xE3, 0x03]);
        let temps = frame.float_temperatures();
        assert_eq!(temps[0], Some(21.5));
        assert_eq!(temps[1], None);
        assert_eq!(temps[2], Some(-0.5));
    }

    #[test]
    fn set_mac2_is_big_endian() {
        let mut frame = CanFrame::default();
        frame.set_mac2(0x0000_1305);
        assert_eq!(&frame.data()[..4], &[0x00, 0x00, 0x13, 0x05]);
        assert_eq!(frame.mac2(), 0x1305);
    }

    #[test]
    fn subframes_ignore_trailing_fragment() {
        let mut payload = Vec::new();
        payload.extend_from_slice(status(1, 0x0F, [1; 6]).as_bytes());
        payload.extend_from_slice(status(2, 0x0F, [2; 6]).as_bytes());
        payload.extend_from_slice(&[0xAA; 5]);

        let frames: Vec<_> = subframes(&payload).collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].mac(), 1);
        assert_eq!(frames[1].mac(), 2);
    }

    #[test]
    fn new_truncates_long_data() {
        let frame = CanFrame::new(0, 8, &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(frame.data(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn display_shows_mac_and_data() {
        let frame = status(0x1305, 0x0F, [0; 6]);
        let text = frame.to_string();
        assert!(text.contains("1305"), "got: {text}");
        assert!(text.contains("len=8"), "got: {text}");
    }
}
