//! Last-known device state and change detection.
//!
//! The gateway repeats full status reports; listeners only want to hear
//! about what changed. [`StateStore`] keeps the last value of every
//! channel per `(mac, kind)` and turns each new report into the list of
//! channels whose value differs from the cached one.
//!
//! Bitmaps (inputs, outputs) are indexed by bit position starting at 0.
//! Arrays (bytes, float temperatures) are indexed from 1; channel `n`
//! lives in cache slot `n - 1`.

use std::collections::HashMap;

use ampio_core::{ChannelChange, ChannelValue, Error, ReadingKind, Result};

use crate::can::BITMAP_MASK;
use crate::decoder::Reading;

/// Per-device channel cache.
#[derive(Debug, Default)]
pub struct StateStore {
    bitmaps: HashMap<(u32, ReadingKind), u32>,
    arrays: HashMap<(u32, ReadingKind), Vec<Option<ChannelValue>>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a decoded reading from device `mac`, returning the changes.
    ///
    /// Integer temperature readings carry no channel state and yield no
    /// changes.
    pub fn apply(&mut self, mac: u32, reading: &Reading) -> Result<Vec<ChannelChange>> {
        match reading {
            Reading::Binary { inputs, outputs } => {
                let mut changes = self.update_bitmap(mac, ReadingKind::Input, *inputs)?;
                changes.extend(self.update_bitmap(mac, ReadingKind::Output, *outputs)?);
                Ok(changes)
            }
            Reading::Bytes { offset, values } => {
                let values: Vec<_> = values.iter().map(|&b| Some(ChannelValue::Byte(b))).collect();
                self.update_channels(mac, ReadingKind::Byte, *offset, &values)
            }
            Reading::FloatTemperatures { offset, values } => {
                let values: Vec<_> = values
                    .iter()
                    .map(|t| t.map(ChannelValue::Temperature))
                    .collect();
                self.update_channels(mac, ReadingKind::TempF, *offset, &values)
            }
            Reading::Temperatures(_) => Ok(Vec::new()),
        }
    }

    /// Store a new bitmap and report every bit that flipped, in ascending
    /// bit order.
    ///
    /// With no cached bitmap every one of the 24 bits is reported.
    pub fn update_bitmap(
        &mut self,
        mac: u32,
        kind: ReadingKind,
        value: u32,
    ) -> Result<Vec<ChannelChange>> {
        if !kind.is_bitmap() {
            return Err(Error::InvalidParameter(format!(
                "{kind} readings are not a bitmap"
            )));
        }

        let value = value & BITMAP_MASK;
        let flipped = match self.bitmaps.insert((mac, kind), value) {
            Some(previous) => previous ^ value,
            None => BITMAP_MASK,
        };

        let mut changes = Vec::with_capacity(flipped.count_ones() as usize);
        let mut remaining = flipped;
        while remaining != 0 {
            let bit = remaining.trailing_zeros();
            remaining &= remaining - 1;
            changes.push(ChannelChange {
                mac,
                channel: bit as u8,
                kind,
                value: ChannelValue::Bit(value & (1 << bit) != 0),
            });
        }
        Ok(changes)
    }

    /// Store consecutive channel values starting at 1-based `offset` and
    /// report the ones that differ from the cache.
    ///
    /// `None` entries are absent sensors: the cache slot is left alone and
    /// nothing is reported. The whole update is rejected with
    /// [`Error::ChannelOutOfRange`] before touching the cache if any
    /// channel falls outside the kind's range.
    pub fn update_channels(
        &mut self,
        mac: u32,
        kind: ReadingKind,
        offset: usize,
        values: &[Option<ChannelValue>],
    ) -> Result<Vec<ChannelChange>> {
        if kind.is_bitmap() {
            return Err(Error::InvalidParameter(format!(
                "{kind} readings are a bitmap"
            )));
        }

        let count = kind.channel_count();
        if offset == 0 {
            return Err(Error::ChannelOutOfRange { kind, channel: 0 });
        }
        let last = offset + values.len().saturating_sub(1);
        if last > count {
            return Err(Error::ChannelOutOfRange {
                kind,
                channel: last,
            });
        }

        let cache = self
            .arrays
            .entry((mac, kind))
            .or_insert_with(|| vec![None; count]);

        let mut changes = Vec::new();
        for (i, value) in values.iter().enumerate() {
            let Some(value) = *value else { continue };
            let slot = offset - 1 + i;
            if cache[slot] != Some(value) {
                cache[slot] = Some(value);
                changes.push(ChannelChange {
                    mac,
                    channel: (slot + 1) as u8,
                    kind,
                    value,
                });
            }
        }
        Ok(changes)
    }

    /// Cached bitmap for a device, if one has been reported.
    pub fn bitmap(&self, mac: u32, kind: ReadingKind) -> Option<u32> {
        self.bitmaps.get(&(mac, kind)).copied()
    }

    /// Cached value of one channel, if known.
    pub fn channel_value(&self, mac: u32, channel: u8, kind: ReadingKind) -> Option<ChannelValue> {
        if kind.is_bitmap() {
            if usize::from(channel) >= kind.channel_count() {
                return None;
            }
            self.bitmap(mac, kind)
                .map(|bits| ChannelValue::Bit(bits & (1 << channel) != 0))
        } else {
            let slot = usize::from(channel).checked_sub(1)?;
            self.arrays.get(&(mac, kind))?.get(slot).copied().flatten()
        }
    }

    /// Devices that have reported at least once.
    pub fn devices(&self) -> Vec<u32> {
        let mut macs: Vec<u32> = self
            .bitmaps
            .keys()
            .chain(self.arrays.keys())
            .map(|(mac, _)| *mac)
            .collect();
        macs.sort_unstable();
        macs.dedup();
        macs
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.bitmaps.clear();
        self.arrays.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: u32 = 0x1305;

    fn bytes(values: &[u8]) -> Vec<Option<ChannelValue>> {
        values.iter().map(|&b| Some(ChannelValue::Byte(b))).collect()
    }

    // ---------------------------------------------------------------
    // Bitmaps
    // ---------------------------------------------------------------

    #[test]
    fn first_bitmap_reports_all_bits() {
        let mut store = StateStore::new();
        let changes = store.update_bitmap(MAC, ReadingKind::Input, 0b101).unwrap();

        assert_eq!(changes.len(), 24);
        let channels: Vec<u8> = changes.iter().map(|c| c.channel).collect();
        assert_eq!(channels, (0..24).collect::<Vec<u8>>());

        let set: Vec<u8> = changes
            .iter()
            .filter(|c| c.value == ChannelValue::Bit(true))
            .map(|c| c.channel)
            .collect();
        assert_eq!(set, vec![0, 2]);
        assert!(changes.iter().all(|c| c.mac == MAC && c.kind == ReadingKind::Input));
    }

    #[test]
    fn bitmap_reports_only_flipped_bits() {
        let mut store = StateStore::new();
        store.update_bitmap(MAC, ReadingKind::Input, 0b101).unwrap();

        let changes = store.update_bitmap(MAC, ReadingKind::Input, 0b110).unwrap();
        assert_eq!(
            changes,
            vec![
                ChannelChange {
                    mac: MAC,
                    channel: 0,
                    kind: ReadingKind::Input,
                    value: ChannelValue::Bit(false)
                },
                ChannelChange {
                    mac: MAC,
                    channel: 1,
                    kind: ReadingKind::Input,
                    value: ChannelValue::Bit(true)
                },
            ]
        );
    }

    #[test]
    fn repeated_bitmap_reports_nothing() {
        let mut store = StateStore::new();
        store.update_bitmap(MAC, ReadingKind::Output, 0xABCDEF).unwrap();
        assert!(store.update_bitmap(MAC, ReadingKind::Output, 0xABCDEF).unwrap().is_empty());
        assert_eq!(store.bitmap(MAC, ReadingKind::Output), Some(0xABCDEF));
    }

    #[test]
    fn bitmap_is_masked_to_24_bits() {
        let mut store = StateStore::new();
        store.update_bitmap(MAC, ReadingKind::Input, 0).unwrap();
        let changes = store.update_bitmap(MAC, ReadingKind::Input, 0xFF00_0001).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].channel, 0);
    }

    #[test]
    fn bitmaps_are_per_device_and_kind() {
        let mut store = StateStore::new();
        store.update_bitmap(MAC, ReadingKind::Input, 1).unwrap();
        assert_eq!(store.update_bitmap(MAC, ReadingKind::Output, 1).unwrap().len(), 24);
        assert_eq!(store.update_bitmap(0x2000, ReadingKind::Input, 1).unwrap().len(), 24);
    }

    #[test]
    fn bitmap_rejects_array_kind() {
        let mut store = StateStore::new();
        assert!(matches!(
            store.update_bitmap(MAC, ReadingKind::Byte, 1),
            Err(Error::InvalidParameter(_))
        ));
    }

    // ---------------------------------------------------------------
    // Arrays
    // ---------------------------------------------------------------

    #[test]
    fn first_array_update_reports_all_present_slots() {
        let mut store = StateStore::new();
        let changes = store
            .update_channels(MAC, ReadingKind::Byte, 1, &bytes(&[10, 20, 30, 40, 50, 60]))
            .unwrap();
        let channels: Vec<u8> = changes.iter().map(|c| c.channel).collect();
        assert_eq!(channels, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(changes[2].value, ChannelValue::Byte(30));
    }

    #[test]
    fn array_reports_only_changed_slots() {
        let mut store = StateStore::new();
        store
            .update_channels(MAC, ReadingKind::Byte, 7, &bytes(&[1, 2, 3, 4, 5, 6]))
            .unwrap();

        let changes = store
            .update_channels(MAC, ReadingKind::Byte, 7, &bytes(&[1, 2, 9, 4, 5, 6]))
            .unwrap();
        assert_eq!(
            changes,
            vec![ChannelChange {
                mac: MAC,
                channel: 9,
                kind: ReadingKind::Byte,
                value: ChannelValue::Byte(9)
            }]
        );
        assert_eq!(
            store.channel_value(MAC, 9, ReadingKind::Byte),
            Some(ChannelValue::Byte(9))
        );
    }

    #[test]
    fn absent_temperatures_are_skipped() {
        let mut store = StateStore::new();
        let values = [Some(ChannelValue::Temperature(21.5)), None, None];
        let changes = store
            .update_channels(MAC, ReadingKind::TempF, 4, &values)
            .unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].channel, 4);
        assert_eq!(store.channel_value(MAC, 5, ReadingKind::TempF), None);
    }

    #[test]
    fn out_of_range_leaves_cache_untouched() {
        let mut store = StateStore::new();
        store
            .update_channels(MAC, ReadingKind::TempF, 1, &[Some(ChannelValue::Temperature(20.0))])
            .unwrap();

        let values = vec![Some(ChannelValue::Temperature(30.0)); 3];
        let err = store
            .update_channels(MAC, ReadingKind::TempF, 5, &values)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ChannelOutOfRange {
                kind: ReadingKind::TempF,
                channel: 7
            }
        ));
        assert_eq!(store.channel_value(MAC, 5, ReadingKind::TempF), None);
        assert_eq!(
            store.channel_value(MAC, 1, ReadingKind::TempF),
            Some(ChannelValue::Temperature(20.0))
        );
    }

    #[test]
    fn zero_offset_is_out_of_range() {
        let mut store = StateStore::new();
        assert!(matches!(
            store.update_channels(MAC, ReadingKind::Byte, 0, &bytes(&[1])),
            Err(Error::ChannelOutOfRange { channel: 0, .. })
        ));
    }

    #[test]
    fn last_byte_slot_is_in_range() {
        let mut store = StateStore::new();
        let changes = store
            .update_channels(MAC, ReadingKind::Byte, 13, &bytes(&[0; 6]))
            .unwrap();
        assert_eq!(changes.last().map(|c| c.channel), Some(18));
    }

    // ---------------------------------------------------------------
    // Readings and queries
    // ---------------------------------------------------------------

    #[test]
    fn apply_binary_reports_inputs_then_outputs() {
        let mut store = StateStore::new();
        store
            .apply(MAC, &Reading::Binary { inputs: 0, outputs: 0 })
            .unwrap();

        let changes = store
            .apply(MAC, &Reading::Binary { inputs: 0b1, outputs: 0b100 })
            .unwrap();
        let summary: Vec<_> = changes.iter().map(|c| (c.kind, c.channel)).collect();
        assert_eq!(
            summary,
            vec![(ReadingKind::Input, 0), (ReadingKind::Output, 2)]
        );
    }

    #[test]
    fn apply_integer_temperatures_changes_nothing() {
        let mut store = StateStore::new();
        let changes = store.apply(MAC, &Reading::Temperatures(vec![21])).unwrap();
        assert!(changes.is_empty());
        assert!(store.devices().is_empty());
    }

    #[test]
    fn channel_value_for_bitmaps() {
        let mut store = StateStore::new();
        assert_eq!(store.channel_value(MAC, 0, ReadingKind::Input), None);

        store.update_bitmap(MAC, ReadingKind::Input, 0b100).unwrap();
        assert_eq!(
            store.channel_value(MAC, 2, ReadingKind::Input),
            Some(ChannelValue::Bit(true))
        );
        assert_eq!(
            store.channel_value(MAC, 3, ReadingKind::Input),
            Some(ChannelValue::Bit(false))
        );
        assert_eq!(store.channel_value(MAC, 24, ReadingKind::Input), None);
    }

    #[test]
    fn devices_and_clear() {
        let mut store = StateStore::new();
        store.update_bitmap(0x20, ReadingKind::Input, 0).unwrap();
        store
            .update_channels(0x10, ReadingKind::Byte, 1, &bytes(&[1]))
            .unwrap();
        store.update_bitmap(0x10, ReadingKind::Output, 0).unwrap();
        assert_eq!(store.devices(), vec![0x10, 0x20]);

        store.clear();
        assert!(store.devices().is_empty());
        assert_eq!(store.bitmap(0x20, ReadingKind::Input), None);
    }
}
