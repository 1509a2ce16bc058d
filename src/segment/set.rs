//! Cardinality-dependent encodings of one (value, segment) member set
//!
//! A set of record numbers within one segment is stored as one of three
//! variants chosen purely by member count: a single inline slot offset, a
//! list of 2-byte offsets, or a fixed-width bitmap. The wire format is
//! length-disambiguated rather than tag-disambiguated, so `normalize`
//! guarantees a stored List is always strictly shorter than a full bitmap
//! and never exactly 2 bytes.

use crate::config::SegmentConfig;
use crate::error::{Result, SegstoreError};

/// In-memory member set for one (value, segment) pair.
///
/// `List` is kept sorted ascending except transiently between a raw decode
/// and `normalize`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SegmentSet {
    Int(u16),
    List(Vec<u16>),
    Bitmap(Vec<u8>),
}

impl SegmentSet {
    /// A set holding exactly one slot.
    pub fn singleton(slot: u16) -> Self {
        SegmentSet::Int(slot)
    }

    /// An empty set (transient; never stored).
    pub fn empty() -> Self {
        SegmentSet::List(Vec::new())
    }

    /// Build a normalized set from arbitrary slots.
    pub fn from_slots(slots: &[u16], config: &SegmentConfig) -> Self {
        let mut set = SegmentSet::List(slots.to_vec());
        set.normalize(config);
        set
    }

    /// Member count.
    pub fn count(&self) -> u32 {
        match self {
            SegmentSet::Int(_) => 1,
            SegmentSet::List(slots) => slots.len() as u32,
            SegmentSet::Bitmap(bytes) => {
                bytes.iter().map(|b| b.count_ones()).sum()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            SegmentSet::Int(_) => false,
            SegmentSet::List(slots) => slots.is_empty(),
            SegmentSet::Bitmap(bytes) => bytes.iter().all(|&b| b == 0),
        }
    }

    pub fn contains(&self, slot: u16) -> bool {
        match self {
            SegmentSet::Int(s) => *s == slot,
            SegmentSet::List(slots) => slots.binary_search(&slot).is_ok(),
            SegmentSet::Bitmap(bytes) => bitmap_get(bytes, slot),
        }
    }

    /// Insert a slot, re-normalizing. Returns false if already present.
    pub fn insert(&mut self, slot: u16, config: &SegmentConfig) -> bool {
        if self.contains(slot) {
            return false;
        }
        match self {
            SegmentSet::Bitmap(bytes) => bitmap_set(bytes, slot, true),
            _ => {
                let mut slots = self.to_slot_vec();
                match slots.binary_search(&slot) {
                    Ok(_) => return false,
                    Err(pos) => slots.insert(pos, slot),
                }
                *self = SegmentSet::List(slots);
            }
        }
        self.normalize(config);
        true
    }

    /// Remove a slot, re-normalizing. Returns false if absent.
    pub fn remove(&mut self, slot: u16, config: &SegmentConfig) -> bool {
        if !self.contains(slot) {
            return false;
        }
        match self {
            SegmentSet::Bitmap(bytes) => bitmap_set(bytes, slot, false),
            _ => {
                let mut slots = self.to_slot_vec();
                slots.retain(|&s| s != slot);
                *self = SegmentSet::List(slots);
            }
        }
        self.normalize(config);
        true
    }

    /// Union in-place with any other variant; result is re-normalized.
    pub fn union_with(&mut self, other: &SegmentSet, config: &SegmentConfig) {
        let mut bytes = self.to_bitmap_bytes(config);
        match other {
            SegmentSet::Int(slot) => bitmap_set(&mut bytes, *slot, true),
            SegmentSet::List(slots) => {
                for &slot in slots {
                    bitmap_set(&mut bytes, slot, true);
                }
            }
            SegmentSet::Bitmap(other_bytes) => {
                for (dst, src) in bytes.iter_mut().zip(other_bytes) {
                    *dst |= src;
                }
            }
        }
        *self = SegmentSet::Bitmap(bytes);
        self.normalize(config);
    }

    /// Remove every member of `other` from `self`; result is re-normalized.
    pub fn difference_with(&mut self, other: &SegmentSet, config: &SegmentConfig) {
        let mut bytes = self.to_bitmap_bytes(config);
        match other {
            SegmentSet::Int(slot) => bitmap_set(&mut bytes, *slot, false),
            SegmentSet::List(slots) => {
                for &slot in slots {
                    bitmap_set(&mut bytes, slot, false);
                }
            }
            SegmentSet::Bitmap(other_bytes) => {
                for (dst, src) in bytes.iter_mut().zip(other_bytes) {
                    *dst &= !src;
                }
            }
        }
        *self = SegmentSet::Bitmap(bytes);
        self.normalize(config);
    }

    /// Re-select the best representation for the current member count.
    ///
    /// count 1 -> Int; encoded-list-shorter-than-bitmap -> sorted List;
    /// otherwise Bitmap. Pure function of the member set.
    pub fn normalize(&mut self, config: &SegmentConfig) {
        let count = self.count() as usize;
        if count == 1 {
            let slot = self.iter_slots().next().unwrap_or(0);
            *self = SegmentSet::Int(slot);
        } else if count * 2 < config.bytes() {
            let mut slots = self.to_slot_vec();
            slots.sort_unstable();
            slots.dedup();
            *self = SegmentSet::List(slots);
        } else {
            let bytes = self.to_bitmap_bytes(config);
            *self = SegmentSet::Bitmap(bytes);
        }
    }

    /// Rank of `slot` within the set (0-based, ascending slot order).
    pub fn position_of(&self, slot: u16) -> Option<u32> {
        match self {
            SegmentSet::Int(s) => (*s == slot).then_some(0),
            SegmentSet::List(slots) => slots.binary_search(&slot).ok().map(|p| p as u32),
            SegmentSet::Bitmap(bytes) => {
                if !bitmap_get(bytes, slot) {
                    return None;
                }
                let mut rank = 0u32;
                for s in bitmap_slots(bytes) {
                    if s == slot {
                        return Some(rank);
                    }
                    rank += 1;
                }
                None
            }
        }
    }

    /// Slot at 0-based rank `position` in ascending slot order.
    pub fn at_position(&self, position: u32) -> Option<u16> {
        self.iter_slots().nth(position as usize)
    }

    /// Smallest slot strictly greater than `slot`.
    pub fn next_after(&self, slot: u16) -> Option<u16> {
        self.iter_slots().find(|&s| s > slot)
    }

    /// Largest slot strictly smaller than `slot`.
    pub fn prev_before(&self, slot: u16) -> Option<u16> {
        self.iter_slots().take_while(|&s| s < slot).last()
    }

    pub fn first_slot(&self) -> Option<u16> {
        self.iter_slots().next()
    }

    pub fn last_slot(&self) -> Option<u16> {
        self.iter_slots().last()
    }

    /// Iterate member slots in ascending order.
    pub fn iter_slots(&self) -> Box<dyn Iterator<Item = u16> + '_> {
        match self {
            SegmentSet::Int(slot) => Box::new(std::iter::once(*slot)),
            SegmentSet::List(slots) => Box::new(slots.iter().copied()),
            SegmentSet::Bitmap(bytes) => Box::new(bitmap_slots(bytes)),
        }
    }

    /// Serialize to the length-disambiguated wire format.
    ///
    /// Callers must store the member count alongside the bytes: a 2-byte
    /// payload only decodes as Int when the row's cached count is 1.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            SegmentSet::Int(slot) => slot.to_be_bytes().to_vec(),
            SegmentSet::List(slots) => {
                let mut out = Vec::with_capacity(slots.len() * 2);
                for slot in slots {
                    out.extend_from_slice(&slot.to_be_bytes());
                }
                out
            }
            SegmentSet::Bitmap(bytes) => bytes.clone(),
        }
    }

    /// Decode the wire format, disambiguating by byte length and the row's
    /// cached count.
    pub fn decode(bytes: &[u8], count: u32, config: &SegmentConfig) -> Result<Self> {
        if bytes.len() == 2 && count == 1 {
            let slot = u16::from_be_bytes([bytes[0], bytes[1]]);
            if u32::from(slot) >= config.slots() {
                return Err(SegstoreError::Corruption(format!(
                    "int segment slot {} out of range for segment size {}",
                    slot,
                    config.slots()
                )));
            }
            return Ok(SegmentSet::Int(slot));
        }
        if bytes.len() == config.bytes() {
            return Ok(SegmentSet::Bitmap(bytes.to_vec()));
        }
        if bytes.len() % 2 != 0 {
            return Err(SegstoreError::Corruption(format!(
                "segment payload of {} bytes is neither bitmap ({}), int (2) nor slot list",
                bytes.len(),
                config.bytes()
            )));
        }
        let mut slots = Vec::with_capacity(bytes.len() / 2);
        for chunk in bytes.chunks_exact(2) {
            let slot = u16::from_be_bytes([chunk[0], chunk[1]]);
            if u32::from(slot) >= config.slots() {
                return Err(SegstoreError::Corruption(format!(
                    "list segment slot {} out of range for segment size {}",
                    slot,
                    config.slots()
                )));
            }
            slots.push(slot);
        }
        // List order is not guaranteed on the wire
        slots.sort_unstable();
        Ok(SegmentSet::List(slots))
    }

    fn to_slot_vec(&self) -> Vec<u16> {
        self.iter_slots().collect()
    }

    fn to_bitmap_bytes(&self, config: &SegmentConfig) -> Vec<u8> {
        match self {
            SegmentSet::Bitmap(bytes) => {
                let mut out = bytes.clone();
                out.resize(config.bytes(), 0);
                out
            }
            _ => {
                let mut out = vec![0u8; config.bytes()];
                for slot in self.iter_slots() {
                    bitmap_set(&mut out, slot, true);
                }
                out
            }
        }
    }
}

// Bit i of the segment lives in byte i/8, most significant bit first.

pub(crate) fn bitmap_get(bytes: &[u8], slot: u16) -> bool {
    let byte = (slot / 8) as usize;
    let mask = 0x80u8 >> (slot % 8);
    bytes.get(byte).is_some_and(|b| b & mask != 0)
}

pub(crate) fn bitmap_set(bytes: &mut [u8], slot: u16, value: bool) {
    let byte = (slot / 8) as usize;
    let mask = 0x80u8 >> (slot % 8);
    if let Some(b) = bytes.get_mut(byte) {
        if value {
            *b |= mask;
        } else {
            *b &= !mask;
        }
    }
}

pub(crate) fn bitmap_slots(bytes: &[u8]) -> impl Iterator<Item = u16> + '_ {
    bytes.iter().enumerate().flat_map(|(i, &b)| {
        (0..8).filter_map(move |bit| {
            if b & (0x80 >> bit) != 0 {
                Some((i * 8 + bit) as u16)
            } else {
                None
            }
        })
    })
}
