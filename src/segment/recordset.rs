//! Ordered collection of segment member sets keyed by segment number
//!
//! The result type of index queries. Boolean composition works
//! segment-by-segment so mixed encodings combine without a full decode of
//! anything but the touched segments.

use std::collections::BTreeMap;

use crate::config::SegmentConfig;

use super::set::SegmentSet;
use super::types::{join_record, split_record, RecordNumber, SegmentNumber};

/// Set of record numbers across segments, in ascending segment order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecordSet {
    segments: BTreeMap<SegmentNumber, SegmentSet>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of member records across all segments.
    pub fn len(&self) -> u64 {
        self.segments.values().map(|s| u64::from(s.count())).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.values().all(|s| s.is_empty())
    }

    pub fn contains(&self, record: RecordNumber, config: &SegmentConfig) -> bool {
        let (segment, slot) = split_record(record, config);
        self.segments
            .get(&segment)
            .is_some_and(|s| s.contains(slot))
    }

    /// Insert one record number. Returns false if already present.
    pub fn insert(&mut self, record: RecordNumber, config: &SegmentConfig) -> bool {
        let (segment, slot) = split_record(record, config);
        match self.segments.get_mut(&segment) {
            Some(set) => set.insert(slot, config),
            None => {
                self.segments.insert(segment, SegmentSet::singleton(slot));
                true
            }
        }
    }

    /// Remove one record number. Empty segments are dropped.
    pub fn remove(&mut self, record: RecordNumber, config: &SegmentConfig) -> bool {
        let (segment, slot) = split_record(record, config);
        let Some(set) = self.segments.get_mut(&segment) else {
            return false;
        };
        let removed = set.remove(slot, config);
        if set.is_empty() {
            self.segments.remove(&segment);
        }
        removed
    }

    /// Place a whole segment's member set, replacing any prior content.
    pub fn place(&mut self, segment: SegmentNumber, set: SegmentSet) {
        if set.is_empty() {
            self.segments.remove(&segment);
        } else {
            self.segments.insert(segment, set);
        }
    }

    pub fn segment(&self, segment: SegmentNumber) -> Option<&SegmentSet> {
        self.segments.get(&segment)
    }

    /// Iterate (segment, set) pairs in ascending segment order.
    pub fn segments(&self) -> impl Iterator<Item = (SegmentNumber, &SegmentSet)> {
        self.segments.iter().map(|(&seg, set)| (seg, set))
    }

    /// Iterate absolute record numbers in ascending order.
    pub fn iter_records<'a>(
        &'a self,
        config: &'a SegmentConfig,
    ) -> impl Iterator<Item = RecordNumber> + 'a {
        self.segments.iter().flat_map(move |(&segment, set)| {
            set.iter_slots()
                .map(move |slot| join_record(segment, slot, config))
        })
    }

    /// Union in-place with another record set.
    pub fn union_with(&mut self, other: &RecordSet, config: &SegmentConfig) {
        for (segment, set) in other.segments() {
            match self.segments.get_mut(&segment) {
                Some(existing) => existing.union_with(set, config),
                None => {
                    self.segments.insert(segment, set.clone());
                }
            }
        }
    }

    /// Remove every member of `other` from `self`.
    pub fn difference_with(&mut self, other: &RecordSet, config: &SegmentConfig) {
        let mut emptied = Vec::new();
        for (segment, set) in self.segments.iter_mut() {
            if let Some(other_set) = other.segments.get(segment) {
                set.difference_with(other_set, config);
                if set.is_empty() {
                    emptied.push(*segment);
                }
            }
        }
        for segment in emptied {
            self.segments.remove(&segment);
        }
    }

    /// Keep only members present in both sets.
    pub fn intersect_with(&mut self, other: &RecordSet, config: &SegmentConfig) {
        let mut emptied = Vec::new();
        for (segment, set) in self.segments.iter_mut() {
            match other.segments.get(segment) {
                Some(other_set) => {
                    // a & b == a - (a - b)
                    let mut gone = set.clone();
                    gone.difference_with(other_set, config);
                    set.difference_with(&gone, config);
                    if set.is_empty() {
                        emptied.push(*segment);
                    }
                }
                None => emptied.push(*segment),
            }
        }
        for segment in emptied {
            self.segments.remove(&segment);
        }
    }
}

impl FromIterator<(SegmentNumber, SegmentSet)> for RecordSet {
    fn from_iter<T: IntoIterator<Item = (SegmentNumber, SegmentSet)>>(iter: T) -> Self {
        let mut set = RecordSet::new();
        for (segment, segment_set) in iter {
            set.place(segment, segment_set);
        }
        set
    }
}
