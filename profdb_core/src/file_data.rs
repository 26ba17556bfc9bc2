//! Per-file profile record

use crate::inline_cache::InlineCacheMap;
use crate::types::{MethodFlags, MethodHotness, MethodIndex, ProfileIndex, TypeIndex};
use bitvec::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

/// Method indices are 16 bits wide, which caps the method-id table size
pub const MAX_METHOD_IDS: u32 = 1 << 16;

/// Bytes needed for the packed startup/post-startup bitmap of a file
pub fn bitmap_storage_size(num_method_ids: u32) -> usize {
    (2 * num_method_ids as usize).div_ceil(8)
}

/// Everything recorded for one tracked dex file
#[derive(Debug, Clone)]
pub struct FileProfileData {
    profile_key: String,
    profile_index: ProfileIndex,
    checksum: u32,
    num_method_ids: u32,
    startup: BitVec<u8, Lsb0>,
    post_startup: BitVec<u8, Lsb0>,
    classes: BTreeSet<TypeIndex>,
    /// Hot methods; a method is hot iff it has an entry, the map may be empty
    hot_methods: BTreeMap<MethodIndex, InlineCacheMap>,
}

impl FileProfileData {
    pub(crate) fn new(
        profile_key: String,
        profile_index: ProfileIndex,
        checksum: u32,
        num_method_ids: u32,
    ) -> Self {
        let n = num_method_ids as usize;
        Self {
            profile_key,
            profile_index,
            checksum,
            num_method_ids,
            startup: bitvec![u8, Lsb0; 0; n],
            post_startup: bitvec![u8, Lsb0; 0; n],
            classes: BTreeSet::new(),
            hot_methods: BTreeMap::new(),
        }
    }

    pub fn profile_key(&self) -> &str {
        &self.profile_key
    }

    pub(crate) fn set_profile_key(&mut self, key: String) {
        self.profile_key = key;
    }

    pub fn profile_index(&self) -> ProfileIndex {
        self.profile_index
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn num_method_ids(&self) -> u32 {
        self.num_method_ids
    }

    pub fn classes(&self) -> &BTreeSet<TypeIndex> {
        &self.classes
    }

    pub fn hot_methods(&self) -> &BTreeMap<MethodIndex, InlineCacheMap> {
        &self.hot_methods
    }

    pub fn startup_methods(&self) -> impl Iterator<Item = MethodIndex> + '_ {
        self.startup.iter_ones().map(|i| i as MethodIndex)
    }

    pub fn post_startup_methods(&self) -> impl Iterator<Item = MethodIndex> + '_ {
        self.post_startup.iter_ones().map(|i| i as MethodIndex)
    }

    /// True if nothing at all is recorded for this file
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
            && self.hot_methods.is_empty()
            && self.startup.not_any()
            && self.post_startup.not_any()
    }

    /// OR `flags` into the method's facts. Returns false if the index is out of
    /// range for this file.
    pub fn add_method(&mut self, flags: MethodFlags, method_index: MethodIndex) -> bool {
        if u32::from(method_index) >= self.num_method_ids {
            return false;
        }
        let i = method_index as usize;
        if flags.contains(MethodFlags::STARTUP) {
            self.startup.set(i, true);
        }
        if flags.contains(MethodFlags::POST_STARTUP) {
            self.post_startup.set(i, true);
        }
        if flags.contains(MethodFlags::HOT) {
            self.hot_methods.entry(method_index).or_default();
        }
        true
    }

    /// Inline caches of a method, marking it hot. `None` if out of range.
    pub fn inline_caches_mut(&mut self, method_index: MethodIndex) -> Option<&mut InlineCacheMap> {
        if u32::from(method_index) >= self.num_method_ids {
            return None;
        }
        Some(self.hot_methods.entry(method_index).or_default())
    }

    pub fn add_class(&mut self, type_index: TypeIndex) -> bool {
        self.classes.insert(type_index)
    }

    pub fn contains_class(&self, type_index: TypeIndex) -> bool {
        self.classes.contains(&type_index)
    }

    pub fn method_flags(&self, method_index: MethodIndex) -> MethodFlags {
        let mut flags = MethodFlags::empty();
        let i = method_index as usize;
        if self.hot_methods.contains_key(&method_index) {
            flags |= MethodFlags::HOT;
        }
        if self.startup.get(i).is_some_and(|b| *b) {
            flags |= MethodFlags::STARTUP;
        }
        if self.post_startup.get(i).is_some_and(|b| *b) {
            flags |= MethodFlags::POST_STARTUP;
        }
        flags
    }

    pub fn method_hotness(&self, method_index: MethodIndex) -> MethodHotness<'_> {
        let inline_caches = self
            .hot_methods
            .get(&method_index)
            .filter(|caches| !caches.is_empty());
        MethodHotness::new(self.method_flags(method_index), inline_caches)
    }

    /// Pack the two halves into the on-disk layout: startup bits first, then
    /// post-startup bits, least significant bit first.
    pub(crate) fn bitmap_bytes(&self) -> Vec<u8> {
        let n = self.num_method_ids as usize;
        let mut bits = bitvec![u8, Lsb0; 0; 2 * n];
        for i in self.startup.iter_ones() {
            bits.set(i, true);
        }
        for i in self.post_startup.iter_ones() {
            bits.set(n + i, true);
        }
        bits.into_vec()
    }

    /// OR a packed bitmap into this record. The caller guarantees the slice
    /// holds at least `2 * num_method_ids` bits.
    pub(crate) fn or_bitmap_bytes(&mut self, bytes: &[u8]) {
        let n = self.num_method_ids as usize;
        let bits = BitSlice::<u8, Lsb0>::from_slice(bytes);
        for i in bits[..2 * n].iter_ones() {
            if i < n {
                self.startup.set(i, true);
            } else {
                self.post_startup.set(i - n, true);
            }
        }
    }

    /// OR another record's startup/post-startup bits into this one. Both sides
    /// describe the same file, so their halves have the same length.
    pub(crate) fn or_bitmap(&mut self, other: &FileProfileData) {
        for i in other.startup.iter_ones() {
            self.startup.set(i, true);
        }
        for i in other.post_startup.iter_ones() {
            self.post_startup.set(i, true);
        }
    }

    pub(crate) fn classes_mut(&mut self) -> &mut BTreeSet<TypeIndex> {
        &mut self.classes
    }

    pub(crate) fn hot_methods_mut(&mut self) -> &mut BTreeMap<MethodIndex, InlineCacheMap> {
        &mut self.hot_methods
    }

    pub(crate) fn startup_bits(&self) -> &BitSlice<u8, Lsb0> {
        &self.startup
    }

    pub(crate) fn post_startup_bits(&self) -> &BitSlice<u8, Lsb0> {
        &self.post_startup
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(n: u32) -> FileProfileData {
        FileProfileData::new("a.dex".to_string(), 0, 7, n)
    }

    #[test]
    fn test_bitmap_storage_size() {
        assert_eq!(bitmap_storage_size(0), 0);
        assert_eq!(bitmap_storage_size(1), 1);
        assert_eq!(bitmap_storage_size(4), 1);
        assert_eq!(bitmap_storage_size(5), 2);
        assert_eq!(bitmap_storage_size(10), 3);
    }

    #[test]
    fn test_flags_are_independent() {
        let mut file = data(10);
        assert!(file.add_method(MethodFlags::STARTUP, 3));
        assert!(file.add_method(MethodFlags::HOT, 4));
        assert!(file.add_method(MethodFlags::POST_STARTUP, 4));

        assert_eq!(file.method_flags(3), MethodFlags::STARTUP);
        assert_eq!(
            file.method_flags(4),
            MethodFlags::HOT | MethodFlags::POST_STARTUP
        );
        assert!(file.method_flags(5).is_empty());
    }

    #[test]
    fn test_out_of_range_method_rejected() {
        let mut file = data(10);
        assert!(!file.add_method(MethodFlags::HOT, 10));
        assert!(file.inline_caches_mut(10).is_none());
        assert!(file.is_empty());
    }

    #[test]
    fn test_bitmap_packing_layout() {
        let mut file = data(5);
        file.add_method(MethodFlags::STARTUP, 0);
        file.add_method(MethodFlags::POST_STARTUP, 0);
        file.add_method(MethodFlags::POST_STARTUP, 4);

        // bit 0: startup(0); bit 5: post(0); bit 9: post(4)
        assert_eq!(file.bitmap_bytes(), vec![0b0010_0001, 0b0000_0010]);

        let mut copy = data(5);
        copy.or_bitmap_bytes(&file.bitmap_bytes());
        assert_eq!(copy.startup_methods().collect::<Vec<_>>(), vec![0]);
        assert_eq!(copy.post_startup_methods().collect::<Vec<_>>(), vec![0, 4]);
    }

    #[test]
    fn test_hotness_hides_empty_inline_caches() {
        let mut file = data(4);
        file.add_method(MethodFlags::HOT, 1);
        let hotness = file.method_hotness(1);
        assert!(hotness.is_hot());
        assert!(hotness.inline_caches().is_none());
    }
}
