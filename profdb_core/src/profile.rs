//! The profile container
//!
//! [`ProfileInfo`] owns one [`FileProfileData`] per tracked dex file. A file's
//! profile index is its position in the container and never changes until the
//! container is cleared, so class references held as plain indices stay valid.

use crate::config::ProfileConfig;
use crate::error::{ProfileError, Result};
use crate::file_data::{FileProfileData, MAX_METHOD_IDS};
use crate::inline_cache::{InlineCacheMap, SiteData};
use crate::types::{
    profile_key_from_location, ClassRef, DexFileInfo, DexFileKey, DexIdentity, MethodFlags,
    MethodHotness, MethodIndex, MethodRef, ProfileIndex, ProfileMethodInfo, TypeIndex,
    MAX_DEX_FILES,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Classes and methods recorded for one live dex file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassesAndMethods {
    pub classes: BTreeSet<TypeIndex>,
    pub hot_methods: BTreeSet<MethodIndex>,
    pub startup_methods: BTreeSet<MethodIndex>,
    pub post_startup_methods: BTreeSet<MethodIndex>,
}

/// Profile container: an ordered set of per-file records plus a key index
#[derive(Debug, Clone, Default)]
pub struct ProfileInfo {
    config: ProfileConfig,
    files: Vec<FileProfileData>,
    key_map: HashMap<String, ProfileIndex>,
}

impl ProfileInfo {
    /// Create an empty container with default limits
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty container with custom limits
    pub fn with_config(config: ProfileConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            files: Vec::new(),
            key_map: HashMap::new(),
        })
    }

    pub fn config(&self) -> &ProfileConfig {
        &self.config
    }

    /// True if no file is tracked
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Drop every record. Borrowed views handed out earlier cannot survive
    /// this, and profile indices restart at zero.
    pub fn clear(&mut self) {
        self.files.clear();
        self.key_map.clear();
    }

    pub fn number_of_dex_files(&self) -> usize {
        self.files.len()
    }

    /// Number of hot methods across all files
    pub fn number_of_methods(&self) -> usize {
        self.files.iter().map(|f| f.hot_methods().len()).sum()
    }

    pub fn number_of_resolved_classes(&self) -> usize {
        self.files.iter().map(|f| f.classes().len()).sum()
    }

    /// Tracked files in profile-index order
    pub fn files(&self) -> impl Iterator<Item = &FileProfileData> {
        self.files.iter()
    }

    pub fn file_data(&self, index: ProfileIndex) -> Option<&FileProfileData> {
        self.files.get(index as usize)
    }

    pub(crate) fn file_data_mut(&mut self, index: ProfileIndex) -> Option<&mut FileProfileData> {
        self.files.get_mut(index as usize)
    }

    /// Record for a profile key, regardless of checksum
    pub fn find_by_profile_key(&self, profile_key: &str) -> Option<&FileProfileData> {
        let index = *self.key_map.get(profile_key)?;
        self.file_data(index)
    }

    /// Record for a dex file, only if its checksum matches
    pub fn find_file_data<D: DexIdentity + ?Sized>(&self, dex: &D) -> Option<&FileProfileData> {
        let key = profile_key_from_location(dex.location());
        self.find_by_profile_key(&key)
            .filter(|data| data.checksum() == dex.checksum())
    }

    /// Check that `key` could be registered without conflicting with what is
    /// already tracked
    fn check_key(&self, key: &DexFileKey) -> Result<Option<ProfileIndex>> {
        if key.num_method_ids > MAX_METHOD_IDS {
            return Err(ProfileError::bad_data(format!(
                "{} declares {} method ids, more than the {} a dex file can hold",
                key.location, key.num_method_ids, MAX_METHOD_IDS
            )));
        }
        let profile_key = key.profile_key();
        if profile_key.is_empty() {
            return Err(ProfileError::bad_data(format!(
                "location {:?} has an empty profile key",
                key.location
            )));
        }
        let Some(&index) = self.key_map.get(&profile_key) else {
            return Ok(None);
        };
        let existing = &self.files[index as usize];
        if existing.checksum() != key.checksum {
            return Err(ProfileError::bad_data(format!(
                "checksum mismatch for {}: tracked {:#x}, got {:#x}",
                profile_key,
                existing.checksum(),
                key.checksum
            )));
        }
        if existing.num_method_ids() != key.num_method_ids {
            return Err(ProfileError::bad_data(format!(
                "method id count mismatch for {}: tracked {}, got {}",
                profile_key,
                existing.num_method_ids(),
                key.num_method_ids
            )));
        }
        Ok(Some(index))
    }

    /// Check a batch of keys up front so that a mutation touching several
    /// files either applies entirely or not at all
    pub(crate) fn check_keys<'k, I>(&self, keys: I) -> Result<()>
    where
        I: IntoIterator<Item = &'k DexFileKey>,
    {
        // Keys not yet tracked must also agree with each other
        let mut new_keys: BTreeMap<String, (u32, u32)> = BTreeMap::new();
        for key in keys {
            if self.check_key(key)?.is_some() {
                continue;
            }
            let identity = (key.checksum, key.num_method_ids);
            match new_keys.get(&key.profile_key()) {
                Some(&seen) if seen != identity => {
                    return Err(ProfileError::bad_data(format!(
                        "conflicting identities for {} in one batch: {:#x}/{} and {:#x}/{}",
                        key.profile_key(),
                        seen.0,
                        seen.1,
                        identity.0,
                        identity.1
                    )));
                }
                Some(_) => {}
                None => {
                    new_keys.insert(key.profile_key(), identity);
                }
            }
        }
        if self.files.len() + new_keys.len() > MAX_DEX_FILES {
            return Err(ProfileError::bad_data(format!(
                "cannot track more than {} dex files",
                MAX_DEX_FILES
            )));
        }
        Ok(())
    }

    /// Find the record for `key` or allocate the next profile index for it.
    ///
    /// Fails without touching the container if the location is tracked with
    /// a different checksum or method count, or if the index space is full.
    pub fn get_or_add_file_data(&mut self, key: &DexFileKey) -> Result<ProfileIndex> {
        if let Some(index) = self.check_key(key)? {
            return Ok(index);
        }
        if self.files.len() >= MAX_DEX_FILES {
            return Err(ProfileError::bad_data(format!(
                "cannot track more than {} dex files",
                MAX_DEX_FILES
            )));
        }
        let index = self.files.len() as ProfileIndex;
        let profile_key = key.profile_key();
        tracing::debug!("Tracking {} as profile index {}", profile_key, index);
        self.key_map.insert(profile_key.clone(), index);
        self.files.push(FileProfileData::new(
            profile_key,
            index,
            key.checksum,
            key.num_method_ids,
        ));
        Ok(index)
    }

    fn check_method_index(key: &DexFileKey, method_index: MethodIndex) -> Result<()> {
        if u32::from(method_index) >= key.num_method_ids {
            return Err(ProfileError::bad_data(format!(
                "method index {} out of range for {} ({} methods)",
                method_index, key.location, key.num_method_ids
            )));
        }
        Ok(())
    }

    /// Record hotness flags for one method
    pub fn add_method_index(
        &mut self,
        flags: MethodFlags,
        dex: &DexFileKey,
        method_index: MethodIndex,
    ) -> Result<()> {
        self.add_methods_for_dex(flags, dex, [method_index])
    }

    /// Record the same hotness flags for a batch of methods of one file
    pub fn add_methods_for_dex<I>(
        &mut self,
        flags: MethodFlags,
        dex: &DexFileKey,
        method_indices: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = MethodIndex>,
    {
        let method_indices: Vec<MethodIndex> = method_indices.into_iter().collect();
        for &method_index in &method_indices {
            Self::check_method_index(dex, method_index)?;
        }
        let index = self.get_or_add_file_data(dex)?;
        let data = &mut self.files[index as usize];
        for method_index in method_indices {
            data.add_method(flags, method_index);
        }
        Ok(())
    }

    /// Record a resolved class
    pub fn add_class_for_dex(&mut self, dex: &DexFileKey, type_index: TypeIndex) -> Result<()> {
        self.add_classes_for_dex(dex, [type_index])
    }

    /// Record a batch of resolved classes of one file
    pub fn add_classes_for_dex<I>(&mut self, dex: &DexFileKey, type_indices: I) -> Result<()>
    where
        I: IntoIterator<Item = TypeIndex>,
    {
        let index = self.get_or_add_file_data(dex)?;
        self.files[index as usize]
            .classes_mut()
            .extend(type_indices);
        Ok(())
    }

    /// Record a method together with its call-site observations.
    ///
    /// Inline caches are only kept for hot methods, so a method submitted with
    /// any observation is marked hot.
    pub fn add_method(&mut self, info: &ProfileMethodInfo, flags: MethodFlags) -> Result<()> {
        Self::check_method_index(&info.dex, info.method_index)?;
        let class_keys = info
            .inline_caches
            .iter()
            .filter(|cache| !cache.is_missing_types)
            .flat_map(|cache| cache.classes.iter().map(|class| &class.dex));
        self.check_keys(std::iter::once(&info.dex).chain(class_keys))?;

        let index = self.get_or_add_file_data(&info.dex)?;
        self.files[index as usize].add_method(flags, info.method_index);
        if info.inline_caches.is_empty() {
            return Ok(());
        }

        let limit = self.config.inline_cache_limit;
        let mut observations: BTreeMap<_, SiteData> = BTreeMap::new();
        for cache in &info.inline_caches {
            let site = observations.entry(cache.dex_pc).or_default();
            if cache.is_missing_types {
                site.set_is_missing_types();
                continue;
            }
            for class in &cache.classes {
                let class_index = self.get_or_add_file_data(&class.dex)?;
                site.add_class(ClassRef::new(class_index, class.type_index), limit);
            }
        }

        let caches = self.files[index as usize]
            .inline_caches_mut(info.method_index)
            .ok_or_else(|| ProfileError::bad_data("method index out of range"))?;
        for (dex_pc, observed) in observations {
            caches
                .entry(dex_pc)
                .or_default()
                .merge_from(&observed, limit, Some);
        }
        Ok(())
    }

    /// Hotness of a method, or an absent view if the file is unknown, the
    /// checksum does not match, or nothing is recorded for the method
    pub fn get_method_hotness(
        &self,
        location: &str,
        checksum: u32,
        method_index: MethodIndex,
    ) -> MethodHotness<'_> {
        let key = profile_key_from_location(location);
        match self.find_by_profile_key(&key) {
            Some(data) if data.checksum() == checksum => data.method_hotness(method_index),
            _ => MethodHotness::absent(),
        }
    }

    /// Hotness of a method addressed by profile index
    pub fn get_method_hotness_for_ref(&self, method: MethodRef) -> MethodHotness<'_> {
        match self.file_data(method.dex_profile_index) {
            Some(data) => data.method_hotness(method.method_index),
            None => MethodHotness::absent(),
        }
    }

    /// Inline caches of a method, if any were recorded
    pub fn get_method(
        &self,
        location: &str,
        checksum: u32,
        method_index: MethodIndex,
    ) -> Option<&InlineCacheMap> {
        self.get_method_hotness(location, checksum, method_index)
            .inline_caches()
    }

    pub fn contains_class<D: DexIdentity + ?Sized>(&self, dex: &D, type_index: TypeIndex) -> bool {
        self.find_file_data(dex)
            .is_some_and(|data| data.contains_class(type_index))
    }

    /// Bulk extraction for one live file; `None` if the file is unknown or the
    /// profile is stale (checksum mismatch)
    pub fn get_classes_and_methods<D: DexIdentity + ?Sized>(
        &self,
        dex: &D,
    ) -> Option<ClassesAndMethods> {
        let data = self.find_file_data(dex)?;
        Some(ClassesAndMethods {
            classes: data.classes().clone(),
            hot_methods: data.hot_methods().keys().copied().collect(),
            startup_methods: data.startup_methods().collect(),
            post_startup_methods: data.post_startup_methods().collect(),
        })
    }

    pub fn get_hot_methods_for_file<D: DexIdentity + ?Sized>(
        &self,
        dex: &D,
    ) -> Option<Vec<MethodIndex>> {
        let data = self.find_file_data(dex)?;
        Some(data.hot_methods().keys().copied().collect())
    }

    /// Resolved classes of every tracked file, keyed by profile key
    pub fn get_resolved_classes(&self) -> BTreeMap<String, BTreeSet<TypeIndex>> {
        self.files
            .iter()
            .filter(|data| !data.classes().is_empty())
            .map(|data| (data.profile_key().to_string(), data.classes().clone()))
            .collect()
    }

    /// Re-key tracked files that moved to a new location.
    ///
    /// A live file matches a tracked one when checksum and method count agree.
    /// A record already named like a matching live file stays as it is.
    /// Nothing changes if any rename would collide with another tracked key,
    /// or if one record matches several differently named live files.
    pub fn update_profile_keys(&mut self, live_files: &[DexFileInfo]) -> Result<()> {
        let matches = |data: &FileProfileData, live: &DexFileInfo| {
            data.checksum() == live.checksum && data.num_method_ids() == live.num_method_ids
        };
        let in_place: BTreeSet<ProfileIndex> = self
            .files
            .iter()
            .filter(|data| {
                live_files
                    .iter()
                    .any(|live| matches(*data, live) && live.profile_key() == data.profile_key())
            })
            .map(FileProfileData::profile_index)
            .collect();

        let mut renames: BTreeMap<ProfileIndex, String> = BTreeMap::new();
        for live in live_files {
            let new_key = live.profile_key();
            for data in &self.files {
                if !matches(data, live) || in_place.contains(&data.profile_index()) {
                    continue;
                }
                if let Some(previous) = renames.get(&data.profile_index()) {
                    if *previous != new_key {
                        return Err(ProfileError::bad_data(format!(
                            "{} matches both {} and {}",
                            data.profile_key(),
                            previous,
                            new_key
                        )));
                    }
                }
                if let Some(&other) = self.key_map.get(&new_key) {
                    if other != data.profile_index() {
                        tracing::warn!(
                            "Cannot rename {} to {}: key already tracked",
                            data.profile_key(),
                            new_key
                        );
                        return Err(ProfileError::bad_data(format!(
                            "profile key {} is already tracked",
                            new_key
                        )));
                    }
                }
                renames.insert(data.profile_index(), new_key.clone());
            }
        }

        let mut targets = BTreeSet::new();
        for key in renames.values() {
            if !targets.insert(key) {
                return Err(ProfileError::bad_data(format!(
                    "several tracked files would be renamed to {}",
                    key
                )));
            }
        }

        for (index, new_key) in renames {
            let data = &mut self.files[index as usize];
            tracing::debug!("Renaming profile key {} to {}", data.profile_key(), new_key);
            self.key_map.remove(data.profile_key());
            self.key_map.insert(new_key.clone(), index);
            data.set_profile_key(new_key);
        }
        Ok(())
    }

    /// Logical equality: same files (by key), same facts, and inline caches
    /// that name the same classes. Profile index assignment is ignored.
    pub fn equals(&self, other: &ProfileInfo) -> bool {
        if self.files.len() != other.files.len() {
            return false;
        }
        self.files.iter().all(|data| {
            other
                .find_by_profile_key(data.profile_key())
                .is_some_and(|theirs| self.file_equals(data, other, theirs))
        })
    }

    fn file_equals(
        &self,
        ours: &FileProfileData,
        other: &ProfileInfo,
        theirs: &FileProfileData,
    ) -> bool {
        if ours.checksum() != theirs.checksum()
            || ours.num_method_ids() != theirs.num_method_ids()
            || ours.classes() != theirs.classes()
            || ours.startup_bits() != theirs.startup_bits()
            || ours.post_startup_bits() != theirs.post_startup_bits()
            || ours.hot_methods().len() != theirs.hot_methods().len()
        {
            return false;
        }
        ours.hot_methods().iter().all(|(method, caches)| {
            theirs
                .hot_methods()
                .get(method)
                .is_some_and(|their_caches| {
                    self.named_caches(caches) == other.named_caches(their_caches)
                })
        })
    }

    /// Inline caches with class references spelled as (profile key, type)
    fn named_caches(&self, caches: &InlineCacheMap) -> Vec<NamedSite<'_>> {
        caches
            .iter()
            .map(|(dex_pc, site)| {
                let mut classes: Vec<(&str, TypeIndex)> = site
                    .classes()
                    .iter()
                    .map(|class| {
                        let key = self
                            .file_data(class.dex_profile_index)
                            .map(FileProfileData::profile_key)
                            .unwrap_or("");
                        (key, class.type_index)
                    })
                    .collect();
                classes.sort_unstable();
                NamedSite {
                    dex_pc: *dex_pc,
                    megamorphic: site.is_megamorphic(),
                    missing_types: site.is_missing_types(),
                    classes,
                }
            })
            .collect()
    }
}

#[derive(PartialEq, Eq)]
struct NamedSite<'a> {
    dex_pc: u16,
    megamorphic: bool,
    missing_types: bool,
    classes: Vec<(&'a str, TypeIndex)>,
}

impl PartialEq for ProfileInfo {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProfileInlineCache, TypeReference};
    use pretty_assertions::assert_eq;

    fn key_a() -> DexFileKey {
        DexFileKey::new("/data/app/a.dex", 7, 10)
    }

    fn key_b() -> DexFileKey {
        DexFileKey::new("/data/app/b.dex", 9, 20)
    }

    #[test]
    fn test_get_or_add_assigns_sequential_indices() {
        let mut info = ProfileInfo::new();
        assert_eq!(info.get_or_add_file_data(&key_a()).unwrap(), 0);
        assert_eq!(info.get_or_add_file_data(&key_b()).unwrap(), 1);
        assert_eq!(info.get_or_add_file_data(&key_a()).unwrap(), 0);
        assert_eq!(info.number_of_dex_files(), 2);
    }

    #[test]
    fn test_checksum_gate_does_not_mutate() {
        let mut info = ProfileInfo::new();
        info.add_method_index(MethodFlags::HOT, &key_a(), 1).unwrap();
        let before = info.clone();

        let conflicting = DexFileKey::new("/other/dir/a.dex", 8, 10);
        assert!(info.get_or_add_file_data(&conflicting).is_err());
        assert!(info.add_method_index(MethodFlags::HOT, &conflicting, 2).is_err());
        assert_eq!(info, before);
    }

    #[test]
    fn test_index_space_is_bounded() {
        let mut info = ProfileInfo::new();
        for i in 0..MAX_DEX_FILES {
            let key = DexFileKey::new(format!("f{}.dex", i), i as u32, 1);
            assert_eq!(info.get_or_add_file_data(&key).unwrap() as usize, i);
        }
        let one_more = DexFileKey::new("overflow.dex", 1, 1);
        assert!(info.get_or_add_file_data(&one_more).is_err());
        assert_eq!(info.number_of_dex_files(), MAX_DEX_FILES);
    }

    #[test]
    fn test_add_method_index_validates_range() {
        let mut info = ProfileInfo::new();
        assert!(info.add_method_index(MethodFlags::HOT, &key_a(), 10).is_err());
        assert!(info.is_empty());
    }

    #[test]
    fn test_mutations_are_idempotent() {
        let mut info = ProfileInfo::new();
        let method = ProfileMethodInfo::with_inline_caches(
            key_a(),
            3,
            vec![ProfileInlineCache::new(
                0x10,
                vec![TypeReference::new(key_b(), 4)],
            )],
        );
        info.add_method_index(MethodFlags::STARTUP, &key_a(), 1).unwrap();
        info.add_class_for_dex(&key_a(), 2).unwrap();
        info.add_method(&method, MethodFlags::HOT).unwrap();
        let once = info.clone();

        info.add_method_index(MethodFlags::STARTUP, &key_a(), 1).unwrap();
        info.add_class_for_dex(&key_a(), 2).unwrap();
        info.add_method(&method, MethodFlags::HOT).unwrap();
        assert_eq!(info, once);
    }

    #[test]
    fn test_add_method_records_inline_caches() {
        let mut info = ProfileInfo::new();
        let method = ProfileMethodInfo::with_inline_caches(
            key_a(),
            3,
            vec![
                ProfileInlineCache::new(
                    0x10,
                    vec![
                        TypeReference::new(key_a(), 2),
                        TypeReference::new(key_b(), 4),
                    ],
                ),
                ProfileInlineCache::missing_types(0x20),
            ],
        );
        info.add_method(&method, MethodFlags::empty()).unwrap();

        let hotness = info.get_method_hotness("a.dex", 7, 3);
        assert!(hotness.is_hot());
        let caches = hotness.inline_caches().unwrap();
        let site = &caches[&0x10];
        let expected: BTreeSet<ClassRef> = [ClassRef::new(0, 2), ClassRef::new(1, 4)].into();
        assert_eq!(site.classes(), &expected);
        assert!(caches[&0x20].is_missing_types());
    }

    #[test]
    fn test_add_method_conflict_is_atomic() {
        let mut info = ProfileInfo::new();
        info.add_class_for_dex(&key_b(), 1).unwrap();
        let before = info.clone();

        let stale_b = DexFileKey::new("b.dex", 99, 20);
        let method = ProfileMethodInfo::with_inline_caches(
            key_a(),
            3,
            vec![ProfileInlineCache::new(0x10, vec![TypeReference::new(stale_b, 4)])],
        );
        assert!(info.add_method(&method, MethodFlags::HOT).is_err());
        assert_eq!(info, before);
    }

    #[test]
    fn test_add_method_conflict_within_batch_is_atomic() {
        let mut info = ProfileInfo::new();

        // Same profile key as the method's own file, different checksum
        let other_a = DexFileKey::new("/other/a.dex", 8, 10);
        let method = ProfileMethodInfo::with_inline_caches(
            key_a(),
            3,
            vec![ProfileInlineCache::new(0x10, vec![TypeReference::new(other_a, 1)])],
        );
        assert!(info.add_method(&method, MethodFlags::HOT).is_err());
        assert!(info.is_empty());
        assert!(!info.get_method_hotness("a.dex", 7, 3).is_hot());
    }

    #[test]
    fn test_empty_profile_key_rejected() {
        let mut info = ProfileInfo::new();
        for location in ["/data/app/", ""] {
            let key = DexFileKey::new(location, 7, 10);
            assert_eq!(
                info.add_method_index(MethodFlags::HOT, &key, 3)
                    .unwrap_err()
                    .kind(),
                crate::error::ProfileErrorKind::BadData
            );
            assert!(info.add_class_for_dex(&key, 1).is_err());
        }
        assert!(info.is_empty());

        // Whatever the mutation API accepted must load back
        info.add_method_index(MethodFlags::HOT, &key_a(), 3).unwrap();
        let mut loaded = ProfileInfo::new();
        loaded
            .load_from_bytes(&info.to_bytes().unwrap(), true)
            .unwrap();
        assert_eq!(loaded, info);
    }

    #[test]
    fn test_queries_respect_checksum() {
        let mut info = ProfileInfo::new();
        info.add_method_index(MethodFlags::HOT | MethodFlags::STARTUP, &key_a(), 3)
            .unwrap();
        info.add_class_for_dex(&key_a(), 2).unwrap();

        assert!(info.get_method_hotness("a.dex", 7, 3).is_hot());
        assert!(!info.get_method_hotness("a.dex", 8, 3).is_in_profile());
        assert!(!info.get_method_hotness("c.dex", 7, 3).is_in_profile());

        let live = DexFileInfo::new("/system/a.dex", 7, 10, 5);
        assert!(info.contains_class(&live, 2));
        assert!(!info.contains_class(&live, 3));

        let stale = DexFileInfo::new("/system/a.dex", 8, 10, 5);
        assert!(!info.contains_class(&stale, 2));
        assert!(info.get_classes_and_methods(&stale).is_none());

        let extracted = info.get_classes_and_methods(&live).unwrap();
        assert_eq!(extracted.hot_methods, BTreeSet::from([3]));
        assert_eq!(extracted.startup_methods, BTreeSet::from([3]));
        assert!(extracted.post_startup_methods.is_empty());
        assert_eq!(extracted.classes, BTreeSet::from([2]));
    }

    #[test]
    fn test_update_profile_keys_renames() {
        let mut info = ProfileInfo::new();
        info.add_class_for_dex(&key_a(), 1).unwrap();

        let moved = DexFileInfo::new("/new/place/renamed.dex", 7, 10, 4);
        info.update_profile_keys(&[moved.clone()]).unwrap();
        assert!(info.find_by_profile_key("a.dex").is_none());
        assert!(info.contains_class(&moved, 1));
    }

    #[test]
    fn test_update_profile_keys_collision_changes_nothing() {
        let mut info = ProfileInfo::new();
        info.add_class_for_dex(&key_a(), 1).unwrap();
        info.add_class_for_dex(&key_b(), 1).unwrap();
        let before = info.clone();

        // Same identity as a.dex but named like the tracked b.dex
        let collides = DexFileInfo::new("/x/b.dex", 7, 10, 4);
        assert!(info.update_profile_keys(&[collides]).is_err());
        assert_eq!(info, before);
        assert!(info.find_by_profile_key("a.dex").is_some());
    }

    #[test]
    fn test_update_profile_keys_ambiguous_match_changes_nothing() {
        let mut info = ProfileInfo::new();
        info.add_class_for_dex(&key_a(), 1).unwrap();
        let before = info.clone();

        let first = DexFileInfo::new("/new/first.dex", 7, 10, 4);
        let second = DexFileInfo::new("/new/second.dex", 7, 10, 4);
        assert!(info.update_profile_keys(&[first, second]).is_err());
        assert_eq!(info, before);
        assert!(info.find_by_profile_key("a.dex").is_some());
    }

    #[test]
    fn test_update_profile_keys_keeps_exact_match() {
        let mut info = ProfileInfo::new();
        info.add_class_for_dex(&key_a(), 1).unwrap();

        // A copy with the same identity does not steal the record
        let exact = DexFileInfo::new("/system/a.dex", 7, 10, 4);
        let copy = DexFileInfo::new("/new/copy.dex", 7, 10, 4);
        info.update_profile_keys(&[copy, exact]).unwrap();
        assert!(info.find_by_profile_key("a.dex").is_some());
        assert!(info.find_by_profile_key("copy.dex").is_none());
    }

    #[test]
    fn test_equality_ignores_index_order() {
        let mut first = ProfileInfo::new();
        first.add_class_for_dex(&key_a(), 1).unwrap();
        first.add_class_for_dex(&key_b(), 2).unwrap();

        let mut second = ProfileInfo::new();
        second.add_class_for_dex(&key_b(), 2).unwrap();
        second.add_class_for_dex(&key_a(), 1).unwrap();

        assert_eq!(first, second);
        second.add_class_for_dex(&key_a(), 3).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_clear_resets_indices() {
        let mut info = ProfileInfo::new();
        info.add_class_for_dex(&key_a(), 1).unwrap();
        info.clear();
        assert!(info.is_empty());
        assert_eq!(info.get_or_add_file_data(&key_b()).unwrap(), 0);
    }
}
