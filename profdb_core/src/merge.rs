//! Merging two in-memory profiles

use crate::error::{ProfileError, Result};
use crate::profile::ProfileInfo;
use crate::types::{ClassRef, DexFileKey, ProfileIndex};

impl ProfileInfo {
    /// Fold `other` into this container.
    ///
    /// Files are matched by profile key and renumbered into this container's
    /// index space; inline cache class references follow the renumbering.
    /// Bitmaps, hot methods and (if `merge_classes`) class sets are unioned,
    /// call sites follow the inline cache policy pairwise. If any file in
    /// `other` conflicts with a tracked one (checksum or method count), or the
    /// union would not fit the index space, nothing is merged.
    pub fn merge_with(&mut self, other: &ProfileInfo, merge_classes: bool) -> Result<()> {
        let keys: Vec<DexFileKey> = other
            .files()
            .map(|data| {
                DexFileKey::new(data.profile_key(), data.checksum(), data.num_method_ids())
            })
            .collect();
        self.check_keys(&keys)?;

        let mut remap: Vec<ProfileIndex> = Vec::with_capacity(keys.len());
        for key in &keys {
            remap.push(self.get_or_add_file_data(key)?);
        }
        let translate = |class: ClassRef| {
            remap
                .get(class.dex_profile_index as usize)
                .map(|&index| ClassRef::new(index, class.type_index))
        };

        let limit = self.config().inline_cache_limit;
        for theirs in other.files() {
            let target = remap[theirs.profile_index() as usize];
            let ours = self
                .file_data_mut(target)
                .ok_or_else(|| ProfileError::bad_data("merge target vanished"))?;
            tracing::debug!(
                "Merging {} (index {} -> {})",
                theirs.profile_key(),
                theirs.profile_index(),
                target
            );

            ours.or_bitmap(theirs);
            if merge_classes {
                ours.classes_mut().extend(theirs.classes().iter().copied());
            }
            for (&method_index, their_caches) in theirs.hot_methods() {
                let our_caches = ours.hot_methods_mut().entry(method_index).or_default();
                for (&dex_pc, site) in their_caches {
                    our_caches
                        .entry(dex_pc)
                        .or_default()
                        .merge_from(site, limit, translate);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProfileErrorKind;
    use crate::types::{MethodFlags, ProfileInlineCache, ProfileMethodInfo, TypeReference};
    use pretty_assertions::assert_eq;

    fn key_a() -> DexFileKey {
        DexFileKey::new("a.dex", 7, 10)
    }

    fn key_b() -> DexFileKey {
        DexFileKey::new("b.dex", 9, 20)
    }

    #[test]
    fn test_merge_remaps_class_references() {
        // b.dex is index 0 here, a.dex is index 1
        let mut other = ProfileInfo::new();
        other.add_class_for_dex(&key_b(), 1).unwrap();
        other
            .add_method(
                &ProfileMethodInfo::with_inline_caches(
                    key_a(),
                    2,
                    vec![ProfileInlineCache::new(
                        0x8,
                        vec![TypeReference::new(key_b(), 6)],
                    )],
                ),
                MethodFlags::HOT,
            )
            .unwrap();
        other.add_method_index(MethodFlags::STARTUP, &key_a(), 4).unwrap();

        let mut info = ProfileInfo::new();
        info.add_method_index(MethodFlags::HOT, &key_a(), 1).unwrap();
        info.add_class_for_dex(&key_a(), 3).unwrap();

        info.merge_with(&other, true).unwrap();

        // a.dex keeps index 0, b.dex becomes index 1
        assert_eq!(info.file_data(0).unwrap().profile_key(), "a.dex");
        assert_eq!(info.file_data(1).unwrap().profile_key(), "b.dex");

        let caches = info.get_method("a.dex", 7, 2).unwrap();
        let classes: Vec<ClassRef> = caches[&0x8].classes().iter().copied().collect();
        assert_eq!(classes, vec![ClassRef::new(1, 6)]);

        assert!(info.get_method_hotness("a.dex", 7, 1).is_hot());
        assert!(info.get_method_hotness("a.dex", 7, 4).is_startup());
        assert!(info.contains_class(&key_a(), 3));
        assert!(info.contains_class(&key_b(), 1));
    }

    #[test]
    fn test_merge_checksum_conflict_changes_nothing() {
        let mut info = ProfileInfo::new();
        info.add_class_for_dex(&key_a(), 1).unwrap();
        let before = info.clone();

        let mut other = ProfileInfo::new();
        other.add_class_for_dex(&key_b(), 2).unwrap();
        other
            .add_class_for_dex(&DexFileKey::new("a.dex", 8, 10), 2)
            .unwrap();

        let err = info.merge_with(&other, true).unwrap_err();
        assert_eq!(err.kind(), ProfileErrorKind::BadData);
        assert_eq!(info, before);
        assert_eq!(info.number_of_dex_files(), 1);
    }

    #[test]
    fn test_merge_without_classes() {
        let mut info = ProfileInfo::new();
        let mut other = ProfileInfo::new();
        other.add_class_for_dex(&key_a(), 1).unwrap();
        other.add_method_index(MethodFlags::HOT, &key_a(), 1).unwrap();

        info.merge_with(&other, false).unwrap();
        assert_eq!(info.number_of_resolved_classes(), 0);
        assert!(info.get_method_hotness("a.dex", 7, 1).is_hot());
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut info = ProfileInfo::new();
        info.add_methods_for_dex(MethodFlags::HOT | MethodFlags::POST_STARTUP, &key_a(), [1, 2])
            .unwrap();
        info.add_class_for_dex(&key_b(), 4).unwrap();
        let snapshot = info.clone();

        info.merge_with(&snapshot, true).unwrap();
        assert_eq!(info, snapshot);
    }

    #[test]
    fn test_merge_inline_cache_policy() {
        let site_method = |types: &[u16]| {
            ProfileMethodInfo::with_inline_caches(
                key_a(),
                0,
                vec![ProfileInlineCache::new(
                    0,
                    types
                        .iter()
                        .map(|t| TypeReference::new(key_a(), *t))
                        .collect(),
                )],
            )
        };

        let mut left = ProfileInfo::new();
        left.add_method(&site_method(&[1, 2, 3]), MethodFlags::HOT)
            .unwrap();
        let mut right = ProfileInfo::new();
        right
            .add_method(&site_method(&[4, 5, 6]), MethodFlags::HOT)
            .unwrap();

        left.merge_with(&right, true).unwrap();
        let site = &left.get_method("a.dex", 7, 0).unwrap()[&0];
        assert!(site.is_megamorphic());
        assert!(site.classes().is_empty());

        let mut missing = ProfileInfo::new();
        missing
            .add_method(
                &ProfileMethodInfo::with_inline_caches(
                    key_a(),
                    0,
                    vec![ProfileInlineCache::missing_types(0)],
                ),
                MethodFlags::HOT,
            )
            .unwrap();
        left.merge_with(&missing, true).unwrap();
        assert!(left.get_method("a.dex", 7, 0).unwrap()[&0].is_missing_types());
    }
}
