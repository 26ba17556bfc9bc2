//! Identifier types shared by the profile container, codec and queries

use crate::inline_cache::InlineCacheMap;
use serde::{Deserialize, Serialize};

/// Index of a type inside a dex file's type-id table
pub type TypeIndex = u16;

/// Index of a method inside a dex file's method-id table
pub type MethodIndex = u16;

/// Bytecode offset of a call site inside a method
pub type DexPc = u16;

/// Position of a tracked file within one profile container
pub type ProfileIndex = u8;

/// Separator between a container path and a multidex entry name
pub const MULTIDEX_SEPARATOR: char = '!';

/// Number of distinct files a single container can track. Profile indices are
/// a single byte and the last value is reserved.
pub const MAX_DEX_FILES: usize = u8::MAX as usize;

/// Identity of a dex file as seen by the profile: location plus checksum
/// plus method-id count.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DexFileKey {
    pub location: String,
    pub checksum: u32,
    pub num_method_ids: u32,
}

impl DexFileKey {
    pub fn new(location: impl Into<String>, checksum: u32, num_method_ids: u32) -> Self {
        Self {
            location: location.into(),
            checksum,
            num_method_ids,
        }
    }

    /// Normalized key under which this file is tracked
    pub fn profile_key(&self) -> String {
        profile_key_from_location(&self.location)
    }
}

/// Derive the profile key for a dex location.
///
/// Only the base name is kept so that the same apk installed under a different
/// directory still matches. A multidex suffix (`base.apk!classes2.dex`) is part
/// of the base name and survives.
pub fn profile_key_from_location(location: &str) -> String {
    match location.rfind('/') {
        Some(pos) => location[pos + 1..].to_string(),
        None => location.to_string(),
    }
}

/// Anything that names a dex file the way the profile matches it
pub trait DexIdentity {
    fn location(&self) -> &str;
    fn checksum(&self) -> u32;
    fn num_method_ids(&self) -> u32;
}

impl DexIdentity for DexFileKey {
    fn location(&self) -> &str {
        &self.location
    }

    fn checksum(&self) -> u32 {
        self.checksum
    }

    fn num_method_ids(&self) -> u32 {
        self.num_method_ids
    }
}

impl DexIdentity for DexFileInfo {
    fn location(&self) -> &str {
        &self.location
    }

    fn checksum(&self) -> u32 {
        self.checksum
    }

    fn num_method_ids(&self) -> u32 {
        self.num_method_ids
    }
}

/// Reference to a class: owning file's profile index plus type index
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClassRef {
    pub dex_profile_index: ProfileIndex,
    pub type_index: TypeIndex,
}

impl ClassRef {
    pub fn new(dex_profile_index: ProfileIndex, type_index: TypeIndex) -> Self {
        Self {
            dex_profile_index,
            type_index,
        }
    }
}

/// Reference to a method: owning file's profile index plus method index
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    pub dex_profile_index: ProfileIndex,
    pub method_index: MethodIndex,
}

impl MethodRef {
    pub fn new(dex_profile_index: ProfileIndex, method_index: MethodIndex) -> Self {
        Self {
            dex_profile_index,
            method_index,
        }
    }
}

bitflags::bitflags! {
    /// Hotness facts recorded for a method
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MethodFlags: u8 {
        /// Executed often enough to be compiled ahead of time
        const HOT = 1 << 0;
        /// Executed during application startup
        const STARTUP = 1 << 1;
        /// Executed after startup completed
        const POST_STARTUP = 1 << 2;
    }
}

/// Query-time view of a method's profile entry.
///
/// The inline caches are borrowed from the container and are only valid while
/// the container is neither cleared nor merged into.
#[derive(Debug, Clone, Copy, Default)]
pub struct MethodHotness<'a> {
    flags: MethodFlags,
    inline_caches: Option<&'a InlineCacheMap>,
}

impl<'a> MethodHotness<'a> {
    pub fn absent() -> Self {
        Self::default()
    }

    pub(crate) fn new(flags: MethodFlags, inline_caches: Option<&'a InlineCacheMap>) -> Self {
        Self {
            flags,
            inline_caches,
        }
    }

    pub fn flags(&self) -> MethodFlags {
        self.flags
    }

    pub fn is_hot(&self) -> bool {
        self.flags.contains(MethodFlags::HOT)
    }

    pub fn is_startup(&self) -> bool {
        self.flags.contains(MethodFlags::STARTUP)
    }

    pub fn is_post_startup(&self) -> bool {
        self.flags.contains(MethodFlags::POST_STARTUP)
    }

    /// True if the method has any recorded fact
    pub fn is_in_profile(&self) -> bool {
        !self.flags.is_empty()
    }

    pub fn inline_caches(&self) -> Option<&'a InlineCacheMap> {
        self.inline_caches
    }
}

/// A live dex file the profile is checked or resolved against.
///
/// `class_names` and `method_names` are optional and only used to render
/// human-readable dumps; entries missing from them fall back to indices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DexFileInfo {
    pub location: String,
    pub checksum: u32,
    pub num_method_ids: u32,
    pub num_type_ids: u32,
    #[serde(default)]
    pub class_names: Vec<String>,
    #[serde(default)]
    pub method_names: Vec<String>,
}

impl DexFileInfo {
    pub fn new(
        location: impl Into<String>,
        checksum: u32,
        num_method_ids: u32,
        num_type_ids: u32,
    ) -> Self {
        Self {
            location: location.into(),
            checksum,
            num_method_ids,
            num_type_ids,
            class_names: Vec::new(),
            method_names: Vec::new(),
        }
    }

    pub fn key(&self) -> DexFileKey {
        DexFileKey::new(self.location.clone(), self.checksum, self.num_method_ids)
    }

    pub fn profile_key(&self) -> String {
        profile_key_from_location(&self.location)
    }

    pub fn class_name(&self, type_index: TypeIndex) -> Option<&str> {
        self.class_names.get(type_index as usize).map(String::as_str)
    }

    pub fn method_name(&self, method_index: MethodIndex) -> Option<&str> {
        self.method_names
            .get(method_index as usize)
            .map(String::as_str)
    }
}

/// A class observed at runtime, identified by its owning file rather than by a
/// profile index (the sampler does not know the container's numbering).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeReference {
    pub dex: DexFileKey,
    pub type_index: TypeIndex,
}

impl TypeReference {
    pub fn new(dex: DexFileKey, type_index: TypeIndex) -> Self {
        Self { dex, type_index }
    }
}

/// One call-site observation collected by the runtime instrumentation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileInlineCache {
    pub dex_pc: DexPc,
    pub is_missing_types: bool,
    pub classes: Vec<TypeReference>,
}

impl ProfileInlineCache {
    pub fn new(dex_pc: DexPc, classes: Vec<TypeReference>) -> Self {
        Self {
            dex_pc,
            is_missing_types: false,
            classes,
        }
    }

    pub fn missing_types(dex_pc: DexPc) -> Self {
        Self {
            dex_pc,
            is_missing_types: true,
            classes: Vec::new(),
        }
    }
}

/// A method identity plus its call-site observations, as submitted by the
/// runtime sampler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileMethodInfo {
    pub dex: DexFileKey,
    pub method_index: MethodIndex,
    pub inline_caches: Vec<ProfileInlineCache>,
}

impl ProfileMethodInfo {
    pub fn new(dex: DexFileKey, method_index: MethodIndex) -> Self {
        Self {
            dex,
            method_index,
            inline_caches: Vec::new(),
        }
    }

    pub fn with_inline_caches(
        dex: DexFileKey,
        method_index: MethodIndex,
        inline_caches: Vec<ProfileInlineCache>,
    ) -> Self {
        Self {
            dex,
            method_index,
            inline_caches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_key_strips_directories() {
        assert_eq!(profile_key_from_location("/data/app/base.apk"), "base.apk");
        assert_eq!(
            profile_key_from_location("/data/app/base.apk!classes2.dex"),
            "base.apk!classes2.dex"
        );
        assert_eq!(profile_key_from_location("a.dex"), "a.dex");
    }

    #[test]
    fn test_hotness_flags() {
        let hotness = MethodHotness::new(MethodFlags::HOT | MethodFlags::STARTUP, None);
        assert!(hotness.is_hot());
        assert!(hotness.is_startup());
        assert!(!hotness.is_post_startup());
        assert!(hotness.is_in_profile());
        assert!(!MethodHotness::absent().is_in_profile());
    }

    #[test]
    fn test_class_ref_ordering() {
        let a = ClassRef::new(0, 9);
        let b = ClassRef::new(1, 2);
        assert!(a < b);
    }
}
