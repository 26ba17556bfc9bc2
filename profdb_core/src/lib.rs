//! profdb Core
//!
//! Compact, versioned, checksum-protected store of which methods of a set of
//! dex files ran hot or during startup, which classes were resolved, and which
//! receiver types were seen at call sites of hot methods. This crate provides
//! the in-memory container, its binary encoding and the merge algorithm.

pub mod codec;
pub mod config;
pub mod dump;
pub mod error;
pub mod file_data;
pub mod generate;
pub mod inline_cache;
pub mod loader;
pub mod merge;
pub mod profile;
pub mod types;
pub mod verify;

pub use config::ProfileConfig;
pub use error::{ProfileError, ProfileErrorKind, Result};
pub use file_data::FileProfileData;
pub use inline_cache::{InlineCacheMap, SiteData, SiteState};
pub use loader::ProfileLoader;
pub use profile::{ClassesAndMethods, ProfileInfo};
pub use types::{
    ClassRef, DexFileInfo, DexFileKey, MethodFlags, MethodHotness, MethodRef, ProfileInlineCache,
    ProfileMethodInfo, TypeReference,
};
pub use verify::{ProfileProblem, ProfileVerifier};
