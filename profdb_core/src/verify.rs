//! Checking a profile against the dex files it describes

use crate::error::{ProfileError, Result};
use crate::profile::ProfileInfo;
use crate::types::{DexFileInfo, DexPc, MethodIndex, ProfileIndex, TypeIndex};
use std::collections::HashMap;
use thiserror::Error;

/// One reason a profile cannot be trusted for a set of live dex files
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProfileProblem {
    #[error("{profile_key}: checksum {recorded:#x} does not match live file {live:#x}")]
    ChecksumMismatch {
        profile_key: String,
        recorded: u32,
        live: u32,
    },

    #[error("{profile_key}: {recorded} method ids recorded, live file has {live}")]
    MethodCountMismatch {
        profile_key: String,
        recorded: u32,
        live: u32,
    },

    #[error("{profile_key}: method {method_index} out of range ({num_method_ids} methods)")]
    MethodOutOfRange {
        profile_key: String,
        method_index: MethodIndex,
        num_method_ids: u32,
    },

    #[error("{profile_key}: class {type_index} out of range ({num_type_ids} types)")]
    ClassOutOfRange {
        profile_key: String,
        type_index: TypeIndex,
        num_type_ids: u32,
    },

    #[error(
        "{profile_key}: inline cache of method {method_index} at {dex_pc:#x} names \
         {class_profile_key} type {type_index} ({num_type_ids} types)"
    )]
    InlineCacheClassOutOfRange {
        profile_key: String,
        method_index: MethodIndex,
        dex_pc: DexPc,
        class_profile_key: String,
        type_index: TypeIndex,
        num_type_ids: u32,
    },

    #[error(
        "{profile_key}: inline cache of method {method_index} at {dex_pc:#x} \
         references unknown profile index {dex_profile_index}"
    )]
    DanglingInlineCacheReference {
        profile_key: String,
        method_index: MethodIndex,
        dex_pc: DexPc,
        dex_profile_index: ProfileIndex,
    },
}

impl ProfileInfo {
    /// List everything about this profile that contradicts `live_files`.
    ///
    /// Tracked files without a live counterpart are not checked, and neither
    /// are inline cache classes owned by such files.
    pub fn verify_profile_data(&self, live_files: &[DexFileInfo]) -> Vec<ProfileProblem> {
        let live_by_key: HashMap<String, &DexFileInfo> = live_files
            .iter()
            .map(|live| (live.profile_key(), live))
            .collect();
        let mut problems = Vec::new();

        for data in self.files() {
            let Some(live) = live_by_key.get(data.profile_key()) else {
                continue;
            };
            let profile_key = data.profile_key().to_string();
            if data.checksum() != live.checksum {
                problems.push(ProfileProblem::ChecksumMismatch {
                    profile_key,
                    recorded: data.checksum(),
                    live: live.checksum,
                });
                continue;
            }
            if data.num_method_ids() != live.num_method_ids {
                problems.push(ProfileProblem::MethodCountMismatch {
                    profile_key: profile_key.clone(),
                    recorded: data.num_method_ids(),
                    live: live.num_method_ids,
                });
            }

            let methods = data
                .hot_methods()
                .keys()
                .copied()
                .chain(data.startup_methods())
                .chain(data.post_startup_methods());
            for method_index in methods {
                if u32::from(method_index) >= live.num_method_ids {
                    problems.push(ProfileProblem::MethodOutOfRange {
                        profile_key: profile_key.clone(),
                        method_index,
                        num_method_ids: live.num_method_ids,
                    });
                }
            }

            for &type_index in data.classes() {
                if u32::from(type_index) >= live.num_type_ids {
                    problems.push(ProfileProblem::ClassOutOfRange {
                        profile_key: profile_key.clone(),
                        type_index,
                        num_type_ids: live.num_type_ids,
                    });
                }
            }

            for (&method_index, caches) in data.hot_methods() {
                for (&dex_pc, site) in caches {
                    for class in site.classes() {
                        let Some(owner) = self.file_data(class.dex_profile_index) else {
                            problems.push(ProfileProblem::DanglingInlineCacheReference {
                                profile_key: profile_key.clone(),
                                method_index,
                                dex_pc,
                                dex_profile_index: class.dex_profile_index,
                            });
                            continue;
                        };
                        let Some(owner_live) = live_by_key.get(owner.profile_key()) else {
                            continue;
                        };
                        if u32::from(class.type_index) >= owner_live.num_type_ids {
                            problems.push(ProfileProblem::InlineCacheClassOutOfRange {
                                profile_key: profile_key.clone(),
                                method_index,
                                dex_pc,
                                class_profile_key: owner.profile_key().to_string(),
                                type_index: class.type_index,
                                num_type_ids: owner_live.num_type_ids,
                            });
                        }
                    }
                }
            }
        }
        problems
    }
}

/// Verifier for profiles about to be used by a compiler
pub struct ProfileVerifier {
    /// Fail on the first problem instead of logging it
    strict: bool,
}

impl ProfileVerifier {
    /// Create a strict verifier
    pub fn new() -> Self {
        Self { strict: true }
    }

    /// Create a verifier that only logs problems
    pub fn permissive() -> Self {
        Self { strict: false }
    }

    /// Verify `info` against `live_files`. Strict mode turns the first problem
    /// into an error; permissive mode logs every problem and returns them.
    pub fn verify(
        &self,
        info: &ProfileInfo,
        live_files: &[DexFileInfo],
    ) -> Result<Vec<ProfileProblem>> {
        let problems = info.verify_profile_data(live_files);
        if let Some(first) = problems.first() {
            if self.strict {
                return Err(ProfileError::BadData(first.to_string()));
            }
            for problem in &problems {
                tracing::warn!("Profile verification failed: {}", problem);
            }
        }
        Ok(problems)
    }
}

impl Default for ProfileVerifier {
    fn default() -> Self {
        Self::new()
    }
}
