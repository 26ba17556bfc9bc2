//! Compile planning from profile data
//!
//! Turns profile lookups for one live dex file into the set of methods worth
//! compiling ahead of time plus the call sites that can be specialized.

use profdb_core::types::{DexPc, MethodIndex, TypeIndex};
use profdb_core::{ClassesAndMethods, DexFileInfo, ProfileInfo, SiteState};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("{0} is not tracked by the profile")]
    UnknownFile(String),

    #[error("profile for {profile_key} is stale: recorded checksum {recorded:#x}, live {live:#x}")]
    StaleProfile {
        profile_key: String,
        recorded: u32,
        live: u32,
    },
}

/// A call site with few enough receivers to specialize for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Specialization {
    pub method_index: MethodIndex,
    pub dex_pc: DexPc,
    /// Receivers as (profile key of the owning file, type index)
    pub receivers: Vec<(String, TypeIndex)>,
}

/// What to compile for one dex file
#[derive(Debug, Clone)]
pub struct CompilePlan {
    pub profile_key: String,
    pub checksum: u32,
    pub methods: ClassesAndMethods,
    pub specializations: Vec<Specialization>,
    /// Planning timestamp
    pub planned_at: Instant,
}

impl CompilePlan {
    /// Methods to compile, in index order
    pub fn methods_to_compile(&self) -> impl Iterator<Item = MethodIndex> + '_ {
        self.methods.hot_methods.iter().copied()
    }
}

/// Builds and caches compile plans against a borrowed profile
pub struct CompilationPlanner<'p> {
    profile: &'p ProfileInfo,
    /// Cache of plans by profile key and checksum
    cache: HashMap<(String, u32), CompilePlan>,
    /// Sites with more receivers than this are not specialized
    max_receivers: usize,
}

impl<'p> CompilationPlanner<'p> {
    pub fn new(profile: &'p ProfileInfo) -> Self {
        Self::with_max_receivers(profile, 2)
    }

    /// Create a planner that specializes sites with up to `max_receivers`
    /// classes
    pub fn with_max_receivers(profile: &'p ProfileInfo, max_receivers: usize) -> Self {
        Self {
            profile,
            cache: HashMap::new(),
            max_receivers: max_receivers.max(1),
        }
    }

    /// Plan compilation of a live dex file
    pub fn plan(&mut self, dex: &DexFileInfo) -> Result<&CompilePlan, PlanError> {
        let profile = self.profile;
        let max_receivers = self.max_receivers;
        match self.cache.entry((dex.profile_key(), dex.checksum)) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let plan = build_plan(profile, dex, max_receivers)?;
                tracing::info!(
                    "Planned {} hot methods and {} specialized sites for {}",
                    plan.methods.hot_methods.len(),
                    plan.specializations.len(),
                    plan.profile_key
                );
                Ok(entry.insert(plan))
            }
        }
    }

    /// True if the profile marks the method hot for this exact dex file
    pub fn should_compile(&self, dex: &DexFileInfo, method_index: MethodIndex) -> bool {
        self.profile
            .get_method_hotness(&dex.location, dex.checksum, method_index)
            .is_hot()
    }

    /// Check if a plan for this file is cached
    pub fn is_planned(&self, dex: &DexFileInfo) -> bool {
        self.cache.contains_key(&(dex.profile_key(), dex.checksum))
    }

    pub fn get_plan(&self, dex: &DexFileInfo) -> Option<&CompilePlan> {
        self.cache.get(&(dex.profile_key(), dex.checksum))
    }

    /// Clear the plan cache
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Get cache statistics
    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            entries: self.cache.len(),
            oldest: self.cache.values().map(|p| p.planned_at).min(),
        }
    }
}

fn build_plan(
    profile: &ProfileInfo,
    dex: &DexFileInfo,
    max_receivers: usize,
) -> Result<CompilePlan, PlanError> {
    let profile_key = dex.profile_key();
    let Some(data) = profile.find_file_data(dex) else {
        return Err(match profile.find_by_profile_key(&profile_key) {
            Some(recorded) => PlanError::StaleProfile {
                profile_key,
                recorded: recorded.checksum(),
                live: dex.checksum,
            },
            None => PlanError::UnknownFile(profile_key),
        });
    };

    let mut specializations = Vec::new();
    for (&method_index, caches) in data.hot_methods() {
        for (&dex_pc, site) in caches {
            let SiteState::Classes(classes) = site.state() else {
                continue;
            };
            if classes.is_empty() || classes.len() > max_receivers {
                continue;
            }
            let receivers = classes
                .iter()
                .filter_map(|class| {
                    profile
                        .file_data(class.dex_profile_index)
                        .map(|owner| (owner.profile_key().to_string(), class.type_index))
                })
                .collect();
            specializations.push(Specialization {
                method_index,
                dex_pc,
                receivers,
            });
        }
    }

    let methods = profile
        .get_classes_and_methods(dex)
        .unwrap_or_default();
    Ok(CompilePlan {
        profile_key,
        checksum: data.checksum(),
        methods,
        specializations,
        planned_at: Instant::now(),
    })
}

/// Statistics about the plan cache
pub struct CacheStats {
    /// Number of cached entries
    pub entries: usize,
    /// Oldest planning timestamp
    pub oldest: Option<Instant>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use profdb_core::{
        DexFileKey, MethodFlags, ProfileConfig, ProfileInlineCache, ProfileMethodInfo,
        TypeReference,
    };

    fn live() -> DexFileInfo {
        DexFileInfo::new("/data/app/base.apk", 0x42, 20, 10)
    }

    fn other() -> DexFileKey {
        DexFileKey::new("/system/framework/core.jar", 0x7, 40)
    }

    fn profile() -> ProfileInfo {
        let config = ProfileConfig::default().with_inline_cache_limit(3);
        let mut profile = ProfileInfo::with_config(config).unwrap();
        let key = live().key();
        profile
            .add_method(
                &ProfileMethodInfo::with_inline_caches(
                    key.clone(),
                    3,
                    vec![
                        ProfileInlineCache::new(0x4, vec![TypeReference::new(other(), 9)]),
                        ProfileInlineCache::new(
                            0x8,
                            (0..3).map(|t| TypeReference::new(key.clone(), t)).collect(),
                        ),
                        ProfileInlineCache::missing_types(0xc),
                    ],
                ),
                MethodFlags::HOT,
            )
            .unwrap();
        profile
            .add_method_index(MethodFlags::STARTUP, &key, 5)
            .unwrap();
        profile
    }

    #[test]
    fn test_plan_caching() {
        let profile = profile();
        let mut planner = CompilationPlanner::new(&profile);

        // First plan
        assert!(!planner.is_planned(&live()));
        planner.plan(&live()).unwrap();
        assert!(planner.is_planned(&live()));

        // Should be cached
        planner.plan(&live()).unwrap();
        let stats = planner.cache_stats();
        assert_eq!(stats.entries, 1);
        assert!(stats.oldest.is_some());

        planner.clear_cache();
        assert_eq!(planner.cache_stats().entries, 0);
    }

    #[test]
    fn test_plan_contents() {
        let profile = profile();
        let mut planner = CompilationPlanner::new(&profile);
        let plan = planner.plan(&live()).unwrap();

        assert_eq!(plan.methods_to_compile().collect::<Vec<_>>(), vec![3]);
        assert!(plan.methods.startup_methods.contains(&5));

        // Only the single-receiver site qualifies
        assert_eq!(
            plan.specializations,
            vec![Specialization {
                method_index: 3,
                dex_pc: 0x4,
                receivers: vec![("core.jar".to_string(), 9)],
            }]
        );
    }

    #[test]
    fn test_wider_receiver_limit() {
        let profile = profile();
        let mut planner = CompilationPlanner::with_max_receivers(&profile, 3);
        let plan = planner.plan(&live()).unwrap();
        assert_eq!(plan.specializations.len(), 2);
    }

    #[test]
    fn test_should_compile() {
        let profile = profile();
        let planner = CompilationPlanner::new(&profile);
        assert!(planner.should_compile(&live(), 3));
        assert!(!planner.should_compile(&live(), 5));

        let rebuilt = DexFileInfo::new("/data/app/base.apk", 0x43, 20, 10);
        assert!(!planner.should_compile(&rebuilt, 3));
    }

    #[test]
    fn test_unknown_and_stale_files() {
        let profile = profile();
        let mut planner = CompilationPlanner::new(&profile);

        let unknown = DexFileInfo::new("/data/app/other.apk", 1, 5, 5);
        assert_eq!(
            planner.plan(&unknown).unwrap_err(),
            PlanError::UnknownFile("other.apk".to_string())
        );

        let rebuilt = DexFileInfo::new("/data/app/base.apk", 0x43, 20, 10);
        assert_eq!(
            planner.plan(&rebuilt).unwrap_err(),
            PlanError::StaleProfile {
                profile_key: "base.apk".to_string(),
                recorded: 0x42,
                live: 0x43,
            }
        );
        assert_eq!(planner.cache_stats().entries, 0);
    }
}
