//! Runtime sampling feed for profiles

use profdb_core::{
    DexFileKey, MethodFlags, ProfileInfo, ProfileInlineCache, ProfileMethodInfo, Result,
    TypeReference,
};
use profdb_core::types::{DexPc, MethodIndex};
use std::collections::BTreeMap;

type MethodKey = (DexFileKey, MethodIndex);

#[derive(Debug, Default)]
struct PendingMethod {
    count: usize,
    flags: MethodFlags,
    inline_caches: Vec<ProfileInlineCache>,
}

/// Tracks execution counts and call-site receivers, and flushes them into a
/// profile container
pub struct HotMethodSampler {
    /// Methods seen since the last flush
    pending: BTreeMap<MethodKey, PendingMethod>,
    /// Executions after which a method is hot
    hot_threshold: usize,
    /// Executions are attributed to startup until this is set
    startup_complete: bool,
}

impl HotMethodSampler {
    /// Create a sampler with the default threshold
    pub fn new() -> Self {
        Self::with_threshold(100)
    }

    /// Create a sampler with a custom threshold
    pub fn with_threshold(threshold: usize) -> Self {
        Self {
            pending: BTreeMap::new(),
            hot_threshold: threshold.max(1),
            startup_complete: false,
        }
    }

    /// Executions from now on count as post-startup
    pub fn mark_startup_complete(&mut self) {
        self.startup_complete = true;
    }

    /// Record an execution. Returns true once the method is hot.
    pub fn record_execution(&mut self, dex: &DexFileKey, method_index: MethodIndex) -> bool {
        let phase = if self.startup_complete {
            MethodFlags::POST_STARTUP
        } else {
            MethodFlags::STARTUP
        };
        let threshold = self.hot_threshold;
        let method = self
            .pending
            .entry((dex.clone(), method_index))
            .or_default();
        method.count += 1;
        method.flags |= phase;
        if method.count >= threshold {
            method.flags |= MethodFlags::HOT;
        }
        method.flags.contains(MethodFlags::HOT)
    }

    /// Record receivers observed at a call site
    pub fn record_inline_cache(
        &mut self,
        dex: &DexFileKey,
        method_index: MethodIndex,
        dex_pc: DexPc,
        receivers: Vec<TypeReference>,
    ) {
        self.pending
            .entry((dex.clone(), method_index))
            .or_default()
            .inline_caches
            .push(ProfileInlineCache::new(dex_pc, receivers));
    }

    /// Record a call site whose receiver could not be attributed to a dex file
    pub fn record_missing_types(&mut self, dex: &DexFileKey, method_index: MethodIndex, dex_pc: DexPc) {
        self.pending
            .entry((dex.clone(), method_index))
            .or_default()
            .inline_caches
            .push(ProfileInlineCache::missing_types(dex_pc));
    }

    /// Check if a method has become hot since the last flush
    pub fn is_hot(&self, dex: &DexFileKey, method_index: MethodIndex) -> bool {
        self.pending
            .get(&(dex.clone(), method_index))
            .is_some_and(|m| m.flags.contains(MethodFlags::HOT))
    }

    /// Get the execution count for a method since the last flush
    pub fn get_count(&self, dex: &DexFileKey, method_index: MethodIndex) -> usize {
        self.pending
            .get(&(dex.clone(), method_index))
            .map(|m| m.count)
            .unwrap_or(0)
    }

    /// Write everything sampled so far into `profile`.
    ///
    /// Inline caches of methods that never became hot are dropped. Pending
    /// data is only discarded once every method was accepted; returns the
    /// number of methods written.
    pub fn flush_into(&mut self, profile: &mut ProfileInfo) -> Result<usize> {
        let mut written = 0;
        for ((dex, method_index), method) in &self.pending {
            if method.flags.is_empty() && method.inline_caches.is_empty() {
                continue;
            }
            let inline_caches = if method.flags.contains(MethodFlags::HOT) {
                method.inline_caches.clone()
            } else {
                Vec::new()
            };
            let info =
                ProfileMethodInfo::with_inline_caches(dex.clone(), *method_index, inline_caches);
            profile.add_method(&info, method.flags)?;
            written += 1;
        }
        tracing::debug!("Flushed {} sampled methods into profile", written);
        self.pending.clear();
        Ok(written)
    }

    /// Forget everything sampled since the last flush
    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

impl Default for HotMethodSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dex() -> DexFileKey {
        DexFileKey::new("/data/app/base.apk", 0xabc, 50)
    }

    #[test]
    fn test_hot_path_detection() {
        let mut sampler = HotMethodSampler::with_threshold(10);

        // Not hot yet
        for _ in 0..9 {
            assert!(!sampler.record_execution(&dex(), 4));
        }

        // Now it's hot
        assert!(sampler.record_execution(&dex(), 4));
        assert!(sampler.is_hot(&dex(), 4));
        assert_eq!(sampler.get_count(&dex(), 4), 10);
    }

    #[test]
    fn test_separate_tracking() {
        let mut sampler = HotMethodSampler::with_threshold(5);

        for _ in 0..5 {
            sampler.record_execution(&dex(), 1);
        }

        assert!(sampler.is_hot(&dex(), 1));
        assert!(!sampler.is_hot(&dex(), 2));
    }

    #[test]
    fn test_flush_records_phases_and_caches() {
        let mut sampler = HotMethodSampler::with_threshold(2);
        sampler.record_execution(&dex(), 1);
        sampler.mark_startup_complete();
        sampler.record_execution(&dex(), 1);
        sampler.record_execution(&dex(), 2);
        sampler.record_inline_cache(&dex(), 1, 0x6, vec![TypeReference::new(dex(), 3)]);
        sampler.record_missing_types(&dex(), 2, 0x8);

        let mut profile = ProfileInfo::new();
        assert_eq!(sampler.flush_into(&mut profile).unwrap(), 2);
        assert_eq!(sampler.get_count(&dex(), 1), 0);

        let hot = profile.get_method_hotness("base.apk", 0xabc, 1);
        assert!(hot.is_hot() && hot.is_startup() && hot.is_post_startup());
        assert_eq!(hot.inline_caches().unwrap()[&0x6].classes().len(), 1);

        // Method 2 never got hot, so its call site is not kept
        let cold = profile.get_method_hotness("base.apk", 0xabc, 2);
        assert!(cold.is_post_startup());
        assert!(!cold.is_hot());
        assert!(cold.inline_caches().is_none());
    }

    #[test]
    fn test_failed_flush_keeps_samples() {
        let mut sampler = HotMethodSampler::with_threshold(1);
        sampler.record_execution(&dex(), 60);

        let mut profile = ProfileInfo::new();
        assert!(sampler.flush_into(&mut profile).is_err());
        assert_eq!(sampler.get_count(&dex(), 60), 1);
    }
}
