//! Synthetic profiles for tests and benchmarks

use crate::error::{ProfileError, Result};
use crate::file_data::MAX_METHOD_IDS;
use crate::profile::ProfileInfo;
use crate::types::{
    DexFileInfo, MethodFlags, ProfileInlineCache, ProfileMethodInfo, TypeReference,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Shape of a randomly generated profile
#[derive(Debug, Clone)]
pub struct RandomProfileOptions {
    pub number_of_dex_files: u8,
    /// Chance, in percent, that a method gets any flag
    pub method_percentage: u8,
    /// Chance, in percent, that a class is recorded
    pub class_percentage: u8,
    pub num_method_ids: u32,
    pub num_type_ids: u32,
    pub seed: u64,
}

impl Default for RandomProfileOptions {
    fn default() -> Self {
        Self {
            number_of_dex_files: 2,
            method_percentage: 5,
            class_percentage: 5,
            num_method_ids: 1 << 10,
            num_type_ids: 1 << 8,
            seed: 0,
        }
    }
}

/// Generate a profile over made-up dex files
pub fn generate_random_profile(options: &RandomProfileOptions) -> Result<ProfileInfo> {
    let mut rng = StdRng::seed_from_u64(options.seed);
    let live_files: Vec<DexFileInfo> = (0..options.number_of_dex_files)
        .map(|i| {
            DexFileInfo::new(
                format!("/generated/random{}.dex", i),
                rng.gen(),
                options.num_method_ids,
                options.num_type_ids,
            )
        })
        .collect();
    populate(
        &live_files,
        options.method_percentage,
        options.class_percentage,
        &mut rng,
    )
}

/// Generate a profile whose keys and index ranges match real dex files
pub fn generate_test_profile_with_input_dex(
    live_files: &[DexFileInfo],
    method_percentage: u8,
    class_percentage: u8,
    seed: u64,
) -> Result<ProfileInfo> {
    let mut rng = StdRng::seed_from_u64(seed);
    populate(live_files, method_percentage, class_percentage, &mut rng)
}

fn populate(
    live_files: &[DexFileInfo],
    method_percentage: u8,
    class_percentage: u8,
    rng: &mut StdRng,
) -> Result<ProfileInfo> {
    if method_percentage > 100 || class_percentage > 100 {
        return Err(ProfileError::Config(format!(
            "percentages must be at most 100, got {} and {}",
            method_percentage, class_percentage
        )));
    }

    let mut info = ProfileInfo::new();
    for live in live_files {
        let key = live.key();
        info.get_or_add_file_data(&key)?;

        let num_methods = live.num_method_ids.min(MAX_METHOD_IDS);
        for method_index in 0..num_methods {
            if rng.gen_range(0..100) >= method_percentage {
                continue;
            }
            let flags = MethodFlags::from_bits_truncate(rng.gen_range(1..8));
            let mut method = ProfileMethodInfo::new(key.clone(), method_index as u16);
            if flags.contains(MethodFlags::HOT) && rng.gen_bool(0.25) {
                method.inline_caches = random_inline_caches(live_files, rng);
            }
            info.add_method(&method, flags)?;
        }

        let num_types = live.num_type_ids.min(MAX_METHOD_IDS);
        let classes: Vec<u16> = (0..num_types)
            .filter(|_| rng.gen_range(0..100) < class_percentage)
            .map(|type_index| type_index as u16)
            .collect();
        info.add_classes_for_dex(&key, classes)?;
    }
    Ok(info)
}

fn random_inline_caches(live_files: &[DexFileInfo], rng: &mut StdRng) -> Vec<ProfileInlineCache> {
    let site_count = rng.gen_range(1..=3);
    (0..site_count)
        .map(|_| {
            let dex_pc = rng.gen_range(0..0x100);
            if rng.gen_bool(0.1) {
                return ProfileInlineCache::missing_types(dex_pc);
            }
            let classes = (0..rng.gen_range(1..=3))
                .filter_map(|_| {
                    let owner = &live_files[rng.gen_range(0..live_files.len())];
                    let num_types = owner.num_type_ids.min(MAX_METHOD_IDS);
                    (num_types > 0).then(|| {
                        TypeReference::new(owner.key(), rng.gen_range(0..num_types) as u16)
                    })
                })
                .collect();
            ProfileInlineCache::new(dex_pc, classes)
        })
        .collect()
}
