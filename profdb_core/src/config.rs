//! Tunable limits for profile containers

use crate::error::{ProfileError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Largest per-site receiver cap the encoding can carry. The per-site class
/// count is one byte and its two top values mark megamorphic and
/// missing-types sites.
pub const MAX_INLINE_CACHE_LIMIT: usize = 0xFD;

/// Operational knobs for a profile container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    /// Distinct receiver classes kept per call site before it turns megamorphic
    pub inline_cache_limit: usize,

    /// Uncompressed body size above which a warning is logged
    pub size_warning_threshold: usize,

    /// Uncompressed body size above which an error is logged
    pub size_error_threshold: usize,

    /// zlib level used when saving (0-9)
    pub compression_level: u32,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            inline_cache_limit: 5,
            size_warning_threshold: 500_000,
            size_error_threshold: 1_000_000,
            compression_level: 6,
        }
    }
}

impl ProfileConfig {
    /// Load a configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Load a configuration from a YAML string. Missing keys use defaults.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: ProfileConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_inline_cache_limit(mut self, limit: usize) -> Self {
        self.inline_cache_limit = limit;
        self
    }

    /// Check that every knob is representable and consistent
    pub fn validate(&self) -> Result<()> {
        if self.inline_cache_limit == 0 || self.inline_cache_limit > MAX_INLINE_CACHE_LIMIT {
            return Err(ProfileError::Config(format!(
                "inline_cache_limit must be in 1..={}, got {}",
                MAX_INLINE_CACHE_LIMIT, self.inline_cache_limit
            )));
        }

        if self.size_warning_threshold > self.size_error_threshold {
            return Err(ProfileError::Config(format!(
                "size_warning_threshold ({}) exceeds size_error_threshold ({})",
                self.size_warning_threshold, self.size_error_threshold
            )));
        }

        if self.compression_level > 9 {
            return Err(ProfileError::Config(format!(
                "compression_level must be 0-9, got {}",
                self.compression_level
            )));
        }

        Ok(())
    }
}
