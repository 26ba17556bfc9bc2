//! Path-based loading and saving of profile files

use crate::config::ProfileConfig;
use crate::error::{ProfileErrorKind, Result};
use crate::profile::ProfileInfo;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Reads, writes and merges profile files on disk
pub struct ProfileLoader {
    /// Limits given to every container this loader creates
    config: ProfileConfig,
}

impl ProfileLoader {
    /// Create a loader with default limits
    pub fn new() -> Self {
        Self {
            config: ProfileConfig::default(),
        }
    }

    /// Create a loader with custom limits
    pub fn with_config(config: ProfileConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ProfileConfig {
        &self.config
    }

    /// Load the profile stored at `path`.
    ///
    /// With `clear_if_invalid`, a file that is corrupt or of another version is
    /// truncated and an empty profile returned instead of an error. IO errors
    /// are always reported.
    pub fn load_from_path<P: AsRef<Path>>(
        &self,
        path: P,
        clear_if_invalid: bool,
    ) -> Result<ProfileInfo> {
        let path = path.as_ref();
        let mut info = ProfileInfo::with_config(self.config.clone())?;
        let mut reader = BufReader::new(File::open(path)?);
        match info.load(&mut reader, true) {
            Ok(()) => Ok(info),
            Err(err)
                if clear_if_invalid
                    && matches!(
                        err.kind(),
                        ProfileErrorKind::BadData | ProfileErrorKind::VersionMismatch
                    ) =>
            {
                tracing::warn!("Clearing invalid profile {}: {}", path.display(), err);
                drop(reader);
                File::create(path)?;
                info.clear();
                Ok(info)
            }
            Err(err) => Err(err),
        }
    }

    /// Write `info` to `path`, replacing any previous content
    pub fn save_to_path<P: AsRef<Path>>(&self, info: &ProfileInfo, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        info.save(&mut writer)?;
        tracing::debug!(
            "Saved profile with {} files to {}",
            info.number_of_dex_files(),
            path.display()
        );
        Ok(())
    }

    /// Merge the profile stored at `path` into `info`. `info` is unchanged if
    /// the file cannot be read or conflicts with it.
    pub fn merge_from_path<P: AsRef<Path>>(
        &self,
        info: &mut ProfileInfo,
        path: P,
        merge_classes: bool,
    ) -> Result<()> {
        let other = self.load_from_path(path, false)?;
        info.merge_with(&other, merge_classes)
    }
}

impl Default for ProfileLoader {
    fn default() -> Self {
        Self::new()
    }
}
