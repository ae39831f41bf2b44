//! Cache configuration

use crate::cache::{CacheFlags, CacheOptions, DEFAULT_LARGE_DIR_THRESHOLD};
use crate::error::{CacheError, Result};
use crate::native::{StdFs, DEFAULT_BATCH_SIZE};
use crate::path::DEFAULT_MAX_PATH_LEN;
use directories::ProjectDirs;
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub cache: CacheSection,
    pub native: NativeSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    /// Create Missing nodes for components that do not exist
    pub cache_missing_objects: bool,
    /// Memoize failed lookups in the path hash index
    pub cache_missing_paths: bool,
    /// Children count above which a directory gets a name index
    pub large_dir_threshold: usize,
    pub max_path_len: usize,
    /// encoding_rs label for narrow (ANSI) lookups, e.g. "windows-1252"
    pub ansi_code_page: String,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            cache_missing_objects: true,
            cache_missing_paths: true,
            large_dir_threshold: DEFAULT_LARGE_DIR_THRESHOLD,
            max_path_len: DEFAULT_MAX_PATH_LEN,
            ansi_code_page: "windows-1252".to_string(),
        }
    }
}

/// Settings for the portable `std::fs` backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NativeSection {
    /// Entries returned per enumeration call
    pub enum_batch_size: usize,
    /// Directory relative lookups resolve against, e.g. "C:\\src"
    pub working_dir: Option<String>,
    /// Drive letter -> host directory
    pub drive_map: BTreeMap<char, PathBuf>,
}

impl Default for NativeSection {
    fn default() -> Self {
        Self {
            enum_batch_size: DEFAULT_BATCH_SIZE,
            working_dir: None,
            drive_map: BTreeMap::new(),
        }
    }
}

impl CacheConfig {
    /// Load from the per-user config file, or defaults if there is none
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!("Using default cache configuration");
            Ok(Self::default())
        }
    }

    /// Load from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        tracing::info!("Configuration loaded from {:?}", path);
        Ok(config)
    }

    /// Save to the per-user config file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::info!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Get the configuration file path
    pub fn config_path() -> PathBuf {
        ProjectDirs::from("org", "dircache", "dircache")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("./dircache.toml"))
    }

    pub fn flags(&self) -> CacheFlags {
        CacheFlags {
            cache_missing_objects: self.cache.cache_missing_objects,
            cache_missing_paths: self.cache.cache_missing_paths,
        }
    }

    /// Cache options; fails on an unknown code page label
    pub fn options(&self) -> Result<CacheOptions> {
        let ansi_encoding = Encoding::for_label(self.cache.ansi_code_page.as_bytes())
            .ok_or_else(|| CacheError::UnknownEncoding(self.cache.ansi_code_page.clone()))?;

        Ok(CacheOptions {
            flags: self.flags(),
            large_dir_threshold: self.cache.large_dir_threshold,
            max_path_len: self.cache.max_path_len,
            ansi_encoding,
        })
    }

    /// Portable backend configured from the `[native]` section
    pub fn std_fs(&self) -> StdFs {
        let mut fs = StdFs::new().with_batch_size(self.native.enum_batch_size);
        for (&letter, root) in &self.native.drive_map {
            fs = fs.with_drive(letter, root.clone());
        }
        if let Some(cwd) = &self.native.working_dir {
            fs = fs.with_working_dir(cwd.clone());
        }
        fs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.flags(), CacheFlags::default());

        let options = config.options().unwrap();
        assert_eq!(options.ansi_encoding, encoding_rs::WINDOWS_1252);
        assert_eq!(options.max_path_len, DEFAULT_MAX_PATH_LEN);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: CacheConfig = toml::from_str(
            r#"
            [cache]
            cache_missing_paths = false
            ansi_code_page = "shift_jis"

            [native.drive_map]
            T = "/srv/tree"
            "#,
        )
        .unwrap();

        assert!(config.cache.cache_missing_objects);
        assert!(!config.flags().cache_missing_paths);
        assert_eq!(config.options().unwrap().ansi_encoding, encoding_rs::SHIFT_JIS);
        assert_eq!(config.native.enum_batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.native.drive_map.get(&'T'), Some(&PathBuf::from("/srv/tree")));
        assert_eq!(
            config.std_fs().host_path("T:\\a").unwrap(),
            Path::new("/srv/tree").join("a")
        );
    }

    #[test]
    fn test_unknown_code_page() {
        let mut config = CacheConfig::default();
        config.cache.ansi_code_page = "klingon".to_string();
        assert!(matches!(config.options(), Err(CacheError::UnknownEncoding(_))));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = CacheConfig::default();
        config.cache.large_dir_threshold = 8;
        config.native.working_dir = Some("D:\\work".to_string());
        config.save_to(&path).unwrap();

        assert_eq!(CacheConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[cache\nbroken").unwrap();
        assert!(matches!(
            CacheConfig::load_from(&path),
            Err(CacheError::ConfigParse(_))
        ));
    }
}
