//! Configuration system for voxcache.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from `~/.config/voxcache/config.toml` and/or
//! `.voxcache/config.toml` in the workspace directory.

use crate::hashing::HashAlgorithm;
use crate::nifti::DtypeRequest;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoxcacheConfig {
    #[serde(default)]
    pub hashing: HashingConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

/// How argument digests are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashingConfig {
    #[serde(default)]
    pub algorithm: HashAlgorithm,
    /// Hash file-region voxel data as if it were an in-memory array.
    #[serde(default = "default_true")]
    pub coerce_mmap: bool,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            algorithm: HashAlgorithm::default(),
            coerce_mmap: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Dtype applied when a caller does not ask for one.
    #[serde(default)]
    pub default_dtype: DtypeRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Root directory of memoized outputs.
    #[serde(default = "default_memory_location")]
    pub location: PathBuf,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            location: default_memory_location(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "voxcache", "voxcache")
}

fn default_memory_location() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.cache_dir().join("memory"))
        .unwrap_or_else(|| PathBuf::from(".voxcache").join("cache"))
}

/// Path of the workspace-level config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".voxcache").join("config.toml")
}

/// Path of the user-level config file, if a home directory is known.
pub fn user_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load configuration with layered merging.
///
/// Order: defaults, user config, workspace config, `VOXCACHE_*` environment
/// variables (`VOXCACHE_HASHING__ALGORITHM=sha256`), explicit overrides.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&VoxcacheConfig>,
) -> Result<VoxcacheConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(VoxcacheConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    figment = figment.merge(Env::prefixed("VOXCACHE_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Check whether any voxcache configuration file exists.
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if user_config_path().is_some_and(|p| p.exists()) {
        return true;
    }
    workspace.is_some_and(|ws| workspace_config_path(ws).exists())
}

impl VoxcacheConfig {
    /// Render as TOML, the format of the config files.
    pub fn to_toml(&self) -> Result<String, crate::error::ConfigError> {
        toml::to_string_pretty(self).map_err(|e| crate::error::ConfigError::ParseError {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nifti::DataType;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = VoxcacheConfig::default();
        assert_eq!(config.hashing.algorithm, HashAlgorithm::Blake3);
        assert!(config.hashing.coerce_mmap);
        assert_eq!(config.loader.default_dtype, DtypeRequest::Keep);
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let mut config = VoxcacheConfig::default();
        config.hashing.algorithm = HashAlgorithm::Sha256;
        config.loader.default_dtype = DtypeRequest::Exact(DataType::F64);
        let toml_str = config.to_toml().unwrap();
        let parsed: VoxcacheConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_toml_uses_field_defaults() {
        let parsed: VoxcacheConfig = toml::from_str(
            r#"
            [hashing]
            algorithm = "sha256"

            [loader]
            default_dtype = "auto"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.hashing.algorithm, HashAlgorithm::Sha256);
        assert!(parsed.hashing.coerce_mmap);
        assert_eq!(parsed.loader.default_dtype, DtypeRequest::Auto);
        assert_eq!(parsed.memory, MemoryConfig::default());
    }

    #[test]
    fn test_load_config_workspace_file() {
        let dir = TempDir::new().unwrap();
        let path = workspace_config_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            "[hashing]\ncoerce_mmap = false\n\n[memory]\nlocation = \"/tmp/voxcache-memory\"\n",
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert!(!config.hashing.coerce_mmap);
        assert_eq!(config.memory.location, PathBuf::from("/tmp/voxcache-memory"));
        assert!(config_exists(Some(dir.path())));
    }

    #[test]
    fn test_load_config_overrides_win() {
        let dir = TempDir::new().unwrap();
        let mut overrides = VoxcacheConfig::default();
        overrides.hashing.algorithm = HashAlgorithm::Sha256;
        let config = load_config(Some(dir.path()), Some(&overrides)).unwrap();
        assert_eq!(config.hashing.algorithm, HashAlgorithm::Sha256);
    }
}
