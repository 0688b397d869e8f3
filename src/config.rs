use std::env::VarError;
use std::path::{Path, PathBuf};

use pcitop_core::DEFAULT_SYSFS_ROOT;
use pcitop_ids::DEFAULT_DATABASE_PATHS;

pub const SYSFS_ROOT_ENV: &str = "PCITOP_SYSFS_ROOT";
pub const PCI_IDS_ENV: &str = "PCITOP_PCI_IDS";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Root of the live bus and device namespaces.
    pub sysfs_root: PathBuf,
    /// Name database; `None` when none was configured and no default install exists.
    pub pci_ids: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name))
    }

    fn from_lookup(lookup: impl Fn(&str) -> Result<String, VarError>) -> Result<Self, ConfigError> {
        let sysfs_root = read_var(&lookup, SYSFS_ROOT_ENV)?
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SYSFS_ROOT));
        let pci_ids = match read_var(&lookup, PCI_IDS_ENV)? {
            Some(path) => Some(PathBuf::from(path)),
            None => default_pci_ids(),
        };
        Ok(Self {
            sysfs_root,
            pci_ids,
        })
    }
}

fn read_var(
    lookup: &impl Fn(&str) -> Result<String, VarError>,
    name: &'static str,
) -> Result<Option<String>, ConfigError> {
    match lookup(name) {
        Ok(value) if value.is_empty() => Err(ConfigError::InvalidEnv(name)),
        Ok(value) => Ok(Some(value)),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(ConfigError::InvalidEnv(name)),
    }
}

fn default_pci_ids() -> Option<PathBuf> {
    DEFAULT_DATABASE_PATHS
        .iter()
        .map(Path::new)
        .find(|path| path.is_file())
        .map(Path::to_path_buf)
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidEnv(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidEnv(var) => write!(f, "invalid value for env var {var}"),
        }
    }
}

impl std::error::Error for ConfigError {}
