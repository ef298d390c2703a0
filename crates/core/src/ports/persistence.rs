use crate::domain::Group;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Configuration store interface
pub trait ConfigStore: Send + Sync {
    /// Load configuration from storage
    fn load(&self) -> Result<AppConfig>;

    /// Save configuration to storage
    fn save(&self, config: &AppConfig) -> Result<()>;
}

/// Per-directory application configuration.
///
/// Every field has a default so unknown keys are ignored and missing ones
/// filled in. Plain values are declared before tables to keep TOML output valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub version: u32,
    pub base_dir: PathBuf,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub group_order: Vec<String>,
    pub ui: UiConfig,
    pub groups: BTreeMap<String, Vec<PathBuf>>,
}

/// UI configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub show_ahead_behind: bool,
    pub autosave_on_exit: bool,
}

impl AppConfig {
    pub fn for_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    /// Groups as domain values
    pub fn domain_groups(&self) -> BTreeMap<String, Group> {
        self.groups
            .iter()
            .map(|(name, repos)| (name.clone(), Group::with_repos(name.clone(), repos.clone())))
            .collect()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: 1,
            base_dir: PathBuf::new(),
            group_order: Vec::new(),
            ui: UiConfig::default(),
            groups: BTreeMap::new(),
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            show_ahead_behind: true,
            autosave_on_exit: true,
        }
    }
}
