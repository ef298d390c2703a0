use crate::adapters::discovery::{auto_groups, walk_repositories};
use anyhow::{Context, Result};
use gitagrip_core::ports::{AppConfig, ConfigStore};
use std::fs;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Per-directory configuration file name
pub const CONFIG_FILE_NAME: &str = ".gitagrip.toml";

/// File-based configuration store that implements ConfigStore
pub struct FileConfigStore {
    config_path: PathBuf,
}

/// Result of [`FileConfigStore::load_or_init`]
#[derive(Debug)]
pub struct LoadedConfig {
    pub config: AppConfig,
    /// The file did not exist and was generated
    pub created: bool,
    /// Why the file on disk was ignored, to be reported once the UI runs
    pub problem: Option<String>,
}

impl FileConfigStore {
    /// Store for `.gitagrip.toml` inside `base_dir`
    pub fn for_base_dir(base_dir: &Path) -> Self {
        Self::with_path(base_dir.join(CONFIG_FILE_NAME))
    }

    pub fn with_path<P: AsRef<Path>>(config_path: P) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Load the configuration for `base_dir`, never failing.
    ///
    /// A missing file is created with groups derived from the directory
    /// layout. A malformed file is left alone and defaults are used.
    pub fn load_or_init(&self, base_dir: &Path) -> LoadedConfig {
        if !self.config_path.exists() {
            let config = initial_config(base_dir);
            if let Err(err) = self.save(&config) {
                warn!(error = %format!("{:#}", err), "could not create config file");
            } else {
                info!(path = %self.config_path.display(), groups = config.groups.len(), "created config file");
            }
            return LoadedConfig {
                config,
                created: true,
                problem: None,
            };
        }

        match self.load() {
            Ok(mut config) => {
                config.base_dir = base_dir.to_path_buf();
                LoadedConfig {
                    config,
                    created: false,
                    problem: None,
                }
            }
            Err(err) => {
                let problem = format!("{:#}", err);
                warn!(error = %problem, "ignoring unreadable config file");
                LoadedConfig {
                    config: AppConfig::for_base_dir(base_dir),
                    created: false,
                    problem: Some(problem),
                }
            }
        }
    }
}

/// First-run configuration with automatic groups
fn initial_config(base_dir: &Path) -> AppConfig {
    let mut repos = Vec::new();
    if let Err(err) = walk_repositories(base_dir, &CancellationToken::new(), &mut repos) {
        warn!(error = %err, "initial scan for automatic groups failed");
    }
    AppConfig {
        groups: auto_groups(base_dir, &repos),
        ..AppConfig::for_base_dir(base_dir)
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Result<AppConfig> {
        let contents = fs::read_to_string(&self.config_path)
            .with_context(|| format!("Failed to read config file: {}", self.config_path.display()))?;

        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", self.config_path.display()))?;

        Ok(config)
    }

    fn save(&self, config: &AppConfig) -> Result<()> {
        let contents = toml::to_string_pretty(config).context("Failed to serialize config to TOML")?;

        fs::write(&self.config_path, contents)
            .with_context(|| format!("Failed to write config file: {}", self.config_path.display()))?;

        Ok(())
    }
}
