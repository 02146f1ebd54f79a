use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

use crate::offline::DEFAULT_MANIFEST;
use crate::page::DEFAULT_CATALOG_PATH;
use crate::pattern::PatternId;
use crate::session::{
    DEFAULT_BOX_SECS, DEFAULT_SESSION_MINUTES, MAX_BOX_SECS, MAX_SESSION_MINUTES, MIN_BOX_SECS,
    MIN_SESSION_MINUTES,
};

pub const DEFAULT_SHELL_VERSION: &str = "resonant-v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShellConfig {
    /// Origin the app shell is served from; no origin means no offline shell.
    pub origin: Option<Url>,
    /// Bumping this is the deploy signal.
    pub version: String,
    pub manifest: Vec<String>,
    pub catalog_path: String,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            origin: None,
            version: DEFAULT_SHELL_VERSION.to_string(),
            manifest: DEFAULT_MANIFEST.iter().map(|s| s.to_string()).collect(),
            catalog_path: DEFAULT_CATALOG_PATH.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub pattern: PatternId,
    pub box_duration_secs: u64,
    pub session_minutes: u32,
    pub sound: bool,
    pub shell: ShellConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pattern: PatternId::Box,
            box_duration_secs: DEFAULT_BOX_SECS,
            session_minutes: DEFAULT_SESSION_MINUTES,
            sound: true,
            shell: ShellConfig::default(),
        }
    }
}

impl Config {
    /// Pulls hand-edited values back into the slider ranges.
    pub fn clamped(mut self) -> Self {
        self.box_duration_secs = self.box_duration_secs.clamp(MIN_BOX_SECS, MAX_BOX_SECS);
        self.session_minutes = self
            .session_minutes
            .clamp(MIN_SESSION_MINUTES, MAX_SESSION_MINUTES);
        if self.shell.version.trim().is_empty() {
            self.shell.version = DEFAULT_SHELL_VERSION.to_string();
        }
        if self.shell.manifest.is_empty() {
            self.shell.manifest = ShellConfig::default().manifest;
        }
        self
    }
}

pub trait ConfigStore {
    fn load(&self) -> Config;
    fn save(&self, cfg: &Config) -> std::io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let path = if let Some(pd) = ProjectDirs::from("", "", "resonant") {
            pd.config_dir().join("config.json")
        } else {
            PathBuf::from("resonant_config.json")
        };
        Self { path }
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Config {
        let Ok(bytes) = fs::read(&self.path) else {
            return Config::default();
        };
        match serde_json::from_slice::<Config>(&bytes) {
            Ok(cfg) => cfg.clamped(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "unreadable config, using defaults");
                Config::default()
            }
        }
    }

    fn save(&self, cfg: &Config) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(cfg)?;
        fs::write(&self.path, data)
    }
}
