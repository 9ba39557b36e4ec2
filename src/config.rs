use std::path::PathBuf;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::transfer::DEFAULT_TEMPLATE;

/// Application configuration loaded from TOML config file.
/// Every field has a default; the config file is optional and CLI flags
/// override whatever it sets.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Directories to scan when a command gets no paths.
    pub music_dirs: Vec<PathBuf>,
    /// Root of the mirror library.
    pub library: Option<PathBuf>,
    /// Directory levels to descend below each music dir. Unset = unbounded.
    pub max_depth: Option<usize>,
    /// Number of parallel tag readers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    /// Filter expressions applied when no `--filter` is given.
    pub filters: Vec<String>,
    /// UTC offset for date flags, e.g. "+02:00". Unset = local timezone.
    pub timezone: Option<String>,
    /// Where `download` writes songs.
    pub download_template: String,
    pub exclude: ExcludeConfig,
    pub compare: CompareConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            music_dirs: Vec::new(),
            library: None,
            max_depth: None,
            workers: 0,
            filters: Vec::new(),
            timezone: None,
            download_template: DEFAULT_TEMPLATE.to_string(),
            exclude: ExcludeConfig::default(),
            compare: CompareConfig::default(),
        }
    }
}

/// Path exclusion rules, merged with the `--exclude-*` flags.
#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct ExcludeConfig {
    pub paths: Vec<String>,
    pub regexes: Vec<String>,
    pub globs: Vec<String>,
}

/// Default comparison identities; `--use-*`/`--no-use-*` override them.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompareConfig {
    pub hash: bool,
    pub metadata: bool,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            hash: true,
            metadata: true,
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/tunesync/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        let config_path = Self::config_path();
        match config_path {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match Self::parse(&contents) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        config
                    }
                    Err(e) => {
                        log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    /// Get the config file path.
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}
