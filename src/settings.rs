//! Configuration management for chemlog.
//!
//! Settings are read from INI files with the following precedence (later
//! entries override earlier ones):
//!
//! 1. Built-in defaults
//! 2. System configuration (`/etc/chemlog/chemlog.cfg`)
//! 3. User configuration (`~/.config/chemlog/chemlog.cfg`)
//! 4. Local configuration (`./chemlog.cfg`)
//!
//! # Configuration File Format
//!
//! ```ini
//! [scan]
//! format = cp2k
//! case_insensitive = false
//!
//! [triggers]
//! completion = PROGRAM ENDED AT
//! reset = PROGRAM STARTED AT
//!
//! [logging]
//! level = info
//! ```
//!
//! Keys in `[triggers]` replace the matching built-in trigger of the chosen
//! format: `lattice`, `atoms`, `kpoints`, `multi_geometry`, `completion`,
//! `reset`. An empty value disables an optional trigger.

use crate::builtin::LogFormat;
use crate::extractor::Trigger;
use configparser::ini::Ini;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the configuration file looked up in each location.
pub const CONFIG_FILE_NAME: &str = "chemlog.cfg";

/// Errors that can occur during configuration loading and processing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// I/O error when reading configuration files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// INI parsing error
    #[error("INI parsing error: {0}")]
    IniParse(String),
    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// All program settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    /// Scan settings
    pub scan: ScanSettings,
    /// Built-in trigger overrides, keyed by section name
    pub triggers: BTreeMap<String, String>,
    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Which log family to read and how to match triggers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanSettings {
    /// Preset name: `castep`, `cp2k` or `tight-binding` (default: castep)
    pub format: String,
    /// Match built-in triggers regardless of case (default: false)
    pub case_insensitive: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            format: "castep".to_string(),
            case_insensitive: false,
        }
    }
}

/// Logging configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level (default: "info")
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Builds the [`LogFormat`] these settings describe.
    pub fn log_format(&self) -> Result<LogFormat, ConfigError> {
        let mut format = LogFormat::by_name(&self.scan.format).ok_or_else(|| {
            ConfigError::InvalidValue(format!("Unknown log format: {}", self.scan.format))
        })?;

        for (section, pattern) in &self.triggers {
            let trigger = (!pattern.trim().is_empty()).then(|| Trigger::new(pattern.trim()));
            match section.as_str() {
                "lattice" => match trigger {
                    None => format.lattice = None,
                    Some(t) => {
                        if let Some(lattice) = format.lattice.as_mut() {
                            lattice.trigger = t;
                        } else {
                            return Err(ConfigError::InvalidValue(format!(
                                "Format {} has no unit cell layout to re-trigger",
                                format.name
                            )));
                        }
                    }
                },
                "atoms" => format.atoms = trigger,
                "kpoints" => format.kpoints = trigger,
                "multi_geometry" => format.multi_geometry = trigger,
                "reset" => format.reset = trigger,
                "completion" => {
                    format.completion = trigger.ok_or_else(|| {
                        ConfigError::InvalidValue("completion trigger cannot be empty".into())
                    })?
                }
                other => {
                    return Err(ConfigError::InvalidValue(format!(
                        "Unknown trigger override: {}",
                        other
                    )))
                }
            }
        }

        if self.scan.case_insensitive {
            format = format.ignore_case();
        }
        Ok(format)
    }
}

/// Configuration manager that handles loading and accessing program settings.
pub struct SettingsManager {
    settings: Settings,
    config_source: String,
}

impl SettingsManager {
    /// Loads configuration from the standard locations.
    ///
    /// Files that fail to parse are skipped with a warning; a missing file is
    /// not an error.
    pub fn load() -> Result<Self, ConfigError> {
        let candidates: Vec<PathBuf> = [
            Self::get_system_config_path(),
            Self::get_user_config_path(),
            Some(PathBuf::from(CONFIG_FILE_NAME)),
        ]
        .into_iter()
        .flatten()
        .collect();
        let manager = Self::load_layered(&candidates);
        info!("Configuration loaded from: {}", manager.config_source);
        Ok(manager)
    }

    /// Layers the given files over the defaults, later files winning.
    ///
    /// Only keys a file actually sets are overridden, so a file with just a
    /// `[logging]` section leaves the format chosen by an earlier file alone.
    /// Missing files are skipped, unreadable or invalid ones are skipped with
    /// a warning.
    pub fn load_layered(paths: &[PathBuf]) -> Self {
        let mut settings = Settings::default();
        let mut loaded = Vec::new();

        for path in paths.iter().filter(|p| p.exists()) {
            let mut layered = settings.clone();
            let result = fs::read_to_string(path)
                .map_err(ConfigError::from)
                .and_then(|content| Self::overlay_config(&mut layered, &content));
            match result {
                Ok(()) => {
                    settings = layered;
                    loaded.push(path.display().to_string());
                    debug!("Loaded configuration from: {}", path.display());
                }
                Err(e) => {
                    warn!("Failed to load config from {}: {}", path.display(), e);
                }
            }
        }

        let config_source = if loaded.is_empty() {
            "built-in defaults".to_string()
        } else {
            loaded.join(" + ")
        };
        Self {
            settings,
            config_source,
        }
    }

    /// Loads configuration from a single explicit file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Ok(Self {
            settings: Self::parse_config(&content)?,
            config_source: format!("explicit config ({})", path.display()),
        })
    }

    /// Returns the source of the loaded configuration.
    pub fn config_source(&self) -> &str {
        &self.config_source
    }

    /// Gets a reference to the settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The configured log format with trigger overrides applied.
    pub fn log_format(&self) -> Result<LogFormat, ConfigError> {
        self.settings.log_format()
    }

    /// The configured log level as a `log` filter.
    pub fn level_filter(&self) -> log::LevelFilter {
        self.settings
            .logging
            .level
            .parse()
            .unwrap_or(log::LevelFilter::Info)
    }

    /// Parses INI text into settings, starting from the defaults.
    pub fn parse_config(content: &str) -> Result<Settings, ConfigError> {
        let mut settings = Settings::default();
        Self::overlay_config(&mut settings, content)?;
        Ok(settings)
    }

    /// Overrides the keys present in INI text, leaving the rest untouched.
    fn overlay_config(settings: &mut Settings, content: &str) -> Result<(), ConfigError> {
        // keys keep their case so trigger patterns survive intact
        let mut ini = Ini::new_cs();
        ini.read(content.to_string())
            .map_err(|e| ConfigError::IniParse(format!("Failed to parse INI: {}", e)))?;
        let map = ini.get_map_ref();

        if let Some(scan_map) = map.get("scan") {
            Self::parse_scan(scan_map, &mut settings.scan)?;
        }
        if let Some(trigger_map) = map.get("triggers") {
            settings.triggers.extend(
                trigger_map
                    .iter()
                    .map(|(k, v)| (k.to_lowercase(), v.clone().unwrap_or_default())),
            );
        }
        if let Some(logging_map) = map.get("logging") {
            Self::parse_logging(logging_map, &mut settings.logging)?;
        }

        Ok(())
    }

    /// Applies the scan section keys that are set.
    fn parse_scan(
        section: &HashMap<String, Option<String>>,
        scan: &mut ScanSettings,
    ) -> Result<(), ConfigError> {
        if let Some(Some(format)) = section.get("format") {
            if LogFormat::by_name(format).is_none() {
                return Err(ConfigError::InvalidValue(format!("Invalid format: {}", format)));
            }
            scan.format = format.trim().to_lowercase();
        }
        if let Some(Some(case_insensitive)) = section.get("case_insensitive") {
            scan.case_insensitive = case_insensitive.trim().parse().map_err(|_| {
                ConfigError::InvalidValue(format!(
                    "Invalid case_insensitive value: {}",
                    case_insensitive
                ))
            })?;
        }
        Ok(())
    }

    /// Applies the logging section keys that are set.
    fn parse_logging(
        section: &HashMap<String, Option<String>>,
        logging: &mut LoggingSettings,
    ) -> Result<(), ConfigError> {
        if let Some(Some(level)) = section.get("level") {
            if level.trim().parse::<log::LevelFilter>().is_err() {
                return Err(ConfigError::InvalidValue(format!("Invalid log level: {}", level)));
            }
            logging.level = level.trim().to_lowercase();
        }
        Ok(())
    }

    /// Gets the system configuration file path.
    fn get_system_config_path() -> Option<PathBuf> {
        #[cfg(unix)]
        {
            Some(PathBuf::from("/etc/chemlog").join(CONFIG_FILE_NAME))
        }
        #[cfg(windows)]
        {
            std::env::var("PROGRAMDATA")
                .ok()
                .map(|pd| PathBuf::from(pd).join("chemlog").join(CONFIG_FILE_NAME))
        }
    }

    /// Gets the user configuration file path.
    fn get_user_config_path() -> Option<PathBuf> {
        #[cfg(unix)]
        {
            std::env::var("HOME").ok().map(|home| {
                PathBuf::from(home)
                    .join(".config")
                    .join("chemlog")
                    .join(CONFIG_FILE_NAME)
            })
        }
        #[cfg(windows)]
        {
            std::env::var("APPDATA")
                .ok()
                .map(|appdata| PathBuf::from(appdata).join("chemlog").join(CONFIG_FILE_NAME))
        }
    }

    /// Writes a commented configuration template.
    pub fn create_template(path: &Path) -> Result<(), ConfigError> {
        fs::write(path, TEMPLATE)?;
        info!("Created settings template at: {}", path.display());
        Ok(())
    }
}

const TEMPLATE: &str = r#"# chemlog configuration file
#
# Place this file at ./chemlog.cfg, ~/.config/chemlog/chemlog.cfg or
# /etc/chemlog/chemlog.cfg. Local files override user files, which override
# system files.

[scan]
# Log family: castep, cp2k or tight-binding
format = castep
# Match built-in triggers regardless of case
case_insensitive = false

[triggers]
# Override individual built-in triggers of the chosen format.
# Leave a value empty to disable an optional trigger.
# lattice = Real Lattice(A)
# atoms = Total number of ions in cell
# kpoints = MP grid size for SCF calculation is
# multi_geometry = BFGS: starting iteration
# completion = Total time
# reset = Run started:

[logging]
# off, error, warn, info, debug or trace
level = info
"#;
