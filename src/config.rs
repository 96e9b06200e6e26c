//! Configuration file handling and live reload.

use crate::keying::{color, KeyingParams};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid key color {0:?}: expected #RRGGBB")]
    InvalidKeyColor(String),
}

/// On-disk configuration. Every field is optional; omissions fall back to
/// the tuned defaults.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub keying: KeyingConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct KeyingConfig {
    #[serde(default = "default_threshold")]
    pub threshold_sensitivity: f32,
    #[serde(default = "default_smoothing")]
    pub smoothing: f32,
    /// Hex "#RRGGBB". Absent means the key color is sampled from the frame.
    #[serde(default)]
    pub key_color: Option<String>,
}

impl Default for KeyingConfig {
    fn default() -> Self {
        Self {
            threshold_sensitivity: default_threshold(),
            smoothing: default_smoothing(),
            key_color: None,
        }
    }
}

fn default_threshold() -> f32 {
    color::DEFAULT_THRESHOLD_SENSITIVITY
}

fn default_smoothing() -> f32 {
    color::DEFAULT_SMOOTHING
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Keying parameters with the hex color resolved.
    pub fn keying_params(&self) -> Result<KeyingParams, ConfigError> {
        let key_override = match &self.keying.key_color {
            Some(hex) => Some(parse_hex_color(hex)?),
            None => None,
        };
        Ok(KeyingParams {
            threshold_sensitivity: self.keying.threshold_sensitivity,
            smoothing: self.keying.smoothing,
            key_override,
        })
    }
}

/// Parses "#RRGGBB" (the '#' is optional) into normalized RGB.
pub fn parse_hex_color(input: &str) -> Result<[f32; 3], ConfigError> {
    let hex = input.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ConfigError::InvalidKeyColor(input.to_string()));
    }
    let channel = |s: &str| {
        u8::from_str_radix(s, 16).map_err(|_| ConfigError::InvalidKeyColor(input.to_string()))
    };
    let r = channel(&hex[0..2])?;
    let g = channel(&hex[2..4])?;
    let b = channel(&hex[4..6])?;
    Ok([r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0])
}

/// Watches the config file and reloads it between frames.
pub struct ConfigWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
    rx: Receiver<std::result::Result<Event, notify::Error>>,
    current_config: Option<Config>,
}

impl ConfigWatcher {
    /// Starts watching `path`. Returns `None` without a path, or when the
    /// watch cannot be established. A file that exists but fails to parse
    /// still gets a watcher; the error is logged and the config stays unset
    /// until a change event loads a good version.
    pub fn new(path: Option<PathBuf>) -> Option<Self> {
        let path = path?;
        let (tx, rx) = channel();

        match RecommendedWatcher::new(tx, notify::Config::default()) {
            Ok(mut watcher) => {
                if let Err(e) = watcher.watch(&path, RecursiveMode::NonRecursive) {
                    warn!("Failed to watch config file {:?}: {}", path, e);
                    return None;
                }
                info!("Watching config file {:?} for changes", path);

                let current_config = match Config::load(&path) {
                    Ok(config) => Some(config),
                    Err(e) => {
                        error!("{}", e);
                        None
                    }
                };

                Some(Self {
                    path,
                    _watcher: watcher,
                    rx,
                    current_config,
                })
            }
            Err(e) => {
                warn!("Failed to create config watcher: {}", e);
                None
            }
        }
    }

    /// The most recently loaded configuration.
    pub fn current(&self) -> Option<&Config> {
        self.current_config.as_ref()
    }

    /// Drains pending file events and reloads once if anything changed.
    /// Returns the previous and the freshly loaded config.
    pub fn check_for_changes(&mut self) -> Option<(Option<Config>, Config)> {
        let mut needs_reload = false;
        while let Ok(res) = self.rx.try_recv() {
            if let Ok(event) = res {
                if matches!(
                    event.kind,
                    notify::EventKind::Modify(_) | notify::EventKind::Create(_)
                ) {
                    needs_reload = true;
                }
            }
        }

        if needs_reload {
            info!("Config file changed, reloading");
            match Config::load(&self.path) {
                Ok(new_config) => {
                    let old = self.current_config.clone();
                    self.current_config = Some(new_config.clone());
                    return Some((old, new_config));
                }
                Err(e) => error!("{}", e),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_colors_parse() {
        assert_eq!(parse_hex_color("#00ff00").unwrap(), [0.0, 1.0, 0.0]);
        assert_eq!(parse_hex_color("FF0000").unwrap(), [1.0, 0.0, 0.0]);
        let [r, g, b] = parse_hex_color("#336699").unwrap();
        assert!((r - 0x33 as f32 / 255.0).abs() < 1e-6);
        assert!((g - 0x66 as f32 / 255.0).abs() < 1e-6);
        assert!((b - 0x99 as f32 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn bad_hex_colors_are_rejected() {
        for bad in ["", "#fff", "#gggggg", "#+f+f+f", "#00ff001", "green"] {
            assert!(parse_hex_color(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn full_config_parses() {
        let yaml = "keying:\n  threshold_sensitivity: 0.3\n  smoothing: 0.1\n  key_color: \"#ff0000\"\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let params = config.keying_params().unwrap();
        assert_eq!(params.threshold_sensitivity, 0.3);
        assert_eq!(params.smoothing, 0.1);
        assert_eq!(params.key_override, Some([1.0, 0.0, 0.0]));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let yaml = "keying:\n  smoothing: 0.35\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.keying.threshold_sensitivity, 0.24);
        assert_eq!(config.keying.smoothing, 0.35);
        assert!(config.keying.key_color.is_none());

        let params = config.keying_params().unwrap();
        assert!(params.key_override.is_none());
    }

    #[test]
    fn empty_keying_section_is_the_default() {
        let yaml = "keying: {}\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn invalid_key_color_surfaces_as_config_error() {
        let config = Config {
            keying: KeyingConfig {
                key_color: Some("chartreuse".into()),
                ..KeyingConfig::default()
            },
        };
        let err = config.keying_params().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("chartreuse"), "{msg}");
        assert!(msg.contains("#RRGGBB"), "{msg}");
    }

    #[test]
    fn watcher_starts_even_when_the_initial_load_fails() {
        let path = std::env::temp_dir().join("greenroom_watcher_bad_initial.yaml");
        fs::write(&path, "keying: [unclosed\n").unwrap();

        let watcher = ConfigWatcher::new(Some(path.clone())).expect("watch did not start");
        // The bad file costs only the initial load; the config stays unset
        // until a change event brings a good version.
        assert!(watcher.current().is_none());

        let _ = fs::remove_file(&path);
    }
}
