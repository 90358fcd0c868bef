// src/config.rs
// User settings persisted as TOML

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::audio::engine::DEFAULT_SEEK_SECONDS;
use crate::detect::{NUM_PATTERNS, StemDetector};
use crate::error::ConfigError;
use crate::midi::{MidiBinding, MidiLearnManager, MidiTarget};

const APP_DIR: &str = "stemplayer";
const SETTINGS_FILE: &str = "settings.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub default_folder: Option<PathBuf>,
    #[serde(default = "default_patterns")]
    pub stem_patterns: Vec<String>,
    #[serde(default = "default_seek_seconds")]
    pub seek_seconds: f64,
    #[serde(default)]
    pub output_device: Option<String>,
    #[serde(default)]
    pub midi_port: Option<String>,
    #[serde(default)]
    pub midi_bindings: Vec<BindingEntry>,
}

/// One persisted MIDI binding. `target` is a `MidiTarget` key such as "drums" or "playpause".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingEntry {
    pub target: String,
    pub cc: u8,
    #[serde(default)]
    pub channel: Option<u8>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_folder: None,
            stem_patterns: default_patterns(),
            seek_seconds: default_seek_seconds(),
            output_device: None,
            midi_port: None,
            midi_bindings: Vec::new(),
        }
    }
}

fn default_patterns() -> Vec<String> {
    StemDetector::default_patterns().to_vec()
}

fn default_seek_seconds() -> f64 {
    DEFAULT_SEEK_SECONDS
}

impl Settings {
    /// `<config dir>/stemplayer/settings.toml`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR).join(SETTINGS_FILE))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Read settings from `path`; a missing file gives defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("No settings at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let mut settings: Settings = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        settings.normalize();
        log::info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Saved settings to {}", path.display());
        Ok(())
    }

    fn normalize(&mut self) {
        if self.stem_patterns.len() > NUM_PATTERNS {
            log::warn!(
                "Settings list {} stem patterns, keeping the first {}",
                self.stem_patterns.len(),
                NUM_PATTERNS
            );
            self.stem_patterns.truncate(NUM_PATTERNS);
        }
        let defaults = StemDetector::default_patterns();
        for pattern in defaults.iter().skip(self.stem_patterns.len()) {
            self.stem_patterns.push(pattern.clone());
        }
        if !self.seek_seconds.is_finite() || self.seek_seconds < 0.0 {
            self.seek_seconds = default_seek_seconds();
        }
    }

    pub fn reset_patterns(&mut self) {
        self.stem_patterns = default_patterns();
    }

    /// Bindings with unknown targets or out-of-range values are skipped.
    pub fn bindings(&self) -> Vec<(MidiTarget, MidiBinding)> {
        self.midi_bindings
            .iter()
            .filter_map(|entry| {
                let Some(target) = MidiTarget::from_key(&entry.target) else {
                    log::warn!("Ignoring binding for unknown target '{}'", entry.target);
                    return None;
                };
                if entry.cc > 127 || entry.channel.is_some_and(|ch| !(1..=16).contains(&ch)) {
                    log::warn!("Ignoring out-of-range binding for {}", target);
                    return None;
                }
                Some((
                    target,
                    MidiBinding {
                        cc: entry.cc,
                        channel: entry.channel,
                    },
                ))
            })
            .collect()
    }

    pub fn set_bindings(&mut self, bindings: &[(MidiTarget, MidiBinding)]) {
        self.midi_bindings = bindings
            .iter()
            .map(|(target, binding)| BindingEntry {
                target: target.key().to_string(),
                cc: binding.cc,
                channel: binding.channel,
            })
            .collect();
    }

    pub fn apply_bindings(&self, manager: &MidiLearnManager) {
        manager.load_bindings(&self.bindings());
    }

    pub fn capture_bindings(&mut self, manager: &MidiLearnManager) {
        self.set_bindings(&manager.bindings());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::StemType;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("settings.toml")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.stem_patterns.len(), NUM_PATTERNS);
        assert_eq!(settings.seek_seconds, 5.0);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");

        let mut settings = Settings {
            default_folder: Some(PathBuf::from("/music/stems")),
            seek_seconds: 10.0,
            midi_port: Some("nanokontrol".to_string()),
            ..Settings::default()
        };
        settings.set_bindings(&[
            (MidiTarget::StemVolume(StemType::Bass), MidiBinding { cc: 7, channel: None }),
            (MidiTarget::PlayPause, MidiBinding { cc: 41, channel: Some(2) }),
        ]);
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded, settings);
        assert_eq!(loaded.bindings().len(), 2);
    }

    #[test]
    fn test_partial_file_is_completed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            r#"
stem_patterns = ["_vox"]
seek_seconds = -2.0

[[midi_bindings]]
target = "nonsense"
cc = 1

[[midi_bindings]]
target = "stop"
cc = 200

[[midi_bindings]]
target = "Rewind"
cc = 12
channel = 16
"#,
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.stem_patterns[0], "_vox");
        assert_eq!(settings.stem_patterns.len(), NUM_PATTERNS);
        assert_eq!(settings.stem_patterns[1], StemDetector::default_patterns()[1]);
        assert_eq!(settings.seek_seconds, 5.0);
        assert_eq!(
            settings.bindings(),
            vec![(MidiTarget::Rewind, MidiBinding { cc: 12, channel: Some(16) })]
        );
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "seek_seconds = \"soon\"").unwrap();
        assert!(matches!(Settings::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_bindings_round_trip_through_manager() {
        let manager = MidiLearnManager::new();
        manager.set_mapping(MidiTarget::Stop, 20, Some(1));

        let mut settings = Settings::default();
        settings.capture_bindings(&manager);
        assert_eq!(settings.midi_bindings[0].target, "stop");

        let restored = MidiLearnManager::new();
        settings.apply_bindings(&restored);
        assert_eq!(restored.mapped_cc(MidiTarget::Stop), Some(20));
    }

    #[test]
    fn test_reset_patterns() {
        let mut settings = Settings {
            stem_patterns: vec!["a".into(); NUM_PATTERNS],
            ..Settings::default()
        };
        settings.reset_patterns();
        assert_eq!(settings.stem_patterns, default_patterns());
    }
}
