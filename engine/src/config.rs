use crate::audio::io::AUDIO_BLOCK_MAX_RENDER_SIZE;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const SAMPLE_RATE_ENV: &str = "ANKLANG_SAMPLE_RATE";
pub const BLOCK_FRAMES_ENV: &str = "ANKLANG_BLOCK_FRAMES";
pub const TELEMETRY_BYTES_ENV: &str = "ANKLANG_TELEMETRY_BYTES";
pub const BPM_ENV: &str = "ANKLANG_BPM";
pub const CLAP_PATH_ENV: &str = "CLAP_PATH";
pub const GUI_BRIDGE_ENV: &str = "ANKLANG_GUI_BRIDGE";
pub const DEBUG_ENV: &str = "ANKLANG_DEBUG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    pub sample_rate: u32,
    pub block_frames: usize,
    pub telemetry_bytes: usize,
    pub bpm: f64,
    pub beats_per_bar: u8,
    pub beat_unit: u8,
    pub clap_search_paths: Vec<PathBuf>,
    pub gui_bridge: Option<PathBuf>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            block_frames: 256,
            telemetry_bytes: 65536,
            bpm: 120.0,
            beats_per_bar: 4,
            beat_unit: 4,
            clap_search_paths: Vec::new(),
            gui_bridge: None,
        }
    }
}

impl EngineOptions {
    pub fn from_env() -> Self {
        let mut options = Self::default();
        options.apply_env();
        options
    }

    pub fn from_toml_str(text: &str) -> Result<Self, String> {
        let mut options: Self =
            toml::from_str(text).map_err(|e| format!("Invalid engine configuration: {e}"))?;
        options.apply_env();
        Ok(options)
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
        Self::from_toml_str(&text)
    }

    /// Override fields from the environment, unparsable values are ignored.
    pub fn apply_env(&mut self) {
        if let Some(rate) = env_parse(SAMPLE_RATE_ENV) {
            self.sample_rate = rate;
        }
        if let Some(frames) = env_parse(BLOCK_FRAMES_ENV) {
            self.block_frames = frames;
        }
        if let Some(bytes) = env_parse(TELEMETRY_BYTES_ENV) {
            self.telemetry_bytes = bytes;
        }
        if let Some(bpm) = env_parse(BPM_ENV) {
            self.bpm = bpm;
        }
        if let Ok(paths) = std::env::var(CLAP_PATH_ENV) {
            for path in paths.split(':').filter(|p| !p.is_empty()) {
                let path = PathBuf::from(path);
                if !self.clap_search_paths.contains(&path) {
                    self.clap_search_paths.push(path);
                }
            }
        }
        if let Ok(bridge) = std::env::var(GUI_BRIDGE_ENV)
            && !bridge.trim().is_empty()
        {
            self.gui_bridge = Some(PathBuf::from(bridge.trim()));
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(8000..=384000).contains(&self.sample_rate) {
            return Err(format!("Unsupported sample rate: {}", self.sample_rate));
        }
        if !(1..=AUDIO_BLOCK_MAX_RENDER_SIZE).contains(&self.block_frames) {
            return Err(format!(
                "Block size must be within 1..={AUDIO_BLOCK_MAX_RENDER_SIZE}, got {}",
                self.block_frames
            ));
        }
        if !self.bpm.is_finite() || self.bpm < 0.0 {
            return Err(format!("Invalid tempo: {}", self.bpm));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.trim().parse().ok()
}

pub fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| {
            let s = v.trim().to_ascii_lowercase();
            s == "1" || s == "true" || s == "yes" || s == "on"
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let options = EngineOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.block_frames, 256);
    }

    #[test]
    fn test_toml_partial_document() {
        let options = EngineOptions::from_toml_str(
            "block_frames = 64\nclap_search_paths = [\"/opt/clap\"]\n",
        )
        .unwrap();
        assert_eq!(options.block_frames, 64);
        assert!(options.clap_search_paths.contains(&PathBuf::from("/opt/clap")));
        assert_eq!(options.beats_per_bar, 4);
    }

    #[test]
    fn test_toml_rejects_garbage() {
        assert!(EngineOptions::from_toml_str("sample_rate = \"fast\"").is_err());
    }

    #[test]
    fn test_validate_limits() {
        let mut options = EngineOptions {
            sample_rate: 4000,
            ..Default::default()
        };
        assert!(options.validate().is_err());
        options.sample_rate = 44100;
        options.block_frames = 4096;
        assert!(options.validate().is_err());
        options.block_frames = 0;
        assert!(options.validate().is_err());
        options.block_frames = 2048;
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_env_flag_unset_is_false() {
        assert!(!env_flag("ANKLANG_TEST_FLAG_THAT_IS_NEVER_SET"));
    }
}
