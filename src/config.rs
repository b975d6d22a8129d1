use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::camera::CaptureConfig;
use crate::constants::{alert, analysis, capture};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CameraConfig {
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_preferred_width")]
    pub preferred_width: u32,
    #[serde(default = "default_preferred_height")]
    pub preferred_height: u32,
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    #[serde(default = "default_target_width")]
    pub target_width: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_device() -> String {
    "/dev/video0".to_string()
}

fn default_preferred_width() -> u32 {
    640
}

fn default_preferred_height() -> u32 {
    480
}

fn default_frame_rate() -> u32 {
    15
}

fn default_target_width() -> u32 {
    capture::TARGET_WIDTH
}

fn default_jpeg_quality() -> u8 {
    capture::JPEG_QUALITY
}

impl Default for CameraConfig {
    fn default() -> Self {
        CameraConfig {
            device: default_device(),
            preferred_width: default_preferred_width(),
            preferred_height: default_preferred_height(),
            frame_rate: default_frame_rate(),
            target_width: default_target_width(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl CameraConfig {
    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            target_width: self.target_width,
            jpeg_quality: self.jpeg_quality,
            preferred_width: self.preferred_width,
            preferred_height: self.preferred_height,
            frame_rate: self.frame_rate,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_key_var")]
    pub api_key_var: String,
    #[serde(default = "default_cycle_delay")]
    pub cycle_delay_ms: u64,
    #[serde(default = "default_alert_cooldown")]
    pub alert_cooldown_ms: u64,
}

fn default_model() -> String {
    "gemini-3-flash-preview".to_string()
}

fn default_api_key_var() -> String {
    "GEMINI_API_KEY".to_string()
}

fn default_cycle_delay() -> u64 {
    analysis::CYCLE_DELAY_MS
}

fn default_alert_cooldown() -> u64 {
    alert::COOLDOWN_MS
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            model: default_model(),
            api_key_var: default_api_key_var(),
            cycle_delay_ms: default_cycle_delay(),
            alert_cooldown_ms: default_alert_cooldown(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SpeechConfig {
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_rate")]
    pub rate: f32,
}

fn default_language() -> String {
    "fr".to_string()
}

fn default_rate() -> f32 {
    1.2
}

impl Default for SpeechConfig {
    fn default() -> Self {
        SpeechConfig {
            language: default_language(),
            rate: default_rate(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            camera: CameraConfig::default(),
            analysis: AnalysisConfig::default(),
            speech: SpeechConfig::default(),
        }
    }
}

impl Config {
    pub fn config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home.join(".pathwatch"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("settings.yaml"))
    }

    pub fn load_or_create() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let contents = fs::read_to_string(&config_path)
                .context("Failed to read config file")?;
            let config: Config = serde_yaml::from_str(&contents)
                .context("Failed to parse config file")?;

            // Validate configuration after loading
            config.validate()?;

            Ok(config)
        } else {
            // Create default config
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.camera.device.is_empty() {
            bail!("camera device path cannot be empty");
        }
        if self.camera.target_width == 0 {
            bail!("target_width must be greater than 0");
        }
        if self.camera.jpeg_quality == 0 || self.camera.jpeg_quality > 100 {
            bail!("jpeg_quality must be between 1 and 100");
        }
        if self.camera.frame_rate == 0 {
            bail!("frame_rate must be greater than 0");
        }

        if self.analysis.model.is_empty() {
            bail!("model name cannot be empty");
        }
        if self.analysis.api_key_var.is_empty() {
            bail!("api_key_var cannot be empty");
        }
        if self.analysis.cycle_delay_ms == 0 {
            bail!("cycle_delay_ms must be greater than 0");
        }
        if self.analysis.cycle_delay_ms > 60_000 {
            bail!("cycle_delay_ms must be <= 60000 (1 minute)");
        }
        if self.analysis.alert_cooldown_ms == 0 {
            bail!("alert_cooldown_ms must be greater than 0");
        }

        if self.speech.language.is_empty() {
            bail!("speech language cannot be empty");
        }
        if !(0.5..=3.0).contains(&self.speech.rate) {
            bail!("speech rate must be between 0.5 and 3.0");
        }

        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let config_dir = Self::config_dir()?;
        fs::create_dir_all(&config_dir)
            .context("Failed to create config directory")?;

        let config_path = Self::config_path()?;
        let yaml = serde_yaml::to_string(self)
            .context("Failed to serialize config")?;

        fs::write(&config_path, yaml)
            .context("Failed to write config file")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn zero_target_width_is_rejected() {
        let mut config = Config::default();
        config.camera.target_width = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_quality_is_rejected() {
        let mut config = Config::default();
        config.camera.jpeg_quality = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_rate_is_rejected() {
        let mut config = Config::default();
        config.speech.rate = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let config: Config = serde_yaml::from_str("analysis:\n  cycle_delay_ms: 4000\n").unwrap();
        assert_eq!(config.analysis.cycle_delay_ms, 4000);
        assert_eq!(config.camera.device, "/dev/video0");
        assert_eq!(config.speech.language, "fr");
    }
}
