use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Loader configuration, passed into the registry at construction and shared
/// by every session it creates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub cache: CacheConfig,
    pub hr: HrConfig,
    pub video: VideoConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Minimum page size for video channels (`None` disables caching)
    pub video_min_page_size: Option<usize>,
    /// Minimum page size for signal and landmark channels
    pub signal_min_page_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HrConfig {
    /// HR values below this are discarded as implausible ground truth.
    /// `None` keeps every value.
    pub min_valid_hr: Option<f64>,
    /// Instantaneous rates outside this open interval (BPM) are discarded
    pub peak_band_bpm: [f64; 2],
    /// Two sensors agree when their rates differ by less than this (BPM)
    pub agreement_tolerance_bpm: f64,
    /// Frequency band searched by the spectral estimator (Hz)
    pub spectral_band_hz: [f64; 2],
    /// Guard added to the standard deviation when normalizing a window
    pub normalize_epsilon: f64,
    /// Peak amplitude threshold = mean + k * std
    pub peak_threshold_k_std: f64,
    /// Refractory distance between detected peaks (seconds)
    pub peak_min_distance_sec: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            video_min_page_size: Some(500),
            signal_min_page_size: None,
        }
    }
}

impl Default for HrConfig {
    fn default() -> Self {
        Self {
            min_valid_hr: None,
            peak_band_bpm: [30.0, 240.0],
            agreement_tolerance_bpm: 3.0,
            spectral_band_hz: [0.7, 3.0],
            normalize_epsilon: 1e-8,
            peak_threshold_k_std: 0.5,
            peak_min_distance_sec: 0.3,
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
        }
    }
}

impl HrConfig {
    /// Drops HR values below `min_valid_hr`, preserving order.
    pub fn filter_hr_values(&self, values: &[f64]) -> Vec<f64> {
        match self.min_valid_hr {
            Some(min_hr) => values.iter().copied().filter(|hr| *hr >= min_hr).collect(),
            None => values.to_vec(),
        }
    }
}

impl LoaderConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: LoaderConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides
    /// Environment variables are prefixed with RPPG_
    /// Example: RPPG_HR_MIN_VALID_HR=40
    pub fn from_file_with_env<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        use std::env;

        if let Ok(val) = env::var("RPPG_CACHE_VIDEO_MIN_PAGE_SIZE") {
            self.cache.video_min_page_size = parse_page_size(&val, "RPPG_CACHE_VIDEO_MIN_PAGE_SIZE")?;
        }
        if let Ok(val) = env::var("RPPG_CACHE_SIGNAL_MIN_PAGE_SIZE") {
            self.cache.signal_min_page_size = parse_page_size(&val, "RPPG_CACHE_SIGNAL_MIN_PAGE_SIZE")?;
        }

        if let Ok(val) = env::var("RPPG_HR_MIN_VALID_HR") {
            self.hr.min_valid_hr = Some(val.parse().map_err(|_| {
                ConfigError::Validation("Invalid RPPG_HR_MIN_VALID_HR".to_string())
            })?);
        }
        if let Ok(val) = env::var("RPPG_HR_AGREEMENT_TOLERANCE_BPM") {
            self.hr.agreement_tolerance_bpm = val.parse().map_err(|_| {
                ConfigError::Validation("Invalid RPPG_HR_AGREEMENT_TOLERANCE_BPM".to_string())
            })?;
        }

        if let Ok(val) = env::var("RPPG_VIDEO_FFMPEG_PATH") {
            self.video.ffmpeg_path = val;
        }
        if let Ok(val) = env::var("RPPG_VIDEO_FFPROBE_PATH") {
            self.video.ffprobe_path = val;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.video_min_page_size == Some(0) || self.cache.signal_min_page_size == Some(0) {
            return Err(ConfigError::Validation(
                "cache page sizes must be positive (omit to disable caching)".to_string(),
            ));
        }

        let [lo_bpm, hi_bpm] = self.hr.peak_band_bpm;
        if !(lo_bpm >= 0.0 && lo_bpm < hi_bpm) {
            return Err(ConfigError::Validation(
                "hr.peak_band_bpm must be an ascending non-negative pair".to_string(),
            ));
        }
        let [lo_hz, hi_hz] = self.hr.spectral_band_hz;
        if !(lo_hz >= 0.0 && lo_hz < hi_hz) {
            return Err(ConfigError::Validation(
                "hr.spectral_band_hz must be an ascending non-negative pair".to_string(),
            ));
        }
        if self.hr.agreement_tolerance_bpm <= 0.0 {
            return Err(ConfigError::Validation(
                "hr.agreement_tolerance_bpm must be positive".to_string(),
            ));
        }
        if self.hr.normalize_epsilon <= 0.0 {
            return Err(ConfigError::Validation(
                "hr.normalize_epsilon must be positive".to_string(),
            ));
        }
        if self.hr.peak_min_distance_sec < 0.0 {
            return Err(ConfigError::Validation(
                "hr.peak_min_distance_sec must be non-negative".to_string(),
            ));
        }
        if let Some(min_hr) = self.hr.min_valid_hr {
            if !min_hr.is_finite() || min_hr < 0.0 {
                return Err(ConfigError::Validation(
                    "hr.min_valid_hr must be a non-negative number".to_string(),
                ));
            }
        }

        if self.video.ffmpeg_path.is_empty() || self.video.ffprobe_path.is_empty() {
            return Err(ConfigError::Validation(
                "video.ffmpeg_path and video.ffprobe_path must be set".to_string(),
            ));
        }

        Ok(())
    }

    /// Export configuration to TOML string
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = self
            .to_toml_string()
            .map_err(|e| ConfigError::Validation(format!("TOML serialization error: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// `none`, `off` or `disabled` turn caching off.
fn parse_page_size(val: &str, var: &str) -> Result<Option<usize>, ConfigError> {
    match val.trim().to_ascii_lowercase().as_str() {
        "none" | "off" | "disabled" => Ok(None),
        other => other
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Validation(format!("Invalid {}", var))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = LoaderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.video_min_page_size, Some(500));
        assert_eq!(config.cache.signal_min_page_size, None);
        assert!((config.hr.agreement_tolerance_bpm - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[hr]\nmin_valid_hr = 40.0\n\n[cache]\nvideo_min_page_size = 64").unwrap();

        let config = LoaderConfig::from_file(file.path()).unwrap();
        assert_eq!(config.hr.min_valid_hr, Some(40.0));
        assert_eq!(config.cache.video_min_page_size, Some(64));
        assert_eq!(config.hr.peak_band_bpm, [30.0, 240.0]);
        assert_eq!(config.video.ffmpeg_path, "ffmpeg");
    }

    #[test]
    fn test_save_and_reload() {
        let mut config = LoaderConfig::default();
        config.hr.min_valid_hr = Some(35.0);
        config.cache.signal_min_page_size = Some(1024);

        let file = NamedTempFile::new().unwrap();
        config.save_to_file(file.path()).unwrap();
        let reloaded = LoaderConfig::from_file(file.path()).unwrap();
        assert_eq!(reloaded, config);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = LoaderConfig::default();
        config.hr.spectral_band_hz = [3.0, 0.7];
        assert!(config.validate().is_err());

        let mut config = LoaderConfig::default();
        config.cache.video_min_page_size = Some(0);
        assert!(config.validate().is_err());

        let mut config = LoaderConfig::default();
        config.hr.agreement_tolerance_bpm = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_filter_hr_values() {
        let mut hr = HrConfig::default();
        assert_eq!(hr.filter_hr_values(&[10.0, 70.0]), vec![10.0, 70.0]);

        hr.min_valid_hr = Some(40.0);
        assert_eq!(hr.filter_hr_values(&[10.0, 70.0, 40.0, 39.9]), vec![70.0, 40.0]);
    }

    #[test]
    fn test_parse_page_size() {
        assert_eq!(parse_page_size("off", "X").unwrap(), None);
        assert_eq!(parse_page_size("128", "X").unwrap(), Some(128));
        assert!(parse_page_size("lots", "X").is_err());
    }
}
