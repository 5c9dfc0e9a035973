use color_eyre::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "winhrach";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Initial volume, `0.0..=1.0`.
    pub volume: f32,
    /// Redraws per second, which is also the visualizer refresh rate.
    pub frame_rate: u16,
    /// Name of the output device as cpal reports it; the default device if unset.
    pub output_device: Option<String>,
    /// How far the arrow keys seek, in seconds.
    pub seek_step_secs: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            volume: 0.5,
            frame_rate: 60,
            output_device: None,
            seek_step_secs: 5.,
        }
    }
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
    }

    /// Loads `path`, or the default location. A missing file means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(path) => path,
            None => return Ok(Self::default()),
        };
        if !path.exists() {
            log::debug!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)?;
        let config = Self::parse(&text)?;
        log::info!("config loaded from {}", path.display());
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(text)?;
        config.volume = config.volume.clamp(0., 1.);
        config.frame_rate = config.frame_rate.clamp(1, 240);
        if !(config.seek_step_secs.is_finite() && config.seek_step_secs > 0.) {
            config.seek_step_secs = Self::default().seek_step_secs;
        }
        Ok(config)
    }
}

/// Where the log file goes; stdout belongs to the terminal UI.
pub fn log_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
        .join("winhrach.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(Config::parse("").unwrap(), Config::default());
    }

    #[test]
    fn values_are_read_and_clamped() {
        let config = Config::parse(
            r#"
            volume = 3.0
            frame_rate = 0
            output_device = "USB DAC"
            seek_step_secs = -1.0
            "#,
        )
        .unwrap();
        assert_eq!(config.volume, 1.);
        assert_eq!(config.frame_rate, 1);
        assert_eq!(config.output_device.as_deref(), Some("USB DAC"));
        assert_eq!(config.seek_step_secs, 5.);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(Config::parse("volume = \"loud\"").is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("winhrach-no-such-config.toml");
        assert_eq!(Config::load(Some(&path)).unwrap(), Config::default());
    }
}
