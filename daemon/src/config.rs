use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::validate_enum;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralSettings,

    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub overlay: OverlaySettings,

    #[serde(default)]
    pub wallpaper: WallpaperSettings,

    #[serde(default)]
    pub video: VideoSettings,
}

/// General daemon settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GeneralSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Engine behaviour: cadence and feature toggles
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EngineSettings {
    /// Play animated covers on the lock screen
    #[serde(default = "default_true")]
    pub enable_video_art: bool,

    /// Render the diagnostic log on top of the lock screen
    #[serde(default)]
    pub show_debug_overlay: bool,

    #[serde(default = "default_frame_interval")]
    pub frame_interval_ms: u64,

    #[serde(default = "default_power_save_interval")]
    pub power_save_interval_ms: u64,

    /// Release the decoder after being hidden this long
    #[serde(default = "default_hidden_reset")]
    pub hidden_reset_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            enable_video_art: true,
            show_debug_overlay: false,
            frame_interval_ms: default_frame_interval(),
            power_save_interval_ms: default_power_save_interval(),
            hidden_reset_secs: default_hidden_reset(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_frame_interval() -> u64 {
    33
}
fn default_power_save_interval() -> u64 {
    1000
}
fn default_hidden_reset() -> u64 {
    60
}

/// Clock/date overlay appearance
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OverlaySettings {
    /// chrono format string for the clock
    #[serde(default = "default_time_format")]
    pub time_format: String,

    /// Clock format while in ambient mode (no seconds)
    #[serde(default = "default_ambient_time_format")]
    pub ambient_time_format: String,

    #[serde(default = "default_date_format")]
    pub date_format: String,

    /// Preferred font family, system sans-serif otherwise
    #[serde(default)]
    pub font_family: Option<String>,

    /// Maximum burn-in offset in pixels
    #[serde(default = "default_burn_in_offset")]
    pub burn_in_max_offset: f32,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            time_format: default_time_format(),
            ambient_time_format: default_ambient_time_format(),
            date_format: default_date_format(),
            font_family: None,
            burn_in_max_offset: default_burn_in_offset(),
        }
    }
}

fn default_time_format() -> String {
    "%H:%M:%S".to_string()
}
fn default_ambient_time_format() -> String {
    "%H:%M".to_string()
}
fn default_date_format() -> String {
    "%A, %B %-d".to_string()
}
fn default_burn_in_offset() -> f32 {
    10.0
}

/// Home-screen images
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WallpaperSettings {
    #[serde(default)]
    pub path: Option<String>,

    /// Foreground layer drawn over the wallpaper
    #[serde(default)]
    pub subject: Option<String>,

    /// Fallback gradient stops (hex)
    #[serde(default = "default_gradient")]
    pub gradient: Vec<String>,
}

impl Default for WallpaperSettings {
    fn default() -> Self {
        Self {
            path: None,
            subject: None,
            gradient: default_gradient(),
        }
    }
}

fn default_gradient() -> Vec<String> {
    vec![
        "#0F0C29".to_string(),
        "#302B63".to_string(),
        "#24243E".to_string(),
    ]
}

/// Decoder settings
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct VideoSettings {
    /// Use the VA-API H.264 pipeline instead of decodebin
    #[serde(default)]
    pub hardware_decode: bool,
}

/// The snapshot the engine re-reads on every visibility gain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub enable_video_art: bool,
    pub show_debug_overlay: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enable_video_art: true,
            show_debug_overlay: false,
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!(
                "Config file not found at {}, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded configuration from {}", path.display());
        config.validate()?;

        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("glasswall");

        Ok(config_dir.join("config.toml"))
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        self.validate_log_level(&self.general.log_level)?;

        if self.engine.frame_interval_ms == 0 {
            anyhow::bail!("engine.frame_interval_ms must be greater than 0");
        }
        if self.engine.power_save_interval_ms < 1000 {
            anyhow::bail!(
                "engine.power_save_interval_ms must be at least 1000 (got {})",
                self.engine.power_save_interval_ms
            );
        }
        let offset = self.overlay.burn_in_max_offset;
        if offset.is_nan() || offset < 0.0 {
            anyhow::bail!(
                "overlay.burn_in_max_offset must be non-negative (got {})",
                offset
            );
        }

        for format in [
            &self.overlay.time_format,
            &self.overlay.ambient_time_format,
            &self.overlay.date_format,
        ] {
            if !crate::overlay::is_valid_format(format) {
                anyhow::bail!("Invalid time format: {}", format);
            }
        }

        for stop in &self.wallpaper.gradient {
            if crate::bitmap::parse_hex_color(stop).is_none() {
                anyhow::bail!("Invalid gradient color: {}", stop);
            }
        }

        Ok(())
    }

    fn validate_log_level(&self, level: &str) -> Result<()> {
        validate_enum!(level, "trace", "debug", "info", "warn", "error")
    }

    pub fn settings(&self) -> Settings {
        Settings {
            enable_video_art: self.engine.enable_video_art,
            show_debug_overlay: self.engine.show_debug_overlay,
        }
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.engine.frame_interval_ms)
    }

    pub fn power_save_interval(&self) -> Duration {
        Duration::from_millis(self.engine.power_save_interval_ms)
    }

    pub fn hidden_reset(&self) -> Duration {
        Duration::from_secs(self.engine.hidden_reset_secs)
    }

    /// Wallpaper path with `~` and environment variables expanded
    pub fn wallpaper_path(&self) -> Option<PathBuf> {
        self.wallpaper.path.as_deref().map(expand_path)
    }

    pub fn subject_path(&self) -> Option<PathBuf> {
        self.wallpaper.subject.as_deref().map(expand_path)
    }

    /// Gradient stops as RGB, falling back to the defaults on bad input
    pub fn gradient_stops(&self) -> Vec<[u8; 3]> {
        let stops: Vec<[u8; 3]> = self
            .wallpaper
            .gradient
            .iter()
            .filter_map(|c| crate::bitmap::parse_hex_color(c))
            .map(|(r, g, b, _)| [r, g, b])
            .collect();

        if stops.is_empty() {
            crate::bitmap::DEFAULT_GRADIENT.to_vec()
        } else {
            stops
        }
    }
}

/// Expand `~` and `$VARS` in a user supplied path
pub fn expand_path(path: &str) -> PathBuf {
    match shellexpand::full(path) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(e) => {
            log::warn!("Failed to expand path {}: {}", path, e);
            PathBuf::from(path)
        }
    }
}
