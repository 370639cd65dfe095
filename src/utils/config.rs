//! Configuration management for ccmedia
//!
//! This module handles loading and managing pipeline configuration
//! from config files and environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::stream::PixelFormat;
use crate::utils::error::{MediaError, Result};

/// Main pipeline configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Byte source configuration
    pub source: SourceConfig,

    /// Decoder and converter configuration
    pub codecs: CodecConfig,

    /// Worker thread configuration
    pub worker: WorkerConfig,

    /// General settings
    pub general: GeneralConfig,
}

/// Byte source configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Read-ahead window of file-backed sources in bytes
    pub read_ahead_size: usize,

    /// Granularity that progressive availability is rounded down to
    pub progressive_block_size: u64,

    /// Directory for progressive download files (system temp dir when unset)
    pub temp_dir: Option<PathBuf>,

    /// Keep progressive download files after the source is dropped
    pub keep_media: bool,
}

/// Decoder and converter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    /// Do not register the placeholder decoder
    pub disable_fallback: bool,

    /// Do not register pixel format converters
    pub disable_converters: bool,

    /// Pixel format video frames must end up in
    pub output_format: PixelFormat,
}

/// Worker thread configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Delay before retrying an operation that reported not enough data
    pub retry_interval_ms: u64,

    /// Capacity of each stream's frame FIFO
    pub stream_queue_capacity: usize,
}

/// General configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            read_ahead_size: 4096,
            progressive_block_size: 4096,
            temp_dir: None,
            keep_media: false,
        }
    }
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            disable_fallback: false,
            disable_converters: false,
            output_format: PixelFormat::Rgb32,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: 50,
            stream_queue_capacity: 32,
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from various sources
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. System config file (/etc/ccmedia/config.toml on Linux)
    /// 3. User config file (~/.config/ccmedia/config.toml on Linux)
    /// 4. Environment variables (CCMEDIA_* prefix)
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(system_path) = Self::system_config_path() {
            if system_path.exists() {
                config = Self::from_file(&system_path)?;
            }
        }

        if let Some(user_path) = Self::user_config_path() {
            if user_path.exists() {
                config = Self::from_file(&user_path)?;
            }
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Read a configuration file; missing keys take their defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| MediaError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&contents)
            .map_err(|e| MediaError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Save configuration to user config file
    pub fn save(&self) -> Result<()> {
        let path = Self::user_config_path()
            .ok_or_else(|| MediaError::Config("Cannot determine user config path".to_string()))?;
        self.save_to(&path)
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MediaError::Config(format!("Failed to create config directory: {}", e)))?;
        }

        let toml = toml::to_string_pretty(self)
            .map_err(|e| MediaError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, toml)
            .map_err(|e| MediaError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Directory used for progressive download files
    pub fn temp_dir(&self) -> PathBuf {
        self.source.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(size) = std::env::var("CCMEDIA_READ_AHEAD_SIZE") {
            self.source.read_ahead_size = size.parse()
                .map_err(|_| MediaError::Config("Invalid CCMEDIA_READ_AHEAD_SIZE".to_string()))?;
        }

        if let Ok(dir) = std::env::var("CCMEDIA_TEMP_DIR") {
            self.source.temp_dir = Some(PathBuf::from(dir));
        }

        if let Ok(keep) = std::env::var("CCMEDIA_KEEP_MEDIA") {
            self.source.keep_media = parse_flag(&keep)
                .ok_or_else(|| MediaError::Config("Invalid CCMEDIA_KEEP_MEDIA".to_string()))?;
        }

        if let Ok(disable) = std::env::var("CCMEDIA_DISABLE_FALLBACK") {
            self.codecs.disable_fallback = parse_flag(&disable)
                .ok_or_else(|| MediaError::Config("Invalid CCMEDIA_DISABLE_FALLBACK".to_string()))?;
        }

        if let Ok(retry) = std::env::var("CCMEDIA_RETRY_INTERVAL_MS") {
            self.worker.retry_interval_ms = retry.parse()
                .map_err(|_| MediaError::Config("Invalid CCMEDIA_RETRY_INTERVAL_MS".to_string()))?;
        }

        if let Ok(log_level) = std::env::var("CCMEDIA_LOG_LEVEL") {
            self.general.log_level = log_level;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.source.read_ahead_size == 0 {
            return Err(MediaError::Config("Read-ahead size must be non-zero".to_string()));
        }

        if self.source.progressive_block_size == 0 {
            return Err(MediaError::Config("Progressive block size must be non-zero".to_string()));
        }

        if self.codecs.output_format == PixelFormat::None {
            return Err(MediaError::Config("Output pixel format must be set".to_string()));
        }

        if self.worker.stream_queue_capacity == 0 {
            return Err(MediaError::Config("Stream queue capacity must be non-zero".to_string()));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.general.log_level.as_str()) {
            return Err(MediaError::Config(format!(
                "Invalid log level '{}', must be one of: {:?}",
                self.general.log_level,
                valid_log_levels
            )));
        }

        Ok(())
    }

    /// Get system config file path
    fn system_config_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        return Some(PathBuf::from("/etc/ccmedia/config.toml"));

        #[cfg(target_os = "windows")]
        return std::env::var("PROGRAMDATA").ok()
            .map(|p| PathBuf::from(p).join("ccmedia").join("config.toml"));

        #[cfg(target_os = "macos")]
        return Some(PathBuf::from("/Library/Application Support/ccmedia/config.toml"));

        #[allow(unreachable_code)]
        None
    }

    /// Get user config file path
    fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("ccmedia").join("config.toml"))
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
