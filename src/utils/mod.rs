//! Utility module for ccmedia
//!
//! This module provides common utilities used throughout the pipeline:
//! - Error handling with custom error types
//! - Configuration management
//! - Time base helpers

pub mod config;
pub mod error;

// Re-export commonly used items
pub use config::{CodecConfig, GeneralConfig, PipelineConfig, SourceConfig, WorkerConfig};
pub use error::{IntoMediaError, MediaCode, MediaError, Result};

/// Presentation time ticks per second (100 ns units)
pub const TICKS_PER_SECOND: u64 = 10_000_000;

/// Initialize the pipeline configuration
///
/// Loads configuration from:
/// 1. Default values
/// 2. System configuration file
/// 3. User configuration file
/// 4. Environment variables
pub fn load_config() -> Result<PipelineConfig> {
    PipelineConfig::load()
}

/// Convert presentation ticks to a `Duration`
pub fn ticks_to_duration(ticks: u64) -> std::time::Duration {
    std::time::Duration::from_nanos(ticks.saturating_mul(100))
}

/// Convert a `Duration` to presentation ticks
pub fn duration_to_ticks(duration: std::time::Duration) -> u64 {
    (duration.as_nanos() / 100).min(u64::MAX as u128) as u64
}

/// Format a pts for display
///
/// # Arguments
///
/// * `ticks` - Presentation time in 100 ns units
///
/// # Returns
///
/// Formatted string in the format "HH:MM:SS.mmm" or "MM:SS.mmm" under an hour
pub fn format_pts(ticks: u64) -> String {
    let total_ms = ticks / 10_000;
    let millis = total_ms % 1000;
    let total_secs = total_ms / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
    } else {
        format!("{:02}:{:02}.{:03}", minutes, seconds, millis)
    }
}
