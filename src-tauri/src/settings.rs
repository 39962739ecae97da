use serde::{Deserialize, Serialize};

use crate::error::{ConvertError, ConvertResult};
use crate::progress::{DEFAULT_CHANGE_THRESHOLD, DEFAULT_MILESTONE_STEP};

/// Store file and key the desktop shell persists settings under.
pub const SETTINGS_STORE: &str = "settings.json";
pub const SETTINGS_KEY: &str = "converter";

/// User-tunable conversion settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConverterSettings {
    /// Output frame rate
    pub fps: u32,
    /// Output width in pixels; height follows the aspect ratio
    pub width: u32,
    /// Palette size handed to palettegen
    pub max_colors: u32,
    /// Bayer dither scale (0-5)
    pub bayer_scale: u32,
    /// Minimum progress movement, in percent, before the bar updates
    pub change_threshold: f64,
    /// Spacing of milestone log lines, in percent
    pub milestone_step: u32,
    /// How many trailing ffmpeg lines to attach to a failure
    pub failure_context_lines: usize,
    /// Forward every ffmpeg stderr line to the log view
    pub forward_diagnostics: bool,
    /// Fall back to ffmpeg on PATH when no bundled binary is found
    pub search_system_path: bool,
}

impl Default for ConverterSettings {
    fn default() -> Self {
        Self {
            fps: 8,
            width: 240,
            max_colors: 16,
            bayer_scale: 3,
            change_threshold: DEFAULT_CHANGE_THRESHOLD,
            milestone_step: DEFAULT_MILESTONE_STEP,
            failure_context_lines: 20,
            forward_diagnostics: true,
            search_system_path: true,
        }
    }
}

impl ConverterSettings {
    pub fn validate(&self) -> ConvertResult<()> {
        if self.fps == 0 {
            return Err(ConvertError::Settings("fps must be positive".to_string()));
        }
        if self.width == 0 {
            return Err(ConvertError::Settings("width must be positive".to_string()));
        }
        if !(2..=256).contains(&self.max_colors) {
            return Err(ConvertError::Settings(format!(
                "maxColors must be between 2 and 256, got {}",
                self.max_colors
            )));
        }
        if self.bayer_scale > 5 {
            return Err(ConvertError::Settings(format!(
                "bayerScale must be between 0 and 5, got {}",
                self.bayer_scale
            )));
        }
        if !self.change_threshold.is_finite() || self.change_threshold < 0.0 {
            return Err(ConvertError::Settings("changeThreshold must be a non-negative number".to_string()));
        }
        if self.milestone_step == 0 || self.milestone_step > 100 {
            return Err(ConvertError::Settings(format!(
                "milestoneStep must be between 1 and 100, got {}",
                self.milestone_step
            )));
        }
        Ok(())
    }

    /// Build settings from a stored JSON value, falling back to defaults
    /// when the entry is missing or unreadable.
    pub fn from_stored(value: Option<serde_json::Value>) -> Self {
        let Some(value) = value else {
            return Self::default();
        };
        match serde_json::from_value::<Self>(value) {
            Ok(settings) if settings.validate().is_ok() => settings,
            Ok(settings) => {
                tracing::warn!(?settings, "Stored settings are invalid, using defaults");
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Stored settings could not be parsed, using defaults: {}", e);
                Self::default()
            }
        }
    }

    /// The `-vf` filter chain: downsample, Lanczos scale, then a two-pass
    /// palette with ordered dithering.
    pub fn filter_chain(&self) -> String {
        format!(
            "fps={},scale={}:-1:flags=lanczos,split[s0][s1];[s0]palettegen=max_colors={}[p];[s1][p]paletteuse=dither=bayer:bayer_scale={}",
            self.fps, self.width, self.max_colors, self.bayer_scale
        )
    }
}
