use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong while turning a clip into a GIF.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("FFmpeg not found. Place it next to the application or in ffmpeg/bin/")]
    ToolNotFound { searched: Vec<PathBuf> },
    #[error("Could not determine video duration")]
    DurationUnavailable,
    #[error("Invalid trim settings: {0}")]
    InvalidTrim(String),
    #[error("Failed to spawn ffmpeg: {0}")]
    ProcessLaunchFailed(#[source] std::io::Error),
    #[error("Lost track of the ffmpeg process: {0}")]
    ProcessWaitFailed(#[source] std::io::Error),
    #[error("FFmpeg exited with code {}", .code.map_or_else(|| "unknown".to_string(), |c| c.to_string()))]
    ConversionFailed { code: Option<i32>, context: String },
    #[error("FFmpeg finished but {} was not created", .path.display())]
    OutputMissing { path: PathBuf, context: String },
    #[error("A conversion is already running")]
    Busy,
    #[error("Invalid settings: {0}")]
    Settings(String),
}

impl ConvertError {
    /// Diagnostic text that helps the user work out what happened.
    pub fn context(&self) -> String {
        match self {
            ConvertError::ToolNotFound { searched } => searched
                .iter()
                .map(|p| format!("searched: {}", p.display()))
                .collect::<Vec<_>>()
                .join("\n"),
            ConvertError::ConversionFailed { context, .. }
            | ConvertError::OutputMissing { context, .. } => context.clone(),
            _ => String::new(),
        }
    }
}

pub type ConvertResult<T> = Result<T, ConvertError>;
