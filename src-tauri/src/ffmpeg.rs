use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::process::Command;

use crate::error::{ConvertError, ConvertResult};
use crate::markers::parse_duration_marker;

#[cfg(target_os = "windows")]
pub const FFMPEG_NAME: &str = "ffmpeg.exe";

#[cfg(not(target_os = "windows"))]
pub const FFMPEG_NAME: &str = "ffmpeg";

/// Conventional subdirectory (relative to the executable) for a bundled ffmpeg.
pub const BUNDLED_SUBDIR: [&str; 2] = ["ffmpeg", "bin"];

/// Finds the ffmpeg binary.
#[derive(Debug, Clone)]
pub struct ToolLocator {
    base_dir: Option<PathBuf>,
    search_system_path: bool,
}

impl ToolLocator {
    /// Search relative to `base_dir` only.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
            search_system_path: false,
        }
    }

    /// Search relative to the running executable.
    pub fn from_current_exe() -> Self {
        let base_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));
        Self {
            base_dir,
            search_system_path: false,
        }
    }

    pub fn with_system_path(mut self, enabled: bool) -> Self {
        self.search_system_path = enabled;
        self
    }

    /// Candidate locations, in lookup order.
    pub fn candidates(&self) -> Vec<PathBuf> {
        let Some(base) = &self.base_dir else {
            return Vec::new();
        };
        let bundled = BUNDLED_SUBDIR
            .iter()
            .fold(base.clone(), |dir, part| dir.join(part))
            .join(FFMPEG_NAME);
        vec![base.join(FFMPEG_NAME), bundled]
    }

    pub fn locate(&self) -> ConvertResult<PathBuf> {
        let candidates = self.candidates();
        if let Some(found) = candidates.iter().find(|p| p.is_file()) {
            return Ok(found.clone());
        }

        if self.search_system_path {
            if let Ok(path) = which::which(FFMPEG_NAME) {
                return Ok(path);
            }
        }

        Err(ConvertError::ToolNotFound { searched: candidates })
    }
}

/// A command that never pops up a console window on Windows.
pub fn ffmpeg_command(ffmpeg_path: &Path) -> Command {
    #[allow(unused_mut)]
    let mut cmd = Command::new(ffmpeg_path);

    #[cfg(target_os = "windows")]
    {
        cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
    }

    cmd
}

/// Read the media duration by letting ffmpeg print the input banner.
///
/// `ffmpeg -i <file>` without an output exits non-zero by design, so the
/// exit status is ignored and only the banner text matters.
pub async fn probe_duration(ffmpeg_path: &Path, input: &Path) -> ConvertResult<f64> {
    let output = ffmpeg_command(ffmpeg_path)
        .arg("-i")
        .arg(input)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| {
            tracing::warn!("Failed to run duration probe with {:?}: {}", ffmpeg_path, e);
            ConvertError::DurationUnavailable
        })?;

    let stderr = decode_lossy(&output.stderr);
    parse_duration_marker(&stderr).ok_or_else(|| {
        tracing::warn!(exit = ?output.status.code(), "No duration marker in ffmpeg output for {:?}", input);
        ConvertError::DurationUnavailable
    })
}

/// Decode bytes as UTF-8, dropping anything that does not decode.
///
/// Undecodable bytes come back from `from_utf8_lossy` as U+FFFD and are
/// filtered out afterwards, so a U+FFFD that was genuinely present in the
/// input is dropped as well. FFmpeg's diagnostics never carry one.
pub fn decode_lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .chars()
        .filter(|c| *c != char::REPLACEMENT_CHARACTER)
        .collect()
}

/// Splits ffmpeg's stderr into lines.
///
/// The stats line is redrawn with `\r`, so both `\r` and `\n` end a line.
pub struct DiagnosticLines<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin> DiagnosticLines<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, buf: Vec::new() }
    }

    /// Next non-empty line, or `None` at end of stream.
    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        loop {
            self.buf.clear();
            let read = read_until_line_end(&mut self.reader, &mut self.buf).await?;
            if read == 0 {
                return Ok(None);
            }
            let line = decode_lossy(&self.buf);
            let line = line.trim();
            if !line.is_empty() {
                return Ok(Some(line.to_string()));
            }
        }
    }
}

async fn read_until_line_end<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    out: &mut Vec<u8>,
) -> std::io::Result<usize> {
    let mut total = 0;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(total);
        }
        match available.iter().position(|b| *b == b'\n' || *b == b'\r') {
            Some(pos) => {
                out.extend_from_slice(&available[..pos]);
                reader.consume(pos + 1);
                return Ok(total + pos + 1);
            }
            None => {
                let len = available.len();
                out.extend_from_slice(available);
                reader.consume(len);
                total += len;
            }
        }
    }
}
