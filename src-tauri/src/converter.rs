use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, BufReader};

use crate::bridge::{ConversionEvent, EventSink};
use crate::error::{ConvertError, ConvertResult};
use crate::ffmpeg::{ffmpeg_command, probe_duration, DiagnosticLines, ToolLocator};
use crate::markers::{format_clock, parse_time_marker};
use crate::progress::{ProgressTracker, ProgressUpdate};
use crate::settings::ConverterSettings;

/// Smallest effective duration used as a divisor.
pub const MIN_EFFECTIVE_DURATION: f64 = 0.01;

const OUTPUT_EXTENSION: &str = "gif";
const ERROR_INDICATORS: [&str; 4] = ["Error", "error", "Invalid", "No such file"];

/// One user-requested conversion. Fixed once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionJob {
    pub source_path: PathBuf,
    /// Seconds cut from the beginning
    pub trim_start: f64,
    /// Seconds cut from the end
    pub trim_end: f64,
    pub output_path: PathBuf,
}

impl ConversionJob {
    pub fn new(source_path: impl Into<PathBuf>, trim_start: f64, trim_end: f64) -> Self {
        let source_path = source_path.into();
        let output_path = output_path_for(&source_path);
        Self {
            source_path,
            trim_start,
            trim_end,
            output_path,
        }
    }
}

/// `<dir>/<stem>.gif` beside the source.
pub fn output_path_for(source: &Path) -> PathBuf {
    source.with_extension(OUTPUT_EXTENSION)
}

/// Seek window resolved against the probed duration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrimPlan {
    /// Value for `-ss`, if any
    pub start: Option<f64>,
    /// Value for `-to`, if any
    pub end: Option<f64>,
    /// Length of the converted range, when the total duration is known
    pub effective_duration: Option<f64>,
}

impl TrimPlan {
    pub fn resolve(job: &ConversionJob, total: Option<f64>) -> ConvertResult<Self> {
        let (start, end_offset) = (job.trim_start, job.trim_end);
        if !start.is_finite() || !end_offset.is_finite() || start < 0.0 || end_offset < 0.0 {
            return Err(ConvertError::InvalidTrim(format!(
                "trim values must be non-negative (start {}, end {})",
                start, end_offset
            )));
        }

        let start_seek = (start > 0.0).then_some(start);

        let Some(total) = total else {
            if end_offset > 0.0 {
                return Err(ConvertError::InvalidTrim(
                    "cannot trim the end without a known video duration".to_string(),
                ));
            }
            return Ok(Self {
                start: start_seek,
                end: None,
                effective_duration: None,
            });
        };

        let end_to = total - end_offset;
        let remaining = end_to - start;
        if remaining <= 0.0 {
            return Err(ConvertError::InvalidTrim(format!(
                "trim exceeds the video length (total {:.2}s, start {:.2}s, end {:.2}s, remaining {:.2}s)",
                total, start, end_offset, remaining
            )));
        }

        Ok(Self {
            start: start_seek,
            end: (end_offset > 0.0).then_some(end_to),
            effective_duration: Some(remaining.max(MIN_EFFECTIVE_DURATION)),
        })
    }
}

/// `[-ss <start>] [-to <end>] -i <source> -vf <chain> -y <output>`
pub fn build_args(job: &ConversionJob, plan: &TrimPlan, settings: &ConverterSettings) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::new();

    if let Some(start) = plan.start {
        args.push("-ss".into());
        args.push(format!("{:.3}", start).into());
    }
    if let Some(end) = plan.end {
        args.push("-to".into());
        args.push(format!("{:.3}", end).into());
    }

    args.push("-i".into());
    args.push(job.source_path.clone().into_os_string());
    args.push("-vf".into());
    args.push(settings.filter_chain().into());
    args.push("-y".into());
    args.push(job.output_path.clone().into_os_string());

    args
}

/// Keeps the slot busy until dropped.
#[derive(Debug)]
pub struct JobGuard {
    busy: Arc<AtomicBool>,
    id: u64,
}

impl JobGuard {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

/// Runs conversions, one at a time.
#[derive(Debug, Clone)]
pub struct Converter {
    locator: ToolLocator,
    busy: Arc<AtomicBool>,
    next_id: Arc<AtomicU64>,
}

impl Converter {
    pub fn new(locator: ToolLocator) -> Self {
        Self {
            locator,
            busy: Arc::new(AtomicBool::new(false)),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn locator(&self) -> &ToolLocator {
        &self.locator
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Claim the single job slot. A second claim while the first guard is
    /// alive is rejected.
    pub fn try_begin(&self) -> ConvertResult<JobGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| ConvertError::Busy)?;
        Ok(JobGuard {
            busy: Arc::clone(&self.busy),
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
        })
    }

    /// Run `job` to completion and report exactly one terminal event.
    pub async fn execute(
        &self,
        job: ConversionJob,
        settings: &ConverterSettings,
        sink: &dyn EventSink,
        guard: JobGuard,
    ) -> ConvertResult<PathBuf> {
        let job_id = guard.id();
        tracing::info!(job_id, source = ?job.source_path, "Conversion started");

        let result = self.run(&job, settings, sink).await;
        match &result {
            Ok(output) => {
                tracing::info!(job_id, output = ?output, "Conversion complete");
                sink.emit(ConversionEvent::log("Conversion complete"));
                sink.emit(ConversionEvent::Completed { output_path: output.clone() });
            }
            Err(e) => {
                tracing::error!(job_id, "Conversion failed: {}", e);
                sink.emit(ConversionEvent::log(format!("Conversion failed: {}", e)));
                sink.emit(ConversionEvent::failed(e.to_string(), &e.context()));
            }
        }

        drop(guard);
        result
    }

    async fn run(
        &self,
        job: &ConversionJob,
        settings: &ConverterSettings,
        sink: &dyn EventSink,
    ) -> ConvertResult<PathBuf> {
        settings.validate()?;
        let ffmpeg = self
            .locator
            .clone()
            .with_system_path(settings.search_system_path)
            .locate()?;
        tracing::debug!("Using ffmpeg at {:?}", ffmpeg);

        let total = match probe_duration(&ffmpeg, &job.source_path).await {
            Ok(seconds) => {
                sink.emit(ConversionEvent::log(format!(
                    "Video duration: {} ({:.2}s)",
                    format_clock(seconds),
                    seconds
                )));
                Some(seconds)
            }
            Err(e) => {
                tracing::warn!("{}; progress will be log-only", e);
                None
            }
        };
        sink.emit(ConversionEvent::DurationProbed { seconds: total });

        let plan = TrimPlan::resolve(job, total)?;
        match plan.effective_duration {
            Some(effective) => sink.emit(ConversionEvent::log(format!(
                "Trim: start={:.2}s, end={:.2}s, effective length={:.2}s",
                plan.start.unwrap_or(0.0),
                plan.end.unwrap_or(effective + plan.start.unwrap_or(0.0)),
                effective
            ))),
            None => sink.emit(ConversionEvent::log(
                "Warning: video duration unknown, progress will not be shown",
            )),
        }

        let args = build_args(job, &plan, settings);
        tracing::info!("Running {:?} {:?}", ffmpeg, args);
        sink.emit(ConversionEvent::log("Starting conversion..."));

        let mut child = ffmpeg_command(&ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ConvertError::ProcessLaunchFailed)?;

        // Drain stdout on the side so a chatty tool can never block on a full pipe.
        let stdout_task = child.stdout.take().map(|mut stdout| {
            tokio::spawn(async move {
                let mut bytes = Vec::new();
                let _ = stdout.read_to_end(&mut bytes).await;
                bytes
            })
        });

        let mut tracker = ProgressTracker::new(
            plan.effective_duration,
            settings.change_threshold,
            settings.milestone_step,
        );
        let mut tail: VecDeque<String> = VecDeque::with_capacity(settings.failure_context_lines);

        if let Some(stderr) = child.stderr.take() {
            let mut lines = DiagnosticLines::new(BufReader::new(stderr));
            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("Stopped reading ffmpeg output: {}", e);
                        break;
                    }
                };
                handle_line(&line, &mut tracker, &mut tail, settings, sink);
            }
        }

        let status = child.wait().await.map_err(ConvertError::ProcessWaitFailed)?;

        if let Some(task) = stdout_task {
            if let Ok(bytes) = task.await {
                let stdout = crate::ffmpeg::decode_lossy(&bytes);
                for line in stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
                    push_tail(&mut tail, line, settings.failure_context_lines);
                }
            }
        }

        let context = tail.iter().map(String::as_str).collect::<Vec<_>>().join("\n");

        if !status.success() {
            return Err(ConvertError::ConversionFailed {
                code: status.code(),
                context,
            });
        }

        if !job.output_path.is_file() {
            return Err(ConvertError::OutputMissing {
                path: job.output_path.clone(),
                context,
            });
        }

        let done = tracker.finish();
        let total = tracker.effective_duration().unwrap_or_default();
        report_update(done, total, &tracker, sink);

        Ok(job.output_path.clone())
    }
}

fn handle_line(
    line: &str,
    tracker: &mut ProgressTracker,
    tail: &mut VecDeque<String>,
    settings: &ConverterSettings,
    sink: &dyn EventSink,
) {
    push_tail(tail, line, settings.failure_context_lines);

    if settings.forward_diagnostics {
        sink.emit(ConversionEvent::log(line));
    }

    if ERROR_INDICATORS.iter().any(|marker| line.contains(marker)) {
        tracing::warn!("ffmpeg: {}", line);
    }

    let Some(elapsed) = parse_time_marker(line) else {
        return;
    };

    let update = tracker.observe(elapsed);
    report_update(update, elapsed, tracker, sink);
}

/// Push a bar update and its milestone log line, if any, to the sink.
fn report_update(update: ProgressUpdate, elapsed: f64, tracker: &ProgressTracker, sink: &dyn EventSink) {
    if let Some(percent) = update.percent {
        sink.emit(ConversionEvent::Progress { percent });
    }
    if let Some(decile) = update.milestone {
        let total = tracker.effective_duration().unwrap_or_default();
        tracing::info!("Progress {}%", decile);
        sink.emit(ConversionEvent::log(format!(
            "Progress {}% ({} / {})",
            decile,
            format_clock(elapsed.min(total)),
            format_clock(total)
        )));
    }
}

fn push_tail(tail: &mut VecDeque<String>, line: &str, capacity: usize) {
    if capacity == 0 {
        return;
    }
    while tail.len() >= capacity {
        tail.pop_front();
    }
    tail.push_back(line.to_string());
}
