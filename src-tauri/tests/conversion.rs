//! End-to-end runs of the converter against a scripted stand-in for ffmpeg.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use gif_converter_lib::bridge::ChannelSink;
use gif_converter_lib::ffmpeg::FFMPEG_NAME;
use gif_converter_lib::{
    ConversionEvent, ConversionJob, ConvertError, Converter, ConverterSettings, ToolLocator,
};
use tempfile::TempDir;

// Scripts are written and then executed; running tests one at a time keeps
// a freshly written script from being exec'd while another test forks.
static SERIAL: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

struct FakeTool {
    duration: &'static str,
    progress_secs: Vec<u32>,
    extra_stderr: &'static str,
    exit_code: i32,
    create_output: bool,
}

impl Default for FakeTool {
    fn default() -> Self {
        Self {
            duration: "00:00:10.00",
            progress_secs: (1..=10).collect(),
            extra_stderr: "",
            exit_code: 0,
            create_output: true,
        }
    }
}

impl FakeTool {
    /// Install the script as `<dir>/ffmpeg` and return the directory.
    fn install(&self) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        let progress = self
            .progress_secs
            .iter()
            .map(|s| format!("printf 'frame=%d fps=0.0 q=-0.0 size=1kB time=00:00:%02d.00 bitrate=N/A\\r' {s} {s} >&2\n"))
            .collect::<String>();
        let touch_output = if self.create_output { ": > \"$last\"\n" } else { "" };

        let script = format!(
            "#!/bin/sh\n\
             echo \"$@\" >> \"$(dirname \"$0\")/calls.log\"\n\
             case \" $* \" in\n\
             *\" -vf \"*) ;;\n\
             *) echo \"Input #0, mov,mp4,m4a, from '$2':\" >&2\n\
                echo \"  Duration: {duration}, start: 0.000000, bitrate: 900 kb/s\" >&2\n\
                echo \"At least one output file must be specified\" >&2\n\
                exit 1 ;;\n\
             esac\n\
             echo \"Stream #0:0: Video: h264, yuv420p, 1280x720\" >&2\n\
             {progress}\
             printf '\\n' >&2\n\
             {extra}\
             for last; do :; done\n\
             {touch_output}\
             exit {code}\n",
            duration = self.duration,
            progress = progress,
            extra = self.extra_stderr,
            touch_output = touch_output,
            code = self.exit_code,
        );

        let path = dir.path().join(FFMPEG_NAME);
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        dir
    }
}

fn source_in(dir: &Path) -> PathBuf {
    let source = dir.join("clip.mp4");
    std::fs::write(&source, b"not really a video").unwrap();
    source
}

fn settings() -> ConverterSettings {
    ConverterSettings {
        search_system_path: false,
        ..Default::default()
    }
}

async fn run_job(
    dir: &Path,
    job: ConversionJob,
    settings: &ConverterSettings,
) -> (Result<PathBuf, ConvertError>, Vec<ConversionEvent>) {
    let converter = Converter::new(ToolLocator::new(dir));
    let (sink, mut rx) = ChannelSink::new();
    let guard = converter.try_begin().unwrap();
    let result = converter.execute(job, settings, &sink, guard).await;
    assert!(!converter.is_busy());

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    (result, events)
}

fn progress_values(events: &[ConversionEvent]) -> Vec<f64> {
    events
        .iter()
        .filter_map(|e| match e {
            ConversionEvent::Progress { percent } => Some(*percent),
            _ => None,
        })
        .collect()
}

fn log_messages(events: &[ConversionEvent]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            ConversionEvent::Log { message } => Some(message.as_str()),
            _ => None,
        })
        .collect()
}

fn terminal_counts(events: &[ConversionEvent]) -> (usize, usize) {
    let completed = events.iter().filter(|e| matches!(e, ConversionEvent::Completed { .. })).count();
    let failed = events.iter().filter(|e| matches!(e, ConversionEvent::Failed { .. })).count();
    (completed, failed)
}

#[tokio::test]
async fn converts_and_reports_progress_up_to_100() {
    let _serial = SERIAL.lock().await;
    let dir = FakeTool::default().install();
    let source = source_in(dir.path());

    let (result, events) = run_job(dir.path(), ConversionJob::new(&source, 0.0, 0.0), &settings()).await;

    let output = result.unwrap();
    assert_eq!(output, dir.path().join("clip.gif"));
    assert!(output.is_file());

    assert!(events.contains(&ConversionEvent::DurationProbed { seconds: Some(10.0) }));

    let progress = progress_values(&events);
    assert_eq!(progress, vec![10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 100.0]);

    let logs = log_messages(&events);
    let milestones: Vec<_> = logs.iter().filter(|m| m.starts_with("Progress ")).collect();
    assert_eq!(milestones.len(), 10);
    assert_eq!(*milestones[9], "Progress 100% (00:10 / 00:10)");
    assert!(logs.iter().any(|m| m.contains("time=00:00:05.00")));

    assert_eq!(terminal_counts(&events), (1, 0));
    assert!(matches!(events.last(), Some(ConversionEvent::Completed { .. })));
}

#[tokio::test]
async fn stream_ending_short_still_logs_the_last_milestone() {
    let _serial = SERIAL.lock().await;
    let dir = FakeTool {
        progress_secs: (1..=9).collect(),
        ..Default::default()
    }
    .install();
    let source = source_in(dir.path());

    let (result, events) = run_job(dir.path(), ConversionJob::new(&source, 0.0, 0.0), &settings()).await;
    assert!(result.is_ok());

    assert_eq!(progress_values(&events).last(), Some(&100.0));
    let logs = log_messages(&events);
    let milestones: Vec<_> = logs.iter().filter(|m| m.starts_with("Progress ")).collect();
    assert_eq!(milestones.len(), 10);
    assert_eq!(*milestones[9], "Progress 100% (00:10 / 00:10)");

    // The final milestone comes before the completion log.
    let milestone_at = logs.iter().position(|m| *m == "Progress 100% (00:10 / 00:10)").unwrap();
    let complete_at = logs.iter().position(|m| *m == "Conversion complete").unwrap();
    assert!(milestone_at < complete_at);
}

#[tokio::test]
async fn trims_are_passed_as_input_seeks() {
    let _serial = SERIAL.lock().await;
    let dir = FakeTool {
        progress_secs: vec![1, 3, 5],
        ..Default::default()
    }
    .install();
    let source = source_in(dir.path());

    let (result, events) = run_job(dir.path(), ConversionJob::new(&source, 2.0, 3.0), &settings()).await;
    assert!(result.is_ok());

    let calls = std::fs::read_to_string(dir.path().join("calls.log")).unwrap();
    let calls: Vec<&str> = calls.lines().collect();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], format!("-i {}", source.display()));
    assert!(calls[1].starts_with(&format!("-ss 2.000 -to 7.000 -i {} -vf fps=8,", source.display())));
    assert!(calls[1].ends_with(&format!("-y {}", dir.path().join("clip.gif").display())));

    // Five seconds of output is the whole trimmed range.
    assert_eq!(progress_values(&events), vec![20.0, 60.0, 100.0]);
}

#[tokio::test]
async fn nonzero_exit_reports_one_failure_with_context() {
    let _serial = SERIAL.lock().await;
    let dir = FakeTool {
        progress_secs: vec![1, 2],
        extra_stderr: "echo \"Error while opening encoder for output stream #0:0\" >&2\n",
        exit_code: 1,
        create_output: false,
        ..Default::default()
    }
    .install();
    let source = source_in(dir.path());

    let (result, events) = run_job(dir.path(), ConversionJob::new(&source, 0.0, 0.0), &settings()).await;

    assert!(matches!(result, Err(ConvertError::ConversionFailed { code: Some(1), .. })));
    assert_eq!(terminal_counts(&events), (0, 1));
    match events.last() {
        Some(ConversionEvent::Failed { reason, context }) => {
            assert_eq!(reason, "FFmpeg exited with code 1");
            assert!(context.contains("Error while opening encoder"));
        }
        other => panic!("expected Failed, got {:?}", other),
    }
    // No top-up to 100 on failure.
    assert_eq!(progress_values(&events), vec![10.0, 20.0]);
}

#[tokio::test]
async fn failure_context_is_limited_to_the_tail() {
    let _serial = SERIAL.lock().await;
    let dir = FakeTool {
        exit_code: 2,
        create_output: false,
        ..Default::default()
    }
    .install();
    let source = source_in(dir.path());
    let settings = ConverterSettings {
        failure_context_lines: 3,
        ..settings()
    };

    let (_, events) = run_job(dir.path(), ConversionJob::new(&source, 0.0, 0.0), &settings).await;
    let Some(ConversionEvent::Failed { context, .. }) = events.last() else {
        panic!("expected Failed");
    };
    assert_eq!(context.lines().count(), 3);
    assert!(context.ends_with("time=00:00:10.00 bitrate=N/A"));
}

#[tokio::test]
async fn unknown_duration_degrades_to_log_only() {
    let _serial = SERIAL.lock().await;
    let dir = FakeTool {
        duration: "N/A",
        ..Default::default()
    }
    .install();
    let source = source_in(dir.path());

    let (result, events) = run_job(dir.path(), ConversionJob::new(&source, 0.0, 0.0), &settings()).await;

    assert!(result.is_ok());
    assert!(events.contains(&ConversionEvent::DurationProbed { seconds: None }));
    assert!(progress_values(&events).is_empty());
    let logs = log_messages(&events);
    assert!(logs.iter().any(|m| m.contains("time=00:00:10.00")));
    assert!(!logs.iter().any(|m| m.starts_with("Progress ")));
    assert_eq!(terminal_counts(&events), (1, 0));
}

#[tokio::test]
async fn end_trim_without_duration_is_rejected() {
    let _serial = SERIAL.lock().await;
    let dir = FakeTool {
        duration: "N/A",
        ..Default::default()
    }
    .install();
    let source = source_in(dir.path());

    let (result, events) = run_job(dir.path(), ConversionJob::new(&source, 0.0, 2.0), &settings()).await;

    assert!(matches!(result, Err(ConvertError::InvalidTrim(_))));
    assert_eq!(terminal_counts(&events), (0, 1));
    let calls = std::fs::read_to_string(dir.path().join("calls.log")).unwrap();
    assert_eq!(calls.lines().count(), 1, "only the probe should have run");
}

#[tokio::test]
async fn trim_longer_than_video_is_rejected_before_spawn() {
    let _serial = SERIAL.lock().await;
    let dir = FakeTool::default().install();
    let source = source_in(dir.path());

    let (result, events) = run_job(dir.path(), ConversionJob::new(&source, 6.0, 5.0), &settings()).await;

    assert!(matches!(result, Err(ConvertError::InvalidTrim(_))));
    assert_eq!(terminal_counts(&events), (0, 1));
    assert!(!dir.path().join("clip.gif").exists());
    let calls = std::fs::read_to_string(dir.path().join("calls.log")).unwrap();
    assert_eq!(calls.lines().count(), 1);
}

#[tokio::test]
async fn clean_exit_without_output_is_a_failure() {
    let _serial = SERIAL.lock().await;
    let dir = FakeTool {
        create_output: false,
        ..Default::default()
    }
    .install();
    let source = source_in(dir.path());

    let (result, events) = run_job(dir.path(), ConversionJob::new(&source, 0.0, 0.0), &settings()).await;

    assert!(matches!(result, Err(ConvertError::OutputMissing { .. })));
    assert_eq!(terminal_counts(&events), (0, 1));
}

#[tokio::test]
async fn undecodable_bytes_are_dropped() {
    let _serial = SERIAL.lock().await;
    let dir = FakeTool {
        progress_secs: vec![],
        extra_stderr: "printf 'frame=80 \\377\\376time=00:00:10.00 bitrate=N/A\\n' >&2\n",
        ..Default::default()
    }
    .install();
    let source = source_in(dir.path());

    let (result, events) = run_job(dir.path(), ConversionJob::new(&source, 0.0, 0.0), &settings()).await;

    assert!(result.is_ok());
    assert_eq!(progress_values(&events), vec![100.0]);
    assert!(log_messages(&events).contains(&"frame=80 time=00:00:10.00 bitrate=N/A"));
}

#[tokio::test]
async fn bundled_subdirectory_is_found() {
    let _serial = SERIAL.lock().await;
    let tool_dir = FakeTool::default().install();
    let app_dir = tempfile::tempdir().unwrap();
    let bin_dir = app_dir.path().join("ffmpeg").join("bin");
    std::fs::create_dir_all(&bin_dir).unwrap();
    std::fs::copy(tool_dir.path().join(FFMPEG_NAME), bin_dir.join(FFMPEG_NAME)).unwrap();
    let source = source_in(app_dir.path());

    let (result, _) = run_job(app_dir.path(), ConversionJob::new(&source, 0.0, 0.0), &settings()).await;
    assert_eq!(result.unwrap(), app_dir.path().join("clip.gif"));
}
