//! Parsers for the two timestamps FFmpeg prints on stderr.
//!
//! `Duration: 00:01:05.50, start: ...` appears in the input banner, and
//! `time=00:00:12.34` appears on every stats line while encoding.

use regex::Regex;
use std::sync::OnceLock;

static DURATION_REGEX: OnceLock<Regex> = OnceLock::new();
static TIME_REGEX: OnceLock<Regex> = OnceLock::new();

fn duration_regex() -> &'static Regex {
    DURATION_REGEX.get_or_init(|| {
        Regex::new(r"Duration:\s*(\d{2,}:\d{2}:\d{2}\.\d{2})").expect("duration pattern is valid")
    })
}

fn time_regex() -> &'static Regex {
    TIME_REGEX.get_or_init(|| {
        Regex::new(r"time=\s*(\d{2,}:\d{2}:\d{2}\.\d{2})").expect("time pattern is valid")
    })
}

/// Parse `HH:MM:SS.cc` into seconds.
pub fn parse_timestamp(value: &str) -> Option<f64> {
    let mut parts = value.trim().split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let (secs, centis) = parts.next()?.split_once('.')?;
    if parts.next().is_some() || minutes >= 60 || centis.len() != 2 {
        return None;
    }
    let secs: u64 = secs.parse().ok()?;
    let centis: u64 = centis.parse().ok()?;
    if secs >= 60 {
        return None;
    }

    let whole = hours
        .checked_mul(3600)?
        .checked_add(minutes * 60 + secs)?;
    Some(whole as f64 + centis as f64 / 100.0)
}

/// Total media duration from the `Duration:` banner line, if present.
///
/// `Duration: N/A` (streams without a known length) yields `None`.
pub fn parse_duration_marker(text: &str) -> Option<f64> {
    let caps = duration_regex().captures(text)?;
    parse_timestamp(&caps[1])
}

/// Elapsed output time from a stats line such as
/// `frame=  120 fps= 60 q=-0.0 size=  512kB time=00:00:05.00 bitrate=...`.
pub fn parse_time_marker(line: &str) -> Option<f64> {
    let caps = time_regex().captures(line)?;
    parse_timestamp(&caps[1])
}

/// Render seconds as `MM:SS` for log messages.
pub fn format_clock(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}
