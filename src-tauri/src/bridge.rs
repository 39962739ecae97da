//! Delivery of conversion events from the background task to the UI.
//!
//! The task that drives ffmpeg never touches interface state. It pushes
//! [`ConversionEvent`]s into an [`EventSink`], and the sink hands them to
//! whatever owns the view: the Tauri webview in the desktop build, a channel
//! in tests and headless use.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Failure context longer than this is cut down to its tail.
pub const MAX_CONTEXT_CHARS: usize = 4000;

/// Tauri event name for everything a job reports.
pub const CONVERSION_EVENT: &str = "conversion-event";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ConversionEvent {
    #[serde(rename_all = "camelCase")]
    DurationProbed { seconds: Option<f64> },
    #[serde(rename_all = "camelCase")]
    Progress { percent: f64 },
    #[serde(rename_all = "camelCase")]
    Log { message: String },
    #[serde(rename_all = "camelCase")]
    Completed { output_path: PathBuf },
    #[serde(rename_all = "camelCase")]
    Failed { reason: String, context: String },
}

impl ConversionEvent {
    pub fn log(message: impl Into<String>) -> Self {
        ConversionEvent::Log { message: message.into() }
    }

    pub fn failed(reason: impl Into<String>, context: &str) -> Self {
        ConversionEvent::Failed {
            reason: reason.into(),
            context: truncate_context(context, MAX_CONTEXT_CHARS),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConversionEvent::Completed { .. } | ConversionEvent::Failed { .. })
    }
}

/// Receiver side of the UI bridge. Delivery is fire-and-forget; events from
/// one job arrive in the order they were emitted.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ConversionEvent);
}

/// Keep the last `max_chars` characters of `context`, marking the cut.
pub fn truncate_context(context: &str, max_chars: usize) -> String {
    let count = context.chars().count();
    if count <= max_chars {
        return context.to_string();
    }
    let tail: String = context.chars().skip(count - max_chars).collect();
    format!("…{}", tail)
}

/// Sink backed by an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ConversionEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ConversionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: ConversionEvent) {
        // The UI may already be gone; nothing to do about it here.
        let _ = self.tx.send(event);
    }
}

#[cfg(feature = "gui")]
pub use tauri_sink::TauriSink;

#[cfg(feature = "gui")]
mod tauri_sink {
    use super::{ConversionEvent, EventSink, CONVERSION_EVENT};
    use serde::Serialize;
    use tauri::Emitter;

    #[derive(Debug, Clone, Serialize)]
    #[serde(rename_all = "camelCase")]
    struct EventPayload<'a> {
        job_id: u64,
        event: &'a ConversionEvent,
    }

    /// Sink that forwards events to the webview through `AppHandle::emit`,
    /// which may be called from any thread.
    #[derive(Clone)]
    pub struct TauriSink {
        app: tauri::AppHandle,
        job_id: u64,
    }

    impl TauriSink {
        pub fn new(app: tauri::AppHandle, job_id: u64) -> Self {
            Self { app, job_id }
        }
    }

    impl EventSink for TauriSink {
        fn emit(&self, event: ConversionEvent) {
            let payload = EventPayload { job_id: self.job_id, event: &event };
            if let Err(e) = self.app.emit(CONVERSION_EVENT, payload) {
                tracing::warn!(job_id = self.job_id, "Failed to deliver event to UI: {}", e);
            }
        }
    }
}
