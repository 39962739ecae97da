use serde::Serialize;
use std::path::{Path, PathBuf};
use tauri::{AppHandle, State};
use tauri_plugin_store::StoreExt;

use crate::bridge::TauriSink;
use crate::converter::{ConversionJob, Converter};
use crate::ffmpeg;
use crate::settings::{ConverterSettings, SETTINGS_KEY, SETTINGS_STORE};

pub struct AppState {
    converter: Converter,
}

impl AppState {
    pub fn new(converter: Converter) -> Self {
        Self { converter }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedJob {
    pub job_id: u64,
    pub output_path: PathBuf,
}

fn load_settings(app: &AppHandle) -> ConverterSettings {
    match app.store(SETTINGS_STORE) {
        Ok(store) => ConverterSettings::from_stored(store.get(SETTINGS_KEY)),
        Err(e) => {
            tracing::warn!("Settings store unavailable, using defaults: {}", e);
            ConverterSettings::default()
        }
    }
}

#[tauri::command]
pub async fn probe_duration(
    app: AppHandle,
    state: State<'_, AppState>,
    path: String,
) -> Result<Option<f64>, String> {
    let settings = load_settings(&app);
    let ffmpeg_path = state
        .converter
        .locator()
        .clone()
        .with_system_path(settings.search_system_path)
        .locate()
        .map_err(|e| e.to_string())?;

    Ok(ffmpeg::probe_duration(&ffmpeg_path, Path::new(&path)).await.ok())
}

#[tauri::command]
pub async fn start_conversion(
    app: AppHandle,
    state: State<'_, AppState>,
    source_path: String,
    trim_start: Option<f64>,
    trim_end: Option<f64>,
) -> Result<StartedJob, String> {
    let guard = state.converter.try_begin().map_err(|e| e.to_string())?;
    let settings = load_settings(&app);
    let job = ConversionJob::new(source_path, trim_start.unwrap_or(0.0), trim_end.unwrap_or(0.0));

    let started = StartedJob {
        job_id: guard.id(),
        output_path: job.output_path.clone(),
    };

    let converter = state.converter.clone();
    let sink = TauriSink::new(app, guard.id());
    tauri::async_runtime::spawn(async move {
        // The outcome reaches the UI through the sink.
        let _ = converter.execute(job, &settings, &sink, guard).await;
    });

    Ok(started)
}

#[tauri::command]
pub async fn reveal_output(path: String) -> Result<(), String> {
    tauri_plugin_opener::reveal_item_in_dir(&path).map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn get_settings(app: AppHandle) -> Result<ConverterSettings, String> {
    Ok(load_settings(&app))
}

#[tauri::command]
pub async fn save_settings(app: AppHandle, settings: ConverterSettings) -> Result<(), String> {
    settings.validate().map_err(|e| e.to_string())?;
    let value = serde_json::to_value(&settings).map_err(|e| e.to_string())?;
    let store = app.store(SETTINGS_STORE).map_err(|e| e.to_string())?;
    store.set(SETTINGS_KEY, value);
    store.save().map_err(|e| e.to_string())?;
    tracing::info!(?settings, "Settings saved");
    Ok(())
}
