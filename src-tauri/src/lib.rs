pub mod bridge;
pub mod converter;
pub mod error;
pub mod ffmpeg;
pub mod markers;
pub mod progress;
pub mod settings;

#[cfg(feature = "gui")]
mod commands;

pub use bridge::{ChannelSink, ConversionEvent, EventSink};
pub use converter::{ConversionJob, Converter, JobGuard};
pub use error::{ConvertError, ConvertResult};
pub use ffmpeg::ToolLocator;
pub use settings::ConverterSettings;

/// Log to stderr; `RUST_LOG` overrides the default `info` level.
pub fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

#[cfg(feature = "gui")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    init_tracing();
    tracing::info!("Starting gif-converter {}", env!("CARGO_PKG_VERSION"));

    tauri::Builder::default()
        .plugin(tauri_plugin_store::Builder::new().build())
        .plugin(tauri_plugin_opener::init())
        .manage(commands::AppState::new(Converter::new(ToolLocator::from_current_exe())))
        .invoke_handler(tauri::generate_handler![
            commands::probe_duration,
            commands::start_conversion,
            commands::reveal_output,
            commands::get_settings,
            commands::save_settings,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
