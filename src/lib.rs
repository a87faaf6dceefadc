mod utils;

pub mod backend;
pub mod bridge;
pub mod error;
pub mod events;
pub mod models;
pub mod playback;
pub mod queue;
pub mod settings;
pub mod settlement;

pub use backend::{HttpBackend, RemoteService};
pub use bridge::{ChannelTransport, PlayerBridge, PlayerCommand, SurfaceTransport};
pub use error::{EngineError, Result};
pub use events::{EngineEvent, EventSink, NullSink};
pub use models::{Clip, ClipRecord, ClipStatus, SettlementReceipt, SettlementRequest};
pub use playback::{
    PlaybackController, PlaybackPhase, PlaybackState, SettlementStatus, SkipOutcome,
};
pub use queue::{QueueManager, QueueSnapshot};
pub use settings::{BackendConfig, EngineSettings, SettingsStore};
pub use settlement::RewardSettlement;

#[cfg(feature = "shell")]
pub(crate) struct AppState {
    pub(crate) playback: tokio::sync::Mutex<Option<PlaybackController>>,
    pub(crate) settings: SettingsStore,
}

#[cfg(feature = "shell")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    use playback::commands::{
        bridge_message, get_watch_settings, set_watch_settings, watch_focus, watch_foreground,
        watch_leave, watch_open, watch_queue, watch_skip, watch_state,
    };
    use tauri::Manager;

    // Initialize logging (reads RUST_LOG env var, info by default)
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("watchloop starting up...");

    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .setup(|app| {
            let result = (|| -> anyhow::Result<()> {
                let app_data_dir = app
                    .path()
                    .app_data_dir()
                    .map_err(|err| anyhow::anyhow!(err))?;
                std::fs::create_dir_all(&app_data_dir)?;

                let settings = SettingsStore::new(app_data_dir.join("settings.json"))?;

                app.manage(AppState {
                    playback: tokio::sync::Mutex::new(None),
                    settings,
                });

                Ok(())
            })();

            result.map_err(|err| err.into())
        })
        .invoke_handler(tauri::generate_handler![
            watch_open,
            watch_leave,
            watch_focus,
            watch_foreground,
            watch_skip,
            watch_state,
            watch_queue,
            bridge_message,
            get_watch_settings,
            set_watch_settings,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
