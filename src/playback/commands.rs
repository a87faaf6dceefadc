use std::sync::Arc;

use tauri::{AppHandle, Emitter, State};

use crate::{
    backend::{HttpBackend, RemoteService},
    bridge::{PlayerCommand, SurfaceTransport},
    error::{EngineError, Result as EngineResult},
    events::{EngineEvent, EventSink},
    models::Clip,
    playback::{PlaybackController, PlaybackState, SkipOutcome},
    queue::QueueSnapshot,
    settings::EngineSettings,
    AppState,
};

const PLAYER_COMMAND_EVENT: &str = "player-command";
const WATCH_EVENT: &str = "watch-event";

/// Carries bridge commands to the webview hosting the embedded player.
struct WebviewTransport(AppHandle);

impl SurfaceTransport for WebviewTransport {
    fn post(&self, command: PlayerCommand) -> EngineResult<()> {
        self.0
            .emit(PLAYER_COMMAND_EVENT, command)
            .map_err(|err| EngineError::Protocol(format!("failed to emit {PLAYER_COMMAND_EVENT}: {err}")))
    }
}

struct WebviewSink(AppHandle);

impl EventSink for WebviewSink {
    fn emit(&self, event: EngineEvent) {
        if let Err(err) = self.0.emit(WATCH_EVENT, event) {
            log::warn!("failed to emit {WATCH_EVENT}: {err}");
        }
    }
}

async fn controller_from_state(state: &State<'_, AppState>) -> Result<PlaybackController, String> {
    state
        .playback
        .lock()
        .await
        .clone()
        .ok_or_else(|| "watch screen has not been opened".to_string())
}

/// Open the watch screen for a signed-in viewer, building the engine on
/// first use or when the viewer changes.
#[tauri::command]
pub async fn watch_open(
    state: State<'_, AppState>,
    app_handle: AppHandle,
    viewer_id: String,
) -> Result<Option<Clip>, String> {
    let controller = {
        let mut slot = state.playback.lock().await;
        let reusable = slot
            .as_ref()
            .filter(|controller| controller.viewer_id() == viewer_id)
            .cloned();
        match reusable {
            Some(controller) => controller,
            None => {
                if let Some(previous) = slot.take() {
                    previous.shutdown().await;
                }
                let backend: Arc<dyn RemoteService> =
                    Arc::new(HttpBackend::new(&state.settings.backend()).map_err(|e| e.to_string())?);
                let controller = PlaybackController::new(
                    viewer_id,
                    backend,
                    Arc::new(WebviewTransport(app_handle.clone())),
                    Arc::new(WebviewSink(app_handle)),
                    &state.settings.engine(),
                );
                *slot = Some(controller.clone());
                controller
            }
        }
    };

    controller.open().await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn watch_leave(state: State<'_, AppState>) -> Result<(), String> {
    let controller = controller_from_state(&state).await?;
    controller.leave().await;
    Ok(())
}

#[tauri::command]
pub async fn watch_focus(state: State<'_, AppState>, focused: bool) -> Result<(), String> {
    let controller = controller_from_state(&state).await?;
    controller.set_focus(focused).await;
    Ok(())
}

#[tauri::command]
pub async fn watch_foreground(state: State<'_, AppState>, foreground: bool) -> Result<(), String> {
    let controller = controller_from_state(&state).await?;
    controller.set_foreground(foreground).await;
    Ok(())
}

#[tauri::command]
pub async fn watch_skip(state: State<'_, AppState>) -> Result<SkipOutcome, String> {
    let controller = controller_from_state(&state).await?;
    controller.skip().await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn watch_state(state: State<'_, AppState>) -> Result<PlaybackState, String> {
    let controller = controller_from_state(&state).await?;
    Ok(controller.snapshot().await)
}

#[tauri::command]
pub async fn watch_queue(state: State<'_, AppState>) -> Result<QueueSnapshot, String> {
    let controller = controller_from_state(&state).await?;
    Ok(controller.queue().snapshot().await)
}

/// Message posted by the embedded player, forwarded verbatim.
#[tauri::command]
pub async fn bridge_message(state: State<'_, AppState>, message: String) -> Result<(), String> {
    let controller = controller_from_state(&state).await?;
    controller
        .handle_player_message(&message)
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub fn get_watch_settings(state: State<'_, AppState>) -> Result<EngineSettings, String> {
    Ok(state.settings.engine())
}

/// Persists settings. Only `auto_skip` applies to a running engine; the rest
/// take effect the next time the engine is built.
#[tauri::command]
pub async fn set_watch_settings(
    state: State<'_, AppState>,
    settings: EngineSettings,
) -> Result<(), String> {
    state
        .settings
        .update_engine(settings.clone())
        .map_err(|e| e.to_string())?;

    if let Some(controller) = state.playback.lock().await.as_ref() {
        controller.set_auto_skip(settings.auto_skip);
    }
    Ok(())
}
