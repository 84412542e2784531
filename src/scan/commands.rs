use tauri::{AppHandle, Emitter, State};

use crate::{
    decoder::DecoderError,
    scan::{DraftPatch, ScanController, ScanMode, ScanSnapshot},
    settings::ScannerSettings,
    AppState,
};

pub const SETTINGS_UPDATED_EVENT: &str = "scanner-settings-updated";

fn controller_from_state(state: &State<'_, AppState>) -> ScanController {
    state.scanner.clone()
}

#[tauri::command]
pub async fn get_scan_state(state: State<'_, AppState>) -> Result<ScanSnapshot, String> {
    Ok(controller_from_state(&state).snapshot())
}

#[tauri::command]
pub async fn submit_manual_code(
    state: State<'_, AppState>,
    code: String,
) -> Result<ScanSnapshot, String> {
    let controller = controller_from_state(&state);
    controller
        .submit_manual_code(code)
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn select_mode(
    state: State<'_, AppState>,
    mode: ScanMode,
) -> Result<ScanSnapshot, String> {
    let controller = controller_from_state(&state);
    controller.select_mode(mode).await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn update_draft(
    state: State<'_, AppState>,
    patch: DraftPatch,
) -> Result<ScanSnapshot, String> {
    let controller = controller_from_state(&state);
    controller.update_draft(patch).await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn confirm_submit(state: State<'_, AppState>) -> Result<ScanSnapshot, String> {
    let controller = controller_from_state(&state);
    controller.confirm_submit().await.map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn cancel_confirmation(state: State<'_, AppState>) -> Result<ScanSnapshot, String> {
    let controller = controller_from_state(&state);
    controller
        .cancel_confirmation()
        .await
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn restart_decoder(state: State<'_, AppState>) -> Result<ScanSnapshot, String> {
    let controller = controller_from_state(&state);
    controller.restart_decoder().await.map_err(|e| e.to_string())
}

/// Called by the web shell for every string its QR library decodes.
#[tauri::command]
pub fn push_decoded_text(state: State<'_, AppState>, text: String) -> Result<bool, String> {
    Ok(state.camera.feed(text))
}

#[tauri::command]
pub fn report_camera_failure(
    state: State<'_, AppState>,
    message: String,
    permission_denied: bool,
) -> Result<(), String> {
    let error = if permission_denied {
        DecoderError::PermissionDenied(message)
    } else {
        DecoderError::Unavailable(message)
    };
    state
        .scanner
        .report_decoder_failure(error)
        .map_err(|e| e.to_string())
}

#[tauri::command]
pub async fn set_api_token(state: State<'_, AppState>, token: Option<String>) -> Result<(), String> {
    state.api.set_token(token).await;
    Ok(())
}

#[tauri::command]
pub fn get_scanner_settings(state: State<'_, AppState>) -> Result<ScannerSettings, String> {
    Ok(state.settings.settings())
}

/// Persists settings. Station policy and endpoint are read at mount, so
/// they apply from the next launch.
#[tauri::command]
pub fn set_scanner_settings(
    settings: ScannerSettings,
    state: State<'_, AppState>,
    app_handle: AppHandle,
) -> Result<(), String> {
    state
        .settings
        .update(settings.clone())
        .map_err(|e| e.to_string())?;

    app_handle
        .emit(SETTINGS_UPDATED_EVENT, &settings)
        .map_err(|e| e.to_string())?;

    Ok(())
}
