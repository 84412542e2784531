pub mod api;
pub mod decoder;
pub mod scan;
pub mod settings;
mod utils;

pub use utils::logging::init_logging;

#[cfg(feature = "desktop")]
pub use desktop::run;
#[cfg(feature = "desktop")]
pub(crate) use desktop::AppState;

#[cfg(feature = "desktop")]
mod desktop {
    use std::sync::Arc;

    use tauri::{Manager, RunEvent};

    use crate::{
        api::HttpSubmissionApi,
        decoder::{bridge::BridgeDecoder, CameraSlot},
        scan::{
            commands::{
                cancel_confirmation, confirm_submit, get_scan_state, get_scanner_settings,
                push_decoded_text, report_camera_failure, restart_decoder, select_mode,
                set_api_token, set_scanner_settings, submit_manual_code, update_draft,
            },
            events::TauriSink,
            ScanController,
        },
        settings::{verbose_logging, SettingsStore},
    };

    pub(crate) struct AppState {
        pub(crate) scanner: ScanController,
        pub(crate) camera: Arc<BridgeDecoder>,
        pub(crate) api: Arc<HttpSubmissionApi>,
        pub(crate) settings: SettingsStore,
    }

    #[cfg_attr(mobile, tauri::mobile_entry_point)]
    pub fn run() {
        crate::init_logging(verbose_logging());

        log::info!("GateScan starting up...");

        let app = tauri::Builder::default()
            .plugin(tauri_plugin_opener::init())
            .setup(|app| {
                let result = (|| -> anyhow::Result<()> {
                    let app_data_dir = app
                        .path()
                        .app_data_dir()
                        .map_err(|err| anyhow::anyhow!(err))?;
                    std::fs::create_dir_all(&app_data_dir)?;

                    let settings_store = SettingsStore::new(app_data_dir.join("settings.json"))?;
                    let settings = settings_store.settings();
                    log::info!(
                        "station: {:?} on {} route -> {}",
                        settings.deployment,
                        settings.route,
                        settings.api_base_url
                    );

                    let api = Arc::new(HttpSubmissionApi::new(
                        settings.api_base_url.clone(),
                        settings.route,
                        settings.request_timeout(),
                    )?);
                    let camera = Arc::new(BridgeDecoder::new(CameraSlot::new()));
                    let sink = Arc::new(TauriSink::new(app.handle().clone()));

                    // The session spawns tasks, so mount on the Tauri runtime.
                    let scanner = tauri::async_runtime::block_on({
                        let api = api.clone();
                        let camera = camera.clone();
                        async move {
                            ScanController::mount(
                                settings.scan_policy(),
                                camera,
                                api,
                                sink,
                                settings.camera(),
                            )
                        }
                    });

                    app.manage(AppState {
                        scanner,
                        camera,
                        api,
                        settings: settings_store,
                    });

                    Ok(())
                })();

                result.map_err(|err| err.into())
            })
            .invoke_handler(tauri::generate_handler![
                get_scan_state,
                submit_manual_code,
                select_mode,
                update_draft,
                confirm_submit,
                cancel_confirmation,
                restart_decoder,
                push_decoded_text,
                report_camera_failure,
                set_api_token,
                get_scanner_settings,
                set_scanner_settings,
            ])
            .build(tauri::generate_context!())
            .expect("error while building tauri application");

        app.run(|app_handle, event| {
            if let RunEvent::Exit = event {
                if let Some(state) = app_handle.try_state::<AppState>() {
                    let scanner = state.scanner.clone();
                    tauri::async_runtime::block_on(async move { scanner.shutdown().await });
                }
            }
        });
    }
}
