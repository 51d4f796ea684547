// A service for pushing one payload to many APNs device tokens, with token
// import from text files -- meant for testing push setups end to end.
mod apns;
mod authtoken;
mod hub;
mod importer;
mod models;
mod notification;
mod push_service;
mod routes;
mod runs;
mod token;
mod types;
mod util;

use actix_web::{HttpResponse, HttpServer, App, web::{self, Data}, error};
use dotenv::dotenv;
use log::{debug, info, error};
use std::{sync::{Arc, atomic::AtomicU64}, process::exit, collections::HashMap};
use tokio::{sync::RwLock, task::JoinHandle, time::Duration};

use util::{Settings, REQUIRED_APNS_VARS, VAR_DRY_RUN};
use types::{CancelMap, RunStatusMap};
use routes::{push, run_status, cancel_run, add_import_files, import, import_status, health};
use authtoken::{AuthToken, AuthTokenError};
use apns::ApnsHub;
use hub::{Hub, SimulatedHub};
use importer::TokenImporter;
use push_service::PushService;

const AUTH_TOKEN_REFRESH_RATE_S: u64 = 60 * 50; // Needs refresh between 20-60 minutes

const SIMULATED_LATENCY: Duration = Duration::from_millis(50);

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{e}");
            eprintln!("Required environment variables (unless {VAR_DRY_RUN} is set): {}", REQUIRED_APNS_VARS.join(" "));
            exit(1)
        }
    };
    util::init_logging();

    let (hub, refresh_loop_handle): (Arc<dyn Hub>, Option<JoinHandle<()>>) = match &settings.apns {
        Some(apns_settings) => {
            let auth_token = match AuthToken::new(apns_settings) {
                Ok(auth_token) => Arc::new(RwLock::new(auth_token)),
                Err(e) => {
                    error!("Failed to generate authentication token: {e}");
                    if let AuthTokenError::IO(_) = e {
                        error!("Failed to read token key path. If using Docker, ensure the private key is made available to a mounted volume.")
                    }
                    exit(1)
                }
            };
            debug!("Initial auth token: {}", &auth_token.read().await.token);

            let hub = match ApnsHub::new(apns_settings, Arc::clone(&auth_token)) {
                Ok(hub) => hub,
                Err(e) => {
                    error!("Failed to build APNs client: {e}");
                    exit(1)
                }
            };
            let hub: Arc<dyn Hub> = Arc::new(hub);
            (hub, Some(tokio::spawn(auth_token_refresh_loop(auth_token))))
        },
        None => {
            info!("{VAR_DRY_RUN} set, notifications are simulated");
            let hub: Arc<dyn Hub> = Arc::new(SimulatedHub::new(SIMULATED_LATENCY));
            (hub, None)
        },
    };

    let push_service = PushService::new(Arc::downgrade(&hub))
        .with_delay(settings.push_delay)
        .with_send_timeout(settings.send_timeout);
    info!("Push delay {:?}, listening on {}:{}", push_service.delay(), settings.host, settings.port);
    let push_service_data = Data::new(push_service);
    let run_ids_data = Data::new(AtomicU64::new(0));

    let runs: RunStatusMap = HashMap::new();
    let runs_data = Data::new(Arc::new(RwLock::new(runs)));

    let cancel_channels: CancelMap = HashMap::new();
    let cancel_channels_data = Data::new(Arc::new(RwLock::new(cancel_channels)));

    let importer_data = Data::new(TokenImporter::new());

    let server_handle = HttpServer::new(move || {
        let json_cfg = web::JsonConfig::default()
            .error_handler(|err, _req| {
                error!("Json config error: {}", err);
                error::InternalError::from_response(err, HttpResponse::BadRequest().into()).into()
            });
        App::new()
            .app_data(Data::clone(&push_service_data))
            .app_data(Data::clone(&run_ids_data))
            .app_data(Data::clone(&runs_data))
            .app_data(Data::clone(&cancel_channels_data))
            .app_data(Data::clone(&importer_data))
            .app_data(json_cfg)
            .service(push)
            .service(run_status)
            .service(cancel_run)
            .service(add_import_files)
            .service(import)
            .service(import_status)
            .service(health)
    })
        .bind(format!("{}:{}", settings.host, settings.port))?
        .run();

    match refresh_loop_handle {
        Some(refresh_loop_handle) => {
            tokio::select! {
                _ = server_handle => {}
                _ = refresh_loop_handle => {},
            }
        },
        None => server_handle.await?,
    }

    // The hub outlives every push run started by the server.
    drop(hub);
    Ok(())
}

async fn auth_token_refresh_loop(auth_token: Arc<RwLock<AuthToken>>) {
    loop {
        tokio::time::sleep(Duration::from_secs(AUTH_TOKEN_REFRESH_RATE_S)).await;
        if let Err(e) = auth_token.write().await.refresh() {
            error!("auth:: keeping previous token, refresh failed: {}", e);
            continue;
        }
        info!("auth:: provider token refreshed");
    }
}
