use actix_web::{Responder, HttpResponse, post, get, web::{self}};
use log::{info, debug, warn};
use parking_lot::Mutex;
use std::sync::{Arc, atomic::{AtomicU64, Ordering}};
use tokio::sync::{oneshot, RwLock};

use crate::importer::{ImportError, TokenImporter};
use crate::models::{ErrorBody, ImportFailure, ImportFilesData, ImportFilesResponse, ImportResponse, ImportStatus, PushAccepted, PushRequestData, RunStatus};
use crate::push_service::{PushService, PushServiceError};
use crate::runs::track_run;
use crate::types::{CancelMap, RunStatusMap};

fn error_body(error: impl ToString) -> ErrorBody {
    ErrorBody { error: error.to_string() }
}

#[get("/health")]
pub async fn health() -> impl Responder {
    info!("Health check");
    HttpResponse::Ok()
}

#[post("/push")]
pub async fn push(payload: web::Json<PushRequestData>,
    push_service: web::Data<PushService>,
    run_ids: web::Data<AtomicU64>,
    runs: web::Data<Arc<RwLock<RunStatusMap>>>,
    cancel_channels: web::Data<Arc<RwLock<CancelMap>>>) -> impl Responder {

    let total = payload.tokens.len();
    let result = push_service.push_with_tokens(
        payload.tokens.clone(),
        payload.payload_string(),
        payload.expiry_time(),
        payload.priority,
    );

    match result {
        Ok(run) => {
            let run_id = run_ids.fetch_add(1, Ordering::Relaxed) + 1;
            runs.write().await.insert(run_id, RunStatus::new(total));
            cancel_channels.write().await.insert(run_id, run.canceller());

            debug!("push:: queued run {} with {} tokens", run_id, total);
            tokio::spawn(
                track_run(
                    run_id,
                    run,
                    runs.as_ref().to_owned(),
                    cancel_channels.as_ref().to_owned()
                )
            );
            HttpResponse::Ok().json(PushAccepted { run_id, tokens: total })
        },
        Err(e @ (PushServiceError::HubUnavailable | PushServiceError::WorkerStopped)) => {
            warn!("push:: refused run: {}", e);
            HttpResponse::ServiceUnavailable().json(error_body(e))
        },
        Err(e) => HttpResponse::BadRequest().json(error_body(e)),
    }
}

#[get("/runs/{run_id}")]
pub async fn run_status(run_id: web::Path<u64>,
    runs: web::Data<Arc<RwLock<RunStatusMap>>>) -> impl Responder {

    match runs.read().await.get(run_id.as_ref()) {
        Some(status) => HttpResponse::Ok().json(status),
        None => HttpResponse::NotFound().json(error_body(format!("unknown run {}", run_id))),
    }
}

#[post("/cancel/{run_id}")]
pub async fn cancel_run(run_id: web::Path<u64>,
    cancel_channels: web::Data<Arc<RwLock<CancelMap>>>) -> impl Responder {

    if let Some(cancel) = cancel_channels.read().await.get(run_id.as_ref()) {
        let accepted = cancel.cancel();
        debug!("cancel:: run {} cancel requested (accepted={})", run_id, accepted);
        return HttpResponse::Ok();
    }
    HttpResponse::NotFound()
}

#[post("/import/files")]
pub async fn add_import_files(payload: web::Json<ImportFilesData>,
    importer: web::Data<TokenImporter>) -> impl Responder {

    let added = payload.files
        .iter()
        .filter(|file| importer.add_tokens_file(file.as_str()))
        .count();

    HttpResponse::Ok().json(ImportFilesResponse {
        added,
        files: importer.registered_files().len(),
    })
}

#[post("/import")]
pub async fn import(importer: web::Data<TokenImporter>) -> impl Responder {
    let failures = Arc::new(Mutex::new(Vec::new()));
    let entry_failures = Arc::clone(&failures);
    let (tx, rx) = oneshot::channel();

    let started = importer.parse_tokens_async(
        move |file, entry| {
            if let Err(e) = entry {
                entry_failures.lock().push(ImportFailure {
                    file: file.display().to_string(),
                    error: e.to_string(),
                });
            }
        },
        move |tokens| {
            tx.send(tokens).ok();
        },
    );

    match started {
        Ok(_) => {},
        Err(e @ ImportError::AlreadyWorking) => return HttpResponse::Conflict().json(error_body(e)),
        Err(e) => return HttpResponse::InternalServerError().json(error_body(e)),
    }

    match rx.await {
        Ok(tokens) => {
            let errors = std::mem::take(&mut *failures.lock());
            info!("import:: {} tokens, {} errors", tokens.len(), errors.len());
            HttpResponse::Ok().json(ImportResponse { tokens, errors })
        },
        Err(_) => HttpResponse::InternalServerError().json(error_body("import task ended unexpectedly")),
    }
}

#[get("/import")]
pub async fn import_status(importer: web::Data<TokenImporter>) -> impl Responder {
    HttpResponse::Ok().json(ImportStatus {
        working: importer.is_working(),
        tokens: importer.available_tokens(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App, http::StatusCode};
    use crate::hub::{Hub, SimulatedHub};
    use crate::models::RunState;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::io::Write;
    use tokio::time::Duration;

    #[actix_web::test]
    async fn push_then_poll_run_status() {
        let hub: Arc<dyn Hub> = Arc::new(SimulatedHub::new(Duration::from_millis(1)));
        let push_service = web::Data::new(PushService::new(Arc::downgrade(&hub)));
        let runs: Arc<RwLock<RunStatusMap>> = Arc::new(RwLock::new(HashMap::new()));
        let cancel_channels: Arc<RwLock<CancelMap>> = Arc::new(RwLock::new(HashMap::new()));

        let app = test::init_service(
            App::new()
                .app_data(push_service)
                .app_data(web::Data::new(AtomicU64::new(0)))
                .app_data(web::Data::new(Arc::clone(&runs)))
                .app_data(web::Data::new(Arc::clone(&cancel_channels)))
                .service(push)
                .service(run_status)
                .service(cancel_run),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/push")
            .set_json(json!({"tokens": ["aa11", "bb22"], "payload": {"aps": {"alert": "hello"}}}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["runId"], 1);
        assert_eq!(body["tokens"], 2);

        for _ in 0..50 {
            if cancel_channels.read().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let req = test::TestRequest::get().uri("/runs/1").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(runs.read().await.get(&1).map(|s| s.state), Some(RunState::Completed));
        assert_eq!(body["state"], "completed");
        assert_eq!(body["sent"], 2);

        let req = test::TestRequest::post().uri("/cancel/1").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::post()
            .uri("/push")
            .set_json(json!({"tokens": [], "payload": "{}"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        drop(hub);
        let req = test::TestRequest::post()
            .uri("/push")
            .set_json(json!({"tokens": ["aa11"], "payload": "{}"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[actix_web::test]
    async fn import_files_and_scan() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "deadbeef\nnot-a-token\ncafef00d").unwrap();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(TokenImporter::new()))
                .service(add_import_files)
                .service(import)
                .service(import_status),
        )
        .await;

        let path = file.path().display().to_string();
        let req = test::TestRequest::post()
            .uri("/import/files")
            .set_json(json!({"files": [path.clone(), path]}))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body, json!({"added": 1, "files": 1}));

        let req = test::TestRequest::post().uri("/import").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["tokens"], json!(["deadbeef", "cafef00d"]));
        assert_eq!(body["errors"].as_array().unwrap().len(), 1);

        let req = test::TestRequest::get().uri("/import").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body, json!({"working": false, "tokens": ["deadbeef", "cafef00d"]}));
    }
}
