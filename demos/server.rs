use argh::FromArgs;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use radiograph_analyst::{
    AnalysisConfig, AnalysisSession, AnalysisWorker, GeminiProvider, NO_IMAGES_MESSAGE, RawUpload,
    UploadBatch, WorkerPoll, WorkerState,
};
use serde_json::json;
use std::sync::{Arc, Mutex};

mod messages;

// defaults for the server
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 3000;

#[derive(FromArgs)]
/// Serves radiograph analysis over HTTP.
struct ServerArgs {
    /// the host to run the server on
    #[argh(option, short = 'h', default = "DEFAULT_HOST.to_string()")]
    host: String,

    /// the port to run the server on
    #[argh(option, short = 'p', default = "DEFAULT_PORT")]
    port: u16,
}

struct AppState {
    worker: AnalysisWorker,
    session: Mutex<AnalysisSession>,
}

async fn post_analyze(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<messages::AnalyzeRequest>,
) -> impl IntoResponse {
    let mut uploads = Vec::with_capacity(payload.images.len());
    let mut skipped = Vec::new();
    for image in payload.images {
        match STANDARD.decode(&image.data) {
            Ok(bytes) => uploads.push(RawUpload::new(image.filename, bytes)),
            Err(e) => skipped.push(messages::SkippedFile {
                filename: image.filename,
                reason: format!("invalid base64: {e}"),
            }),
        }
    }

    let (batch, undecodable) = UploadBatch::collect(uploads);
    skipped.extend(undecodable.into_iter().map(|s| messages::SkippedFile {
        filename: s.filename,
        reason: s.reason.to_string(),
    }));

    let identity = batch.identity();
    if let Ok(mut session) = state.session.lock() {
        session.observe_uploads(&identity);
    }

    if batch.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": NO_IMAGES_MESSAGE, "skipped": skipped })),
        );
    }

    if state.worker.state() != WorkerState::Idle {
        log::debug!("Worker is still processing");
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "An analysis is already running", "skipped": skipped })),
        );
    }

    match state.worker.submit(batch) {
        Some(id) => {
            log::info!("Scheduled analysis {id} for {} image(s)", identity.entries().len());
            (
                StatusCode::OK,
                Json(json!({ "status": "scheduled", "id": id, "skipped": skipped })),
            )
        }
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "analysis worker stopped" })),
        ),
    }
}

async fn get_result(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.worker.try_poll() {
        WorkerPoll::Finished(done) => {
            log::info!("Analysis {} finished in {:?}", done.id, done.duration);
            if let Ok(mut session) = state.session.lock() {
                session.record(done.identity.clone(), done.outcome.clone());
            }
            let response = messages::AnalysisResponse {
                id: done.id,
                images: done.identity,
                duration: done.duration,
                outcome: done.outcome,
            };
            (
                StatusCode::OK,
                Json(json!({ "status": "finished", "response": response })),
            )
        }
        WorkerPoll::Empty(worker_state) => {
            let last = state
                .session
                .lock()
                .ok()
                .and_then(|session| session.last_outcome().cloned());
            (
                StatusCode::OK,
                Json(json!({ "status": worker_state.as_str(), "last": last })),
            )
        }
        WorkerPoll::Error(e) => {
            log::error!("Could not poll the analysis worker: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "message": e })),
            )
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args: ServerArgs = argh::from_env();

    // a missing key stops the process before anything is served
    let config = AnalysisConfig::from_env()?;
    let provider = GeminiProvider::from_config(&config)?;
    let worker = AnalysisWorker::spawn(config, provider);

    let state = Arc::new(AppState {
        worker,
        session: Mutex::new(AnalysisSession::new()),
    });

    let addr = format!("{}:{}", args.host, args.port);

    tokio::runtime::Runtime::new()?.block_on(async move {
        let app = Router::new()
            .route("/", get(|| async { "Radiograph analysis server" }))
            .route("/analyze", post(post_analyze))
            .route("/result", get(get_result))
            .with_state(state);

        log::info!("Listening on: {addr}");
        log::info!("Press Ctrl+C to stop the server");

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
