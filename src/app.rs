use crate::cli::Args;
use crate::model::{DiaryEntry, StepId};
use crate::refine::refine_or_compose;
use crate::sessions::{self, SessionError};
use crate::speech::speak_or_log;
use crate::store::count_entries;
use crate::time_util;
use crate::wizard::{Advance, SessionView, WizardController, WizardError};
use crate::AppState;
use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tower_http::compression::predicate::{
    NotForContentType, Predicate, SizeAbove,
};
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{prelude::*, Registry};
use tracing_tree::HierarchicalLayer;

// Add build-time information
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

const DEFAULT_USER: &str = "default";
const SESSION_GC_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct StatusResponse {
    build_info: String,
    active_sessions: usize,
    saved_entries: Option<i64>,
    refinement_enabled: bool,
    timezone: String,
}

#[derive(Debug, Serialize)]
struct TodayResponse {
    date_label: String,
    day_label: &'static str,
}

#[derive(Debug, Default, Deserialize)]
struct CreateSessionRequest {
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChooseRequest {
    step: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct AnnotationRequest {
    data: String,
}

#[derive(Debug, Serialize)]
struct SessionResponse {
    session_id: String,
    #[serde(flatten)]
    view: SessionView,
}

#[derive(Debug, Serialize)]
struct SaveResponse {
    entry_id: String,
    session: SessionResponse,
}

// Health check endpoint
#[instrument]
pub async fn health_check() -> &'static str {
    debug!("Health check requested");
    "OK"
}

fn get_build_info() -> String {
    fn clean(value: Option<String>) -> Option<String> {
        value
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty() && v != "unknown")
    }

    let clean_env = |key: &str| clean(env::var(key).ok());

    let mut parts = Vec::new();
    parts.push(format!("Version {}", built_info::PKG_VERSION));

    if let Some(tag) = clean_env("APP_BUILD_TAG") {
        parts.push(format!("Image {}", tag));
    }
    if let Some(commit) = clean_env("APP_BUILD_COMMIT") {
        let short: String = commit.chars().take(12).collect();
        parts.push(format!("Commit {}", short));
    }
    if let Some(time) = clean(Some(built_info::BUILT_TIME_UTC.to_string())) {
        parts.push(format!("Built {}", time));
    }
    if let Some(profile) = clean(Some(built_info::PROFILE.to_string())) {
        parts.push(format!("Profile {}", profile));
    }
    if let Some(rustc_version) =
        clean(Some(built_info::RUSTC_VERSION.to_string()))
    {
        parts.push(format!("Rustc {}", rustc_version));
    }

    parts.join(" • ")
}

async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let saved_entries = state
        .diary_db
        .get()
        .map_err(anyhow::Error::from)
        .and_then(|conn| count_entries(&conn));
    let saved_entries = match saved_entries {
        Ok(count) => Some(count),
        Err(e) => {
            warn!("Diary database unavailable: {}", e);
            None
        }
    };
    let status = StatusResponse {
        build_info: get_build_info(),
        active_sessions: state.sessions.len().await,
        saved_entries,
        refinement_enabled: state.refiner.is_some(),
        timezone: state.timezone.to_string(),
    };
    Json(status).into_response()
}

async fn get_catalog(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.catalog.as_ref().clone())
}

async fn get_today(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let now = Utc::now();
    Json(TodayResponse {
        date_label: time_util::date_label(now, state.timezone),
        day_label: time_util::day_label(now, state.timezone),
    })
}

fn wizard_error(e: WizardError) -> (StatusCode, String) {
    let status = match &e {
        WizardError::InvalidTransition { .. } => StatusCode::BAD_REQUEST,
        WizardError::Busy(_) | WizardError::NotReady => StatusCode::CONFLICT,
        WizardError::PersistenceFailure(_) => {
            error!("{}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, e.to_string())
}

async fn find_session(
    state: &AppState,
    session_id: &str,
) -> Result<Arc<sessions::Entry>, (StatusCode, String)> {
    state.sessions.get(session_id).await.map_err(|e| match e {
        SessionError::NotFound => (StatusCode::NOT_FOUND, e.to_string()),
    })
}

async fn session_response(
    session_id: String,
    entry: &sessions::Entry,
) -> SessionResponse {
    let view = entry.controller.lock().await.view();
    SessionResponse { session_id, view }
}

/// Runs refinement for a completed record without holding the session
/// lock, then applies the result.
///
/// The work runs on its own task, so the session leaves `Composing` even
/// when the request that triggered it is dropped.
async fn settle(
    state: &AppState,
    entry: &Arc<sessions::Entry>,
    advance: Advance,
) {
    let Advance::Compose(ticket) = advance else {
        return;
    };
    let refiner = state.refiner.clone();
    let timeout = state.refine_timeout;
    let entry = entry.clone();
    let task = tokio::spawn(async move {
        let sentence = refine_or_compose(
            refiner.as_deref(),
            &ticket.request,
            ticket.draft.clone(),
            timeout,
        )
        .await;
        if !entry
            .controller
            .lock()
            .await
            .finish_composition(ticket, sentence)
        {
            info!("Session changed during composition, result dropped");
        }
    });
    if let Err(e) = task.await {
        error!("Composition task failed: {}", e);
    }
}

#[axum::debug_handler]
async fn create_session(
    State(state): State<Arc<AppState>>,
    body: Option<Json<CreateSessionRequest>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let user_id = request
        .user_id
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| DEFAULT_USER.to_string());

    let controller = WizardController::new(state.catalog.clone(), user_id);
    let session_id = state.sessions.insert(controller).await;
    info!("Created session {}", session_id);

    let entry = find_session(&state, &session_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(session_response(session_id, &entry).await),
    ))
}

#[axum::debug_handler]
async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let entry = find_session(&state, &session_id).await?;
    Ok(Json(session_response(session_id, &entry).await))
}

#[axum::debug_handler]
async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if state.sessions.remove(&session_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((StatusCode::NOT_FOUND, SessionError::NotFound.to_string()))
    }
}

#[axum::debug_handler]
async fn choose(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(request): Json<ChooseRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let step: StepId = request
        .step
        .parse()
        .map_err(|e: String| (StatusCode::BAD_REQUEST, e))?;
    let entry = find_session(&state, &session_id).await?;

    let advance = entry
        .controller
        .lock()
        .await
        .choose(step, &request.value)
        .map_err(wizard_error)?;
    settle(&state, &entry, advance).await;

    Ok(Json(session_response(session_id, &entry).await))
}

#[axum::debug_handler]
async fn continue_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let entry = find_session(&state, &session_id).await?;
    let advance = entry
        .controller
        .lock()
        .await
        .advance()
        .map_err(wizard_error)?;
    settle(&state, &entry, advance).await;

    Ok(Json(session_response(session_id, &entry).await))
}

#[axum::debug_handler]
async fn back(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let entry = find_session(&state, &session_id).await?;
    entry.controller.lock().await.back().map_err(wizard_error)?;
    Ok(Json(session_response(session_id, &entry).await))
}

#[axum::debug_handler]
async fn reset(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let entry = find_session(&state, &session_id).await?;
    entry.controller.lock().await.reset();
    Ok(Json(session_response(session_id, &entry).await))
}

#[axum::debug_handler]
async fn put_annotation(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(request): Json<AnnotationRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let entry = find_session(&state, &session_id).await?;
    entry
        .controller
        .lock()
        .await
        .attach_annotation(request.data)
        .map_err(wizard_error)?;
    Ok(Json(session_response(session_id, &entry).await))
}

#[axum::debug_handler]
async fn delete_annotation(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let entry = find_session(&state, &session_id).await?;
    entry
        .controller
        .lock()
        .await
        .clear_annotation()
        .map_err(wizard_error)?;
    Ok(Json(session_response(session_id, &entry).await))
}

#[axum::debug_handler]
async fn speak(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let entry = find_session(&state, &session_id).await?;
    let text = entry
        .controller
        .lock()
        .await
        .sentence()
        .map(|s| s.text.clone());
    if let Some(text) = text {
        speak_or_log(state.speech.as_ref(), &text).await;
    }
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
async fn save(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let entry = find_session(&state, &session_id).await?;
    let ticket = entry
        .controller
        .lock()
        .await
        .begin_save(Utc::now(), state.timezone)
        .map_err(wizard_error)?;

    let outcome = state.entries.create(&ticket.entry).await;
    let entry_id = entry
        .controller
        .lock()
        .await
        .finish_save(ticket, outcome)
        .map_err(wizard_error)?;

    Ok(Json(SaveResponse {
        entry_id,
        session: session_response(session_id, &entry).await,
    }))
}

#[axum::debug_handler]
async fn list_entries(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<DiaryEntry>>, (StatusCode, String)> {
    let entries = state.entries.list(&user_id).await.map_err(|e| {
        error!("Failed to list entries: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    Ok(Json(entries))
}

#[axum::debug_handler]
async fn speak_entry(
    State(state): State<Arc<AppState>>,
    Path((user_id, entry_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let entry = state.entries.get(&user_id, &entry_id).await.map_err(|e| {
        error!("Failed to load entry: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })?;
    let Some(entry) = entry else {
        return Err((
            StatusCode::NOT_FOUND,
            format!("Entry {} not found", entry_id),
        ));
    };
    speak_or_log(state.speech.as_ref(), &entry.text).await;
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
async fn delete_entry(
    State(state): State<Arc<AppState>>,
    Path((user_id, entry_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let removed =
        state.entries.delete(&user_id, &entry_id).await.map_err(|e| {
            error!("Failed to delete entry: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;
    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((StatusCode::NOT_FOUND, format!("Entry {} not found", entry_id)))
    }
}

pub fn routes(state: Arc<AppState>) -> Router {
    let predicate = SizeAbove::new(32)
        // still don't compress gRPC
        .and(NotForContentType::GRPC)
        // annotations are already compressed images
        .and(NotForContentType::IMAGES);

    let compression_layer = CompressionLayer::new()
        .br(true)
        .deflate(true)
        .gzip(true)
        .zstd(true)
        .compress_when(predicate);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/status", get(get_status))
        .route("/api/catalog", get(get_catalog))
        .route("/api/today", get(get_today))
        .route("/api/sessions", post(create_session))
        .route(
            "/api/sessions/{session_id}",
            get(get_session).delete(delete_session),
        )
        .route("/api/sessions/{session_id}/choose", post(choose))
        .route("/api/sessions/{session_id}/continue", post(continue_session))
        .route("/api/sessions/{session_id}/back", post(back))
        .route("/api/sessions/{session_id}/reset", post(reset))
        .route(
            "/api/sessions/{session_id}/annotation",
            axum::routing::put(put_annotation).delete(delete_annotation),
        )
        .route("/api/sessions/{session_id}/speak", post(speak))
        .route("/api/sessions/{session_id}/save", post(save))
        .route("/api/users/{user_id}/entries", get(list_entries))
        .route(
            "/api/users/{user_id}/entries/{entry_id}",
            axum::routing::delete(delete_entry),
        )
        .route(
            "/api/users/{user_id}/entries/{entry_id}/speak",
            post(speak_entry),
        )
        .layer(compression_layer)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve() -> Result<()> {
    // Initialize logging with tracing
    let subscriber = Registry::default()
        .with(
            HierarchicalLayer::new(2)
                .with_targets(true)
                .with_bracketed_fields(true),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        );

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {}", e))?;

    // Parse command line arguments
    let args = Args::parse();

    info!("Starting school diary service");
    info!("Opening diary database at {}", args.diary_db.display());
    let diary_pool = crate::open_diary_db(&args.diary_db)?;

    let catalog = crate::catalog::Catalog::load(args.catalog.as_deref())?;

    let refine_timeout = args.refine_timeout();
    let session_ttl = args.session_ttl();
    let state = crate::create_app_state(crate::AppConfig {
        diary_pool,
        catalog,
        openai_api_key: args.openai_api_key,
        openai_api_base: args.openai_api_base,
        refine_model: args.refine_model,
        refine_timeout,
        timezone_str: args.timezone,
        session_ttl,
    });
    info!("Using timezone {}", state.timezone);

    // Set up ctrl-c handler
    let shutdown_token = state.shutdown_token.clone();
    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received CTRL-C, initiating shutdown");
            shutdown_token.cancel();
        }
    });

    info!("Starting session garbage collection");
    let gc_handle = tokio::spawn(sessions::collect_garbage(
        state.sessions.clone(),
        SESSION_GC_INTERVAL,
        state.shutdown_token.clone(),
    ));

    // Start web server
    let shutdown_token = state.shutdown_token.clone();
    let app = routes(state);
    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server running on http://{}", addr);

    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
            shutdown_token.cancel();
        }
        _ = shutdown_token.cancelled() => {
            info!("Shutdown signal received, waiting for background tasks to complete...");
        }
    }

    match tokio::time::timeout(Duration::from_secs(5), gc_handle).await {
        Ok(_) => info!("Session garbage collection completed gracefully"),
        Err(_) => warn!("Session garbage collection timed out during shutdown"),
    }

    info!("Server shutdown complete");
    Ok(())
}
