use crate::config::ServerConfig;
use crate::ws::ws_handler;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use mesh_inspect_core::catalog::CatalogExport;
use mesh_inspect_core::dispatch::{CommandRequest, RejectCode, ServerMessage};
use mesh_inspect_core::error::LoadError;
use mesh_inspect_core::notify::BroadcastNotifier;
use mesh_inspect_core::resolver::RuleBasedResolver;
use mesh_inspect_core::session::SessionInfo;
use mesh_inspect_core::{
    CommandDispatcher, CommandId, MeshLoader, ModelFormat, ModelLoader, SessionId, SessionStateStore,
    StateVersion, ToolCatalog,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

// Application State
pub struct AppState {
    pub dispatcher: Arc<CommandDispatcher>,
    pub notifier: Arc<BroadcastNotifier>,
    pub loader: Arc<dyn ModelLoader>,
}

impl AppState {
    pub fn new(config: &ServerConfig) -> Result<Self, String> {
        let notifier = Arc::new(BroadcastNotifier::default());
        let resolver = RuleBasedResolver::new(ToolCatalog::new().names())
            .map_err(|e| format!("intent resolver patterns: {}", e))?;
        let resolver = Arc::new(resolver);
        let dispatcher = CommandDispatcher::new(Arc::new(SessionStateStore::new()), resolver, notifier.clone())
            .with_config(config.dispatcher.clone());
        Ok(Self {
            dispatcher: Arc::new(dispatcher),
            notifier,
            loader: Arc::new(MeshLoader),
        })
    }
}

pub fn router(state: Arc<AppState>, config: &ServerConfig) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/health", get(health))
        .route("/api/tools", get(tools))
        .route("/api/models", get(list_models).post(upload_model))
        .route("/api/models/:id", get(get_model).delete(delete_model))
        .route("/api/models/:id/commands", post(submit_command))
        .route("/ws", get(ws_handler))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<LoadError> for ApiError {
    fn from(err: LoadError) -> Self {
        let status = match err {
            LoadError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            LoadError::CorruptModel(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        Self::new(status, err.to_string())
    }
}

async fn root() -> &'static str {
    "Hello from mesh-inspect backend!"
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": mesh_inspect_core::version(),
        "sessions": state.dispatcher.store().list().len(),
    }))
}

async fn tools(State(state): State<Arc<AppState>>) -> Json<CatalogExport> {
    Json(state.dispatcher.catalog().export())
}

#[derive(Debug, Deserialize)]
struct UploadParams {
    format: Option<String>,
    name: Option<String>,
}

async fn upload_model(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Result<(StatusCode, Json<SessionInfo>), ApiError> {
    let name = params.name.unwrap_or_else(|| "model".to_string());
    let format = match params.format.as_deref() {
        Some(format) => format.parse::<ModelFormat>()?,
        None => ModelFormat::from_file_name(&name)
            .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "pass ?format= or a name with a known extension"))?,
    };

    let loader = state.loader.clone();
    let load_name = name.clone();
    let loaded = tokio::task::spawn_blocking(move || loader.load(&load_name, &body, format))
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("loader aborted: {}", e)))?;

    match loaded {
        Ok(model) => {
            let info = state.dispatcher.open_session(model);
            info!("Loaded '{}' as session {} ({} faces)", name, info.session_id, info.face_count);
            Ok((StatusCode::CREATED, Json(info)))
        }
        Err(e) => {
            warn!("Failed to load '{}': {}", name, e);
            Err(e.into())
        }
    }
}

async fn list_models(State(state): State<Arc<AppState>>) -> Json<Vec<SessionInfo>> {
    Json(state.dispatcher.store().list())
}

async fn get_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SessionId>,
) -> Result<Json<SessionInfo>, ApiError> {
    state
        .dispatcher
        .store()
        .get(&id)
        .map(|snapshot| Json(snapshot.info()))
        .map_err(|e| ApiError::new(StatusCode::NOT_FOUND, e.to_string()))
}

async fn delete_model(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SessionId>,
) -> Result<Json<SessionInfo>, ApiError> {
    state
        .dispatcher
        .close_session(&id)
        .map(Json)
        .map_err(|e| ApiError::new(StatusCode::NOT_FOUND, e.to_string()))
}

#[derive(Debug, Deserialize)]
struct CommandBody {
    #[serde(default = "CommandId::generate")]
    command_id: CommandId,
    base_state_version: StateVersion,
    text: String,
}

/// Same lifecycle as a `COMMAND:` frame on `/ws`; the reply is the body and
/// notifications still go out to every socket.
async fn submit_command(
    State(state): State<Arc<AppState>>,
    Path(id): Path<SessionId>,
    Json(body): Json<CommandBody>,
) -> (StatusCode, Json<ServerMessage>) {
    let request = CommandRequest {
        command_id: body.command_id,
        session_id: id,
        base_state_version: body.base_state_version,
        text: body.text,
    };
    let outcome = state.dispatcher.dispatch(request).await;
    (reply_status(&outcome.message), Json(outcome.message))
}

fn reply_status(message: &ServerMessage) -> StatusCode {
    match message {
        ServerMessage::Accepted { .. } => StatusCode::OK,
        ServerMessage::Stale { .. } => StatusCode::CONFLICT,
        ServerMessage::Rejected { code, .. } => match code {
            RejectCode::ModelNotLoaded => StatusCode::NOT_FOUND,
            RejectCode::Validation | RejectCode::AmbiguousIntent | RejectCode::ExecutionFailed => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            RejectCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
            RejectCode::ResolverUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        },
    }
}
