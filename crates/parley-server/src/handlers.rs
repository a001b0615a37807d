//! HTTP handlers for the Parley server.
//!
//! Every chat route runs as the user named by the `x-user-id` header, which
//! an upstream authentication layer is trusted to set. Event streams are
//! served as `text/event-stream` bodies framed by the protocol codec.

use crate::config::Config;
use crate::metrics::{self, StreamMetricsGuard};
use anyhow::Result;
use axum::{
    async_trait,
    body::{Body, Bytes},
    extract::{FromRequestParts, Path, State},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use futures_util::{future, Stream, StreamExt};
use parley_core::{
    ChatError, ChatService, FriendsOnly, MemoryDirectory, MemoryExpiringStore, MemoryRoomStore,
};
use parley_protocol::{codec, Frame, UserId};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Header carrying the authenticated user id.
pub const USER_HEADER: &str = "x-user-id";

/// Header selecting the namespace of a request.
pub const NAMESPACE_HEADER: &str = "x-namespace";

/// Shared server state.
pub struct AppState {
    /// The chat engine.
    pub service: ChatService,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state with in-memory collaborators.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let directory = Arc::new(MemoryDirectory::new());
        for user in &config.directory.users {
            directory.insert(user.profile());
            if let Some(friends) = &user.friends {
                directory.set_friends(user.id.clone(), friends.clone());
            }
        }
        info!(users = directory.len(), "User directory loaded");

        let mut service = ChatService::new(
            config.chat.engine_config(),
            Arc::new(MemoryRoomStore::new()),
            Arc::new(MemoryExpiringStore::new(config.chat.token_ttl())),
            directory.clone(),
        );
        if config.chat.friends_only {
            service = service.with_policy(Arc::new(FriendsOnly::new(directory)));
        }

        Self { service, config }
    }
}

/// Build the HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/chat/friends", get(friends_handler))
        .route("/chat/session", post(session_handler))
        .route("/chat/messages", post(message_handler))
        .route("/chat/threads/:thread", get(history_handler))
        .route("/chat/stream", get(stream_handler))
        .route("/chat/token", post(token_handler))
        .route("/chat/stream/:token", get(token_stream_handler))
        .with_state(state)
}

/// Run the HTTP server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let addr = config.bind_addr()?;
    let app = router(Arc::new(AppState::new(config)));

    let listener = TcpListener::bind(addr).await?;
    info!("Parley server listening on {}", addr);
    info!("Event stream endpoint: http://{}/chat/stream", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Errors returned by chat routes.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The identity header is missing or empty.
    #[error("missing x-user-id header")]
    Unauthenticated,

    #[error(transparent)]
    Chat(#[from] ChatError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Chat(ChatError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Chat(ChatError::PermissionDenied(_)) => StatusCode::FORBIDDEN,
            ApiError::Chat(ChatError::Validation(_)) => StatusCode::BAD_REQUEST,
            ApiError::Chat(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Unauthenticated => "unauthenticated",
            ApiError::Chat(e) => e.kind(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        metrics::record_error(self.kind());
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        } else {
            debug!(error = %self, status = %status, "Request rejected");
        }

        let body = Json(json!({
            "success": false,
            "error": self.to_string(),
        }));
        (status, body).into_response()
    }
}

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct Caller {
    pub namespace: String,
    pub user: UserId,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user = header_value(parts, USER_HEADER)
            .map(parse_user)
            .ok_or(ApiError::Unauthenticated)?;
        let namespace = header_value(parts, NAMESPACE_HEADER)
            .map(str::to_string)
            .unwrap_or_else(|| state.config.default_namespace.clone());

        Ok(Caller { namespace, user })
    }
}

fn header_value<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn parse_user(raw: &str) -> UserId {
    raw.parse().unwrap_or_else(|never: Infallible| match never {})
}

/// Form of `POST /chat/session`.
#[derive(Debug, Deserialize)]
pub struct SessionForm {
    #[serde(default)]
    pub user: Option<String>,
}

/// Form of `POST /chat/messages`.
#[derive(Debug, Deserialize)]
pub struct MessageForm {
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Presence of every friend of the caller.
async fn friends_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Json<serde_json::Value>, ApiError> {
    let friends = state
        .service
        .friends_presence(&caller.namespace, &caller.user)
        .await?;
    Ok(Json(json!({ "friends": friends })))
}

/// Open a session with another user.
async fn session_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Form(form): Form<SessionForm>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let target = form
        .user
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(parse_user);

    let session = state
        .service
        .start_session(&caller.namespace, &caller.user, target.as_ref())
        .await?;
    metrics::record_session();

    Ok(Json(json!({
        "success": true,
        "thread_id": session.thread_id,
        "members": session.members,
    })))
}

/// Send a message to a thread.
async fn message_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Form(form): Form<MessageForm>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if form.thread_id.is_empty() {
        return Err(ChatError::Validation("thread_id is required".into()).into());
    }

    let id = state
        .service
        .send(
            &caller.namespace,
            &form.thread_id,
            &caller.user,
            &form.message,
            form.kind.as_deref(),
        )
        .await?;
    metrics::record_message(metrics::message_kind_label(form.kind.as_deref()));

    Ok(Json(json!({
        "success": true,
        "UUID": id,
    })))
}

/// Saved messages of a thread, newest first.
async fn history_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(thread): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let messages: Vec<_> = state
        .service
        .history(&caller.namespace, &thread, &caller.user)
        .await?
        .into_iter()
        .map(|stored| stored.event)
        .collect();

    Ok(Json(json!({
        "success": true,
        "thread_id": thread,
        "messages": messages,
    })))
}

/// Stream the caller's mailbox.
async fn stream_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Response, ApiError> {
    let frames = state
        .service
        .stream(&caller.namespace, &caller.user)
        .await?;
    debug!(namespace = %caller.namespace, user = %caller.user, "Event stream connected");
    Ok(event_stream(frames, "session"))
}

/// Issue a stream token for the caller.
async fn token_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> Result<Json<serde_json::Value>, ApiError> {
    let token = state
        .service
        .issue_token(&caller.namespace, &caller.user)
        .await?;
    metrics::record_token();

    Ok(Json(json!({
        "success": true,
        "token": token,
        "expires_in": state.config.chat.token_ttl_secs,
    })))
}

/// Stream the mailbox a token was issued for.
async fn token_stream_handler(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Result<Response, ApiError> {
    let frames = state.service.stream_via_token(&token).await?;
    Ok(event_stream(frames, "token"))
}

/// Wrap a frame stream into a `text/event-stream` response.
fn event_stream<S>(frames: S, via: &'static str) -> Response
where
    S: Stream<Item = Frame> + Send + 'static,
{
    let guard = StreamMetricsGuard::new(via);
    // A frame that cannot be encoded is dropped; the stream stays open.
    let body = frames.filter_map(move |frame| {
        let _guard = &guard;
        let chunk = match codec::encode(&frame) {
            Ok(bytes) => {
                if let Frame::Event(event) = &frame {
                    metrics::record_event_streamed(event.kind());
                }
                Some(Ok::<Bytes, Infallible>(bytes))
            }
            Err(e) => {
                warn!(via, error = %e, "Dropping unencodable frame");
                metrics::record_error("encode");
                None
            }
        };
        future::ready(chunk)
    });

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(body),
    )
        .into_response()
}
