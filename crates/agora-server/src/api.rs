use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    async_trait,
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequest, Query, Request, State},
    http::{Method, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
    Json, Router,
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use agora_shared::protocol::{HealthResponse, StatsResponse};
use agora_shared::session::SessionSigner;
use agora_store::{Database, StoreError};

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::gate::block_gate;
use crate::notify::Notifier;
use crate::{identity, messages, moderation};

#[derive(Clone)]
pub struct AppState {
    /// Single connection, single writer.
    pub db: Arc<Mutex<Database>>,
    pub sessions: Arc<SessionSigner>,
    pub notifier: Notifier,
    pub config: Arc<ServerConfig>,
    pub started_at: Instant,
}

impl AppState {
    /// Wire up shared state. Makes sure the admin record exists and carries
    /// the configured credential.
    pub fn new(db: Database, config: ServerConfig, notifier: Notifier) -> Result<Self, StoreError> {
        let admin = db.ensure_admin_user(&config.admin_password_hash)?;
        tracing::debug!(admin = %admin.id, "admin record ready");

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            sessions: Arc::new(SessionSigner::from_secret(&config.session_secret)),
            notifier,
            config: Arc::new(config),
            started_at: Instant::now(),
        })
    }

    /// Run `f` against the database while holding the connection lock.
    pub async fn with_db<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Database) -> Result<T, StoreError> + Send,
    {
        let db = self.db.lock().await;
        f(&db).map_err(ApiError::from)
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    // Attachments travel base64-encoded inside JSON.
    let body_limit = state
        .config
        .max_attachment_bytes
        .saturating_mul(2)
        .saturating_add(1024 * 1024);

    Router::new()
        .route("/auth", post(identity::authenticate))
        .route("/auth/login", post(identity::authenticate))
        .route("/auth/register", post(identity::register))
        .route("/me", get(identity::me))
        .route("/messages", get(messages::list).post(messages::send))
        .route("/send-message", post(messages::send))
        .route(
            "/message/:id",
            patch(messages::edit).delete(moderation::delete_message),
        )
        .route("/message/:id/reactions", post(messages::react))
        .route("/clear-messages", delete(moderation::clear_messages))
        .route("/block-ip", post(moderation::block_ip))
        .route("/block-user", post(moderation::block_user))
        .route("/unblock", post(moderation::unblock))
        .route("/admin/audit", get(moderation::audit))
        .route("/admin/blocks", get(moderation::blocks))
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn_with_state(state.clone(), block_gate))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// JSON body extractor whose rejections use the API failure shape. An
/// empty body reads as `{}`, so optional-only payloads (such as an admin
/// credential on `DELETE`) may be omitted.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|e| ApiError::invalid_request(e.body_text()))?;

        let raw: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
            b"{}"
        } else {
            &bytes
        };

        serde_json::from_slice(raw)
            .map(ApiJson)
            .map_err(|e| ApiError::invalid_request(e.to_string()))
    }
}

pub(crate) fn parse_query<T: DeserializeOwned>(uri: &Uri) -> Result<T, ApiError> {
    Query::<T>::try_from_uri(uri)
        .map(|Query(q)| q)
        .map_err(|e| ApiError::invalid_request(e.body_text()))
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}

async fn health_check(State(state): State<AppState>) -> Response {
    let probe = state
        .with_db(|db| {
            db.ping()?;
            db.count_messages()
        })
        .await;

    match probe {
        Ok(total) => Json(HealthResponse {
            status: "healthy".into(),
            database: "connected".into(),
            total_messages: Some(total),
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").into(),
        })
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "health probe failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(HealthResponse {
                    status: "unhealthy".into(),
                    database: "error".into(),
                    total_messages: None,
                    timestamp: Utc::now(),
                    version: env!("CARGO_PKG_VERSION").into(),
                }),
            )
                .into_response()
        }
    }
}

async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let (total_messages, total_users, blocked_identities, latest) = state
        .with_db(|db| {
            Ok((
                db.count_messages()?,
                db.count_users()?,
                db.count_blocks()?,
                db.latest_message()?,
            ))
        })
        .await?;

    Ok(Json(StatsResponse {
        success: true,
        instance: state.config.instance_name.clone(),
        total_messages,
        total_users,
        blocked_identities,
        latest_message: latest.map(|m| messages::message_dto(m, false)),
        server_time: Utc::now(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    }))
}

pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
