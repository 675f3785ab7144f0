use crate::auth::{self, Claims};
use crate::config::Config;
use crate::error::ChatError;
use crate::gateway;
use crate::model::{Identity, RoomId, User, UserId};
use crate::service::ChatService;
use anyhow::{Context, Result};
use axum::extract::ws::WebSocketUpgrade;
use axum::{
    extract::{Extension, Path, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use time::Duration;

#[derive(Clone)]
pub struct AppState {
    pub service: ChatService,
    pub config: Config,
    token_secret: Arc<Vec<u8>>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir)
            .await
            .with_context(|| format!("creating {}", config.data_dir.display()))?;
        let service = ChatService::open(config.db_path(), 8).context("opening database")?;
        let token_secret = match &config.token_secret {
            Some(secret) => secret.as_bytes().to_vec(),
            None => {
                let mut secret = vec![0u8; 32];
                rand::thread_rng().fill_bytes(&mut secret);
                secret
            }
        };
        Ok(Self {
            service,
            config,
            token_secret: Arc::new(token_secret),
        })
    }
}

/// Build the HTTP application router.
pub fn build_router(state: AppState) -> Router {
    let authed = Router::new()
        .route("/api/me", get(me))
        .route("/api/rooms", get(list_rooms))
        .route("/api/rooms/join", post(join_room))
        .route("/api/rooms/leave", post(leave_room))
        .route("/api/rooms/delete", post(delete_room))
        .route("/api/rooms/:name/history", get(history))
        .route("/ws", get(ws_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));
    Router::new()
        .route("/api/health", get(health))
        .route("/api/register", post(register))
        .route("/api/login", post(login))
        .merge(authed)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// Pull a bearer token from the Authorization header, or from `?token=` for
/// websocket clients that cannot set headers.
fn request_token<B>(req: &axum::http::Request<B>) -> Option<String> {
    if let Some(value) = req.headers().get(header::AUTHORIZATION) {
        if let Some(token) = value.to_str().ok()?.strip_prefix("Bearer ") {
            return Some(token.to_owned());
        }
    }
    req.uri()
        .query()?
        .split('&')
        .find_map(|pair| pair.strip_prefix("token="))
        .map(str::to_owned)
}

async fn auth_middleware<B>(
    State(state): State<AppState>,
    mut req: axum::http::Request<B>,
    next: Next<B>,
) -> Result<Response, StatusCode> {
    let token = request_token(&req).ok_or(StatusCode::UNAUTHORIZED)?;
    match auth::verify_token(&state.token_secret, &token) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            Ok(next.run(req).await)
        }
        Err(e) => {
            tracing::debug!(error = %e, "rejected token");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

#[derive(Serialize)]
struct ErrorResp {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResp>);

fn err(status: StatusCode, msg: &str) -> ApiError {
    (status, Json(ErrorResp { error: msg.into() }))
}

fn api_err(e: ChatError) -> ApiError {
    let status = match &e {
        ChatError::DuplicateHandle => StatusCode::CONFLICT,
        ChatError::AuthFailure | ChatError::Token(_) => StatusCode::UNAUTHORIZED,
        ChatError::NotCreator | ChatError::NotMember => StatusCode::FORBIDDEN,
        ChatError::RoomNotFound | ChatError::UserNotFound => StatusCode::NOT_FOUND,
        ChatError::InvalidRoomName | ChatError::EmptyMessage => StatusCode::BAD_REQUEST,
        ChatError::Hash(_) | ChatError::Storage(_) | ChatError::Pool(_) | ChatError::Task(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    err(status, e.code())
}

#[derive(Deserialize)]
struct RegisterReq {
    full_name: String,
    username: String,
    password: String,
}

#[derive(Serialize)]
struct RegisterResp {
    user_id: UserId,
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterReq>,
) -> Result<impl IntoResponse, ApiError> {
    if req.username.trim().is_empty() || req.password.is_empty() {
        return Err(err(StatusCode::BAD_REQUEST, "missing_fields"));
    }
    let user_id = state
        .service
        .register(&req.full_name, &req.username, &req.password)
        .await
        .map_err(api_err)?;
    Ok((StatusCode::CREATED, Json(RegisterResp { user_id })))
}

#[derive(Deserialize)]
struct LoginReq {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct LoginResp {
    token: String,
    user: User,
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginReq>,
) -> Result<impl IntoResponse, ApiError> {
    let user = match state.service.login(&req.username, &req.password).await {
        Ok(user) => user,
        Err(ChatError::UserNotFound | ChatError::AuthFailure) => {
            return Err(err(StatusCode::UNAUTHORIZED, "invalid_credentials"))
        }
        Err(e) => return Err(api_err(e)),
    };
    let token = auth::issue_token(
        &state.token_secret,
        &user,
        Duration::hours(state.config.token_ttl_hours),
    )
    .map_err(api_err)?;
    Ok(Json(LoginResp { token, user }))
}

async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.service.user(claims.sub).await.map_err(api_err)?;
    Ok(Json(user))
}

async fn list_rooms(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let listing = state
        .service
        .list_rooms(claims.sub)
        .await
        .map_err(api_err)?;
    Ok(Json(listing))
}

#[derive(Deserialize)]
struct RoomReq {
    room: String,
}

#[derive(Serialize)]
struct JoinResp {
    room_id: RoomId,
    created: bool,
}

async fn join_room(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RoomReq>,
) -> Result<impl IntoResponse, ApiError> {
    let (room, created) = state
        .service
        .join(claims.sub, &req.room)
        .await
        .map_err(api_err)?;
    Ok(Json(JoinResp {
        room_id: room.id,
        created,
    }))
}

async fn leave_room(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RoomReq>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .service
        .leave(claims.sub, &req.room)
        .await
        .map_err(api_err)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_room(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<RoomReq>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .service
        .delete_room(claims.sub, &req.room)
        .await
        .map_err(api_err)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn history(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let lines = state.service.history(&name).await.map_err(api_err)?;
    Ok(Json(lines))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> impl IntoResponse {
    let identity = Identity {
        user_id: claims.sub,
        display_name: claims.name,
    };
    let settings = state.config.gateway();
    ws.on_upgrade(move |socket| gateway::serve_socket(socket, state.service, identity, settings))
}

/// Run the HTTP server until it fails.
pub async fn run_http_server(config: Config) -> Result<()> {
    let addr: SocketAddr = config.bind.parse().context("invalid bind address")?;
    let state = AppState::new(config).await?;
    tracing::info!(%addr, "listening");
    axum::Server::bind(&addr)
        .serve(build_router(state).into_make_service())
        .await?;
    Ok(())
}
