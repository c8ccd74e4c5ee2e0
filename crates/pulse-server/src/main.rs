use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use pulse_api::middleware::require_auth;
use pulse_api::{AppState, AppStateInner, auth, chat, notifications, polls};
use pulse_coordinator::auth::TokenValidator;
use pulse_coordinator::{Coordinator, connection};
use pulse_store::Store;

#[derive(Clone)]
struct ServerState {
    coordinator: Coordinator,
    validator: TokenValidator,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulse=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("PULSE_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("PULSE_DB_PATH").unwrap_or_else(|_| "pulse.db".into());
    let host = std::env::var("PULSE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PULSE_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database
    let db = Arc::new(Store::open(&PathBuf::from(&db_path))?);

    // Shared state
    let coordinator = Coordinator::new(db.clone());
    let validator = TokenValidator::new(jwt_secret.clone(), db.clone());

    let app_state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret,
        coordinator: coordinator.clone(),
    });

    let server_state = ServerState {
        coordinator,
        validator,
    };

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/api/chat/{room_id}/history", get(chat::get_history))
        .route("/api/chat/{room_id}/settings", patch(chat::update_settings))
        .route(
            "/api/chat/{room_id}/messages/{message_id}",
            patch(chat::edit_message).delete(chat::delete_message),
        )
        .route("/api/rooms/{room_id}/polls", get(polls::list_room_polls))
        .route("/api/polls", post(polls::create_poll))
        .route(
            "/api/polls/{poll_id}",
            get(polls::get_poll)
                .patch(polls::update_poll)
                .delete(polls::delete_poll),
        )
        .route("/api/polls/{poll_id}/vote", post(polls::vote))
        .route("/api/polls/{poll_id}/options", post(polls::add_option))
        .route(
            "/api/notifications",
            get(notifications::list_notifications).post(notifications::create_notification),
        )
        .route(
            "/api/notifications/read-all",
            patch(notifications::mark_all_read),
        )
        .route(
            "/api/notifications/{notification_id}/read",
            patch(notifications::mark_read),
        )
        .route(
            "/api/notifications/{notification_id}",
            delete(notifications::delete_notification),
        )
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(server_state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Pulse server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// Authenticate before upgrading: a bad token gets a plain 401 instead of a
/// WebSocket that closes immediately.
async fn ws_upgrade(
    State(state): State<ServerState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let token = query.token.unwrap_or_default();
    match state.validator.validate(&token).await {
        Ok(user) => ws
            .on_upgrade(move |socket| connection::handle_connection(socket, state.coordinator, user))
            .into_response(),
        Err(e) => {
            warn!("gateway upgrade rejected: {e}");
            StatusCode::UNAUTHORIZED.into_response()
        }
    }
}
