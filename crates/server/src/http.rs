//! HTTP routes and the WebSocket bridge into the session.
//!
//! Three authentication surfaces exist, chosen at startup: cookie
//! sessions established by the login form, secret token URLs, or both.
//! Whatever the surface, an upgraded socket ends up in
//! [`Session::add_client`] with a freshly generated client id.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use uuid::Uuid;

use crate::auth::{self, AuthConfig, SessionStore};
use crate::ratelimit::{client_ip, RateLimiter};
use crate::session::{Session, WireError, WireReceiver, WireSender};

static LOGIN_HTML: &str = include_str!("../assets/login.html");
static TERMINAL_HTML: &str = include_str!("../assets/terminal.html");

/// Login attempts allowed per address per minute.
const LOGIN_ATTEMPTS_PER_MINUTE: usize = 5;

/// WebSocket upgrades allowed per address per minute.
const WS_UPGRADES_PER_MINUTE: usize = 20;

const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Shared request context.
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<Session>,
    pub auth: Arc<AuthConfig>,
    pub logins: Arc<SessionStore>,
    pub login_limiter: Arc<RateLimiter>,
    pub ws_limiter: Arc<RateLimiter>,
    pub allow_origin: Option<String>,
}

impl AppState {
    /// Builds the request context and starts its sweeper tasks.
    pub fn new(session: Arc<Session>, auth: AuthConfig, allow_origin: Option<String>) -> Self {
        let logins = Arc::new(SessionStore::new());
        logins.start_sweeper();
        let login_limiter = Arc::new(RateLimiter::new(LOGIN_ATTEMPTS_PER_MINUTE, RATE_WINDOW));
        login_limiter.start_sweeper();
        let ws_limiter = Arc::new(RateLimiter::new(WS_UPGRADES_PER_MINUTE, RATE_WINDOW));
        ws_limiter.start_sweeper();

        AppState {
            session,
            auth: Arc::new(auth),
            logins,
            login_limiter,
            ws_limiter,
            allow_origin,
        }
    }
}

/// Assembles the route table for the configured auth surfaces.
pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/healthz", get(healthz))
        .route("/login", get(login_page))
        .route("/login", post(login_post))
        .route("/logout", post(logout));

    if state.auth.password_enabled() {
        router = router
            .route("/", get(terminal_page))
            .route("/ws", get(ws_upgrade));
    } else {
        router = router.route("/", get(root_forbidden));
    }

    if state.auth.token_enabled() {
        router = router
            .route("/t/:token", get(token_redirect))
            .route("/t/:token/", get(token_terminal_page))
            .route("/t/:token/ws", get(token_ws_upgrade));
    }

    router.with_state(state)
}

/// Serves `router` until `shutdown` signals, then drains connections.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown.changed().await;
    })
    .await
}

async fn healthz() -> &'static str {
    "ok"
}

async fn login_page() -> Html<&'static str> {
    Html(LOGIN_HTML)
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

async fn login_post(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> Response {
    let ip = client_ip(&headers, peer);
    if !state.login_limiter.allow(&ip) {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }

    tracing::debug!(username = %form.username, ip = %ip, "login attempt");
    if !state.auth.check_password(&form.username, &form.password) {
        tracing::warn!(username = %form.username, ip = %ip, "failed login attempt");
        return (StatusCode::UNAUTHORIZED, "Invalid username or password").into_response();
    }

    let sid = state.logins.create(&form.username);
    tracing::info!(username = %form.username, ip = %ip, "user logged in");
    (
        [(
            header::SET_COOKIE,
            auth::session_cookie(&sid, state.auth.secure_cookies),
        )],
        Redirect::to("/"),
    )
        .into_response()
}

async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(sid) = auth::session_id_from(&headers) {
        state.logins.remove(&sid);
    }
    (
        [(
            header::SET_COOKIE,
            auth::clear_session_cookie(state.auth.secure_cookies),
        )],
        Redirect::to("/login"),
    )
        .into_response()
}

fn cookie_session_valid(state: &AppState, headers: &HeaderMap) -> bool {
    auth::session_id_from(headers)
        .map(|sid| state.logins.is_valid(&sid))
        .unwrap_or(false)
}

fn terminal_response() -> Response {
    (
        [
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
            (header::X_FRAME_OPTIONS, "DENY"),
        ],
        Html(TERMINAL_HTML),
    )
        .into_response()
}

async fn terminal_page(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !cookie_session_valid(&state, &headers) {
        tracing::debug!("unauthenticated request, redirecting to login");
        return Redirect::to("/login").into_response();
    }
    terminal_response()
}

async fn root_forbidden() -> Response {
    (
        StatusCode::FORBIDDEN,
        "Access requires a valid token URL.",
    )
        .into_response()
}

async fn token_redirect(Path(token): Path<String>) -> Redirect {
    Redirect::to(&format!("/t/{token}/"))
}

async fn token_terminal_page(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Response {
    if !state.auth.check_token(&token) {
        tracing::warn!("invalid token access attempt");
        return StatusCode::FORBIDDEN.into_response();
    }
    terminal_response()
}

async fn ws_upgrade(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let ip = client_ip(&headers, peer);
    if !state.ws_limiter.allow(&ip) {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }
    if !cookie_session_valid(&state, &headers) {
        return Redirect::to("/login").into_response();
    }
    upgrade_and_attach(state, ws, &headers, ip)
}

async fn token_ws_upgrade(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(token): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let ip = client_ip(&headers, peer);
    if !state.ws_limiter.allow(&ip) {
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }
    if !state.auth.check_token(&token) {
        tracing::warn!(ip = %ip, "invalid token access attempt");
        return StatusCode::FORBIDDEN.into_response();
    }
    upgrade_and_attach(state, ws, &headers, ip)
}

fn upgrade_and_attach(
    state: AppState,
    ws: WebSocketUpgrade,
    headers: &HeaderMap,
    ip: String,
) -> Response {
    if !origin_allowed(&state.allow_origin, headers) {
        tracing::warn!(ip = %ip, "websocket origin rejected");
        return StatusCode::FORBIDDEN.into_response();
    }

    ws.on_upgrade(move |socket| async move {
        let client_id = Uuid::new_v4().to_string();
        tracing::info!(client = %client_id, ip = %ip, "websocket connection");
        let (sink, stream) = socket.split();
        state
            .session
            .add_client(client_id, Box::new(WsSender(sink)), Box::new(WsReceiver(stream)))
            .await;
    })
}

/// Browser origin policy: with no allow-list, a missing origin passes
/// and a present one must name the request host; with an allow-list,
/// the origin must match one of its entries exactly.
fn origin_allowed(allow_origin: &Option<String>, headers: &HeaderMap) -> bool {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    match allow_origin {
        None => match origin {
            None => true,
            Some(origin) => headers
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(|host| origin.contains(host))
                .unwrap_or(false),
        },
        Some(list) => match origin {
            Some(origin) => list.split(',').any(|allowed| allowed.trim() == origin),
            None => false,
        },
    }
}

struct WsSender(SplitSink<WebSocket, Message>);

#[async_trait]
impl WireSender for WsSender {
    async fn send_text(&mut self, frame: String) -> Result<(), WireError> {
        self.0
            .send(Message::Text(frame))
            .await
            .map_err(|e| WireError::Send(e.to_string()))
    }

    async fn close(&mut self, reason: Option<String>) -> Result<(), WireError> {
        let frame = reason.map(|reason| CloseFrame {
            code: close_code::NORMAL,
            reason: reason.into(),
        });
        self.0
            .send(Message::Close(frame))
            .await
            .map_err(|e| WireError::Send(e.to_string()))
    }
}

struct WsReceiver(SplitStream<WebSocket>);

#[async_trait]
impl WireReceiver for WsReceiver {
    async fn recv_text(&mut self) -> Option<Result<String, WireError>> {
        loop {
            match self.0.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text)),
                // Binary frames carry the same UTF-8 JSON.
                Some(Ok(Message::Binary(bytes))) => {
                    return Some(Ok(String::from_utf8_lossy(&bytes).into_owned()))
                }
                Some(Ok(Message::Close(_))) | None => return None,
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Some(Err(WireError::Recv(e.to_string()))),
            }
        }
    }
}
