//! Authentication: credential checks and the cookie-session store.
//!
//! The session core never sees any of this; by the time a WebSocket
//! reaches `Session::add_client` the request has already passed one of
//! the guards here.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::{header, HeaderMap};
use clap::ValueEnum;
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::time::Instant;

use crate::tokens;

/// Name of the login-session cookie.
pub const SESSION_COOKIE: &str = "termshare_session";

/// Lifetime of a cookie session.
const SESSION_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// How often expired cookie sessions are swept out.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Which credentials unlock the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AuthMode {
    /// Username/password login with a cookie session.
    Password,
    /// Secret URL token.
    Token,
    /// Both surfaces enabled at once.
    #[value(name = "password+token")]
    PasswordToken,
}

/// Resolved authentication settings.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub username: String,
    pub password: String,
    pub token: String,
    /// Mark session cookies `Secure`.
    pub secure_cookies: bool,
}

impl AuthConfig {
    pub fn password_enabled(&self) -> bool {
        matches!(self.mode, AuthMode::Password | AuthMode::PasswordToken)
    }

    pub fn token_enabled(&self) -> bool {
        matches!(self.mode, AuthMode::Token | AuthMode::PasswordToken)
    }

    /// Constant-time username/password check.
    pub fn check_password(&self, username: &str, password: &str) -> bool {
        let user_ok = tokens::validate(&self.username, username);
        let pass_ok = tokens::validate(&self.password, password);
        user_ok && pass_ok
    }

    /// Constant-time token check.
    pub fn check_token(&self, token: &str) -> bool {
        tokens::validate(&self.token, token)
    }
}

struct SessionEntry {
    created: Instant,
    #[allow(dead_code)]
    username: String,
}

/// In-memory store of login sessions backing the cookie.
pub struct SessionStore {
    entries: Mutex<HashMap<String, SessionEntry>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_ttl(SESSION_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        SessionStore {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Creates a session for `username` and returns its id.
    pub fn create(&self, username: &str) -> String {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        let mut id = String::with_capacity(64);
        for b in bytes {
            let _ = write!(id, "{b:02x}");
        }

        self.entries.lock().unwrap().insert(
            id.clone(),
            SessionEntry {
                created: Instant::now(),
                username: username.to_string(),
            },
        );
        id
    }

    /// Whether `id` names a live, unexpired session.
    pub fn is_valid(&self, id: &str) -> bool {
        let entries = self.entries.lock().unwrap();
        match entries.get(id) {
            Some(entry) => entry.created.elapsed() <= self.ttl,
            None => false,
        }
    }

    pub fn remove(&self, id: &str) {
        self.entries.lock().unwrap().remove(id);
    }

    /// Starts a background task that purges expired sessions.
    pub fn start_sweeper(self: &Arc<Self>) {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let mut entries = store.entries.lock().unwrap();
                entries.retain(|_, entry| entry.created.elapsed() <= store.ttl);
            }
        });
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// `Set-Cookie` value establishing a login session.
pub fn session_cookie(id: &str, secure: bool) -> String {
    let mut cookie = format!("{SESSION_COOKIE}={id}; Path=/; HttpOnly; SameSite=Lax; Max-Age=86400");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// `Set-Cookie` value clearing the login session.
pub fn clear_session_cookie(secure: bool) -> String {
    let mut cookie = format!("{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Extracts the login-session id from request cookies, if present.
pub fn session_id_from(headers: &HeaderMap) -> Option<String> {
    for value in headers.get_all(header::COOKIE) {
        let Ok(value) = value.to_str() else { continue };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            if parts.next() == Some(SESSION_COOKIE) {
                if let Some(id) = parts.next() {
                    if !id.is_empty() {
                        return Some(id.to_string());
                    }
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(mode: AuthMode) -> AuthConfig {
        AuthConfig {
            mode,
            username: "term".into(),
            password: "hunter2hunter2".into(),
            token: "sekrit-token".into(),
            secure_cookies: false,
        }
    }

    #[test]
    fn mode_surfaces() {
        assert!(config(AuthMode::Password).password_enabled());
        assert!(!config(AuthMode::Password).token_enabled());
        assert!(config(AuthMode::Token).token_enabled());
        assert!(!config(AuthMode::Token).password_enabled());
        assert!(config(AuthMode::PasswordToken).password_enabled());
        assert!(config(AuthMode::PasswordToken).token_enabled());
    }

    #[test]
    fn password_check() {
        let cfg = config(AuthMode::Password);
        assert!(cfg.check_password("term", "hunter2hunter2"));
        assert!(!cfg.check_password("term", "wrong"));
        assert!(!cfg.check_password("other", "hunter2hunter2"));
        assert!(!cfg.check_password("", ""));
    }

    #[test]
    fn token_check() {
        let cfg = config(AuthMode::Token);
        assert!(cfg.check_token("sekrit-token"));
        assert!(!cfg.check_token("sekrit-token2"));
        assert!(!cfg.check_token(""));
    }

    #[tokio::test]
    async fn store_create_validate_remove() {
        let store = SessionStore::new();
        let id = store.create("term");
        assert_eq!(id.len(), 64);
        assert!(store.is_valid(&id));
        assert!(!store.is_valid("nope"));

        store.remove(&id);
        assert!(!store.is_valid(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn store_sessions_expire() {
        let store = SessionStore::with_ttl(Duration::from_secs(10));
        let id = store.create("term");
        assert!(store.is_valid(&id));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!store.is_valid(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_purges_expired_sessions() {
        let store = Arc::new(SessionStore::with_ttl(Duration::from_secs(10)));
        store.start_sweeper();
        let _id = store.create("term");
        assert_eq!(store.entries.lock().unwrap().len(), 1);

        tokio::time::advance(Duration::from_secs(120)).await;
        // Let the sweeper task observe the elapsed ticks.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.entries.lock().unwrap().len(), 0);
    }

    #[test]
    fn cookie_round_trip() {
        let value = session_cookie("abc123", false);
        assert!(value.starts_with("termshare_session=abc123;"));
        assert!(value.contains("HttpOnly"));
        assert!(value.contains("SameSite=Lax"));
        assert!(!value.contains("Secure"));
        assert!(session_cookie("abc123", true).contains("Secure"));

        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            "other=1; termshare_session=abc123; more=2".parse().unwrap(),
        );
        assert_eq!(session_id_from(&headers).as_deref(), Some("abc123"));
    }

    #[test]
    fn clear_cookie_expires_immediately() {
        let value = clear_session_cookie(false);
        assert!(value.contains("Max-Age=0"));
        assert!(value.starts_with("termshare_session=;"));
    }

    #[test]
    fn missing_cookie_yields_none() {
        let headers = HeaderMap::new();
        assert_eq!(session_id_from(&headers), None);

        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, "unrelated=zzz".parse().unwrap());
        assert_eq!(session_id_from(&headers), None);
    }
}
