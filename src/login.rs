#![cfg(feature = "web")]

use axum::{
    Form,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use lazy_static::lazy_static;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

use crate::app::AppState;
use crate::catalog::{TEAMS_SHEET, find_team, read_teams};
use crate::photo::Attachment;

pub const SESSION_COOKIE: &str = "session";
pub const LOGIN_TEMPLATE: &str = "login";
const SESSION_DURATION: u64 = 24 * 60 * 60; // 24 hours in seconds

/// A sanitized photo waiting to be sent, with its gallery preview
#[derive(Debug, Clone)]
pub struct Photo {
    pub attachment: Attachment,
    /// Base64 JPEG thumbnail
    pub thumbnail: String,
}

/// Logged-in team session
///
/// Photos accumulate here between page loads until a report is sent
/// successfully or the team logs out.
#[derive(Debug, Clone)]
pub struct Session {
    pub team: String,
    pub expires_at: SystemTime,
    pub photos: Vec<Photo>,
}

/// The session of the current request, inserted by [`require_auth`].
#[derive(Debug, Clone)]
pub struct CurrentSession {
    pub id: String,
    pub team: String,
}

lazy_static! {
    static ref SESSIONS: RwLock<HashMap<String, Session>> = RwLock::new(HashMap::new());
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub pin: String,
}

#[derive(Serialize, Default)]
struct LoginView {
    error: Option<String>,
    detail: Option<String>,
}

/// Create a session for `team`
///
/// Expired sessions are swept at the same time.
///
/// # Returns
/// * `String` - A unique session ID
pub fn create_session(team: &str) -> String {
    let session_id = Uuid::new_v4().to_string();
    let now = SystemTime::now();
    let session = Session {
        team: team.to_string(),
        expires_at: now + Duration::from_secs(SESSION_DURATION),
        photos: Vec::new(),
    };

    let mut sessions = SESSIONS.write().unwrap_or_else(|e| e.into_inner());
    sessions.retain(|_, s| s.expires_at > now);
    sessions.insert(session_id.clone(), session);

    session_id
}

/// Team name for a live session, `None` if unknown or expired.
pub fn validate_session(session_id: &str) -> Option<String> {
    let sessions = SESSIONS.read().unwrap_or_else(|e| e.into_inner());
    sessions
        .get(session_id)
        .filter(|s| s.expires_at > SystemTime::now())
        .map(|s| s.team.clone())
}

/// Drop a session along with its accumulated photos.
pub fn destroy_session(session_id: &str) {
    SESSIONS
        .write()
        .unwrap_or_else(|e| e.into_inner())
        .remove(session_id);
}

/// Append photos to a session, returning the new photo count.
pub fn add_photos(session_id: &str, photos: Vec<Photo>) -> Option<usize> {
    let mut sessions = SESSIONS.write().unwrap_or_else(|e| e.into_inner());
    sessions.get_mut(session_id).map(|s| {
        s.photos.extend(photos);
        s.photos.len()
    })
}

pub fn session_photos(session_id: &str) -> Vec<Photo> {
    let sessions = SESSIONS.read().unwrap_or_else(|e| e.into_inner());
    sessions
        .get(session_id)
        .map(|s| s.photos.clone())
        .unwrap_or_default()
}

pub fn photo_count(session_id: &str) -> usize {
    let sessions = SESSIONS.read().unwrap_or_else(|e| e.into_inner());
    sessions.get(session_id).map(|s| s.photos.len()).unwrap_or(0)
}

/// Remove the first `count` photos, the ones a report was just sent with.
///
/// Photos added while the report was on its way stay in the gallery.
pub fn drain_photos(session_id: &str, count: usize) {
    if let Some(s) = SESSIONS
        .write()
        .unwrap_or_else(|e| e.into_inner())
        .get_mut(session_id)
    {
        let sent = count.min(s.photos.len());
        s.photos.drain(..sent);
    }
}

pub fn clear_photos(session_id: &str) {
    if let Some(s) = SESSIONS
        .write()
        .unwrap_or_else(|e| e.into_inner())
        .get_mut(session_id)
    {
        s.photos.clear();
    }
}

fn render_login(state: &AppState, view: &LoginView) -> Response {
    match state.templates.render(LOGIN_TEMPLATE, view) {
        Ok(html) => Html(html).into_response(),
        Err(e) => crate::error::AppError::from(e).into_response(),
    }
}

/// Serve the PIN login page, or go straight to the form with a live session.
pub async fn serve_login_page(State(state): State<Arc<AppState>>, jar: CookieJar) -> Response {
    if jar
        .get(SESSION_COOKIE)
        .and_then(|c| validate_session(c.value()))
        .is_some()
    {
        return Redirect::to("/form").into_response();
    }
    render_login(&state, &LoginView::default())
}

/// Handle PIN login
///
/// The `Equips` sheet is read through the cache and the PIN compared after
/// normalisation. A datastore failure is reported separately from a wrong PIN
/// so crews know whether to retry or to call their manager.
///
/// # Arguments
/// * `state` - Shared application state
/// * `jar` - Cookie jar for storing the session cookie
/// * `form` - Form data containing the PIN
///
/// # Returns
/// * `Response` - Redirect to the form if successful, the login page with a message if not
pub async fn handle_login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Response {
    let teams = match state.cache.read(state.store.as_ref(), TEAMS_SHEET).await {
        Ok(sheet) => read_teams(sheet),
        Err(e) => {
            warn!("could not read teams: {}", e);
            let view = LoginView {
                error: Some("Error de conexión con la hoja de cálculo.".to_string()),
                detail: Some(format!("Detalle: {}", e)),
            };
            let mut response = render_login(&state, &view);
            *response.status_mut() = StatusCode::BAD_GATEWAY;
            return response;
        }
    };

    match find_team(&teams, &form.pin) {
        Some(team) => {
            info!("team '{}' logged in", team.name);
            let session_id = create_session(&team.name);
            let cookie = Cookie::build((SESSION_COOKIE, session_id))
                .path("/")
                .http_only(true)
                .max_age(time::Duration::seconds(SESSION_DURATION as i64));
            (jar.add(cookie), Redirect::to("/form")).into_response()
        }
        None => {
            let view = LoginView {
                error: Some("PIN incorrecto. Consulta a tu responsable.".to_string()),
                detail: None,
            };
            let mut response = render_login(&state, &view);
            *response.status_mut() = StatusCode::UNAUTHORIZED;
            response
        }
    }
}

/// Destroy the session and clear the cookie.
pub async fn handle_logout(jar: CookieJar) -> (CookieJar, Redirect) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        destroy_session(cookie.value());
    }
    let jar = jar.remove(Cookie::build((SESSION_COOKIE, "")).path("/"));
    (jar, Redirect::to("/login"))
}

/// Authentication middleware
///
/// Requests without a live session are sent to the login page. Otherwise the
/// [`CurrentSession`] is made available to handlers as an extension.
pub async fn require_auth(jar: CookieJar, mut request: Request, next: Next) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        let id = cookie.value().to_string();
        if let Some(team) = validate_session(&id) {
            request
                .extensions_mut()
                .insert(CurrentSession { id, team });
            return next.run(request).await;
        }
    }
    Redirect::to("/login").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photo(name: &str) -> Photo {
        Photo {
            attachment: Attachment::jpeg(format!("{}.jpg", name), vec![1, 2, 3]),
            thumbnail: String::new(),
        }
    }

    #[test]
    fn test_session_lifecycle() {
        let id = create_session("Equip A");
        assert_eq!(validate_session(&id), Some("Equip A".to_string()));

        destroy_session(&id);
        assert_eq!(validate_session(&id), None);
    }

    #[test]
    fn test_unknown_session() {
        assert_eq!(validate_session("not-a-session"), None);
        assert_eq!(add_photos("not-a-session", vec![photo("foto_01")]), None);
        assert_eq!(photo_count("not-a-session"), 0);
    }

    #[test]
    fn test_photos_accumulate_until_cleared() {
        let id = create_session("Equip B");
        assert_eq!(add_photos(&id, vec![photo("foto_01")]), Some(1));
        assert_eq!(add_photos(&id, vec![photo("obra"), photo("suelo")]), Some(3));

        let names: Vec<String> = session_photos(&id)
            .into_iter()
            .map(|p| p.attachment.filename)
            .collect();
        assert_eq!(names, vec!["foto_01.jpg", "obra.jpg", "suelo.jpg"]);

        clear_photos(&id);
        assert_eq!(photo_count(&id), 0);
        assert_eq!(validate_session(&id), Some("Equip B".to_string()));
        destroy_session(&id);
    }

    #[test]
    fn test_drain_keeps_photos_added_later() {
        let id = create_session("Equip D");
        add_photos(&id, vec![photo("foto_01"), photo("foto_02")]);
        let sent = session_photos(&id).len();
        add_photos(&id, vec![photo("foto_03")]);

        drain_photos(&id, sent);
        let names: Vec<String> = session_photos(&id)
            .into_iter()
            .map(|p| p.attachment.filename)
            .collect();
        assert_eq!(names, vec!["foto_03.jpg"]);

        drain_photos(&id, 5);
        assert_eq!(photo_count(&id), 0);
        destroy_session(&id);
    }

    #[test]
    fn test_logout_drops_photos() {
        let id = create_session("Equip C");
        add_photos(&id, vec![photo("foto_01")]);
        destroy_session(&id);
        assert!(session_photos(&id).is_empty());
    }
}
