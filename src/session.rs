/// Auth session controller.
///
/// Owns the token + profile pair, the login form fields, and the theme
/// choice. All async work (credential exchange, persistence, bootstrap reads)
/// runs in spawned tasks that report back through `AppEvent`; state mutation
/// happens synchronously in the `apply_*` methods on the driving thread.
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Duration;
use tracing::warn;

use crate::api::{Api, ApiError, AuthPayload, SchoolEntity, UserProfile};
use crate::app::AppEvent;
use crate::store::{KEY_ACCESS_TOKEN, KEY_THEME, KEY_USER_PROFILE, Store};
use crate::theme::ThemeMode;

// ── Session ───────────────────────────────────────────────────────────────────

/// The authenticated identity held for the app's lifetime.
///
/// Invariant: token and profile are set or cleared together — never one
/// without the other. A profile-less token is an invalid session and forces
/// logout, so the fields are private and only mutable through `establish`
/// and `clear`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    token: Option<String>,
    profile: Option<UserProfile>,
}

impl Session {
    pub fn establish(&mut self, payload: AuthPayload) {
        self.token = Some(payload.access_token);
        self.profile = Some(payload.profile);
    }

    pub fn clear(&mut self) {
        self.token = None;
        self.profile = None;
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some() && self.profile.is_some()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn profile(&self) -> Option<&UserProfile> {
        self.profile.as_ref()
    }
}

// ── Credentials ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
    pub entity: String,
}

// ── Auth controller state ─────────────────────────────────────────────────────

pub struct Auth {
    session: Session,
    pub theme: ThemeMode,

    // Login form. Cleared on sign-out along with the session.
    pub school: String,
    pub username: String,
    pub password: String,
    pub login_error: String,
    pub is_authenticating: bool,

    // School picker data (login screen mount)
    pub schools: Vec<SchoolEntity>,
    pub is_loading_schools: bool,
    pub schools_error: String,

    // Profile details shown on the settings screen. Fetched fresh from the
    // backend; does not replace the session profile.
    pub account: Option<UserProfile>,
    pub is_loading_account: bool,
    pub account_error: Option<String>,
}

impl Auth {
    pub fn new(device_theme: ThemeMode) -> Self {
        Self {
            session: Session::default(),
            theme: device_theme,
            school: String::new(),
            username: String::new(),
            password: String::new(),
            login_error: String::new(),
            is_authenticating: false,
            schools: Vec::new(),
            is_loading_schools: false,
            schools_error: String::new(),
            account: None,
            is_loading_account: false,
            account_error: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Re-establish a session from persisted token + profile at bootstrap.
    pub(crate) fn restore_session(&mut self, token: String, profile: UserProfile) {
        self.session.establish(AuthPayload {
            access_token: token,
            profile,
        });
    }

    /// Inline validation — missing fields never reach the network layer.
    pub fn validate_credentials(&self) -> Result<Credentials, String> {
        if self.school.is_empty() || self.username.is_empty() || self.password.is_empty() {
            return Err("All fields are required.".to_string());
        }
        Ok(Credentials {
            email: self.username.clone(),
            password: self.password.clone(),
            entity: self.school.clone(),
        })
    }

    /// Returns true when the session transitioned to authenticated.
    pub fn apply_login(&mut self, result: Result<AuthPayload, ApiError>) -> bool {
        self.is_authenticating = false;
        match result {
            Ok(payload) => {
                self.session.establish(payload);
                self.login_error.clear();
                self.password.clear();
                true
            }
            Err(e) => {
                self.login_error = e.to_string();
                false
            }
        }
    }

    pub fn apply_schools(&mut self, result: Result<Vec<SchoolEntity>, String>) {
        self.is_loading_schools = false;
        match result {
            Ok(schools) => {
                self.schools = schools;
                self.schools_error.clear();
            }
            Err(e) => self.schools_error = format!("Failed to load schools: {e}"),
        }
    }

    pub fn apply_account(&mut self, result: Result<UserProfile, String>) {
        self.is_loading_account = false;
        match result {
            Ok(profile) => {
                self.account = Some(profile);
                self.account_error = None;
            }
            Err(e) => self.account_error = Some(e),
        }
    }

    /// Hard return to anonymous. Never fails; storage cleanup runs separately.
    pub fn sign_out_reset(&mut self) {
        self.session.clear();
        self.school.clear();
        self.username.clear();
        self.password.clear();
        self.login_error.clear();
        self.is_authenticating = false;
        self.account = None;
        self.is_loading_account = false;
        self.account_error = None;
    }
}

/// Initials for the avatar chip: first letter of up to two name words.
pub fn user_initials(name: &str) -> String {
    let mut initials: String = name
        .split_whitespace()
        .take(2)
        .filter_map(|w| w.chars().next())
        .flat_map(|c| c.to_uppercase())
        .collect();
    if initials.is_empty() {
        initials.push('?');
    }
    initials
}

// ── Async tasks ───────────────────────────────────────────────────────────────

/// Concurrent reads of the three persisted keys, joined with the minimum
/// splash timer so the splash screen is visible at least that long however
/// fast storage responds.
pub(crate) async fn bootstrap_task(
    store: Arc<dyn Store>,
    splash_min: Duration,
    tx: UnboundedSender<AppEvent>,
) {
    let (token, theme, profile, ()) = tokio::join!(
        store.get(KEY_ACCESS_TOKEN),
        store.get(KEY_THEME),
        store.get(KEY_USER_PROFILE),
        tokio::time::sleep(splash_min),
    );

    let token = token.unwrap_or_else(|e| {
        warn!("bootstrap: failed to read access token: {e:#}");
        None
    });
    let theme = theme
        .unwrap_or_else(|e| {
            warn!("bootstrap: failed to read theme: {e:#}");
            None
        })
        .and_then(|raw| ThemeMode::parse(&raw));
    let profile = profile
        .unwrap_or_else(|e| {
            warn!("bootstrap: failed to read profile: {e:#}");
            None
        })
        .and_then(|raw| match serde_json::from_str::<UserProfile>(&raw) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!("bootstrap: stored profile is unreadable, treating as absent: {e}");
                None
            }
        });

    let _ = tx.send(AppEvent::BootstrapDone {
        token,
        profile,
        theme,
    });
}

pub(crate) async fn login_task(
    api: Arc<dyn Api>,
    store: Arc<dyn Store>,
    creds: Credentials,
    tx: UnboundedSender<AppEvent>,
) {
    let result = api
        .login(&creds.email, &creds.password, &creds.entity)
        .await;

    // Persist token + profile together, best-effort: a storage failure does
    // not demote the login, it only surfaces a warning.
    if let Ok(payload) = &result {
        let profile_json = match serde_json::to_string(&payload.profile) {
            Ok(json) => json,
            Err(e) => {
                warn!("login: failed to serialize profile for storage: {e}");
                String::new()
            }
        };
        let (token_res, profile_res) = tokio::join!(
            store.set(KEY_ACCESS_TOKEN, &payload.access_token),
            store.set(KEY_USER_PROFILE, &profile_json),
        );
        if let Err(e) = token_res.and(profile_res) {
            warn!("login: failed to persist session: {e:#}");
            let _ = tx.send(AppEvent::StorageWarning {
                title: "Signed in without saving".to_string(),
                detail: "You may need to log in again after restarting.".to_string(),
            });
        }
    }

    let _ = tx.send(AppEvent::LoginFinished(result));
}

pub(crate) async fn sign_out_task(store: Arc<dyn Store>, tx: UnboundedSender<AppEvent>) {
    let (token_res, profile_res) = tokio::join!(
        store.remove(KEY_ACCESS_TOKEN),
        store.remove(KEY_USER_PROFILE),
    );
    if let Err(e) = token_res.and(profile_res) {
        warn!("sign out: failed to clear stored session: {e:#}");
        let _ = tx.send(AppEvent::StorageWarning {
            title: "Error signing out".to_string(),
            detail: "Please restart the app.".to_string(),
        });
    }
}

/// Theme persistence is fire-and-forget: in-memory state already changed.
pub(crate) async fn persist_theme_task(store: Arc<dyn Store>, mode: ThemeMode) {
    if let Err(e) = store.set(KEY_THEME, mode.as_str()).await {
        warn!("theme: failed to persist {}: {e:#}", mode.as_str());
    }
}

pub(crate) async fn fetch_schools_task(api: Arc<dyn Api>, tx: UnboundedSender<AppEvent>) {
    let result = api.fetch_entities().await.map_err(|e| e.to_string());
    let _ = tx.send(AppEvent::SchoolsLoaded(result));
}

pub(crate) async fn fetch_account_task(
    api: Arc<dyn Api>,
    token: String,
    tx: UnboundedSender<AppEvent>,
) {
    let result = api.current_user(&token).await.map_err(|e| e.to_string());
    let _ = tx.send(AppEvent::AccountLoaded(result));
}
