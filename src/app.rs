/// Top-level app state machine.
///
/// Architecture:
///   driving thread:  renderer loop — presentation intents + AppEvent drain
///   worker tasks:    tokio::spawn — send AppEvents back via UnboundedSender
///
/// The renderer calls intent methods (button presses, text input, long-press
/// actions arrive here), drains the event receiver, and feeds each event to
/// `apply_event`. All state mutation is synchronous on the driving thread;
/// spawned tasks only do I/O and report back, so there is no parallel
/// mutation to lock against.
use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Duration;
use tracing::warn;

use crate::api::{
    Api, ApiError, AuthPayload, ConversationSummary, Message, SchoolEntity, SendReply, UserProfile,
};
use crate::chat::{self, Chat, Clipboard};
use crate::session::{self, Auth};
use crate::store::Store;
use crate::theme::{Palette, ThemeMode};
use crate::voice::{self, Microphone, Recognizer, VoiceCapture};

/// UX contract: the splash screen stays up at least this long, however fast
/// storage answers.
pub const DEFAULT_SPLASH_MIN: Duration = Duration::from_secs(2);

// ── Screen ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Splash,
    Login,
    Chat,
    Settings,
}

// ── Notices (toasts) ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub title: String,
    pub body: String,
}

// ── AppEvent — async completions applied on the driving thread ────────────────

#[derive(Debug)]
pub enum AppEvent {
    BootstrapDone {
        token: Option<String>,
        profile: Option<UserProfile>,
        theme: Option<ThemeMode>,
    },
    SchoolsLoaded(Result<Vec<SchoolEntity>, String>),
    LoginFinished(Result<AuthPayload, ApiError>),
    AccountLoaded(Result<UserProfile, String>),
    /// A never-fatal persistence failure worth telling the user about.
    StorageWarning { title: String, detail: String },
    HistoryLoaded(Result<Vec<ConversationSummary>, String>),
    MessagesLoaded {
        seq: u64,
        result: Result<Vec<Message>, String>,
    },
    SendFinished(Result<SendReply, ApiError>),
    MicPermission(bool),
    CaptureFailed(String),
    TranscriptReady {
        seq: u64,
        result: Result<String, String>,
    },
    CaptureCancelled,
}

// ── Platform collaborators ────────────────────────────────────────────────────

/// Everything the core needs from the outside world. Handed in once at
/// construction; controllers never reach for globals.
pub struct Platform {
    pub api: Arc<dyn Api>,
    pub store: Arc<dyn Store>,
    pub clipboard: Arc<dyn Clipboard>,
    pub recognizer: Arc<dyn Recognizer>,
    pub microphone: Arc<dyn Microphone>,
}

// ── App ───────────────────────────────────────────────────────────────────────

pub struct App {
    pub screen: Screen,
    /// Orthogonal overlay on the chat screen.
    pub sidebar_open: bool,
    pub auth: Auth,
    pub chat: Chat,
    pub voice: VoiceCapture,
    pub splash_min: Duration,

    notices: VecDeque<Notice>,
    api: Arc<dyn Api>,
    store: Arc<dyn Store>,
    clipboard: Arc<dyn Clipboard>,
    recognizer: Arc<dyn Recognizer>,
    microphone: Arc<dyn Microphone>,
    tx: UnboundedSender<AppEvent>,
}

impl App {
    /// `device_theme` is the device-reported color scheme, used until (and
    /// unless) a stored theme overrides it.
    pub fn new(platform: Platform, device_theme: ThemeMode) -> (Self, UnboundedReceiver<AppEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let app = Self {
            screen: Screen::Splash,
            sidebar_open: false,
            auth: Auth::new(device_theme),
            chat: Chat::new(),
            voice: VoiceCapture::new(),
            splash_min: DEFAULT_SPLASH_MIN,
            notices: VecDeque::new(),
            api: platform.api,
            store: platform.store,
            clipboard: platform.clipboard,
            recognizer: platform.recognizer,
            microphone: platform.microphone,
            tx,
        };
        (app, rx)
    }

    /// Kick off the persisted-session bootstrap. Called once at process start.
    pub fn start(&self) {
        tokio::spawn(session::bootstrap_task(
            self.store.clone(),
            self.splash_min,
            self.tx.clone(),
        ));
    }

    // ── Derived state for the renderer ────────────────────────────────────────

    pub fn palette(&self) -> &'static Palette {
        self.auth.theme.palette()
    }

    /// Guard for the authenticated view: without both token and profile the
    /// renderer must render nothing rather than a broken chat screen.
    pub fn chat_view_ready(&self) -> bool {
        self.screen == Screen::Chat && self.auth.session().is_authenticated()
    }

    /// Drain pending notices for display.
    pub fn take_notices(&mut self) -> Vec<Notice> {
        self.notices.drain(..).collect()
    }

    fn push_notice(&mut self, kind: NoticeKind, title: &str, body: impl Into<String>) {
        self.notices.push_back(Notice {
            kind,
            title: title.to_string(),
            body: body.into(),
        });
    }

    // ── Navigation intents ────────────────────────────────────────────────────

    pub fn toggle_sidebar(&mut self) {
        if self.screen == Screen::Chat {
            self.sidebar_open = !self.sidebar_open;
        }
    }

    pub fn open_settings(&mut self) {
        if self.screen == Screen::Chat {
            self.sidebar_open = false;
            self.screen = Screen::Settings;
        }
    }

    /// Back from settings always re-reveals chat history — a deliberate UX
    /// contract, not an accident.
    pub fn back_from_settings(&mut self) {
        if self.screen == Screen::Settings {
            self.screen = Screen::Chat;
            self.sidebar_open = true;
        }
    }

    // ── Auth intents ──────────────────────────────────────────────────────────

    /// Login-screen mount: fetch the school picker entries.
    pub fn fetch_schools(&mut self) {
        self.auth.is_loading_schools = true;
        self.auth.schools_error.clear();
        tokio::spawn(session::fetch_schools_task(self.api.clone(), self.tx.clone()));
    }

    pub fn submit_login(&mut self) {
        if self.auth.is_authenticating {
            return;
        }
        match self.auth.validate_credentials() {
            Ok(creds) => {
                self.auth.is_authenticating = true;
                self.auth.login_error.clear();
                tokio::spawn(session::login_task(
                    self.api.clone(),
                    self.store.clone(),
                    creds,
                    self.tx.clone(),
                ));
            }
            Err(msg) => {
                self.auth.login_error = msg.clone();
                self.push_notice(NoticeKind::Error, "Login Error", msg);
            }
        }
    }

    /// Hard return to anonymous: clears session, draft, credential fields and
    /// capture state, then cleans storage in the background. Never fails.
    pub fn sign_out(&mut self) {
        self.auth.sign_out_reset();
        self.chat.reset();
        self.voice.reset();
        self.sidebar_open = false;
        self.screen = Screen::Login;
        tokio::spawn(session::sign_out_task(self.store.clone(), self.tx.clone()));
    }

    /// In-memory theme changes immediately; persistence is fire-and-forget so
    /// UI responsiveness never waits on storage.
    pub fn set_theme(&mut self, mode: ThemeMode) {
        self.auth.theme = mode;
        tokio::spawn(session::persist_theme_task(self.store.clone(), mode));
    }

    /// Settings-screen mount: refresh the account details from the backend.
    pub fn fetch_account(&mut self) {
        let Some(token) = self.auth.session().token().map(str::to_string) else {
            warn!("fetch_account without a session");
            return;
        };
        self.auth.is_loading_account = true;
        self.auth.account_error = None;
        tokio::spawn(session::fetch_account_task(
            self.api.clone(),
            token,
            self.tx.clone(),
        ));
    }

    // ── Conversation intents ──────────────────────────────────────────────────

    /// Chat-screen mount: load the conversation history.
    pub fn load_history(&mut self) {
        let Some(token) = self.auth.session().token() else {
            warn!("load_history without a session");
            return;
        };
        let token = token.to_string();
        self.chat.begin_load_history();
        tokio::spawn(chat::load_history_task(
            self.api.clone(),
            token,
            self.tx.clone(),
        ));
    }

    pub fn select_conversation(&mut self, id: &str) {
        let Some(token) = self.auth.session().token() else {
            return;
        };
        let token = token.to_string();
        let seq = self.chat.begin_select(id);
        tokio::spawn(chat::fetch_messages_task(
            self.api.clone(),
            token,
            id.to_string(),
            seq,
            self.tx.clone(),
        ));
    }

    pub fn start_new_chat(&mut self) {
        self.chat.start_new_chat();
    }

    pub fn send_message(&mut self) {
        let Some(token) = self.auth.session().token() else {
            return;
        };
        let token = token.to_string();
        // Capture being active blocks sending, the counterpart of the
        // send-blocks-capture rule in mic_pressed.
        let Some(request) = self.chat.begin_send(self.voice.is_active()) else {
            return;
        };
        tokio::spawn(chat::send_task(
            self.api.clone(),
            token,
            request,
            self.tx.clone(),
        ));
    }

    pub fn copy_message(&mut self, id: &str) {
        let Some(text) = self
            .chat
            .messages
            .iter()
            .find(|m| m.id == id)
            .map(|m| m.text.clone())
        else {
            return;
        };
        match self.clipboard.set_text(&text) {
            Ok(()) => self.chat.mark_copied(id),
            Err(e) => warn!("clipboard copy failed: {e:#}"),
        }
    }

    // ── Voice intents ─────────────────────────────────────────────────────────

    /// Chat-screen mount: resolve microphone permission once.
    pub fn query_mic_permission(&self) {
        tokio::spawn(voice::query_permission_task(
            self.microphone.clone(),
            self.tx.clone(),
        ));
    }

    /// The mic button toggles: start listening, or stop-and-transcribe.
    pub fn mic_pressed(&mut self) {
        if self.voice.is_listening() {
            self.stop_capture();
        } else {
            self.start_capture();
        }
    }

    fn start_capture(&mut self) {
        if !self.voice.begin(self.chat.is_sending) {
            return;
        }
        tokio::spawn(voice::start_capture_task(
            self.recognizer.clone(),
            self.tx.clone(),
        ));
    }

    fn stop_capture(&mut self) {
        let Some(seq) = self.voice.begin_stop() else {
            return;
        };
        tokio::spawn(voice::stop_capture_task(
            self.recognizer.clone(),
            seq,
            self.tx.clone(),
        ));
    }

    pub fn cancel_capture(&mut self) {
        if self.voice.begin_cancel() {
            tokio::spawn(voice::cancel_capture_task(
                self.recognizer.clone(),
                self.tx.clone(),
            ));
        }
    }

    // ── Event application ─────────────────────────────────────────────────────

    pub fn apply_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::BootstrapDone {
                token,
                profile,
                theme,
            } => {
                // A stored theme applies even for an anonymous session
                if let Some(mode) = theme {
                    self.auth.theme = mode;
                }
                if self.screen != Screen::Splash {
                    return; // exactly one transition fires per app start
                }
                match (token, profile) {
                    (Some(token), Some(profile)) => {
                        self.auth.restore_session(token, profile);
                        self.screen = Screen::Chat;
                    }
                    (token, profile) => {
                        if token.is_some() != profile.is_some() {
                            // Half a session is no session: force logout and
                            // clean up whichever key survived.
                            warn!("persisted session is incomplete, forcing login");
                            tokio::spawn(session::sign_out_task(
                                self.store.clone(),
                                self.tx.clone(),
                            ));
                        }
                        self.screen = Screen::Login;
                    }
                }
            }
            AppEvent::SchoolsLoaded(result) => self.auth.apply_schools(result),
            AppEvent::LoginFinished(result) => {
                let network_error = matches!(&result, Err(e) if e.is_network());
                if self.auth.apply_login(result) {
                    self.screen = Screen::Chat;
                    self.push_notice(
                        NoticeKind::Success,
                        "Login Successful",
                        "Welcome to ShikshaGPT!",
                    );
                } else {
                    let title = if network_error { "Network Error" } else { "Login Failed" };
                    let body = self.auth.login_error.clone();
                    self.push_notice(NoticeKind::Error, title, body);
                }
            }
            AppEvent::AccountLoaded(result) => self.auth.apply_account(result),
            AppEvent::StorageWarning { title, detail } => {
                self.push_notice(NoticeKind::Error, &title, detail);
            }
            AppEvent::HistoryLoaded(result) => self.chat.apply_history(result),
            AppEvent::MessagesLoaded { seq, result } => self.chat.apply_messages(seq, result),
            AppEvent::SendFinished(result) => self.chat.apply_send(result),
            AppEvent::MicPermission(granted) => self.voice.has_permission = granted,
            AppEvent::CaptureFailed(e) => {
                self.voice.reset();
                self.push_notice(NoticeKind::Error, "Voice capture failed", e);
            }
            AppEvent::TranscriptReady { seq, result } => {
                if let Some(text) = self.voice.apply_transcript(seq, result) {
                    append_to_draft(&mut self.chat.draft, &text);
                }
            }
            AppEvent::CaptureCancelled => self.voice.apply_cancelled(),
        }
    }
}

/// Transcripts append to the draft, never replace it.
fn append_to_draft(draft: &mut String, transcript: &str) {
    let transcript = transcript.trim();
    if transcript.is_empty() {
        return;
    }
    if !draft.is_empty() && !draft.ends_with(char::is_whitespace) {
        draft.push(' ');
    }
    draft.push_str(transcript);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{EntityRef, Sender};
    use crate::store::{KEY_ACCESS_TOKEN, KEY_THEME, KEY_USER_PROFILE, MemStore};
    use std::sync::Mutex;

    // ── Stub collaborators ──────────────────────────────────────────────────

    struct StubApi {
        login: Mutex<Option<Result<AuthPayload, ApiError>>>,
        send: Mutex<Option<Result<SendReply, ApiError>>>,
        conversations: Vec<ConversationSummary>,
    }

    impl StubApi {
        fn empty() -> Self {
            Self {
                login: Mutex::new(None),
                send: Mutex::new(None),
                conversations: Vec::new(),
            }
        }

        fn with_login(result: Result<AuthPayload, ApiError>) -> Self {
            let api = Self::empty();
            *api.login.lock().unwrap() = Some(result);
            api
        }

        fn with_send(result: Result<SendReply, ApiError>) -> Self {
            let api = Self::empty();
            *api.send.lock().unwrap() = Some(result);
            api
        }
    }

    #[async_trait::async_trait]
    impl Api for StubApi {
        async fn fetch_entities(&self) -> Result<Vec<SchoolEntity>, ApiError> {
            Ok(Vec::new())
        }

        async fn login(&self, _: &str, _: &str, _: &str) -> Result<AuthPayload, ApiError> {
            self.login
                .lock()
                .unwrap()
                .take()
                .unwrap_or(Err(ApiError::Network("stub".to_string())))
        }

        async fn current_user(&self, _: &str) -> Result<UserProfile, ApiError> {
            Err(ApiError::Network("stub".to_string()))
        }

        async fn list_conversations(&self, _: &str) -> Result<Vec<ConversationSummary>, ApiError> {
            Ok(self.conversations.clone())
        }

        async fn fetch_messages(&self, _: &str, _: &str) -> Result<Vec<Message>, ApiError> {
            Ok(Vec::new())
        }

        async fn send_message(
            &self,
            _: &str,
            _: Option<&str>,
            _: &str,
        ) -> Result<SendReply, ApiError> {
            self.send
                .lock()
                .unwrap()
                .take()
                .unwrap_or(Err(ApiError::Network("stub".to_string())))
        }
    }

    #[derive(Default)]
    struct StubClipboard {
        copied: Mutex<Vec<String>>,
    }

    impl Clipboard for StubClipboard {
        fn set_text(&self, text: &str) -> anyhow::Result<()> {
            self.copied.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    struct StubRecognizer {
        transcript: String,
    }

    #[async_trait::async_trait]
    impl Recognizer for StubRecognizer {
        async fn start(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<String> {
            Ok(self.transcript.clone())
        }

        async fn cancel(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct StubMicrophone {
        granted: bool,
    }

    #[async_trait::async_trait]
    impl Microphone for StubMicrophone {
        async fn has_permission(&self) -> bool {
            self.granted
        }
    }

    // ── Harness ─────────────────────────────────────────────────────────────

    fn profile() -> UserProfile {
        UserProfile {
            id: "u1".to_string(),
            name: "Asha Verma".to_string(),
            email: "asha@example.com".to_string(),
            contact: "9999999999".to_string(),
            grade: "8".to_string(),
            entity: EntityRef {
                id: "s1".to_string(),
                name: "Green Valley School".to_string(),
            },
        }
    }

    fn auth_payload() -> AuthPayload {
        AuthPayload {
            access_token: "tok".to_string(),
            profile: profile(),
        }
    }

    fn build(api: Arc<dyn Api>, store: Arc<MemStore>) -> (App, UnboundedReceiver<AppEvent>) {
        let platform = Platform {
            api,
            store,
            clipboard: Arc::new(StubClipboard::default()),
            recognizer: Arc::new(StubRecognizer {
                transcript: "two plus two".to_string(),
            }),
            microphone: Arc::new(StubMicrophone { granted: true }),
        };
        let (mut app, rx) = App::new(platform, ThemeMode::Light);
        app.splash_min = Duration::from_millis(1);
        (app, rx)
    }

    async fn pump(app: &mut App, rx: &mut UnboundedReceiver<AppEvent>) {
        let event = rx.recv().await.expect("event channel closed");
        app.apply_event(event);
    }

    fn login(app: &mut App) {
        app.apply_event(AppEvent::LoginFinished(Ok(auth_payload())));
        assert_eq!(app.screen, Screen::Chat);
        app.take_notices();
    }

    // ── Bootstrap ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_bootstrap_anonymous_lands_on_login() {
        let (mut app, mut rx) = build(Arc::new(StubApi::empty()), Arc::new(MemStore::new()));
        assert_eq!(app.screen, Screen::Splash);
        app.start();
        pump(&mut app, &mut rx).await;
        assert_eq!(app.screen, Screen::Login);
        assert!(!app.chat_view_ready());
    }

    #[tokio::test]
    async fn test_bootstrap_restores_session_and_theme() {
        let profile_json = serde_json::to_string(&profile()).unwrap();
        let store = Arc::new(MemStore::with(&[
            (KEY_ACCESS_TOKEN, "tok"),
            (KEY_USER_PROFILE, &profile_json),
            (KEY_THEME, "dark"),
        ]));
        let (mut app, mut rx) = build(Arc::new(StubApi::empty()), store);
        app.start();
        pump(&mut app, &mut rx).await;

        assert_eq!(app.screen, Screen::Chat);
        assert!(app.chat_view_ready());
        assert_eq!(app.auth.theme, ThemeMode::Dark);
    }

    #[tokio::test]
    async fn test_bootstrap_token_without_profile_forces_login() {
        let store = Arc::new(MemStore::with(&[(KEY_ACCESS_TOKEN, "tok"), (KEY_THEME, "dark")]));
        let (mut app, mut rx) = build(Arc::new(StubApi::empty()), store);
        app.start();
        pump(&mut app, &mut rx).await;

        assert_eq!(app.screen, Screen::Login);
        assert!(!app.auth.session().is_authenticated());
        // Theme still applies for the anonymous session
        assert_eq!(app.auth.theme, ThemeMode::Dark);
    }

    #[tokio::test]
    async fn test_bootstrap_transition_fires_once() {
        let (mut app, _rx) = build(Arc::new(StubApi::empty()), Arc::new(MemStore::new()));
        app.apply_event(AppEvent::BootstrapDone {
            token: None,
            profile: None,
            theme: None,
        });
        assert_eq!(app.screen, Screen::Login);

        // A (hypothetical) duplicate completion must not yank an authenticated
        // user around
        login(&mut app);
        app.apply_event(AppEvent::BootstrapDone {
            token: None,
            profile: None,
            theme: None,
        });
        assert_eq!(app.screen, Screen::Chat);
    }

    // ── Login ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_missing_fields_never_reach_network() {
        let (mut app, mut rx) = build(Arc::new(StubApi::empty()), Arc::new(MemStore::new()));
        app.screen = Screen::Login;
        app.submit_login();

        assert_eq!(app.auth.login_error, "All fields are required.");
        assert!(!app.auth.is_authenticating);
        assert!(rx.try_recv().is_err(), "no task was spawned");
        let notices = app.take_notices();
        assert_eq!(notices[0].kind, NoticeKind::Error);
    }

    #[tokio::test]
    async fn test_invalid_credentials_stay_anonymous_and_unpersisted() {
        let api = Arc::new(StubApi::with_login(Err(ApiError::Rejected {
            status: 401,
            message: "Incorrect username or password".to_string(),
        })));
        let store = Arc::new(MemStore::new());
        let (mut app, mut rx) = build(api, store.clone());
        app.screen = Screen::Login;
        app.auth.school = "s1".to_string();
        app.auth.username = "asha@example.com".to_string();
        app.auth.password = "wrong".to_string();

        app.submit_login();
        assert!(app.auth.is_authenticating);
        pump(&mut app, &mut rx).await;

        assert_eq!(app.screen, Screen::Login);
        assert!(!app.auth.session().is_authenticated());
        assert_eq!(app.auth.login_error, "Incorrect username or password");
        assert_eq!(store.get(KEY_ACCESS_TOKEN).await.unwrap(), None);
        assert_eq!(store.get(KEY_USER_PROFILE).await.unwrap(), None);

        let notices = app.take_notices();
        assert_eq!(notices[0].title, "Login Failed");
    }

    #[tokio::test]
    async fn test_successful_login_persists_and_navigates() {
        let api = Arc::new(StubApi::with_login(Ok(auth_payload())));
        let store = Arc::new(MemStore::new());
        let (mut app, mut rx) = build(api, store.clone());
        app.screen = Screen::Login;
        app.auth.school = "s1".to_string();
        app.auth.username = "asha@example.com".to_string();
        app.auth.password = "pw".to_string();

        app.submit_login();
        pump(&mut app, &mut rx).await;

        assert_eq!(app.screen, Screen::Chat);
        assert!(app.chat_view_ready());
        assert_eq!(
            store.get(KEY_ACCESS_TOKEN).await.unwrap(),
            Some("tok".to_string())
        );
        assert!(store.get(KEY_USER_PROFILE).await.unwrap().is_some());

        let notices = app.take_notices();
        assert_eq!(notices[0].kind, NoticeKind::Success);
        assert_eq!(notices[0].title, "Login Successful");
    }

    #[tokio::test]
    async fn test_network_error_is_distinct_from_rejection() {
        let api = Arc::new(StubApi::with_login(Err(ApiError::Network(
            "dns failure".to_string(),
        ))));
        let (mut app, mut rx) = build(api, Arc::new(MemStore::new()));
        app.screen = Screen::Login;
        app.auth.school = "s1".to_string();
        app.auth.username = "u".to_string();
        app.auth.password = "p".to_string();

        app.submit_login();
        pump(&mut app, &mut rx).await;

        let notices = app.take_notices();
        assert_eq!(notices[0].title, "Network Error");
        assert!(notices[0].body.contains("Could not connect to the server"));
    }

    // ── Sign-out ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_sign_out_clears_state_and_storage() {
        let store = Arc::new(MemStore::with(&[
            (KEY_ACCESS_TOKEN, "tok"),
            (KEY_USER_PROFILE, "{}"),
        ]));
        let (mut app, rx) = build(Arc::new(StubApi::empty()), store.clone());
        login(&mut app);
        app.auth.school = "s1".to_string();
        app.auth.username = "u".to_string();
        app.chat.draft = "half-typed".to_string();
        app.sidebar_open = true;

        app.sign_out();

        assert_eq!(app.screen, Screen::Login);
        assert!(!app.auth.session().is_authenticated());
        assert!(app.auth.school.is_empty());
        assert!(app.auth.username.is_empty());
        assert!(app.chat.draft.is_empty());
        assert!(!app.sidebar_open);

        // Background cleanup empties storage; a restart lands on login
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get(KEY_ACCESS_TOKEN).await.unwrap(), None);
        assert_eq!(store.get(KEY_USER_PROFILE).await.unwrap(), None);

        let (mut app2, mut rx2) = build(Arc::new(StubApi::empty()), store);
        app2.start();
        pump(&mut app2, &mut rx2).await;
        assert_eq!(app2.screen, Screen::Login);
        drop(rx);
    }

    // ── Navigation ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_settings_round_trip_reopens_sidebar() {
        let (mut app, _rx) = build(Arc::new(StubApi::empty()), Arc::new(MemStore::new()));
        login(&mut app);

        app.open_settings();
        assert_eq!(app.screen, Screen::Settings);
        assert!(!app.sidebar_open);

        app.back_from_settings();
        assert_eq!(app.screen, Screen::Chat);
        assert!(app.sidebar_open, "returning from settings re-reveals history");
    }

    #[tokio::test]
    async fn test_sidebar_toggles_only_on_chat() {
        let (mut app, _rx) = build(Arc::new(StubApi::empty()), Arc::new(MemStore::new()));
        app.screen = Screen::Login;
        app.toggle_sidebar();
        assert!(!app.sidebar_open);

        login(&mut app);
        app.toggle_sidebar();
        assert!(app.sidebar_open);
        app.toggle_sidebar();
        assert!(!app.sidebar_open);
    }

    // ── Send pipeline through the navigator ─────────────────────────────────

    #[tokio::test]
    async fn test_send_hello_in_new_conversation() {
        let api = Arc::new(StubApi::with_send(Ok(SendReply {
            assistant_text: "Hi!".to_string(),
            conversation_id: "c1".to_string(),
            title: None,
            message_id: None,
        })));
        let (mut app, mut rx) = build(api, Arc::new(MemStore::new()));
        login(&mut app);

        app.chat.draft = "Hello".to_string();
        app.send_message();
        assert_eq!(app.chat.messages.len(), 1, "optimistic append is immediate");
        pump(&mut app, &mut rx).await;

        let texts: Vec<(&str, Sender)> = app
            .chat
            .messages
            .iter()
            .map(|m| (m.text.as_str(), m.sender))
            .collect();
        assert_eq!(texts, vec![("Hello", Sender::User), ("Hi!", Sender::Assistant)]);
        assert_eq!(app.chat.selected_id.as_deref(), Some("c1"));
        assert_eq!(app.chat.history[0].id, "c1");
    }

    #[tokio::test]
    async fn test_send_blocked_while_listening() {
        let (mut app, rx) = build(Arc::new(StubApi::empty()), Arc::new(MemStore::new()));
        login(&mut app);
        app.voice.has_permission = true;
        app.chat.draft = "Hello".to_string();

        app.mic_pressed();
        assert!(app.voice.is_listening());
        app.send_message();
        assert!(app.chat.messages.is_empty());
        assert!(!app.chat.is_sending);
        drop(rx);
    }

    #[tokio::test]
    async fn test_capture_blocked_while_sending() {
        let (mut app, _rx) = build(Arc::new(StubApi::empty()), Arc::new(MemStore::new()));
        login(&mut app);
        app.voice.has_permission = true;
        app.chat.draft = "Hello".to_string();
        app.send_message();
        assert!(app.chat.is_sending);

        app.mic_pressed();
        assert!(!app.voice.is_listening());
    }

    // ── Voice through the navigator ─────────────────────────────────────────

    #[tokio::test]
    async fn test_transcript_appends_to_draft() {
        let (mut app, mut rx) = build(Arc::new(StubApi::empty()), Arc::new(MemStore::new()));
        login(&mut app);
        app.voice.has_permission = true;
        app.chat.draft = "What is".to_string();

        app.mic_pressed(); // start
        app.mic_pressed(); // stop → finalize
        pump(&mut app, &mut rx).await; // TranscriptReady

        assert_eq!(app.chat.draft, "What is two plus two");
        assert_eq!(app.voice.state, crate::voice::CaptureState::Idle);
    }

    #[tokio::test]
    async fn test_cancel_leaves_draft_untouched() {
        let (mut app, mut rx) = build(Arc::new(StubApi::empty()), Arc::new(MemStore::new()));
        login(&mut app);
        app.voice.has_permission = true;
        app.chat.draft = "untouched".to_string();

        app.mic_pressed();
        app.cancel_capture();
        pump(&mut app, &mut rx).await; // CaptureCancelled

        assert_eq!(app.chat.draft, "untouched");
        assert_eq!(app.voice.state, crate::voice::CaptureState::Idle);
    }

    #[tokio::test]
    async fn test_mic_permission_event() {
        let (mut app, mut rx) = build(Arc::new(StubApi::empty()), Arc::new(MemStore::new()));
        login(&mut app);
        assert!(!app.voice.has_permission);
        app.query_mic_permission();
        pump(&mut app, &mut rx).await;
        assert!(app.voice.has_permission);
    }

    // ── Theme & clipboard ───────────────────────────────────────────────────

    #[tokio::test]
    async fn test_set_theme_updates_memory_then_storage() {
        let store = Arc::new(MemStore::new());
        let (mut app, _rx) = build(Arc::new(StubApi::empty()), store.clone());
        app.set_theme(ThemeMode::Dark);
        assert_eq!(app.auth.theme, ThemeMode::Dark);
        assert_eq!(app.palette().background, "#151515ff");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get(KEY_THEME).await.unwrap(), Some("dark".to_string()));
    }

    #[tokio::test]
    async fn test_copy_message_tracks_id() {
        let clipboard = Arc::new(StubClipboard::default());
        let platform = Platform {
            api: Arc::new(StubApi::empty()),
            store: Arc::new(MemStore::new()),
            clipboard: clipboard.clone(),
            recognizer: Arc::new(StubRecognizer {
                transcript: String::new(),
            }),
            microphone: Arc::new(StubMicrophone { granted: false }),
        };
        let (mut app, _rx) = App::new(platform, ThemeMode::Light);
        login(&mut app);
        app.chat.messages.push(Message {
            id: "m1".to_string(),
            text: "answer".to_string(),
            sender: Sender::Assistant,
            failed: false,
        });

        app.copy_message("m1");
        assert_eq!(app.chat.copied_message_id.as_deref(), Some("m1"));
        assert_eq!(clipboard.copied.lock().unwrap().as_slice(), ["answer"]);

        app.copy_message("missing");
        assert_eq!(app.chat.copied_message_id.as_deref(), Some("m1"));
    }

    // ── Storage warnings ────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_storage_warning_becomes_notice() {
        let (mut app, _rx) = build(Arc::new(StubApi::empty()), Arc::new(MemStore::new()));
        app.apply_event(AppEvent::StorageWarning {
            title: "Error signing out".to_string(),
            detail: "Please restart the app.".to_string(),
        });
        let notices = app.take_notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].kind, NoticeKind::Error);
        assert_eq!(notices[0].body, "Please restart the app.");
    }
}
