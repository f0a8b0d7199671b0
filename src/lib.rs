//! Core state machine for the ShikshaGPT tutoring client.
//!
//! This crate owns everything between the backend and the screen: the auth
//! session, the conversation controller with its optimistic send pipeline,
//! the voice capture state machine, and the navigator that ties them
//! together. Rendering is out of scope — an embedder supplies the platform
//! collaborators ([`app::Platform`]), drives intents on [`app::App`], and
//! drains [`app::AppEvent`]s back into `apply_event`.
//!
//! All state mutation is synchronous on the driving thread; spawned tokio
//! tasks only perform I/O and report completions through the event channel.

pub mod api;
pub mod app;
pub mod chat;
pub mod config;
pub mod session;
pub mod store;
pub mod theme;
pub mod voice;

pub use api::{Api, ApiError, AuthPayload, HttpApi, Message, Sender, UserProfile};
pub use app::{App, AppEvent, Notice, NoticeKind, Platform, Screen};
pub use chat::{Chat, Clipboard};
pub use session::{Auth, Session, user_initials};
pub use store::{FileStore, MemStore, Store};
pub use theme::{Palette, ThemeMode};
pub use voice::{CaptureState, Microphone, Recognizer, VoiceCapture};
