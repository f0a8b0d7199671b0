use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Endpoints;

// ── Wire types ────────────────────────────────────────────────────────────────

/// One school from the entities endpoint (login screen picker).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchoolEntity {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub contact: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub id: String,
    pub name: String,
}

/// Normalized user profile. Immutable for the session's duration; replaced
/// wholesale on re-login. Serialized as-is under the `userProfile` storage key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub contact: String,
    pub grade: String,
    pub entity: EntityRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    /// Older backends label assistant messages "ai".
    #[serde(alias = "ai")]
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: String,
    pub text: String,
    pub sender: Sender,
    /// Local-only marker: an optimistic send the backend rejected. Never on
    /// the wire — the message itself is kept so the user doesn't lose input.
    #[serde(skip)]
    pub failed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
}

/// Token + normalized profile from a successful login. Constructing this type
/// is the only way a session becomes authenticated, so token and profile are
/// never set separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPayload {
    pub access_token: String,
    pub profile: UserProfile,
}

/// Backend reply to a message send.
#[derive(Debug, Clone, Deserialize)]
pub struct SendReply {
    #[serde(alias = "reply")]
    pub assistant_text: String,
    /// Id of the conversation the message landed in. For a send with no
    /// selected conversation this is the freshly created one.
    pub conversation_id: String,
    /// Title assigned by the backend for a new conversation, when it sends one.
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
}

// ── Raw login/user payloads (backend field names) ─────────────────────────────

#[derive(Debug, Deserialize)]
struct RawUser {
    #[serde(rename = "_id")]
    id: String,
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    contact: String,
    #[serde(default)]
    grade: String,
    entity_info: RawEntity,
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    #[serde(rename = "_id")]
    id: String,
    name: String,
}

impl From<RawUser> for UserProfile {
    fn from(raw: RawUser) -> Self {
        UserProfile {
            id: raw.id,
            name: raw.name,
            email: raw.email,
            contact: raw.contact,
            grade: raw.grade,
            entity: EntityRef {
                id: raw.entity_info.id,
                name: raw.entity_info.name,
            },
        }
    }
}

// ── Error taxonomy ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// No response at all (DNS, refused connection, timeout). Distinguishable
    /// from an authentication rejection.
    #[error("Could not connect to the server: {0}")]
    Network(String),
    /// Non-2xx with a payload; `message` is extracted defensively and is
    /// always non-empty.
    #[error("{message}")]
    Rejected { status: u16, message: String },
    /// 2xx with a body we can't use.
    #[error("{0}")]
    Unexpected(String),
}

impl ApiError {
    pub fn is_network(&self) -> bool {
        matches!(self, ApiError::Network(_))
    }
}

const DEFAULT_REJECTION: &str = "Invalid credentials or an unknown error occurred.";

/// Extract a human-readable message from a backend error payload.
///
/// The backend's error shape is not uniform, so this applies an ordered set
/// of rules rather than ad hoc parsing at call sites:
///   1. `detail` as a non-empty array — `msg` of the first element, else the
///      first element stringified
///   2. `detail` as a string — used directly
///   3. `detail` as an object — its `msg` or `message`, else stringified
///   4. top-level `message` string
///   5. the whole payload stringified
/// The result is guaranteed non-empty.
pub fn extract_error_message(body: &Value) -> String {
    let msg = match body.get("detail") {
        Some(Value::Array(items)) if !items.is_empty() => items[0]
            .get("msg")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| items[0].to_string()),
        Some(Value::String(s)) => s.clone(),
        Some(detail @ Value::Object(map)) => map
            .get("msg")
            .or_else(|| map.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| detail.to_string()),
        _ => body
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string()),
    };

    let msg = msg.trim();
    if msg.is_empty() || msg == "null" || msg == "{}" || msg == "\"\"" {
        DEFAULT_REJECTION.to_string()
    } else {
        msg.to_string()
    }
}

// ── Response body parsers (pure, unit-testable) ───────────────────────────────

/// A 2xx login body must carry both `access_token` and `user`; anything less
/// leaves the session anonymous.
pub(crate) fn parse_login_body(body: Value) -> Result<AuthPayload, ApiError> {
    let token = body
        .get("access_token")
        .and_then(Value::as_str)
        .map(str::to_string);
    let user = body.get("user").cloned();

    match (token, user) {
        (Some(access_token), Some(user)) => {
            let raw: RawUser = serde_json::from_value(user).map_err(|e| {
                ApiError::Unexpected(format!("Malformed user payload in login response: {e}"))
            })?;
            Ok(AuthPayload {
                access_token,
                profile: raw.into(),
            })
        }
        _ => Err(ApiError::Unexpected(
            "Login successful, but no access token or user data received.".to_string(),
        )),
    }
}

pub(crate) fn parse_entities(body: Value) -> Result<Vec<SchoolEntity>, ApiError> {
    if !body.is_array() {
        return Err(ApiError::Unexpected(
            "Unexpected response format for schools. Expected an array of objects.".to_string(),
        ));
    }
    serde_json::from_value(body)
        .map_err(|e| ApiError::Unexpected(format!("Malformed school list: {e}")))
}

pub(crate) fn parse_summaries(body: Value) -> Result<Vec<ConversationSummary>, ApiError> {
    let list = match body {
        Value::Array(_) => body,
        Value::Object(ref map) if map.contains_key("conversations") => {
            map["conversations"].clone()
        }
        _ => {
            return Err(ApiError::Unexpected(
                "Unexpected response format for chat history.".to_string(),
            ));
        }
    };
    serde_json::from_value(list)
        .map_err(|e| ApiError::Unexpected(format!("Malformed chat history: {e}")))
}

/// Conversation detail may be a bare message array or `{ "messages": [...] }`.
pub(crate) fn parse_messages(body: Value) -> Result<Vec<Message>, ApiError> {
    let list = match body {
        Value::Array(_) => body,
        Value::Object(ref map) if map.contains_key("messages") => map["messages"].clone(),
        _ => {
            return Err(ApiError::Unexpected(
                "Unexpected response format for conversation messages.".to_string(),
            ));
        }
    };
    serde_json::from_value(list)
        .map_err(|e| ApiError::Unexpected(format!("Malformed message list: {e}")))
}

// ── Api trait ─────────────────────────────────────────────────────────────────

/// The backend collaborator. Controllers depend on this trait only, so they
/// stay testable without real I/O.
#[async_trait]
pub trait Api: Send + Sync {
    async fn fetch_entities(&self) -> Result<Vec<SchoolEntity>, ApiError>;
    async fn login(
        &self,
        email: &str,
        password: &str,
        entity: &str,
    ) -> Result<AuthPayload, ApiError>;
    async fn current_user(&self, token: &str) -> Result<UserProfile, ApiError>;
    async fn list_conversations(&self, token: &str) -> Result<Vec<ConversationSummary>, ApiError>;
    async fn fetch_messages(
        &self,
        token: &str,
        conversation_id: &str,
    ) -> Result<Vec<Message>, ApiError>;
    async fn send_message(
        &self,
        token: &str,
        conversation_id: Option<&str>,
        text: &str,
    ) -> Result<SendReply, ApiError>;
}

// ── HTTP implementation ───────────────────────────────────────────────────────

pub struct HttpApi {
    http: reqwest::Client,
    endpoints: Endpoints,
}

impl HttpApi {
    pub fn new(endpoints: Endpoints) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoints,
        }
    }

    async fn get_json(&self, url: &str, token: Option<&str>) -> Result<Value, ApiError> {
        let mut req = self.http.get(url);
        if let Some(token) = token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        let resp = req
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Self::read_body(resp).await
    }

    async fn post_json(
        &self,
        url: &str,
        token: Option<&str>,
        body: &Value,
    ) -> Result<Value, ApiError> {
        let mut req = self.http.post(url).json(body);
        if let Some(token) = token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        let resp = req
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Self::read_body(resp).await
    }

    async fn read_body(resp: reqwest::Response) -> Result<Value, ApiError> {
        let status = resp.status();
        // Rejection bodies are parsed leniently; a body that isn't JSON at all
        // still produces a usable message via the Null fallback.
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        if status.is_success() {
            Ok(body)
        } else {
            Err(ApiError::Rejected {
                status: status.as_u16(),
                message: extract_error_message(&body),
            })
        }
    }
}

#[async_trait]
impl Api for HttpApi {
    async fn fetch_entities(&self) -> Result<Vec<SchoolEntity>, ApiError> {
        let body = self.get_json(&self.endpoints.entities_url(), None).await?;
        parse_entities(body)
    }

    async fn login(
        &self,
        email: &str,
        password: &str,
        entity: &str,
    ) -> Result<AuthPayload, ApiError> {
        let body = serde_json::json!({
            "email": email,
            "password": password,
            "entity": entity,
        });
        let resp = self
            .post_json(&self.endpoints.login_url(), None, &body)
            .await?;
        parse_login_body(resp)
    }

    async fn current_user(&self, token: &str) -> Result<UserProfile, ApiError> {
        let body = self
            .get_json(&self.endpoints.current_user_url(), Some(token))
            .await?;
        let raw: RawUser = serde_json::from_value(body)
            .map_err(|e| ApiError::Unexpected(format!("Malformed user profile: {e}")))?;
        Ok(raw.into())
    }

    async fn list_conversations(&self, token: &str) -> Result<Vec<ConversationSummary>, ApiError> {
        let body = self
            .get_json(&self.endpoints.conversations_url(), Some(token))
            .await?;
        parse_summaries(body)
    }

    async fn fetch_messages(
        &self,
        token: &str,
        conversation_id: &str,
    ) -> Result<Vec<Message>, ApiError> {
        let body = self
            .get_json(&self.endpoints.conversation_url(conversation_id), Some(token))
            .await?;
        parse_messages(body)
    }

    async fn send_message(
        &self,
        token: &str,
        conversation_id: Option<&str>,
        text: &str,
    ) -> Result<SendReply, ApiError> {
        let mut body = serde_json::json!({ "message": text });
        if let Some(id) = conversation_id {
            body["conversation_id"] = Value::String(id.to_string());
        }
        let resp = self
            .post_json(&self.endpoints.chat_url(), Some(token), &body)
            .await?;
        serde_json::from_value(resp)
            .map_err(|e| ApiError::Unexpected(format!("Malformed send reply: {e}")))
    }
}
