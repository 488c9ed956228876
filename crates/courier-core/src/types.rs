//! The data model shared by every handler and by the inbound router / outbound
//! dispatcher: `Channel`, `IncomingMsg`, `OutgoingMsg`, `StatusUpdate`,
//! `ChannelEvent`, and the HTTP trace records that make up a `ChannelLog`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::urn::Urn;

/// A configured binding between one provider account and the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub uuid: Uuid,
    /// Two-to-four character channel-type tag, e.g. "bs", "twt", "wac".
    pub channel_type: String,
    pub address: String,
    pub country: Option<String>,
    pub config: HashMap<String, serde_json::Value>,
    pub schemes: Vec<String>,
    pub created_on: DateTime<Utc>,
}

impl Channel {
    pub fn string_config(&self, key: &str, default: &str) -> String {
        self.config
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| default.to_string())
    }

    pub fn config_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.config.get(key)
    }

    pub fn max_msg_length(&self, provider_default: u32) -> u32 {
        self.config
            .get("max_msg_length")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .unwrap_or(provider_default)
    }
}

/// `image|audio|video|application`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Audio,
    Video,
    Application,
}

impl MediaType {
    pub fn from_content_type(content_type: &str) -> Self {
        match content_type.split('/').next().unwrap_or("") {
            "image" => MediaType::Image,
            "audio" => MediaType::Audio,
            "video" => MediaType::Video,
            _ => MediaType::Application,
        }
    }
}

/// Resolved metadata about stored media behind an attachment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaMeta {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_ms: Option<u64>,
    pub size_bytes: Option<u64>,
    pub alternates: Vec<String>,
}

/// A fully resolved attachment, ready to be attached to an outbound send or
/// recorded against an inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub media_type: MediaType,
    pub content_type: String,
    pub url: String,
    pub media: Option<MediaMeta>,
    pub thumbnail: Option<String>,
}

/// A short labeled button offered alongside a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuickReply {
    pub title: String,
    pub payload: Option<String>,
}

/// Where an outgoing message originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MsgOrigin {
    Chat,
    Flow,
    Broadcast,
}

/// A message received from a provider, destined for the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMsg {
    pub channel_uuid: Uuid,
    pub urn: Urn,
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub external_id: String,
    pub received_on: DateTime<Utc>,
    pub contact_name: Option<String>,
}

/// A reference to a template the provider should render (e.g. WhatsApp
/// approved message templates).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateRef {
    pub name: String,
    pub language: String,
    pub variables: Vec<String>,
}

/// A message from the engine, destined for a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingMsg {
    pub id: i64,
    pub channel_uuid: Uuid,
    pub urn: Urn,
    pub text: String,
    pub attachments: Vec<Attachment>,
    pub quick_replies: Vec<QuickReply>,
    pub topic: Option<String>,
    pub origin: MsgOrigin,
    pub locale: Option<String>,
    pub template: Option<TemplateRef>,
    pub response_to_external_id: Option<String>,
}

/// Delivery-status progression. Ordered; `errored` and `failed` are
/// terminal. A status may only advance along
/// `Pending -> Queued -> Wired -> Sent -> Delivered`; whether a regression is
/// rejected is a Backend-enforced concern, out of scope for this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MsgStatus {
    Pending,
    Queued,
    Errored,
    Wired,
    Sent,
    Delivered,
    Failed,
}

impl MsgStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, MsgStatus::Errored | MsgStatus::Failed)
    }
}

/// Identifies the message a status update refers to: either the internal id
/// assigned at enqueue time, or the provider's external id from a status
/// webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MsgRef {
    Id(i64),
    ExternalId(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub channel_uuid: Uuid,
    pub msg_ref: MsgRef,
    pub status: MsgStatus,
    pub new_external_id: Option<String>,
    pub errors: Vec<String>,
}

/// `new-conversation`, `referral`, `stop-contact`, etc.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    NewConversation,
    Referral,
    StopContact,
    WelcomeMessage,
    OptIn,
    OptOut,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelEvent {
    pub channel_uuid: Uuid,
    pub urn: Urn,
    pub event_type: EventType,
    pub occurred_on: DateTime<Utc>,
    pub extra: HashMap<String, serde_json::Value>,
    pub contact_name: Option<String>,
}

/// One of the three things an inbound handler invocation can produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChannelEventPayload {
    Msg(IncomingMsg),
    Status(StatusUpdate),
    Event(ChannelEvent),
}

/// The kind of handler invocation a `ChannelLog` was opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelLogType {
    MsgReceive,
    MsgStatus,
    MsgSend,
    WebhookVerify,
    AttachmentFetch,
    EventReceive,
}

/// One recorded HTTP call, captured by the HTTP client wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpTrace {
    pub method: String,
    pub url: String,
    pub request_headers: Vec<(String, String)>,
    pub request_body: Option<String>,
    pub status_code: Option<u16>,
    pub response_headers: Vec<(String, String)>,
    pub response_body: Option<String>,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

/// The persisted audit record of one handler invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelLog {
    pub uuid: Uuid,
    pub channel_uuid: Uuid,
    pub log_type: ChannelLogType,
    pub http_traces: Vec<HttpTrace>,
    pub errors: Vec<String>,
    pub elapsed_ms: u64,
    pub created_on: DateTime<Utc>,
}
