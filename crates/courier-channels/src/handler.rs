//! The stable contract every provider plugin implements (spec §4.3).

use std::collections::HashMap;

use async_trait::async_trait;
use courier_core::backend::Backend;
use courier_core::channel_log::ChannelLogRecorder;
use courier_core::config::ProcessSecrets;
use courier_core::http_client::HttpClient;
use courier_core::types::{Channel, ChannelLogType, MsgStatus, OutgoingMsg};
use courier_core::urn::Urn;
use thiserror::Error;
use uuid::Uuid;

use crate::ChannelEventBatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Whether a route is mounted under `/c/<type>/<uuid>/<suffix>` (the common
/// case) or directly under `/c/<type>/<suffix>` with the channel resolved
/// from the payload (a handful of providers that can't put a UUID in the
/// callback URL they register).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteRoot {
    Channel,
    Type,
}

#[derive(Debug, Clone)]
pub struct RouteSpec {
    pub method: HttpMethod,
    pub suffix: &'static str,
    pub log_type: ChannelLogType,
    pub root: RouteRoot,
}

/// A decoded-agnostic view of one inbound HTTP request; handlers apply
/// `courier_core::decode` themselves since each owns its payload shape.
pub struct InboundRequest {
    pub method: HttpMethod,
    pub headers: Vec<(String, String)>,
    pub query: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl InboundRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }
}

/// What a `receive` callback hands back to the router.
pub enum RouterOutcome {
    /// Zero or more events were produced; write the default success
    /// response (spec §6: `Message Accepted` / `Handled`).
    Events(ChannelEventBatch),
    /// A valid payload the handler does not act on (an echo, a reaction, an
    /// unrecognized status code). Router writes `200 OK` / `ignoring ...`.
    Ignore(String),
    /// The handler already wrote (or wants to fully control) the HTTP
    /// response body — e.g. an XML acknowledgment or a CRC-token echo.
    CustomResponse {
        status: u16,
        content_type: String,
        body: String,
        events: ChannelEventBatch,
    },
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("channel not found")]
    ChannelNotFound,
}

/// The outbound-send error taxonomy from spec §4.5/§7.
#[derive(Debug, Clone, Error)]
pub enum SendErrorKind {
    #[error("required channel config missing: {0}")]
    ChannelConfig(String),
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("provider responded with status {0}")]
    ResponseStatus(u16),
    #[error("response body did not decode: {0}")]
    ResponseUnparseable(String),
    #[error("response missing required field: {0}")]
    ResponseContent(String),
    #[error("response was semantically invalid: {0}")]
    ResponseUnexpected(String),
    #[error("provider error {code}: {message}")]
    External { code: String, message: String },
}

impl SendErrorKind {
    /// Only `ConnectionFailed` (transport error / 5xx) is retried.
    pub fn retryable(&self) -> bool {
        matches!(self, SendErrorKind::ConnectionFailed(_))
    }
}

/// What one `Handler::send` invocation produced: the resulting delivery
/// status, the provider-assigned id of the first part that succeeded (if
/// any), and the error kind when the status is not a successful terminal.
pub struct SendOutcome {
    pub status: MsgStatus,
    pub external_id: Option<String>,
    pub error: Option<SendErrorKind>,
}

impl SendOutcome {
    pub fn wired(external_id: impl Into<String>) -> Self {
        Self {
            status: MsgStatus::Wired,
            external_id: Some(external_id.into()),
            error: None,
        }
    }

    pub fn errored(error: SendErrorKind) -> Self {
        let status = if error.retryable() {
            MsgStatus::Errored
        } else {
            MsgStatus::Failed
        };
        Self {
            status,
            external_id: None,
            error: Some(error),
        }
    }
}

/// Shared, cheaply-clonable context handed to every handler call.
#[derive(Clone)]
pub struct HandlerCtx {
    pub http: HttpClient,
    pub backend: std::sync::Arc<dyn Backend>,
    /// The domain used to build callback URLs handlers hand back to
    /// providers (e.g. an attachment proxy link).
    pub callback_domain: Option<String>,
    /// Process-wide secrets (Facebook app secret, WhatsApp admin token) the
    /// Meta-family handlers share across every channel of their type.
    pub secrets: ProcessSecrets,
}

/// The per-provider plugin contract (spec §4.3). `initialize` is expressed
/// as `routes()` returning a declarative route table instead of a
/// side-effecting `initialize(server)` call: the router mounts the routes,
/// the handler never touches the HTTP framework directly.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Two-to-four character channel-type tag, e.g. "bs", "twt", "wac".
    fn channel_type(&self) -> &'static str;

    /// Human-readable provider name, for the registry's display listing.
    fn name(&self) -> &'static str;

    fn routes(&self) -> Vec<RouteSpec>;

    /// For type-rooted routes (no UUID in the URL): resolve the channel UUID
    /// from the request. Channel-rooted routes never call this.
    async fn get_channel_from_request(
        &self,
        _backend: &dyn Backend,
        _req: &InboundRequest,
    ) -> Option<Uuid> {
        None
    }

    async fn receive(
        &self,
        ctx: &HandlerCtx,
        channel: &Channel,
        route_suffix: &str,
        req: InboundRequest,
        log: &mut ChannelLogRecorder,
    ) -> Result<RouterOutcome, RouterError>;

    async fn send(
        &self,
        ctx: &HandlerCtx,
        channel: &Channel,
        msg: &OutgoingMsg,
        log: &mut ChannelLogRecorder,
    ) -> SendOutcome;

    /// Secrets from this channel's config that must be masked in logs.
    fn redact_values(&self, _channel: &Channel) -> Vec<String> {
        vec![]
    }

    /// Optional: look up a contact's display name given their identifier.
    async fn describe_urn(
        &self,
        _ctx: &HandlerCtx,
        _channel: &Channel,
        _urn: &Urn,
        _log: &mut ChannelLogRecorder,
    ) -> Option<HashMap<String, String>> {
        None
    }

    /// Optional: a handler-chosen success response body/content-type
    /// instead of the router's default (spec §6, e.g. XML acknowledgments).
    fn write_msg_success_response(&self, _events: &ChannelEventBatch) -> Option<(u16, String, String)> {
        None
    }
}
