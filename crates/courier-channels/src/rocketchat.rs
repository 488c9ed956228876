//! Rocket.Chat handler: HMAC-SHA256-signed Events API webhook, bearer-token
//! REST send. Structurally modeled on the same signed-webhook/JSON-API shape
//! Slack Events API integrations use.

use async_trait::async_trait;
use courier_core::channel_log::ChannelLogRecorder;
use courier_core::sig::verify_hmac_sha256_hex;
use courier_core::types::{Channel, ChannelEventPayload, ChannelLogType, IncomingMsg, OutgoingMsg};
use courier_core::urn::Urn;
use reqwest::Method;
use serde::Deserialize;
use tracing::warn;

use crate::handler::{
    Handler, HandlerCtx, HttpMethod, InboundRequest, RouteRoot, RouteSpec, RouterError,
    RouterOutcome, SendErrorKind, SendOutcome,
};

pub struct RocketChatHandler;

impl RocketChatHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RocketChatHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct EventPayload {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(default)]
    channel_id: Option<String>,
}

/// Verify a Rocket.Chat outgoing webhook signature the way Slack verifies
/// its own: HMAC-SHA256 over the raw body, hex-encoded.
fn verify_webhook_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    verify_hmac_sha256_hex(secret.as_bytes(), body, signature)
}

#[async_trait]
impl Handler for RocketChatHandler {
    fn channel_type(&self) -> &'static str {
        "rc"
    }

    fn name(&self) -> &'static str {
        "Rocket.Chat"
    }

    fn routes(&self) -> Vec<RouteSpec> {
        vec![RouteSpec {
            method: HttpMethod::Post,
            suffix: "receive",
            log_type: ChannelLogType::MsgReceive,
            root: RouteRoot::Channel,
        }]
    }

    async fn receive(
        &self,
        _ctx: &HandlerCtx,
        channel: &Channel,
        _route_suffix: &str,
        req: InboundRequest,
        _log: &mut ChannelLogRecorder,
    ) -> Result<RouterOutcome, RouterError> {
        let secret = channel.string_config("webhook_secret", "");
        if !secret.is_empty() {
            let signature = req
                .header("X-Rocketchat-Signature")
                .ok_or_else(|| RouterError::Unauthorized("missing signature".into()))?;
            if !verify_webhook_signature(&secret, &req.body, signature) {
                return Err(RouterError::Unauthorized("signature mismatch".into()));
            }
        }

        let payload: EventPayload = courier_core::decode::decode_json(&req.body, 256 * 1024)
            .map_err(|e| RouterError::Validation(e.to_string()))?;

        let (Some(user_id), Some(text)) = (payload.user_id, payload.text) else {
            return Ok(RouterOutcome::Ignore("event carried no user message".into()));
        };
        if text.is_empty() {
            return Ok(RouterOutcome::Ignore("empty message text".into()));
        }

        let urn = Urn::parse(&format!("rocketchat:{user_id}"))
            .map_err(|e| RouterError::Validation(e.to_string()))?;

        let external_id = payload
            .message_id
            .unwrap_or_else(|| format!("{}:{}", payload.channel_id.unwrap_or_default(), user_id));

        let msg = IncomingMsg {
            channel_uuid: channel.uuid,
            urn,
            text,
            attachments: vec![],
            external_id,
            received_on: chrono::Utc::now(),
            contact_name: None,
        };

        Ok(RouterOutcome::Events(vec![ChannelEventPayload::Msg(msg)]))
    }

    async fn send(
        &self,
        ctx: &HandlerCtx,
        channel: &Channel,
        msg: &OutgoingMsg,
        log: &mut ChannelLogRecorder,
    ) -> SendOutcome {
        let base_url = channel.string_config("base_url", "");
        let auth_token = channel.string_config("auth_token", "");
        if base_url.is_empty() || auth_token.is_empty() {
            return SendOutcome::errored(SendErrorKind::ChannelConfig(
                "base_url/auth_token".into(),
            ));
        }

        let url = format!("{}/api/v1/chat.postMessage", base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "channel": msg.urn.path(),
            "text": msg.text,
        });

        let req = match ctx
            .http
            .inner()
            .request(Method::POST, &url)
            .header("X-Auth-Token", &auth_token)
            .json(&body)
            .build()
        {
            Ok(r) => r,
            Err(e) => return SendOutcome::errored(SendErrorKind::ChannelConfig(e.to_string())),
        };

        let resp = match ctx.http.request_http(req, log).await {
            Ok(r) => r,
            Err(e) => {
                warn!(channel = %channel.uuid, error = %e, "rocketchat send transport error");
                log.add_error(e.to_string());
                return SendOutcome::errored(SendErrorKind::ConnectionFailed(e.to_string()));
            }
        };

        if resp.is_server_error() {
            return SendOutcome::errored(SendErrorKind::ConnectionFailed(format!(
                "status {}",
                resp.status
            )));
        }
        if !resp.is_success() {
            return SendOutcome::errored(SendErrorKind::ResponseStatus(resp.status));
        }

        #[derive(Deserialize)]
        struct SendResponse {
            success: bool,
            #[serde(default)]
            message: Option<MessageId>,
            #[serde(default)]
            error: Option<String>,
        }
        #[derive(Deserialize)]
        struct MessageId {
            #[serde(rename = "_id")]
            id: String,
        }

        let parsed: SendResponse = match resp.json() {
            Ok(p) => p,
            Err(e) => {
                return SendOutcome::errored(SendErrorKind::ResponseUnparseable(e.to_string()))
            }
        };

        if !parsed.success {
            let message = parsed.error.unwrap_or_default();
            warn!(channel = %channel.uuid, %message, "rocketchat send rejected");
            return SendOutcome::errored(SendErrorKind::External {
                code: resp.status.to_string(),
                message,
            });
        }

        match parsed.message {
            Some(m) => SendOutcome::wired(m.id),
            None => SendOutcome::errored(SendErrorKind::ResponseContent("message".into())),
        }
    }

    fn redact_values(&self, channel: &Channel) -> Vec<String> {
        ["auth_token", "webhook_secret"]
            .into_iter()
            .map(|key| channel.string_config(key, ""))
            .filter(|v| !v.is_empty())
            .collect()
    }

    async fn describe_urn(
        &self,
        ctx: &HandlerCtx,
        channel: &Channel,
        urn: &Urn,
        log: &mut ChannelLogRecorder,
    ) -> Option<std::collections::HashMap<String, String>> {
        let base_url = channel.string_config("base_url", "");
        let auth_token = channel.string_config("auth_token", "");
        if base_url.is_empty() || auth_token.is_empty() {
            return None;
        }

        let url = format!(
            "{}/api/v1/users.info?userId={}",
            base_url.trim_end_matches('/'),
            urn.path()
        );
        let req = ctx
            .http
            .inner()
            .request(Method::GET, &url)
            .header("X-Auth-Token", &auth_token)
            .build()
            .ok()?;

        let resp = ctx.http.request_http(req, log).await.ok()?;
        if !resp.is_success() {
            return None;
        }

        #[derive(Deserialize)]
        struct UserInfoResponse {
            success: bool,
            #[serde(default)]
            user: Option<UserInfo>,
        }
        #[derive(Deserialize)]
        struct UserInfo {
            #[serde(default)]
            username: Option<String>,
            #[serde(default)]
            name: Option<String>,
        }

        let parsed: UserInfoResponse = resp.json().ok()?;
        if !parsed.success {
            return None;
        }
        let user = parsed.user?;

        let mut fields = std::collections::HashMap::new();
        if let Some(username) = user.username {
            fields.insert("username".to_string(), username);
        }
        if let Some(name) = user.name {
            fields.insert("name".to_string(), name);
        }
        Some(fields)
    }
}
