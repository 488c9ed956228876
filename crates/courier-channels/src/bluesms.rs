//! Illustrative aggregator-style SMS handler: GET form receive/status
//! callbacks, Basic-auth form POST send.

use async_trait::async_trait;
use courier_core::channel_log::{basic_auth_token, ChannelLogRecorder};
use courier_core::types::{
    Channel, ChannelLogType, IncomingMsg, MsgRef, MsgStatus, OutgoingMsg, StatusUpdate,
};
use courier_core::urn::Urn;
use reqwest::Method;
use tracing::warn;
use uuid::Uuid;

use crate::handler::{
    Handler, HandlerCtx, HttpMethod, InboundRequest, RouteRoot, RouteSpec, RouterError,
    RouterOutcome, SendErrorKind, SendOutcome,
};
use crate::split::build_parts;

const DEFAULT_MAX_MSG_LENGTH: u32 = 160;

pub struct BlueSmsHandler;

impl BlueSmsHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BlueSmsHandler {
    fn default() -> Self {
        Self::new()
    }
}

fn map_provider_status(raw: &str) -> MsgStatus {
    match raw {
        "delivered" => MsgStatus::Delivered,
        "failed" | "undelivered" | "rejected" => MsgStatus::Failed,
        _ => MsgStatus::Sent,
    }
}

#[async_trait]
impl Handler for BlueSmsHandler {
    fn channel_type(&self) -> &'static str {
        "bs"
    }

    fn name(&self) -> &'static str {
        "BlueSMS"
    }

    fn routes(&self) -> Vec<RouteSpec> {
        vec![
            RouteSpec {
                method: HttpMethod::Get,
                suffix: "receive",
                log_type: ChannelLogType::MsgReceive,
                root: RouteRoot::Channel,
            },
            RouteSpec {
                method: HttpMethod::Get,
                suffix: "status",
                log_type: ChannelLogType::MsgStatus,
                root: RouteRoot::Channel,
            },
        ]
    }

    async fn receive(
        &self,
        _ctx: &HandlerCtx,
        channel: &Channel,
        route_suffix: &str,
        req: InboundRequest,
        _log: &mut ChannelLogRecorder,
    ) -> Result<RouterOutcome, RouterError> {
        match route_suffix {
            "receive" => {
                let mobile = req
                    .query_param("mobile")
                    .ok_or_else(|| RouterError::Validation("missing mobile".into()))?;
                let text = req.query_param("response").unwrap_or("").to_string();

                let urn = Urn::parse(&format!("tel:{mobile}"))
                    .map_err(|e| RouterError::Validation(e.to_string()))?
                    .normalize(channel.country.as_deref());

                let external_id = req
                    .query_param("id")
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{mobile}-{text}"));

                let msg = IncomingMsg {
                    channel_uuid: channel.uuid,
                    urn,
                    text,
                    attachments: vec![],
                    external_id,
                    received_on: chrono::Utc::now(),
                    contact_name: None,
                };

                Ok(RouterOutcome::Events(vec![
                    courier_core::types::ChannelEventPayload::Msg(msg),
                ]))
            }
            "status" => {
                let message_id = req
                    .query_param("message_id")
                    .ok_or_else(|| RouterError::Validation("missing message_id".into()))?;
                let status = req.query_param("status").unwrap_or("pending");

                let update = StatusUpdate {
                    channel_uuid: channel.uuid,
                    msg_ref: MsgRef::ExternalId(message_id.to_string()),
                    status: map_provider_status(status),
                    new_external_id: None,
                    errors: vec![],
                };

                Ok(RouterOutcome::Events(vec![
                    courier_core::types::ChannelEventPayload::Status(update),
                ]))
            }
            other => Err(RouterError::Validation(format!("unknown route {other}"))),
        }
    }

    async fn send(
        &self,
        ctx: &HandlerCtx,
        channel: &Channel,
        msg: &OutgoingMsg,
        log: &mut ChannelLogRecorder,
    ) -> SendOutcome {
        let send_url = channel.string_config("send_url", "");
        if send_url.is_empty() {
            return SendOutcome::errored(SendErrorKind::ChannelConfig("send_url".into()));
        }
        let username = channel.string_config("username", "");
        let password = channel.string_config("password", "");

        let attachment_urls: Vec<String> = msg.attachments.iter().map(|a| a.url.clone()).collect();
        let max_len = channel.max_msg_length(DEFAULT_MAX_MSG_LENGTH) as usize;
        let parts = build_parts(&msg.text, &attachment_urls, max_len);

        let mut first_external_id: Option<String> = None;

        for part in &parts {
            let form = [
                ("to", msg.urn.path()),
                ("from", channel.address.as_str()),
                ("message", part.as_str()),
            ];

            let req = match ctx
                .http
                .inner()
                .request(Method::POST, &send_url)
                .basic_auth(&username, Some(&password))
                .form(&form)
                .build()
            {
                Ok(r) => r,
                Err(e) => {
                    return SendOutcome::errored(SendErrorKind::ChannelConfig(e.to_string()))
                }
            };

            let resp = match ctx.http.request_http(req, log).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(channel = %channel.uuid, error = %e, "bluesms send transport error");
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

            #[derive(serde::Deserialize)]
            struct SendResponse {
                message_id: serde_json::Value,
            }

            let parsed: SendResponse = match resp.json() {
                Ok(p) => p,
                Err(e) => {
                    return SendOutcome::errored(SendErrorKind::ResponseUnparseable(e.to_string()))
                }
            };

            let id_str = match &parsed.message_id {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                _ => {
                    return SendOutcome::errored(SendErrorKind::ResponseContent(
                        "message_id".into(),
                    ))
                }
            };

            if first_external_id.is_none() {
                first_external_id = Some(id_str);
            }
        }

        match first_external_id {
            Some(id) => SendOutcome::wired(id),
            None => SendOutcome::wired(""),
        }
    }

    fn redact_values(&self, channel: &Channel) -> Vec<String> {
        let username = channel.string_config("username", "");
        let password = channel.string_config("password", "");
        let mut values = vec![];
        if !username.is_empty() {
            values.push(username.clone());
        }
        if !password.is_empty() {
            values.push(password.clone());
        }
        if !username.is_empty() && !password.is_empty() {
            values.push(basic_auth_token(&username, &password));
        }
        values
    }
}
