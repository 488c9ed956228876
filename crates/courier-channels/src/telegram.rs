//! Telegram Bot API handler. Courier is a request/response webhook relay, so
//! inbound updates arrive via `setWebhook` POSTs rather than long polling;
//! sends go through `sendMessage` directly with `reqwest`.

use async_trait::async_trait;
use courier_core::channel_log::ChannelLogRecorder;
use courier_core::types::{Channel, ChannelEventPayload, ChannelLogType, IncomingMsg, OutgoingMsg};
use courier_core::urn::Urn;
use reqwest::Method;
use serde::Deserialize;
use tracing::warn;

use crate::handler::{
    Handler, HandlerCtx, HttpMethod, InboundRequest, RouteRoot, RouteSpec, RouterError,
    RouterOutcome, SendErrorKind, SendOutcome,
};
use crate::split::split_text;

const MAX_MSG_LENGTH: u32 = 4096;

pub struct TelegramHandler;

impl TelegramHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TelegramHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct Update {
    #[serde(default)]
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: i64,
    chat: Chat,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    from: Option<From>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct From {
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
}

#[async_trait]
impl Handler for TelegramHandler {
    fn channel_type(&self) -> &'static str {
        "tg"
    }

    fn name(&self) -> &'static str {
        "Telegram"
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
        let secret_token = channel.string_config("webhook_secret", "");
        if !secret_token.is_empty() {
            let given = req.header("X-Telegram-Bot-Api-Secret-Token").unwrap_or("");
            if given != secret_token {
                return Err(RouterError::Unauthorized("bad secret token".into()));
            }
        }

        let update: Update = courier_core::decode::decode_json(&req.body, 256 * 1024)
            .map_err(|e| RouterError::Validation(e.to_string()))?;

        let Some(message) = update.message else {
            return Ok(RouterOutcome::Ignore("update carried no message".into()));
        };
        let Some(text) = message.text else {
            return Ok(RouterOutcome::Ignore("message had no text".into()));
        };

        let urn = Urn::parse(&format!("telegram:{}", message.chat.id))
            .map_err(|e| RouterError::Validation(e.to_string()))?;

        let contact_name = message.from.map(|f| {
            [f.first_name, f.last_name]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ")
        });

        let msg = IncomingMsg {
            channel_uuid: channel.uuid,
            urn,
            text,
            attachments: vec![],
            external_id: message.message_id.to_string(),
            received_on: chrono::Utc::now(),
            contact_name,
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
        let bot_token = channel.string_config("auth_token", "");
        if bot_token.is_empty() {
            return SendOutcome::errored(SendErrorKind::ChannelConfig("auth_token".into()));
        }

        let max_len = channel.max_msg_length(MAX_MSG_LENGTH) as usize;
        let parts = split_text(&msg.text, max_len);
        let url = format!("https://api.telegram.org/bot{bot_token}/sendMessage");

        let mut last_message_id: Option<String> = None;
        for part in &parts {
            let body = serde_json::json!({
                "chat_id": msg.urn.path(),
                "text": part,
            });

            let req = match ctx.http.inner().request(Method::POST, &url).json(&body).build() {
                Ok(r) => r,
                Err(e) => return SendOutcome::errored(SendErrorKind::ChannelConfig(e.to_string())),
            };

            let resp = match ctx.http.request_http(req, log).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(channel = %channel.uuid, error = %e, "telegram send transport error");
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

            #[derive(Deserialize)]
            struct ApiResponse {
                ok: bool,
                #[serde(default)]
                result: Option<ApiResult>,
                #[serde(default)]
                description: Option<String>,
            }
            #[derive(Deserialize)]
            struct ApiResult {
                message_id: i64,
            }

            let parsed: ApiResponse = match resp.json() {
                Ok(p) => p,
                Err(e) => {
                    return SendOutcome::errored(SendErrorKind::ResponseUnparseable(e.to_string()))
                }
            };

            if !parsed.ok {
                let message = parsed.description.unwrap_or_default();
                warn!(channel = %channel.uuid, %message, "telegram send rejected");
                return SendOutcome::errored(SendErrorKind::External {
                    code: resp.status.to_string(),
                    message,
                });
            }

            if let Some(result) = parsed.result {
                last_message_id.get_or_insert_with(|| result.message_id.to_string());
            }
        }

        SendOutcome::wired(last_message_id.unwrap_or_default())
    }

    fn redact_values(&self, channel: &Channel) -> Vec<String> {
        let token = channel.string_config("auth_token", "");
        if token.is_empty() {
            vec![]
        } else {
            vec![token]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;
    use uuid::Uuid;

    fn channel() -> Channel {
        Channel {
            uuid: Uuid::new_v4(),
            channel_type: "tg".into(),
            address: "bot".into(),
            country: None,
            config: StdHashMap::new(),
            schemes: vec!["telegram".into()],
            created_on: chrono::Utc::now(),
        }
    }

    fn test_ctx() -> HandlerCtx {
        HandlerCtx {
            http: courier_core::http_client::HttpClient::new(),
            backend: std::sync::Arc::new(
                courier_core::backend::test_util::InMemoryBackend::new(),
            ),
            callback_domain: None,
            secrets: Default::default(),
        }
    }

    #[tokio::test]
    async fn receive_extracts_text_message() {
        let handler = TelegramHandler::new();
        let body = serde_json::json!({
            "update_id": 1,
            "message": {
                "message_id": 42,
                "chat": { "id": 555 },
                "text": "hello there",
                "from": { "first_name": "Ada", "last_name": "Lovelace" }
            }
        })
        .to_string();

        let req = InboundRequest {
            method: HttpMethod::Post,
            headers: vec![],
            query: StdHashMap::new(),
            body: body.into_bytes(),
        };
        let mut log = ChannelLogRecorder::open(Uuid::new_v4(), ChannelLogType::MsgReceive, vec![]);

        let outcome = handler
            .receive(&test_ctx(), &channel(), "receive", req, &mut log)
            .await
            .unwrap();

        match outcome {
            RouterOutcome::Events(events) => match &events[0] {
                ChannelEventPayload::Msg(msg) => {
                    assert_eq!(msg.text, "hello there");
                    assert_eq!(msg.urn.identity(), "telegram:555");
                    assert_eq!(msg.contact_name.as_deref(), Some("Ada Lovelace"));
                }
                _ => panic!("expected Msg"),
            },
            _ => panic!("expected Events"),
        }
    }

    #[tokio::test]
    async fn ignores_non_message_updates() {
        let handler = TelegramHandler::new();
        let body = serde_json::json!({ "update_id": 1 }).to_string();

        let req = InboundRequest {
            method: HttpMethod::Post,
            headers: vec![],
            query: StdHashMap::new(),
            body: body.into_bytes(),
        };
        let mut log = ChannelLogRecorder::open(Uuid::new_v4(), ChannelLogType::MsgReceive, vec![]);

        let outcome = handler
            .receive(&test_ctx(), &channel(), "receive", req, &mut log)
            .await
            .unwrap();

        assert!(matches!(outcome, RouterOutcome::Ignore(_)));
    }
}
