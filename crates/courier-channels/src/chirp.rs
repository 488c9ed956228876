//! Illustrative micro-blogging handler: OAuth1-signed sends and a
//! CRC-token webhook-verification challenge (spec's Twitter-family example).

use async_trait::async_trait;
use courier_core::channel_log::ChannelLogRecorder;
use courier_core::sig::{hmac_sha256_base64, oauth1_authorization_header};
use courier_core::types::{
    Channel, ChannelEventPayload, ChannelLogType, IncomingMsg, OutgoingMsg,
};
use courier_core::urn::Urn;
use reqwest::Method;
use tracing::warn;

use crate::handler::{
    Handler, HandlerCtx, HttpMethod, InboundRequest, RouteRoot, RouteSpec, RouterError,
    RouterOutcome, SendErrorKind, SendOutcome,
};

pub struct ChirpHandler;

impl ChirpHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ChirpHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(serde::Deserialize)]
struct DirectMessage {
    sender_id: String,
    text: String,
    #[serde(default)]
    message_id: Option<String>,
}

#[derive(serde::Deserialize)]
struct InboundPayload {
    #[serde(default)]
    direct_message_events: Vec<DirectMessage>,
}

#[async_trait]
impl Handler for ChirpHandler {
    fn channel_type(&self) -> &'static str {
        "twt"
    }

    fn name(&self) -> &'static str {
        "Chirp"
    }

    fn routes(&self) -> Vec<RouteSpec> {
        vec![
            RouteSpec {
                method: HttpMethod::Get,
                suffix: "receive",
                log_type: ChannelLogType::WebhookVerify,
                root: RouteRoot::Channel,
            },
            RouteSpec {
                method: HttpMethod::Post,
                suffix: "receive",
                log_type: ChannelLogType::MsgReceive,
                root: RouteRoot::Channel,
            },
        ]
    }

    async fn receive(
        &self,
        _ctx: &HandlerCtx,
        channel: &Channel,
        _route_suffix: &str,
        req: InboundRequest,
        _log: &mut ChannelLogRecorder,
    ) -> Result<RouterOutcome, RouterError> {
        if req.method == HttpMethod::Get {
            let crc_token = req
                .query_param("crc_token")
                .ok_or_else(|| RouterError::Validation("missing crc_token".into()))?;
            let api_secret = channel.string_config("api_secret", "");
            if api_secret.is_empty() {
                return Err(RouterError::Validation("channel missing api_secret".into()));
            }

            let signature = hmac_sha256_base64(api_secret.as_bytes(), crc_token.as_bytes());
            let body =
                serde_json::json!({ "response_token": format!("sha256={signature}") }).to_string();

            return Ok(RouterOutcome::CustomResponse {
                status: 200,
                content_type: "application/json".to_string(),
                body,
                events: vec![],
            });
        }

        let payload: InboundPayload = serde_json::from_slice(&req.body)
            .map_err(|e| RouterError::Validation(e.to_string()))?;

        let mut events = Vec::new();
        for dm in payload.direct_message_events {
            if dm.text.is_empty() {
                continue;
            }
            let urn = Urn::new(courier_core::urn::Scheme::TwitterId, dm.sender_id.clone(), None)
                .map_err(|e| RouterError::Validation(e.to_string()))?;

            events.push(ChannelEventPayload::Msg(IncomingMsg {
                channel_uuid: channel.uuid,
                urn,
                text: dm.text,
                attachments: vec![],
                external_id: dm.message_id.unwrap_or_else(|| dm.sender_id.clone()),
                received_on: chrono::Utc::now(),
                contact_name: None,
            }));
        }

        if events.is_empty() {
            return Ok(RouterOutcome::Ignore("no direct messages in payload".into()));
        }
        Ok(RouterOutcome::Events(events))
    }

    async fn send(
        &self,
        ctx: &HandlerCtx,
        channel: &Channel,
        msg: &OutgoingMsg,
        log: &mut ChannelLogRecorder,
    ) -> SendOutcome {
        let consumer_key = channel.string_config("consumer_key", "");
        let consumer_secret = channel.string_config("consumer_secret", "");
        let access_token = channel.string_config("access_token", "");
        let access_token_secret = channel.string_config("access_token_secret", "");

        if consumer_key.is_empty() || consumer_secret.is_empty() || access_token.is_empty() {
            return SendOutcome::errored(SendErrorKind::ChannelConfig(
                "consumer_key/consumer_secret/access_token".into(),
            ));
        }

        let url = "https://api.chirp.example.com/1.1/direct_messages/events/new.json";
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let timestamp = chrono::Utc::now().timestamp().to_string();

        let auth_header = oauth1_authorization_header(
            "POST",
            url,
            &consumer_key,
            &consumer_secret,
            &access_token,
            &access_token_secret,
            &nonce,
            &timestamp,
        );

        let body = serde_json::json!({
            "event": {
                "type": "message_create",
                "message_create": {
                    "target": { "recipient_id": msg.urn.path() },
                    "message_data": { "text": msg.text },
                },
            },
        });

        let req = match ctx
            .http
            .inner()
            .request(Method::POST, url)
            .header("Authorization", auth_header)
            .json(&body)
            .build()
        {
            Ok(r) => r,
            Err(e) => return SendOutcome::errored(SendErrorKind::ChannelConfig(e.to_string())),
        };

        let resp = match ctx.http.request_http(req, log).await {
            Ok(r) => r,
            Err(e) => {
                warn!(channel = %channel.uuid, error = %e, "chirp send transport error");
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
        struct EventResponse {
            event: EventId,
        }
        #[derive(serde::Deserialize)]
        struct EventId {
            id: String,
        }

        match resp.json::<EventResponse>() {
            Ok(parsed) => SendOutcome::wired(parsed.event.id),
            Err(e) => SendOutcome::errored(SendErrorKind::ResponseUnparseable(e.to_string())),
        }
    }

    fn redact_values(&self, channel: &Channel) -> Vec<String> {
        ["consumer_secret", "access_token_secret", "api_secret"]
            .into_iter()
            .map(|key| channel.string_config(key, ""))
            .filter(|v| !v.is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;
    use uuid::Uuid;

    fn channel_with_secret(secret: &str) -> Channel {
        let mut config = StdHashMap::new();
        config.insert("api_secret".into(), serde_json::json!(secret));
        Channel {
            uuid: Uuid::new_v4(),
            channel_type: "twt".into(),
            address: "my_handle".into(),
            country: None,
            config,
            schemes: vec!["twitterid".into()],
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
    async fn crc_challenge_matches_known_vector() {
        let handler = ChirpHandler::new();
        let channel = channel_with_secret("apiSecret");
        let mut query = StdHashMap::new();
        query.insert("crc_token".to_string(), "test token".to_string());

        let req = InboundRequest {
            method: HttpMethod::Get,
            headers: vec![],
            query,
            body: vec![],
        };
        let mut log = ChannelLogRecorder::open(channel.uuid, ChannelLogType::WebhookVerify, vec![]);

        let outcome = handler
            .receive(&test_ctx(), &channel, "receive", req, &mut log)
            .await
            .unwrap();

        match outcome {
            RouterOutcome::CustomResponse { status, body, .. } => {
                assert_eq!(status, 200);
                assert_eq!(
                    body,
                    r#"{"response_token":"sha256=O5hJl2njQRIa4vsumZ+3oom9ECR5m3aQLRZkPoYelp0="}"#
                );
            }
            _ => panic!("expected CustomResponse"),
        }
    }

    #[tokio::test]
    async fn direct_messages_become_incoming_msgs() {
        let handler = ChirpHandler::new();
        let channel = channel_with_secret("apiSecret");
        let body = serde_json::json!({
            "direct_message_events": [
                { "sender_id": "123456", "text": "hi there", "message_id": "dm-1" }
            ]
        })
        .to_string();

        let req = InboundRequest {
            method: HttpMethod::Post,
            headers: vec![],
            query: StdHashMap::new(),
            body: body.into_bytes(),
        };
        let mut log = ChannelLogRecorder::open(channel.uuid, ChannelLogType::MsgReceive, vec![]);

        let outcome = handler
            .receive(&test_ctx(), &channel, "receive", req, &mut log)
            .await
            .unwrap();

        match outcome {
            RouterOutcome::Events(events) => {
                assert_eq!(events.len(), 1);
                match &events[0] {
                    ChannelEventPayload::Msg(msg) => assert_eq!(msg.text, "hi there"),
                    _ => panic!("expected Msg"),
                }
            }
            _ => panic!("expected Events"),
        }
    }
}
