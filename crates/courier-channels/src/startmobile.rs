//! Illustrative XML-over-HTTP aggregator handler. Both inbound receives and
//! outbound sends speak the provider's XML envelope rather than JSON/form.

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
use crate::ChannelEventBatch;

pub struct StartMobileHandler;

impl StartMobileHandler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StartMobileHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename = "message")]
struct InboundMessage {
    #[serde(rename = "@timestamp")]
    timestamp: String,
    from: String,
    body: String,
}

#[async_trait]
impl Handler for StartMobileHandler {
    fn channel_type(&self) -> &'static str {
        "st"
    }

    fn name(&self) -> &'static str {
        "Start Mobile"
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
        let parsed: InboundMessage = courier_core::decode::decode_xml(&req.body, 1024 * 1024)
            .map_err(|e| RouterError::Validation(e.to_string()))?;

        let received_on = chrono::DateTime::parse_from_rfc3339(&parsed.timestamp)
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now());

        let urn = Urn::parse(&format!("tel:{}", parsed.from))
            .map_err(|e| RouterError::Validation(e.to_string()))?
            .normalize(channel.country.as_deref());

        let msg = IncomingMsg {
            channel_uuid: channel.uuid,
            urn,
            text: parsed.body,
            attachments: vec![],
            external_id: format!("{}-{}", channel.uuid, parsed.timestamp),
            received_on,
            contact_name: None,
        };

        Ok(RouterOutcome::CustomResponse {
            status: 200,
            content_type: "text/xml".to_string(),
            body: r#"<answer type="async"><state>Accepted</state></answer>"#.to_string(),
            events: vec![ChannelEventPayload::Msg(msg)],
        })
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

        let body = format!(
            r#"<message><from>{}</from><to>{}</to><body>{}</body></message>"#,
            channel.address,
            msg.urn.path(),
            xml_escape(&msg.text)
        );

        let req = match ctx
            .http
            .inner()
            .request(Method::POST, &send_url)
            .basic_auth(&username, Some(&password))
            .header("Content-Type", "text/xml")
            .body(body)
            .build()
        {
            Ok(r) => r,
            Err(e) => return SendOutcome::errored(SendErrorKind::ChannelConfig(e.to_string())),
        };

        let resp = match ctx.http.request_http(req, log).await {
            Ok(r) => r,
            Err(e) => {
                warn!(channel = %channel.uuid, error = %e, "start mobile send transport error");
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

        #[derive(Debug, Deserialize)]
        #[serde(rename = "answer")]
        struct SendResponse {
            id: String,
        }

        match courier_core::decode::decode_xml::<SendResponse>(&resp.body, 1024 * 1024) {
            Ok(parsed) => SendOutcome::wired(parsed.id),
            Err(e) => SendOutcome::errored(SendErrorKind::ResponseUnparseable(e.to_string())),
        }
    }

    fn redact_values(&self, channel: &Channel) -> Vec<String> {
        let username = channel.string_config("username", "");
        let password = channel.string_config("password", "");
        [username, password].into_iter().filter(|v| !v.is_empty()).collect()
    }

    fn write_msg_success_response(&self, _events: &ChannelEventBatch) -> Option<(u16, String, String)> {
        Some((
            200,
            "text/xml".to_string(),
            r#"<answer type="async"><state>Accepted</state></answer>"#.to_string(),
        ))
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;
    use uuid::Uuid;

    fn channel() -> Channel {
        Channel {
            uuid: Uuid::new_v4(),
            channel_type: "st".into(),
            address: "2020".into(),
            country: None,
            config: StdHashMap::new(),
            schemes: vec!["tel".into()],
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
    async fn receive_parses_xml_and_acknowledges() {
        let handler = StartMobileHandler::new();
        let xml = r#"<message timestamp="2024-01-01T12:00:00Z"><from>250788123123</from><body>Hello World</body></message>"#;

        let req = InboundRequest {
            method: HttpMethod::Post,
            headers: vec![],
            query: StdHashMap::new(),
            body: xml.as_bytes().to_vec(),
        };
        let mut log = ChannelLogRecorder::open(Uuid::new_v4(), ChannelLogType::MsgReceive, vec![]);

        let outcome = handler
            .receive(&test_ctx(), &channel(), "receive", req, &mut log)
            .await
            .unwrap();

        match outcome {
            RouterOutcome::CustomResponse {
                status,
                content_type,
                body,
                events,
            } => {
                assert_eq!(status, 200);
                assert_eq!(content_type, "text/xml");
                assert!(body.contains("<state>Accepted</state>"));
                match &events[0] {
                    ChannelEventPayload::Msg(msg) => {
                        assert_eq!(msg.urn.identity(), "tel:+250788123123");
                        assert_eq!(msg.text, "Hello World");
                    }
                    _ => panic!("expected Msg"),
                }
            }
            _ => panic!("expected CustomResponse"),
        }
    }
}
