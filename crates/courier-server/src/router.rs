//! The inbound HTTP router: one route group per registered handler under
//! `/c/{channel_type}/{channel_uuid}/{suffix}`, plus type-rooted routes for
//! providers (like WhatsApp Cloud) that register one webhook URL per app
//! rather than per channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use serde_json::json;
use tracing::{error, warn};
use uuid::Uuid;

use courier_channels::{
    ChannelEventBatch, Handler, HttpMethod, InboundRequest, RouteRoot, RouterError, RouterOutcome,
};
use courier_core::channel_log::ChannelLogRecorder;
use courier_core::types::{Channel, ChannelEventPayload, ChannelLogType};

use crate::state::ServerState;

pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", any(health_handler))
        .route(
            "/c/{channel_type}/{channel_uuid}/{suffix}",
            any(channel_route_handler),
        )
        .route("/c/{channel_type}/{suffix}", any(type_route_handler))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    axum::Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

fn to_handler_method(method: &Method) -> Option<HttpMethod> {
    match *method {
        Method::GET => Some(HttpMethod::Get),
        Method::POST => Some(HttpMethod::Post),
        _ => None,
    }
}

fn headers_to_vec(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
        .collect()
}

fn parse_query(raw: Option<String>) -> HashMap<String, String> {
    raw.and_then(|q| serde_urlencoded::from_str(&q).ok())
        .unwrap_or_default()
}

async fn channel_route_handler(
    State(state): State<Arc<ServerState>>,
    Path((channel_type, channel_uuid, suffix)): Path<(String, Uuid, String)>,
    method: Method,
    headers: HeaderMap,
    RawQuery(raw_query): RawQuery,
    body: Bytes,
) -> Response {
    let Some(handler) = state.handlers.get(&channel_type) else {
        return (StatusCode::NOT_FOUND, "unknown channel type").into_response();
    };

    let Some(route) = matching_route(handler.as_ref(), &method, &suffix, RouteRoot::Channel)
    else {
        return (StatusCode::NOT_FOUND, "unknown route").into_response();
    };

    let channel = match state.backend.channel_by_uuid(channel_uuid).await {
        Ok(c) => c,
        Err(_) => return (StatusCode::NOT_FOUND, "channel not found").into_response(),
    };

    let inbound = InboundRequest {
        method: to_handler_method(&method).expect("route match implies a known method"),
        headers: headers_to_vec(&headers),
        query: parse_query(raw_query),
        body: body.to_vec(),
    };

    dispatch_receive(&state, handler.as_ref(), channel, &suffix, route.log_type, inbound).await
}

async fn type_route_handler(
    State(state): State<Arc<ServerState>>,
    Path((channel_type, suffix)): Path<(String, String)>,
    method: Method,
    headers: HeaderMap,
    RawQuery(raw_query): RawQuery,
    body: Bytes,
) -> Response {
    let Some(handler) = state.handlers.get(&channel_type) else {
        return (StatusCode::NOT_FOUND, "unknown channel type").into_response();
    };

    let Some(route) = matching_route(handler.as_ref(), &method, &suffix, RouteRoot::Type) else {
        return (StatusCode::NOT_FOUND, "unknown route").into_response();
    };

    let inbound = InboundRequest {
        method: to_handler_method(&method).expect("route match implies a known method"),
        headers: headers_to_vec(&headers),
        query: parse_query(raw_query),
        body: body.to_vec(),
    };

    let Some(channel_uuid) = handler
        .get_channel_from_request(state.backend.as_ref(), &inbound)
        .await
    else {
        return (StatusCode::NOT_FOUND, "channel not found").into_response();
    };

    let channel = match state.backend.channel_by_uuid(channel_uuid).await {
        Ok(c) => c,
        Err(_) => return (StatusCode::NOT_FOUND, "channel not found").into_response(),
    };

    dispatch_receive(&state, handler.as_ref(), channel, &suffix, route.log_type, inbound).await
}

fn matching_route(
    handler: &dyn Handler,
    method: &Method,
    suffix: &str,
    root: RouteRoot,
) -> Option<courier_channels::RouteSpec> {
    let wanted = to_handler_method(method)?;
    handler
        .routes()
        .into_iter()
        .find(|r| r.method == wanted && r.suffix == suffix && r.root == root)
}

async fn dispatch_receive(
    state: &Arc<ServerState>,
    handler: &dyn Handler,
    channel: Channel,
    suffix: &str,
    log_type: ChannelLogType,
    inbound: InboundRequest,
) -> Response {
    let ctx = state.handler_ctx();
    let mut redaction_values = handler.redact_values(&channel);
    redaction_values.extend(state.config.secrets.redaction_values());
    let mut log = ChannelLogRecorder::open(channel.uuid, log_type, redaction_values);

    let outcome = handler.receive(&ctx, &channel, suffix, inbound, &mut log).await;

    let response = match outcome {
        Ok(RouterOutcome::Ignore(reason)) => {
            log.add_error(format!("ignored: {reason}"));
            (StatusCode::OK, format!("ignoring: {reason}")).into_response()
        }
        Ok(RouterOutcome::Events(events)) => {
            persist_events(state, &events).await;
            match handler.write_msg_success_response(&events) {
                Some((status, content_type, body)) => {
                    build_response(status, &content_type, body)
                }
                None => default_success_response(&events),
            }
        }
        Ok(RouterOutcome::CustomResponse {
            status,
            content_type,
            body,
            events,
        }) => {
            persist_events(state, &events).await;
            build_response(status, &content_type, body)
        }
        Err(err) => {
            log.add_error(err.to_string());
            warn!(channel = %channel.uuid, channel_type = %channel.channel_type, error = %err, "inbound request rejected");
            error_response(err)
        }
    };

    let closed = log.close();
    if let Err(e) = state.backend.write_channel_log(&closed).await {
        error!(channel = %channel.uuid, error = %e, "failed to persist channel log");
    }

    response
}

async fn persist_events(state: &Arc<ServerState>, events: &ChannelEventBatch) {
    let window = Duration::from_secs(state.config.server.dedupe_window_secs);
    for event in events {
        let result = match event {
            ChannelEventPayload::Msg(msg) => {
                state.backend.write_incoming_msg(msg, window).await.map(|_| ())
            }
            ChannelEventPayload::Status(update) => state.backend.write_status_update(update).await,
            ChannelEventPayload::Event(ev) => state.backend.write_channel_event(ev).await,
        };
        if let Err(e) = result {
            error!(error = %e, "failed to persist inbound event");
        }
    }
}

fn default_success_response(events: &ChannelEventBatch) -> Response {
    let descriptors: Vec<serde_json::Value> = events
        .iter()
        .map(|e| match e {
            ChannelEventPayload::Msg(m) => json!({ "type": "msg", "id": m.external_id }),
            ChannelEventPayload::Status(s) => json!({ "type": "status", "ref": format!("{:?}", s.msg_ref) }),
            ChannelEventPayload::Event(ev) => json!({ "type": "event", "event_type": format!("{:?}", ev.event_type) }),
        })
        .collect();

    let message = if !events.is_empty()
        && events.iter().all(|e| matches!(e, ChannelEventPayload::Status(_)))
    {
        "Status Update Accepted"
    } else {
        "Message Accepted"
    };

    axum::Json(json!({ "message": message, "events": descriptors })).into_response()
}

fn build_response(status: u16, content_type: &str, body: String) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
    let mut response = Response::builder().status(status);
    if let Some(headers) = response.headers_mut() {
        if let Ok(value) = axum::http::HeaderValue::from_str(content_type) {
            headers.insert(axum::http::header::CONTENT_TYPE, value);
        }
    }
    response.body(axum::body::Body::from(body)).unwrap_or_else(|_| {
        (StatusCode::INTERNAL_SERVER_ERROR, "failed to build response").into_response()
    })
}

fn error_response(err: RouterError) -> Response {
    match err {
        RouterError::Validation(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
        RouterError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg).into_response(),
        RouterError::ChannelNotFound => (StatusCode::NOT_FOUND, "channel not found").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use courier_channels::HandlerRegistry;
    use courier_channels::bluesms::BlueSmsHandler;
    use courier_core::backend::test_util::InMemoryBackend;
    use courier_core::config::Config;
    use tower::ServiceExt;

    async fn build_test_state() -> (Arc<ServerState>, Channel, Arc<InMemoryBackend>) {
        let backend = Arc::new(InMemoryBackend::new());
        let channel = Channel {
            uuid: Uuid::new_v4(),
            channel_type: "bs".into(),
            address: "2020".into(),
            country: None,
            config: HashMap::new(),
            schemes: vec!["tel".into()],
            created_on: chrono::Utc::now(),
        };
        backend.add_channel(channel.clone()).await;

        let mut handlers = HandlerRegistry::new();
        handlers.register(Arc::new(BlueSmsHandler::new()));

        let state = Arc::new(ServerState::new(Arc::new(Config::default()), backend.clone(), handlers));
        (state, channel, backend)
    }

    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let (state, _channel, _backend) = build_test_state().await;
        let app = build_router(state);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn receive_route_persists_incoming_message() {
        let (state, channel, backend) = build_test_state().await;
        let app = build_router(state);

        let uri = format!("/c/bs/{}/receive?mobile=254791541111&response=Hello", channel.uuid);
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(backend.incoming.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_whatsapp_webhook_deliveries_produce_one_stored_message() {
        use courier_channels::whatsapp_cloud::WhatsAppCloudHandler;

        let backend = Arc::new(InMemoryBackend::new());
        let channel = Channel {
            uuid: Uuid::new_v4(),
            channel_type: "wac".into(),
            address: "15550001111".into(),
            country: None,
            config: HashMap::new(),
            schemes: vec!["whatsapp".into()],
            created_on: chrono::Utc::now(),
        };
        backend.add_channel(channel.clone()).await;

        let mut handlers = HandlerRegistry::new();
        handlers.register(Arc::new(WhatsAppCloudHandler::new()));
        let state = Arc::new(ServerState::new(Arc::new(Config::default()), backend.clone(), handlers));
        let app = build_router(state);

        let body = serde_json::json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "metadata": { "phone_number_id": "15550001111" },
                        "messages": [{
                            "id": "wamid.same-id",
                            "from": "15551234567",
                            "text": { "body": "hello" }
                        }]
                    }
                }]
            }]
        })
        .to_string();

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method(Method::POST)
                        .uri("/c/wac/receive")
                        .body(Body::from(body.clone()))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        assert_eq!(backend.incoming.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn unknown_channel_type_is_404() {
        let (state, _channel, _backend) = build_test_state().await;
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/c/nope/{}/receive", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
