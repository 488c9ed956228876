//! Outbound dispatcher: a fixed-size worker pool, each worker looping over
//! the channels it owns and dequeuing/sending until the queue runs dry, then
//! sleeping briefly before polling again (spec §4.5, modeled on the
//! teacher's `channel_router.rs` task-per-unit spawn idiom).

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

use courier_core::backend::BackendError;
use courier_core::channel_log::ChannelLogRecorder;
use courier_core::types::{ChannelLogType, MsgRef, MsgStatus, OutgoingMsg, StatusUpdate};

use crate::state::ServerState;

const EMPTY_QUEUE_BACKOFF: Duration = Duration::from_millis(250);
const RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// Spawn `worker_count` tasks, each round-robining over every known channel
/// looking for outbound work. Returns the join handles so the caller can
/// await graceful shutdown.
pub fn start_dispatch_workers(state: Arc<ServerState>, worker_count: usize) -> Vec<tokio::task::JoinHandle<()>> {
    (0..worker_count)
        .map(|id| {
            let state = state.clone();
            tokio::spawn(async move {
                info!(worker = id, "dispatch worker started");
                dispatch_loop(state, id).await;
            })
        })
        .collect()
}

async fn dispatch_loop(state: Arc<ServerState>, worker_id: usize) {
    loop {
        let channels = match state.backend.list_channels().await {
            Ok(c) => c,
            Err(e) => {
                error!(worker = worker_id, error = %e, "failed to list channels for dispatch");
                sleep(EMPTY_QUEUE_BACKOFF).await;
                continue;
            }
        };

        let mut did_work = false;
        for channel in channels {
            match state.backend.dequeue_outgoing(channel.uuid).await {
                Ok(msg) => {
                    did_work = true;
                    send_one(&state, channel.uuid, msg).await;
                }
                Err(BackendError::QueueEmpty) => continue,
                Err(e) => {
                    error!(worker = worker_id, channel = %channel.uuid, error = %e, "dequeue failed");
                }
            }
        }

        if !did_work {
            sleep(EMPTY_QUEUE_BACKOFF).await;
        }
    }
}

async fn send_one(state: &Arc<ServerState>, channel_uuid: Uuid, msg: OutgoingMsg) {
    let channel = match state.backend.channel_by_uuid(channel_uuid).await {
        Ok(c) => c,
        Err(_) => {
            warn!(channel = %channel_uuid, "dropping outbound message for unknown channel");
            return;
        }
    };

    let Some(handler) = state.handlers.get(&channel.channel_type) else {
        warn!(channel = %channel_uuid, channel_type = %channel.channel_type, "no handler registered for channel type");
        return;
    };

    let ctx = state.handler_ctx();
    let mut redaction_values = handler.redact_values(&channel);
    redaction_values.extend(state.config.secrets.redaction_values());
    let mut log = ChannelLogRecorder::open(channel.uuid, ChannelLogType::MsgSend, redaction_values);

    let outcome = tokio::time::timeout(
        Duration::from_secs(state.config.server.http_timeout_secs),
        handler.send(&ctx, &channel, &msg, &mut log),
    )
    .await;

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(_) => {
            log.add_error("send timed out".to_string());
            courier_channels::SendOutcome::errored(
                courier_channels::SendErrorKind::ConnectionFailed("timed out".into()),
            )
        }
    };

    let update = StatusUpdate {
        channel_uuid: channel.uuid,
        msg_ref: MsgRef::Id(msg.id),
        status: outcome.status,
        new_external_id: outcome.external_id.clone(),
        errors: outcome.error.iter().map(|e| e.to_string()).collect(),
    };

    if let Err(e) = state.backend.write_status_update(&update).await {
        error!(channel = %channel.uuid, error = %e, "failed to persist status update");
    }

    let closed = log.close();
    if let Err(e) = state.backend.write_channel_log(&closed).await {
        error!(channel = %channel.uuid, error = %e, "failed to persist channel log");
    }

    if outcome.status == MsgStatus::Errored {
        if let Some(kind) = &outcome.error {
            warn!(channel = %channel.uuid, msg_id = msg.id, error = %kind, "send failed, requeuing with backoff");
        }
        if let Err(e) = state.backend.requeue_outgoing(msg, RETRY_BACKOFF).await {
            error!(channel = %channel.uuid, error = %e, "failed to requeue message after retryable error");
        }
    } else if outcome.status.is_terminal() {
        if let Some(kind) = &outcome.error {
            warn!(channel = %channel.uuid, msg_id = msg.id, error = %kind, "send failed terminally");
        }
    } else {
        info!(channel = %channel.uuid, msg_id = msg.id, status = ?outcome.status, "send succeeded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_channels::bluesms::BlueSmsHandler;
    use courier_channels::HandlerRegistry;
    use courier_core::backend::test_util::InMemoryBackend;
    use courier_core::backend::Backend;
    use courier_core::config::Config;
    use courier_core::types::{Channel, MsgOrigin};
    use courier_core::urn::Urn;
    use httpmock::Method::POST;
    use httpmock::MockServer;
    use std::collections::HashMap as StdHashMap;

    fn channel(send_url: &str) -> Channel {
        let mut config = StdHashMap::new();
        config.insert("send_url".into(), serde_json::json!(send_url));
        Channel {
            uuid: Uuid::new_v4(),
            channel_type: "bs".into(),
            address: "2020".into(),
            country: None,
            config,
            schemes: vec!["tel".into()],
            created_on: chrono::Utc::now(),
        }
    }

    fn outgoing(channel_uuid: Uuid, id: i64) -> OutgoingMsg {
        OutgoingMsg {
            id,
            channel_uuid,
            urn: Urn::parse("tel:+254791541111").unwrap(),
            text: "hi there".into(),
            attachments: vec![],
            quick_replies: vec![],
            topic: None,
            origin: MsgOrigin::Chat,
            locale: None,
            template: None,
            response_to_external_id: None,
        }
    }

    async fn build_state(backend: Arc<InMemoryBackend>) -> Arc<ServerState> {
        let mut handlers = HandlerRegistry::new();
        handlers.register(Arc::new(BlueSmsHandler::new()));
        Arc::new(ServerState::new(Arc::new(Config::default()), backend, handlers))
    }

    #[tokio::test]
    async fn send_one_records_delivered_status_on_success() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/send");
            then.status(200)
                .json_body(serde_json::json!({ "message_id": "ext-1" }));
        });

        let backend = Arc::new(InMemoryBackend::new());
        let ch = channel(&server.url("/send"));
        backend.add_channel(ch.clone()).await;
        let state = build_state(backend.clone()).await;

        send_one(&state, ch.uuid, outgoing(ch.uuid, 1)).await;

        mock.assert();
        let last = backend.last_status().await.unwrap();
        assert_eq!(last.status, MsgStatus::Wired);
        assert!(backend.dequeue_outgoing(ch.uuid).await.is_err());
    }

    #[tokio::test]
    async fn send_one_requeues_on_connection_failed() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/send");
            then.status(500).body("upstream unavailable");
        });

        let backend = Arc::new(InMemoryBackend::new());
        let ch = channel(&server.url("/send"));
        backend.add_channel(ch.clone()).await;
        let state = build_state(backend.clone()).await;

        send_one(&state, ch.uuid, outgoing(ch.uuid, 2)).await;

        mock.assert();
        let last = backend.last_status().await.unwrap();
        assert_eq!(last.status, MsgStatus::Errored);

        // A 5xx maps to ConnectionFailed, which is retryable: the message
        // goes back on the channel's queue instead of being dropped.
        let requeued = backend.dequeue_outgoing(ch.uuid).await.unwrap();
        assert_eq!(requeued.id, 2);
    }

    #[tokio::test]
    async fn send_one_does_not_requeue_on_terminal_response_status() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/send");
            then.status(422).body("invalid recipient");
        });

        let backend = Arc::new(InMemoryBackend::new());
        let ch = channel(&server.url("/send"));
        backend.add_channel(ch.clone()).await;
        let state = build_state(backend.clone()).await;

        send_one(&state, ch.uuid, outgoing(ch.uuid, 3)).await;

        mock.assert();
        let last = backend.last_status().await.unwrap();
        assert_eq!(last.status, MsgStatus::Failed);

        // A 4xx maps to ResponseStatus, a terminal failure: nothing goes
        // back on the queue.
        assert!(backend.dequeue_outgoing(ch.uuid).await.is_err());
    }
}
