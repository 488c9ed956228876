//! The persistence + queue collaborator the core calls into. Courier never
//! touches a database or a queue transport directly — every handler and the
//! router/dispatcher operate purely through this trait, so the concrete
//! storage engine is an external collaborator (spec §1, out of scope here).

use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

use crate::types::{Channel, ChannelEvent, ChannelLog, IncomingMsg, OutgoingMsg, StatusUpdate};

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("channel not found")]
    ChannelNotFound,
    #[error("queue empty")]
    QueueEmpty,
    #[error("backend error: {0}")]
    Other(String),
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Outcome of writing an inbound message: either it was newly persisted, or
/// an identical `(channel, external_id)` pair was already seen within the
/// dedupe window and the write was skipped.
#[derive(Debug, Clone)]
pub enum WriteMsgOutcome {
    Created(i64),
    Duplicate(i64),
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Look up a channel by its UUID.
    async fn channel_by_uuid(&self, uuid: Uuid) -> BackendResult<Channel>;

    /// All channels with an active configuration, polled by the outbound
    /// dispatcher's worker pool to discover which queues to service.
    async fn list_channels(&self) -> BackendResult<Vec<Channel>>;

    /// Look up a channel by type tag + provider address — used by
    /// type-rooted routes that resolve the channel from payload fields
    /// instead of the URL.
    async fn channel_by_address(
        &self,
        channel_type: &str,
        address: &str,
    ) -> BackendResult<Channel>;

    /// Returns `Duplicate` without creating a second row when
    /// `(channel_uuid, external_id)` was already observed within `window`.
    async fn write_incoming_msg(
        &self,
        msg: &IncomingMsg,
        window: Duration,
    ) -> BackendResult<WriteMsgOutcome>;

    async fn write_status_update(&self, update: &StatusUpdate) -> BackendResult<()>;

    async fn write_channel_event(&self, event: &ChannelEvent) -> BackendResult<()>;

    async fn write_channel_log(&self, log: &ChannelLog) -> BackendResult<()>;

    /// Pop the next outbound message for a channel. Returns `QueueEmpty` when
    /// nothing is pending.
    async fn dequeue_outgoing(&self, channel_uuid: Uuid) -> BackendResult<OutgoingMsg>;

    /// Re-enqueue a message after a retryable send failure.
    async fn requeue_outgoing(&self, msg: OutgoingMsg, backoff: Duration) -> BackendResult<()>;
}

#[cfg(any(test, feature = "test-util"))]
pub mod test_util {
    use super::*;
    use crate::types::MsgStatus;
    use chrono::Utc;
    use std::collections::HashMap as StdHashMap;
    use tokio::sync::Mutex;

    /// A fully in-memory `Backend`, used by unit and integration tests across
    /// the workspace. Not suitable for production use: dedupe state and
    /// queues are never persisted.
    #[derive(Default)]
    pub struct InMemoryBackend {
        channels: Mutex<StdHashMap<Uuid, Channel>>,
        seen_external_ids: Mutex<StdHashMap<(Uuid, String), (i64, chrono::DateTime<Utc>)>>,
        next_msg_id: Mutex<i64>,
        pub incoming: Mutex<Vec<IncomingMsg>>,
        pub statuses: Mutex<Vec<StatusUpdate>>,
        pub events: Mutex<Vec<ChannelEvent>>,
        pub logs: Mutex<Vec<ChannelLog>>,
        outgoing_queues: Mutex<StdHashMap<Uuid, Vec<OutgoingMsg>>>,
    }

    impl InMemoryBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn add_channel(&self, channel: Channel) {
            self.channels.lock().await.insert(channel.uuid, channel);
        }

        pub async fn enqueue_outgoing(&self, msg: OutgoingMsg) {
            self.outgoing_queues
                .lock()
                .await
                .entry(msg.channel_uuid)
                .or_default()
                .push(msg);
        }

        pub async fn last_status(&self) -> Option<StatusUpdate> {
            self.statuses.lock().await.last().cloned()
        }
    }

    #[async_trait]
    impl Backend for InMemoryBackend {
        async fn channel_by_uuid(&self, uuid: Uuid) -> BackendResult<Channel> {
            self.channels
                .lock()
                .await
                .get(&uuid)
                .cloned()
                .ok_or(BackendError::ChannelNotFound)
        }

        async fn channel_by_address(
            &self,
            channel_type: &str,
            address: &str,
        ) -> BackendResult<Channel> {
            self.channels
                .lock()
                .await
                .values()
                .find(|c| c.channel_type == channel_type && c.address == address)
                .cloned()
                .ok_or(BackendError::ChannelNotFound)
        }

        async fn list_channels(&self) -> BackendResult<Vec<Channel>> {
            Ok(self.channels.lock().await.values().cloned().collect())
        }

        async fn write_incoming_msg(
            &self,
            msg: &IncomingMsg,
            window: Duration,
        ) -> BackendResult<WriteMsgOutcome> {
            let key = (msg.channel_uuid, msg.external_id.clone());
            let mut seen = self.seen_external_ids.lock().await;
            let now = Utc::now();

            if let Some((existing_id, seen_at)) = seen.get(&key) {
                let age = now.signed_duration_since(*seen_at);
                if age.to_std().unwrap_or(Duration::MAX) <= window {
                    return Ok(WriteMsgOutcome::Duplicate(*existing_id));
                }
            }

            let mut next_id = self.next_msg_id.lock().await;
            *next_id += 1;
            let id = *next_id;
            drop(next_id);

            seen.insert(key, (id, now));
            drop(seen);

            self.incoming.lock().await.push(msg.clone());
            Ok(WriteMsgOutcome::Created(id))
        }

        async fn write_status_update(&self, update: &StatusUpdate) -> BackendResult<()> {
            self.statuses.lock().await.push(update.clone());
            Ok(())
        }

        async fn write_channel_event(&self, event: &ChannelEvent) -> BackendResult<()> {
            self.events.lock().await.push(event.clone());
            Ok(())
        }

        async fn write_channel_log(&self, log: &ChannelLog) -> BackendResult<()> {
            self.logs.lock().await.push(log.clone());
            Ok(())
        }

        async fn dequeue_outgoing(&self, channel_uuid: Uuid) -> BackendResult<OutgoingMsg> {
            let mut queues = self.outgoing_queues.lock().await;
            let queue = queues.entry(channel_uuid).or_default();
            if queue.is_empty() {
                return Err(BackendError::QueueEmpty);
            }
            Ok(queue.remove(0))
        }

        async fn requeue_outgoing(&self, msg: OutgoingMsg, _backoff: Duration) -> BackendResult<()> {
            // Tests don't exercise real scheduling delay; put it back at the
            // front so a retry loop observes it on the next dequeue.
            let _ = MsgStatus::Queued;
            self.outgoing_queues
                .lock()
                .await
                .entry(msg.channel_uuid)
                .or_default()
                .insert(0, msg);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::InMemoryBackend;
    use super::*;
    use crate::types::MsgRef;
    use crate::urn::Urn;
    use chrono::Utc;

    fn sample_msg(channel_uuid: Uuid, external_id: &str) -> IncomingMsg {
        IncomingMsg {
            channel_uuid,
            urn: Urn::parse("tel:+15551234567").unwrap(),
            text: "hello".into(),
            attachments: vec![],
            external_id: external_id.into(),
            received_on: Utc::now(),
            contact_name: None,
        }
    }

    #[tokio::test]
    async fn duplicate_external_id_is_deduped() {
        let backend = InMemoryBackend::new();
        let channel_uuid = Uuid::new_v4();
        let window = Duration::from_secs(3600);

        let first = backend
            .write_incoming_msg(&sample_msg(channel_uuid, "ext-1"), window)
            .await
            .unwrap();
        let second = backend
            .write_incoming_msg(&sample_msg(channel_uuid, "ext-1"), window)
            .await
            .unwrap();

        assert!(matches!(first, WriteMsgOutcome::Created(_)));
        assert!(matches!(second, WriteMsgOutcome::Duplicate(_)));
        assert_eq!(backend.incoming.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn different_channels_do_not_collide() {
        let backend = InMemoryBackend::new();
        let window = Duration::from_secs(3600);

        backend
            .write_incoming_msg(&sample_msg(Uuid::new_v4(), "ext-1"), window)
            .await
            .unwrap();
        backend
            .write_incoming_msg(&sample_msg(Uuid::new_v4(), "ext-1"), window)
            .await
            .unwrap();

        assert_eq!(backend.incoming.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn dequeue_empty_queue_errors() {
        let backend = InMemoryBackend::new();
        let err = backend.dequeue_outgoing(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, BackendError::QueueEmpty));
    }

    #[tokio::test]
    async fn status_updates_are_recorded_in_order() {
        let backend = InMemoryBackend::new();
        let channel_uuid = Uuid::new_v4();

        for status in [crate::types::MsgStatus::Wired, crate::types::MsgStatus::Delivered] {
            backend
                .write_status_update(&StatusUpdate {
                    channel_uuid,
                    msg_ref: MsgRef::Id(1),
                    status,
                    new_external_id: None,
                    errors: vec![],
                })
                .await
                .unwrap();
        }

        let last = backend.last_status().await.unwrap();
        assert_eq!(last.status, crate::types::MsgStatus::Delivered);
    }
}
