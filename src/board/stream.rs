//! Live board updates over Server-Sent Events.
//!
//! Each pipeline has a broadcast topic. Mutation paths publish `BoardEvent`s
//! to it; every open `/board/stream` connection holds one receiver plus one
//! connection permit. Dropping the response stream (client disconnect) is the
//! only way a subscription ends, and it releases both.

use axum::response::sse::{Event, KeepAlive, Sse};
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::core::config::StreamConfig;

const TOPIC_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum BoardEvent {
    RecordCreated {
        record_id: Uuid,
        stage_id: Uuid,
    },
    RecordMoved {
        record_id: Uuid,
        from_stage_id: Uuid,
        to_stage_id: Uuid,
    },
    RecordUpdated {
        record_id: Uuid,
        stage_id: Uuid,
    },
    SlaStateChanged {
        record_id: Uuid,
        stage_id: Uuid,
        breached: bool,
    },
    ViewsChanged {
        view_id: Option<Uuid>,
    },
}

impl BoardEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::RecordCreated { .. } => "record_created",
            Self::RecordMoved { .. } => "record_moved",
            Self::RecordUpdated { .. } => "record_updated",
            Self::SlaStateChanged { .. } => "sla_state_changed",
            Self::ViewsChanged { .. } => "views_changed",
        }
    }

    pub fn to_sse_event(&self) -> Result<Event, serde_json::Error> {
        let data = serde_json::to_string(self)?;
        Ok(Event::default().event(self.event_name()).data(data))
    }
}

/// A published event stamped with its pipeline and time.
#[derive(Debug, Clone)]
pub struct BoardNotice {
    pub pipeline_id: Uuid,
    pub at: DateTime<Utc>,
    pub event: BoardEvent,
}

struct Topics {
    senders: HashMap<Uuid, broadcast::Sender<BoardNotice>>,
}

/// Per-pipeline publish/subscribe hub with a bound on open subscriptions.
#[derive(Clone)]
pub struct BoardEventBus {
    topics: Arc<Mutex<Topics>>,
    connections: Arc<Semaphore>,
    max_connections: usize,
}

pub struct Subscription {
    pub pipeline_id: Uuid,
    pub receiver: broadcast::Receiver<BoardNotice>,
    guard: SubscriptionGuard,
}

struct SubscriptionGuard {
    pipeline_id: Uuid,
    bus: BoardEventBus,
    _permit: OwnedSemaphorePermit,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        debug!("Board stream subscriber left pipeline {}", self.pipeline_id);
        self.bus.prune();
    }
}

impl BoardEventBus {
    pub fn new(max_connections: usize) -> Self {
        let max_connections = max_connections.max(1);
        Self {
            topics: Arc::new(Mutex::new(Topics {
                senders: HashMap::new(),
            })),
            connections: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        }
    }

    pub fn open_connections(&self) -> usize {
        self.max_connections - self.connections.available_permits()
    }

    /// Returns the number of subscribers that received the event.
    pub fn publish(&self, pipeline_id: Uuid, event: BoardEvent) -> usize {
        let Ok(mut topics) = self.topics.lock() else {
            return 0;
        };
        let Some(sender) = topics.senders.get(&pipeline_id) else {
            return 0;
        };
        let notice = BoardNotice {
            pipeline_id,
            at: Utc::now(),
            event,
        };
        match sender.send(notice) {
            Ok(delivered) => delivered,
            Err(_) => {
                topics.senders.remove(&pipeline_id);
                0
            }
        }
    }

    /// `None` when the connection limit is reached.
    pub fn subscribe(&self, pipeline_id: Uuid) -> Option<Subscription> {
        let permit = Arc::clone(&self.connections).try_acquire_owned().ok()?;
        let mut topics = self.topics.lock().ok()?;
        topics.senders.retain(|_, sender| sender.receiver_count() > 0);
        let receiver = topics
            .senders
            .entry(pipeline_id)
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe();
        Some(Subscription {
            pipeline_id,
            receiver,
            guard: SubscriptionGuard {
                pipeline_id,
                bus: self.clone(),
                _permit: permit,
            },
        })
    }

    pub fn topic_count(&self) -> usize {
        self.topics.lock().map(|t| t.senders.len()).unwrap_or(0)
    }

    pub fn subscriber_count(&self, pipeline_id: Uuid) -> usize {
        self.topics
            .lock()
            .ok()
            .and_then(|t| t.senders.get(&pipeline_id).map(|s| s.receiver_count()))
            .unwrap_or(0)
    }

    /// Drops topics nobody listens to any more.
    fn prune(&self) {
        if let Ok(mut topics) = self.topics.lock() {
            topics
                .senders
                .retain(|_, sender| sender.receiver_count() > 0);
        }
    }
}

/// Turns a subscription into the SSE body. The subscription lives inside the
/// stream state, so it is dropped exactly when the client goes away.
pub fn event_stream(
    subscription: Subscription,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    let pipeline_id = subscription.pipeline_id;
    let ready = Event::default()
        .event("ready")
        .data(format!(r#"{{"pipelineId":"{pipeline_id}"}}"#));

    let Subscription {
        receiver, guard, ..
    } = subscription;

    let updates = BroadcastStream::new(receiver).filter_map(move |item| {
        // Holding the guard here ties the permit to the stream's lifetime.
        let _guard = &guard;
        let event = match item {
            Ok(notice) => notice.event.to_sse_event().ok(),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!("Board stream for pipeline {pipeline_id} lagged by {skipped} events");
                Some(Event::default().event("resync").data(skipped.to_string()))
            }
        };
        futures::future::ready(event.map(Ok))
    });

    stream::once(async move { Ok(ready) }).chain(updates)
}

pub fn sse_response<S>(events: S, config: &StreamConfig) -> Sse<S>
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    Sse::new(events).keep_alive(
        KeepAlive::new()
            .interval(config.heartbeat_duration())
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moved(record_id: Uuid) -> BoardEvent {
        BoardEvent::RecordMoved {
            record_id,
            from_stage_id: Uuid::nil(),
            to_stage_id: Uuid::nil(),
        }
    }

    #[test]
    fn test_event_wire_shape() {
        let id = Uuid::nil();
        let json = serde_json::to_value(BoardEvent::ViewsChanged { view_id: Some(id) }).unwrap();
        assert_eq!(json["type"], "views_changed");
        assert_eq!(json["data"]["view_id"], id.to_string());
    }

    #[tokio::test]
    async fn test_publish_reaches_pipeline_subscribers_only() {
        let bus = BoardEventBus::new(4);
        let pipeline = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut sub = bus.subscribe(pipeline).unwrap();
        let mut foreign = bus.subscribe(other).unwrap();

        let record = Uuid::new_v4();
        assert_eq!(bus.publish(pipeline, moved(record)), 1);

        let notice = sub.receiver.recv().await.unwrap();
        assert_eq!(notice.pipeline_id, pipeline);
        assert_eq!(notice.event, moved(record));
        assert!(foreign.receiver.try_recv().is_err());
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let bus = BoardEventBus::new(1);
        assert_eq!(bus.publish(Uuid::new_v4(), moved(Uuid::new_v4())), 0);
        assert_eq!(bus.topic_count(), 0);
    }

    #[test]
    fn test_connection_limit_and_release() {
        let bus = BoardEventBus::new(1);
        let pipeline = Uuid::new_v4();

        let first = bus.subscribe(pipeline).unwrap();
        assert!(bus.subscribe(pipeline).is_none());
        assert_eq!(bus.open_connections(), 1);

        drop(first);
        assert_eq!(bus.open_connections(), 0);
        assert_eq!(bus.topic_count(), 0);
        assert!(bus.subscribe(pipeline).is_some());
    }

    #[test]
    fn test_topic_survives_while_other_subscribers_remain() {
        let bus = BoardEventBus::new(4);
        let pipeline = Uuid::new_v4();
        let a = bus.subscribe(pipeline).unwrap();
        let b = bus.subscribe(pipeline).unwrap();
        assert_eq!(bus.subscriber_count(pipeline), 2);

        drop(a);
        assert_eq!(bus.subscriber_count(pipeline), 1);
        assert_eq!(bus.publish(pipeline, moved(Uuid::new_v4())), 1);
        drop(b);
        assert_eq!(bus.subscriber_count(pipeline), 0);
    }

    #[tokio::test]
    async fn test_event_stream_starts_with_ready_and_releases_on_drop() {
        let bus = BoardEventBus::new(1);
        let pipeline = Uuid::new_v4();
        let mut events = Box::pin(event_stream(bus.subscribe(pipeline).unwrap()));

        assert!(events.next().await.is_some());
        bus.publish(pipeline, moved(Uuid::new_v4()));
        assert!(events.next().await.is_some());

        drop(events);
        assert_eq!(bus.open_connections(), 0);
    }
}
