//! Live update fan-out.
//!
//! Each subscriber owns a bounded queue. `publish` never waits on any of
//! them: a full queue drops that one event for that one subscriber, and a
//! closed queue removes the subscriber. Dropping a [`Subscription`]
//! deregisters it, so a connection that goes away for any reason stops
//! receiving and stops counting.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

// ---

/// Event delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum FanoutEvent {
    /// First event on a new stream.
    Connected,
    /// A new reading, or the latest reading after an override edit.
    Update(Value),
    Heartbeat(DateTime<Utc>),
}

#[derive(Serialize)]
struct Stamp {
    timestamp: DateTime<Utc>,
}

impl FanoutEvent {
    /// `update` carrying a serialized reading. The opaque upstream payload is
    /// left out of live events; it stays available through the query API.
    pub fn update(mut reading: Value) -> Self {
        // ---
        if let Value::Object(map) = &mut reading {
            map.remove("raw_response");
        }
        FanoutEvent::Update(reading)
    }

    /// SSE event name.
    pub fn name(&self) -> &'static str {
        // ---
        match self {
            FanoutEvent::Connected => "connected",
            FanoutEvent::Update(_) => "update",
            FanoutEvent::Heartbeat(_) => "heartbeat",
        }
    }

    /// SSE `data:` payload.
    pub fn data(&self) -> String {
        // ---
        match self {
            FanoutEvent::Connected => serde_json::json!({ "status": "connected" }).to_string(),
            FanoutEvent::Update(v) => v.to_string(),
            FanoutEvent::Heartbeat(ts) => serde_json::to_string(&Stamp { timestamp: *ts })
                .unwrap_or_default(),
        }
    }
}

/// Opaque subscriber identity.
pub type SubscriberId = u64;

struct Registry {
    next_id: AtomicU64,
    buffer: usize,
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<FanoutEvent>>>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriberId, mpsc::Sender<FanoutEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One-to-many broadcast. Cheap to clone; clones share subscribers.
#[derive(Clone)]
pub struct Fanout {
    registry: Arc<Registry>,
}

impl Fanout {
    /// `buffer` is the per-subscriber queue capacity.
    pub fn new(buffer: usize) -> Self {
        // ---
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(1),
                buffer: buffer.max(1),
                subscribers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register a new subscriber. Only events published after this call are
    /// delivered to it.
    pub fn subscribe(&self) -> Subscription {
        // ---
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.registry.buffer);
        self.registry.lock().insert(id, tx);
        tracing::debug!(subscriber = id, "subscriber registered");

        Subscription {
            id,
            rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Remove a subscriber. Returns whether it was still registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        remove(&self.registry, id)
    }

    /// Deliver `event` to every current subscriber without waiting on any.
    ///
    /// Returns the number of subscribers that accepted the event.
    pub fn publish(&self, event: FanoutEvent) -> usize {
        // ---
        let mut delivered = 0;
        let mut gone = Vec::new();
        let mut subscribers = self.registry.lock();

        for (id, tx) in subscribers.iter() {
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::debug!(subscriber = *id, event = event.name(), "queue full, event dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => gone.push(*id),
            }
        }
        for id in gone {
            subscribers.remove(&id);
        }

        tracing::trace!(event = event.name(), delivered, "published");
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Drop every subscriber queue, ending all open streams.
    pub fn close_all(&self) {
        // ---
        let closed = self.registry.lock().drain().count();
        if closed > 0 {
            tracing::info!("Closed {} live subscriber(s)", closed);
        }
    }

    /// Publish a heartbeat every `period` until `shutdown` flips to `true`.
    pub fn spawn_heartbeat(
        &self,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        // ---
        let fanout = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        fanout.publish(FanoutEvent::Heartbeat(Utc::now()));
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    }
}

fn remove(registry: &Registry, id: SubscriberId) -> bool {
    // ---
    let removed = registry.lock().remove(&id).is_some();
    if removed {
        tracing::debug!(subscriber = id, "subscriber removed");
    }
    removed
}

/// Receiving end of one subscriber. Deregisters on drop.
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<FanoutEvent>,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next event, or `None` once the fan-out has closed this subscriber.
    pub async fn recv(&mut self) -> Option<FanoutEvent> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            remove(&registry, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        // ---
        let fanout = Fanout::new(4);
        let mut a = fanout.subscribe();
        let mut b = fanout.subscribe();

        assert_eq!(fanout.publish(FanoutEvent::Update(json!({ "aqi_us": 42 }))), 2);
        assert_eq!(a.recv().await, Some(FanoutEvent::Update(json!({ "aqi_us": 42 }))));
        assert_eq!(b.recv().await, Some(FanoutEvent::Update(json!({ "aqi_us": 42 }))));
    }

    #[tokio::test]
    async fn test_no_replay_for_late_joiners() {
        // ---
        let fanout = Fanout::new(4);
        fanout.publish(FanoutEvent::Update(json!(1)));
        let mut late = fanout.subscribe();
        fanout.publish(FanoutEvent::Update(json!(2)));

        assert_eq!(late.recv().await, Some(FanoutEvent::Update(json!(2))));
    }

    #[tokio::test]
    async fn test_stalled_subscriber_does_not_block_others() {
        // ---
        let fanout = Fanout::new(2);
        let _stalled = fanout.subscribe();
        let mut live = fanout.subscribe();

        for i in 0..10 {
            fanout.publish(FanoutEvent::Update(json!(i)));
            assert_eq!(live.recv().await, Some(FanoutEvent::Update(json!(i))));
        }
        // the stalled one is still registered, it just lost events
        assert_eq!(fanout.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_drop_deregisters() {
        // ---
        let fanout = Fanout::new(4);
        let a = fanout.subscribe();
        let _b = fanout.subscribe();
        assert_eq!(fanout.subscriber_count(), 2);

        drop(a);
        assert_eq!(fanout.subscriber_count(), 1);
        assert_eq!(fanout.publish(FanoutEvent::Heartbeat(Utc::now())), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        // ---
        let fanout = Fanout::new(4);
        let sub = fanout.subscribe();
        let id = sub.id();

        assert!(fanout.unsubscribe(id));
        assert!(!fanout.unsubscribe(id));
        drop(sub);
        assert_eq!(fanout.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_hundred_subscribers() {
        // ---
        let fanout = Fanout::new(1);
        let mut subs: Vec<_> = (0..100).map(|_| fanout.subscribe()).collect();

        assert_eq!(fanout.publish(FanoutEvent::Update(json!("x"))), 100);
        for sub in subs.iter_mut() {
            assert_eq!(sub.recv().await, Some(FanoutEvent::Update(json!("x"))));
        }
        subs.clear();
        assert_eq!(fanout.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_close_all_ends_streams() {
        // ---
        let fanout = Fanout::new(4);
        let mut sub = fanout.subscribe();
        fanout.close_all();

        assert_eq!(sub.recv().await, None);
        assert_eq!(fanout.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_uses_publish_path() {
        // ---
        let fanout = Fanout::new(4);
        let mut sub = fanout.subscribe();
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = fanout.spawn_heartbeat(Duration::from_secs(30), stop_rx);

        let event = sub.recv().await;
        assert!(matches!(event, Some(FanoutEvent::Heartbeat(_))));

        stop_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[test]
    fn test_update_strips_raw_payload() {
        // ---
        let event = FanoutEvent::update(json!({ "aqi_us": 42, "raw_response": "{}" }));
        assert_eq!(event, FanoutEvent::Update(json!({ "aqi_us": 42 })));
    }

    #[test]
    fn test_event_names_and_payloads() {
        // ---
        assert_eq!(FanoutEvent::Connected.name(), "connected");
        assert_eq!(FanoutEvent::Update(json!({})).name(), "update");
        let hb = FanoutEvent::Heartbeat(Utc::now());
        assert_eq!(hb.name(), "heartbeat");
        assert!(hb.data().contains("timestamp"));
    }
}
