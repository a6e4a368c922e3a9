//! Fan-out of published snapshots and critical alerts.
//!
//! The current snapshot is an `Arc` swapped under a single write lock, so a
//! reader either sees the previous snapshot or the new one, never a mix.
//! Delivery uses bounded channels with `try_send`: a full or closed
//! subscriber is skipped and never holds up the publisher.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::alerts::model::Alert;
use super::snapshot::DashboardSnapshot;

pub type SubscriberId = u64;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum BroadcastEvent {
    DashboardUpdate(Arc<DashboardSnapshot>),
    CriticalAlert(Vec<Alert>),
}

/// Receiving end handed to a subscriber.
pub struct Subscription {
    pub id: SubscriberId,
    receiver: mpsc::Receiver<BroadcastEvent>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<BroadcastEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<BroadcastEvent> {
        self.receiver.try_recv().ok()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub dropped: usize,
    pub disconnected: usize,
}

pub struct Broadcaster {
    current: RwLock<Arc<DashboardSnapshot>>,
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<BroadcastEvent>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl Broadcaster {
    pub fn new(initial: DashboardSnapshot, buffer: usize) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial)),
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    pub fn current_snapshot(&self) -> Arc<DashboardSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Replace the current snapshot, then deliver it to every subscriber.
    pub fn publish(&self, snapshot: DashboardSnapshot) -> DeliveryReport {
        let snapshot = Arc::new(snapshot);
        *self.current.write() = Arc::clone(&snapshot);
        self.deliver(BroadcastEvent::DashboardUpdate(snapshot))
    }

    /// Deliver a critical-alert event. Nothing is sent for an empty set.
    pub fn publish_critical(&self, alerts: Vec<Alert>) -> DeliveryReport {
        if alerts.is_empty() {
            return DeliveryReport::default();
        }
        self.deliver(BroadcastEvent::CriticalAlert(alerts))
    }

    fn deliver(&self, event: BroadcastEvent) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let mut subscribers = self.subscribers.lock();

        subscribers.retain(|id, sender| match sender.try_send(event.clone()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                log::warn!("Subscriber {} is not keeping up, dropped event", id);
                report.dropped += 1;
                true
            }
            Err(TrySendError::Closed(_)) => {
                log::info!("Subscriber {} disconnected", id);
                report.disconnected += 1;
                false
            }
        });

        report
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::channel(self.buffer);
        self.subscribers.lock().insert(id, sender);
        log::debug!("Subscriber {} registered", id);
        Subscription { id, receiver }
    }

    /// Returns false if the subscriber was already gone.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.subscribers.lock().remove(&id).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::alerts::model::{AlertId, AlertPriority, AlertStatus, Payload};
    use crate::core::model::Category;
    use crate::core::risk::{FusionWeights, RiskModel};
    use chrono::Utc;

    fn snapshot(cycle: u64) -> DashboardSnapshot {
        let model = RiskModel::new(FusionWeights::default()).unwrap();
        let mut snapshot = DashboardSnapshot::initial("Test Site", &model).unwrap();
        snapshot.cycle = cycle;
        snapshot
    }

    fn critical_alert() -> Alert {
        Alert {
            id: AlertId(1),
            category: Category::Seismic,
            rule: "major_earthquake".to_string(),
            message: "quake".to_string(),
            priority: AlertPriority::Critical,
            location: "Site".to_string(),
            created_at: Utc::now(),
            status: AlertStatus::Active,
            payload: Payload::new(),
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_at: None,
        }
    }

    #[test]
    fn test_publish_swaps_current_and_delivers() {
        let broadcaster = Broadcaster::new(snapshot(0), 4);
        let mut sub = broadcaster.subscribe();

        let report = broadcaster.publish(snapshot(1));
        assert_eq!(report.delivered, 1);
        assert_eq!(broadcaster.current_snapshot().cycle, 1);

        match sub.try_recv() {
            Some(BroadcastEvent::DashboardUpdate(s)) => assert_eq!(s.cycle, 1),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_readers_keep_their_snapshot() {
        let broadcaster = Broadcaster::new(snapshot(0), 4);
        let held = broadcaster.current_snapshot();
        broadcaster.publish(snapshot(1));
        assert_eq!(held.cycle, 0);
        assert_eq!(broadcaster.current_snapshot().cycle, 1);
    }

    #[test]
    fn test_empty_critical_set_sends_nothing() {
        let broadcaster = Broadcaster::new(snapshot(0), 4);
        let mut sub = broadcaster.subscribe();
        assert_eq!(broadcaster.publish_critical(Vec::new()), DeliveryReport::default());
        assert!(sub.try_recv().is_none());

        broadcaster.publish_critical(vec![critical_alert()]);
        assert!(matches!(sub.try_recv(), Some(BroadcastEvent::CriticalAlert(a)) if a.len() == 1));
    }

    #[test]
    fn test_slow_subscriber_is_dropped_not_blocking() {
        let broadcaster = Broadcaster::new(snapshot(0), 1);
        let _slow = broadcaster.subscribe();
        let mut fast = broadcaster.subscribe();

        broadcaster.publish(snapshot(1));
        fast.try_recv();
        let report = broadcaster.publish(snapshot(2));

        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(broadcaster.subscriber_count(), 2);
    }

    #[test]
    fn test_closed_subscriber_is_removed() {
        let broadcaster = Broadcaster::new(snapshot(0), 4);
        let sub = broadcaster.subscribe();
        drop(sub);

        let report = broadcaster.publish(snapshot(1));
        assert_eq!(report.disconnected, 1);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_unsubscribe() {
        let broadcaster = Broadcaster::new(snapshot(0), 4);
        let sub = broadcaster.subscribe();
        assert!(broadcaster.unsubscribe(sub.id));
        assert!(!broadcaster.unsubscribe(sub.id));
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_event_wire_names() {
        let event = BroadcastEvent::CriticalAlert(vec![critical_alert()]);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "critical_alert");
        assert_eq!(json["data"][0]["priority"], "critical");
    }
}
