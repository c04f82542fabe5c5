//! Event Bus
//!
//! Persistent, TTL-bounded notification fan-out. Publishing writes an event
//! addressed to one agent; subscribing is a pure read of the pending,
//! non-expired backlog, so polling twice without acknowledging returns the
//! same set. Acknowledging flips an event to delivered exactly once.

use chrono::{DateTime, Duration, Utc};
use muster_core::{
    new_entity_id, AgentEvent, EntityType, EventConfig, EventPayload, EventStatus, MusterError,
    MusterResult,
};
use muster_storage::{EventUpdate, StorageTrait};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// TTL-bounded notification bus.
#[derive(Clone)]
pub struct EventBus {
    storage: Arc<dyn StorageTrait>,
    config: EventConfig,
}

impl EventBus {
    pub fn new(storage: Arc<dyn StorageTrait>, config: EventConfig) -> Self {
        Self { storage, config }
    }

    /// Publish an event to one agent. The event expires after the configured
    /// TTL whether or not anyone saw it.
    pub fn publish(
        &self,
        now: DateTime<Utc>,
        target: &str,
        payload: EventPayload,
    ) -> MusterResult<AgentEvent> {
        let ttl = Duration::from_std(self.config.ttl).unwrap_or_else(|_| Duration::minutes(5));
        let event = AgentEvent {
            event_id: new_entity_id(),
            target_agent: target.to_string(),
            payload,
            status: EventStatus::Pending,
            created_at: now,
            expires_at: now + ttl,
            version: 1,
        };
        self.storage.event_insert(&event)?;
        debug!(
            target_agent = target,
            event_type = event.payload.event_type(),
            "event published"
        );
        Ok(event)
    }

    /// Read the pending, non-expired backlog for an agent, oldest first.
    ///
    /// This does not consume anything; delivery state only changes on
    /// [`EventBus::acknowledge`].
    pub fn subscribe(
        &self,
        now: DateTime<Utc>,
        target: &str,
        since: Option<DateTime<Utc>>,
    ) -> MusterResult<Vec<AgentEvent>> {
        self.storage.event_list_for_target(target, since, now)
    }

    /// Mark an event as delivered. Idempotent: acknowledging a delivered or
    /// expired event returns it unchanged, and acknowledging a pending event
    /// whose TTL already lapsed expires it instead.
    pub fn acknowledge(&self, now: DateTime<Utc>, event_id: Uuid) -> MusterResult<AgentEvent> {
        let event = self
            .storage
            .event_get(event_id)?
            .ok_or(MusterError::not_found(EntityType::Event, event_id))?;
        if event.status != EventStatus::Pending {
            return Ok(event);
        }
        let status = if now < event.expires_at {
            EventStatus::Delivered
        } else {
            EventStatus::Expired
        };
        self.storage.event_update(
            event_id,
            event.version,
            EventUpdate {
                status: Some(status),
            },
        )
    }

    /// Expire every pending event whose TTL lapsed. Returns how many.
    pub fn expire_sweep(&self, now: DateTime<Utc>) -> MusterResult<usize> {
        let lapsed = self.storage.event_list_lapsed(now)?;
        let mut expired = 0;
        for event in lapsed {
            self.storage.event_update(
                event.event_id,
                event.version,
                EventUpdate {
                    status: Some(EventStatus::Expired),
                },
            )?;
            expired += 1;
        }
        if expired > 0 {
            info!(expired, "event expiry sweep");
        }
        Ok(expired)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use muster_test_utils::{storage_with_agents, MemoryStorage};

    fn bus() -> (Arc<MemoryStorage>, EventBus) {
        let storage = Arc::new(storage_with_agents(&["sam"]));
        let bus = EventBus::new(storage.clone(), EventConfig::default());
        (storage, bus)
    }

    fn ping(message: &str) -> EventPayload {
        EventPayload::SystemAlert {
            message: message.to_string(),
        }
    }

    #[test]
    fn test_publish_sets_ttl_expiry() {
        let (_, bus) = bus();
        let now = Utc::now();

        let event = bus.publish(now, "sam", ping("deploy done")).unwrap();
        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!((event.expires_at - now).num_seconds(), 300);
    }

    #[test]
    fn test_subscribe_twice_returns_same_set() {
        let (_, bus) = bus();
        let now = Utc::now();
        bus.publish(now, "sam", ping("one")).unwrap();
        bus.publish(now, "sam", ping("two")).unwrap();

        let first = bus.subscribe(now, "sam", None).unwrap();
        let second = bus.subscribe(now, "sam", None).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
    }

    #[test]
    fn test_acknowledge_removes_from_backlog() {
        let (_, bus) = bus();
        let now = Utc::now();
        let event = bus.publish(now, "sam", ping("one")).unwrap();
        bus.publish(now, "sam", ping("two")).unwrap();

        let acked = bus.acknowledge(now, event.event_id).unwrap();
        assert_eq!(acked.status, EventStatus::Delivered);

        let backlog = bus.subscribe(now, "sam", None).unwrap();
        assert_eq!(backlog.len(), 1);
    }

    #[test]
    fn test_acknowledge_is_idempotent() {
        let (_, bus) = bus();
        let now = Utc::now();
        let event = bus.publish(now, "sam", ping("one")).unwrap();

        let first = bus.acknowledge(now, event.event_id).unwrap();
        let second = bus.acknowledge(now, event.event_id).unwrap();
        assert_eq!(first.version, second.version);
        assert_eq!(second.status, EventStatus::Delivered);
    }

    #[test]
    fn test_acknowledge_after_ttl_expires_event() {
        let (_, bus) = bus();
        let now = Utc::now();
        let event = bus.publish(now, "sam", ping("late")).unwrap();

        let later = now + Duration::minutes(6);
        let acked = bus.acknowledge(later, event.event_id).unwrap();
        assert_eq!(acked.status, EventStatus::Expired);
    }

    #[test]
    fn test_expired_events_never_delivered() {
        let (_, bus) = bus();
        let now = Utc::now();
        bus.publish(now, "sam", ping("old")).unwrap();

        let later = now + Duration::minutes(6);
        assert!(bus.subscribe(later, "sam", None).unwrap().is_empty());
    }

    #[test]
    fn test_expire_sweep_flips_lapsed_only() {
        let (storage, bus) = bus();
        let now = Utc::now();
        let old = bus.publish(now, "sam", ping("old")).unwrap();
        bus.publish(now + Duration::minutes(4), "sam", ping("fresh"))
            .unwrap();

        let swept = bus.expire_sweep(now + Duration::minutes(5)).unwrap();
        assert_eq!(swept, 1);

        let stored = storage.event_get(old.event_id).unwrap().unwrap();
        assert_eq!(stored.status, EventStatus::Expired);
        assert_eq!(bus.expire_sweep(now + Duration::minutes(5)).unwrap(), 0);
    }

    #[test]
    fn test_since_filter_skips_older_events() {
        let (_, bus) = bus();
        let now = Utc::now();
        let first = bus.publish(now, "sam", ping("one")).unwrap();
        bus.publish(now + Duration::seconds(10), "sam", ping("two"))
            .unwrap();

        let newer = bus
            .subscribe(now + Duration::seconds(20), "sam", Some(first.created_at))
            .unwrap();
        assert_eq!(newer.len(), 1);
    }
}
