//! MUSTER Engine - Coordination Components
//!
//! The behavioral layer over `muster-storage`: agent registry, priority
//! dispatch queue, five-stage message loop, heartbeat monitor with circuit
//! breakers, TTL event bus, alert engine, and per-agent rate limiting.
//!
//! Components are cheap handles (an `Arc` to the store plus config) and are
//! freely cloneable into API state and background jobs.

pub mod alerts;
pub mod dispatch;
pub mod events;
pub mod heartbeat;
pub mod loop_tracker;
pub mod rate_limit;
pub mod registry;

pub use alerts::AlertEngine;
pub use dispatch::{DispatchQueue, NewDispatch, StuckSweepOutcome};
pub use events::EventBus;
pub use heartbeat::{HeartbeatMonitor, HeartbeatOutcome, HeartbeatSweepOutcome};
pub use loop_tracker::{LoopTracker, NewMessage, SlaSweepOutcome};
pub use rate_limit::{RateLimitConfig, RateLimitGuard};
pub use registry::AgentRegistry;

use muster_core::MusterConfig;
use muster_storage::StorageTrait;
use std::sync::Arc;

/// All engine components wired over one store.
#[derive(Clone)]
pub struct Engine {
    pub registry: AgentRegistry,
    pub dispatches: DispatchQueue,
    pub messages: LoopTracker,
    pub heartbeats: HeartbeatMonitor,
    pub events: EventBus,
    pub alerts: AlertEngine,
}

impl Engine {
    /// Wire every component over the given store and configuration.
    pub fn new(storage: Arc<dyn StorageTrait>, config: &MusterConfig) -> Self {
        let alerts = AlertEngine::new(storage.clone());
        let events = EventBus::new(storage.clone(), config.events.clone());
        Self {
            registry: AgentRegistry::new(storage.clone(), config.heartbeat.clone()),
            dispatches: DispatchQueue::new(
                storage.clone(),
                config.dispatch.clone(),
                alerts.clone(),
                events.clone(),
            ),
            messages: LoopTracker::new(
                storage.clone(),
                config.sla.clone(),
                alerts.clone(),
                events.clone(),
            ),
            heartbeats: HeartbeatMonitor::new(
                storage,
                config.heartbeat.clone(),
                alerts.clone(),
            ),
            events,
            alerts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use muster_core::{DispatchPriority, LoopStage, MessageKind, MessagePriority};
    use muster_test_utils::MemoryStorage;

    /// End-to-end pass through every component over one store.
    #[test]
    fn test_engine_wiring_round_trip() {
        let engine = Engine::new(
            Arc::new(MemoryStorage::new()),
            &MusterConfig::default(),
        );
        let now = Utc::now();

        engine.registry.register(now, "sam", "backend").unwrap();
        engine.registry.register(now, "leo", "reviewer").unwrap();

        let dispatch = engine
            .dispatches
            .create(
                now,
                NewDispatch {
                    agent_name: "sam".to_string(),
                    command: "triage-inbox".to_string(),
                    payload: None,
                    priority: DispatchPriority::Normal,
                    max_retries: None,
                },
            )
            .unwrap();
        let next = engine.dispatches.next(now, "sam").unwrap().unwrap();
        assert_eq!(next.dispatch_id, dispatch.dispatch_id);

        let message = engine
            .messages
            .send(
                now,
                NewMessage {
                    from_agent: "sam".to_string(),
                    to_agent: "leo".to_string(),
                    kind: MessageKind::Handoff,
                    content: "take over the triage".to_string(),
                    task_ref: None,
                    priority: MessagePriority::High,
                },
            )
            .unwrap();
        engine
            .messages
            .advance(now, message.message_id, LoopStage::Seen)
            .unwrap();

        let beat = engine.heartbeats.beat(now, "sam", None).unwrap();
        assert_eq!(beat.pending_dispatches, 1);

        // Dispatch event for sam, handoff event for leo.
        assert_eq!(engine.events.subscribe(now, "sam", None).unwrap().len(), 1);
        assert_eq!(engine.events.subscribe(now, "leo", None).unwrap().len(), 1);
        assert!(engine.alerts.list(None).unwrap().is_empty());
    }
}
