use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::BreakerPhase;

/// Payload published on the `budget_updates` topic after every `Track`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BudgetUpdateEvent {
    pub campaign_id: String,
    pub day_spent_cents: i64,
    pub breaker_state: BreakerPhase,
    pub ts: DateTime<Utc>,
}

/// Destination for budget events. The Decision Engine never awaits
/// publish success; implementations must not block the caller.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: BudgetUpdateEvent);
}

/// Discards every event. Used when no downstream listener is configured.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: BudgetUpdateEvent) {}
}

/// Collects emitted events in memory, for tests.
#[derive(Default)]
pub struct CaptureSink {
    events: parking_lot::Mutex<Vec<BudgetUpdateEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<BudgetUpdateEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: BudgetUpdateEvent) {
        self.events.lock().push(event);
    }
}

pub fn noop_sink() -> std::sync::Arc<dyn EventSink> {
    std::sync::Arc::new(NoOpSink)
}

pub fn capture_sink() -> std::sync::Arc<CaptureSink> {
    std::sync::Arc::new(CaptureSink::new())
}
