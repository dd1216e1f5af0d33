use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared degraded/healthy signal, flipped by the persistence bridge
/// when it has failed to flush `PERSISTENCE_DEGRADED_AFTER` consecutive
/// times and cleared on the next successful flush. `GET /health` reads
/// this rather than always answering 200.
#[derive(Clone)]
pub struct HealthFlag(Arc<AtomicBool>);

impl Default for HealthFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_healthy(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn mark_degraded(&self) {
        self.0.store(false, Ordering::Relaxed);
    }

    pub fn mark_healthy(&self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_healthy_and_round_trips() {
        let flag = HealthFlag::new();
        assert!(flag.is_healthy());
        flag.mark_degraded();
        assert!(!flag.is_healthy());
        flag.mark_healthy();
        assert!(flag.is_healthy());
    }
}
