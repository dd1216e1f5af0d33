use pacer_core::types::{BreakerPhase, BreakerState};
use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct BreakerThresholds {
    pub open_fraction: f64,
    pub cooldown_ns: u64,
    pub half_open_probe: f64,
}

/// Outcome of consulting the breaker during `Decide`. `Closed` defers
/// to the pacing policy; the other three settle the decision outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerGate {
    Closed,
    Open,
    HalfOpenAdmit,
    HalfOpenDeny,
}

fn maybe_open(state: &mut BreakerState, ratio: f64, now_ns: u64, open_fraction: f64) {
    if state.phase == BreakerPhase::Closed && ratio >= open_fraction {
        state.phase = BreakerPhase::Open;
        state.opened_at_ns = Some(now_ns);
    }
}

fn maybe_half_open(state: &mut BreakerState, ratio: f64, now_ns: u64, cfg: &BreakerThresholds) {
    if state.phase != BreakerPhase::Open {
        return;
    }
    if let Some(opened_at) = state.opened_at_ns {
        if now_ns.saturating_sub(opened_at) >= cfg.cooldown_ns && ratio < cfg.open_fraction {
            state.phase = BreakerPhase::HalfOpen;
        }
    }
}

/// Evaluated on every `Decide`. Never transitions the breaker out of
/// HALF_OPEN itself — that only happens once a probe's spend has
/// actually been tracked (`evaluate_for_track`).
pub fn evaluate_for_decide(
    state: &mut BreakerState,
    ratio: f64,
    now_ns: u64,
    cfg: &BreakerThresholds,
    rng: &mut impl Rng,
) -> BreakerGate {
    maybe_open(state, ratio, now_ns, cfg.open_fraction);
    maybe_half_open(state, ratio, now_ns, cfg);

    match state.phase {
        BreakerPhase::Closed => BreakerGate::Closed,
        BreakerPhase::Open => BreakerGate::Open,
        BreakerPhase::HalfOpen => {
            if rng.gen::<f64>() < cfg.half_open_probe {
                BreakerGate::HalfOpenAdmit
            } else {
                BreakerGate::HalfOpenDeny
            }
        }
    }
}

/// Evaluated on every `Track`, using the post-increment spend ratio.
/// Spend is applied regardless of breaker phase; this only updates the
/// state machine.
pub fn evaluate_for_track(
    state: &mut BreakerState,
    ratio_after: f64,
    now_ns: u64,
    cfg: &BreakerThresholds,
) {
    match state.phase {
        BreakerPhase::Closed => maybe_open(state, ratio_after, now_ns, cfg.open_fraction),
        BreakerPhase::Open => maybe_half_open(state, ratio_after, now_ns, cfg),
        BreakerPhase::HalfOpen => {
            if ratio_after >= cfg.open_fraction {
                state.phase = BreakerPhase::Open;
                state.opened_at_ns = Some(now_ns);
            } else {
                state.phase = BreakerPhase::Closed;
                state.opened_at_ns = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn cfg() -> BreakerThresholds {
        BreakerThresholds {
            open_fraction: 0.95,
            cooldown_ns: 5 * 60 * 1_000_000_000,
            half_open_probe: 0.10,
        }
    }

    #[test]
    fn trips_open_at_threshold() {
        let mut state = BreakerState::closed();
        let cfg = cfg();
        let mut rng = StdRng::seed_from_u64(1);

        let gate = evaluate_for_decide(&mut state, 0.80, 0, &cfg, &mut rng);
        assert_eq!(gate, BreakerGate::Closed);

        evaluate_for_track(&mut state, 0.96, 0, &cfg);
        assert_eq!(state.phase, BreakerPhase::Open);
        assert_eq!(state.opened_at_ns, Some(0));
    }

    #[test]
    fn never_transitions_open_to_closed_directly() {
        let mut state = BreakerState {
            phase: BreakerPhase::Open,
            opened_at_ns: Some(0),
        };
        let cfg = cfg();
        // ratio now low but cooldown not elapsed: must land on HALF_OPEN, never CLOSED.
        evaluate_for_track(&mut state, 0.10, cfg.cooldown_ns, &cfg);
        assert_ne!(state.phase, BreakerPhase::Closed);
    }

    #[test]
    fn half_open_probe_success_closes_breaker() {
        let mut state = BreakerState {
            phase: BreakerPhase::HalfOpen,
            opened_at_ns: Some(0),
        };
        let cfg = cfg();
        evaluate_for_track(&mut state, 0.50, cfg.cooldown_ns, &cfg);
        assert_eq!(state.phase, BreakerPhase::Closed);
        assert!(state.opened_at_ns.is_none());
    }

    #[test]
    fn half_open_probe_failure_reopens_with_fresh_timestamp() {
        let mut state = BreakerState {
            phase: BreakerPhase::HalfOpen,
            opened_at_ns: Some(0),
        };
        let cfg = cfg();
        evaluate_for_track(&mut state, 0.99, 9_000_000_000, &cfg);
        assert_eq!(state.phase, BreakerPhase::Open);
        assert_eq!(state.opened_at_ns, Some(9_000_000_000));
    }

    #[test]
    fn cooldown_gate_respects_monotonic_time_not_ratio_alone() {
        let mut state = BreakerState {
            phase: BreakerPhase::Open,
            opened_at_ns: Some(1_000),
        };
        let cfg = cfg();
        let mut rng = StdRng::seed_from_u64(7);
        // Ratio already low, but cooldown hasn't elapsed: stays OPEN.
        let gate = evaluate_for_decide(&mut state, 0.10, 1_500, &cfg, &mut rng);
        assert_eq!(gate, BreakerGate::Open);
    }

    proptest::proptest! {
        #[test]
        fn track_never_jumps_open_to_closed_in_one_step(
            ratio in 0.0f64..2.0,
            elapsed_ns in 0u64..(20 * 60 * 1_000_000_000),
        ) {
            let mut state = BreakerState {
                phase: BreakerPhase::Open,
                opened_at_ns: Some(0),
            };
            let cfg = cfg();
            evaluate_for_track(&mut state, ratio, elapsed_ns, &cfg);
            prop_assert_ne!(state.phase, BreakerPhase::Closed);
        }

        #[test]
        fn closed_only_opens_at_or_above_threshold(
            ratio in 0.0f64..1.0,
        ) {
            let mut state = BreakerState::closed();
            let cfg = cfg();
            evaluate_for_track(&mut state, ratio, 0, &cfg);
            if ratio < cfg.open_fraction {
                prop_assert_eq!(state.phase, BreakerPhase::Closed);
            } else {
                prop_assert_eq!(state.phase, BreakerPhase::Open);
            }
        }
    }
}
