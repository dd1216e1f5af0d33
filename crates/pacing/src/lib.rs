use pacer_core::types::PacingMode;

/// Result of consulting the pacing policy, before the Bernoulli draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PacingOutcome {
    /// Continue to the Bernoulli draw against this throttle rate.
    Throttle(f64),
    /// Budget is gone (`B == 0` or `S >= B`); deny outright.
    BudgetExhausted,
}

/// Pure function from (mode, budget, spend so far, local hour) to a
/// throttle decision. Given identical inputs it always returns the
/// identical output; the only randomized step is the caller's
/// subsequent Bernoulli draw against the returned rate.
pub fn compute_throttle(
    mode: PacingMode,
    daily_budget_cents: i64,
    day_spent_cents: i64,
    hourly_spent_cents: &[i64; 24],
    local_hour: f64,
    overshoot_cap: f64,
) -> PacingOutcome {
    if daily_budget_cents <= 0 || day_spent_cents >= daily_budget_cents {
        return PacingOutcome::BudgetExhausted;
    }

    let b = daily_budget_cents as f64;
    let s = day_spent_cents as f64;
    let time_progress = (local_hour / 24.0).clamp(0.0, 1.0);

    let throttle = match mode {
        PacingMode::Even => target_curve_throttle(s, b * time_progress, overshoot_cap),
        PacingMode::Asap => 0.0,
        PacingMode::FrontLoaded => {
            let target = b * (1.0 - (1.0 - time_progress).powi(2));
            target_curve_throttle(s, target, overshoot_cap)
        }
        PacingMode::Adaptive => adaptive_throttle(s, b, hourly_spent_cents, local_hour, overshoot_cap),
    };

    PacingOutcome::Throttle(throttle.clamp(0.0, 1.0))
}

/// Shared EVEN/FRONT_LOADED shape: no throttle below target, full
/// throttle at `overshoot_cap` times target, linear in between.
fn target_curve_throttle(spent: f64, target: f64, overshoot_cap: f64) -> f64 {
    if target <= 0.0 {
        return if spent <= 0.0 { 0.0 } else { 1.0 };
    }
    if spent <= target {
        0.0
    } else if spent >= target * overshoot_cap {
        1.0
    } else {
        (spent / target - 1.0) / (overshoot_cap - 1.0)
    }
}

/// EWMA (α=0.3) of completed-hour spend, projected to end of day.
/// Degenerates to EVEN when the current hour has produced no
/// completed-hour samples yet.
fn adaptive_throttle(
    spent: f64,
    budget: f64,
    hourly_spent_cents: &[i64; 24],
    local_hour: f64,
    overshoot_cap: f64,
) -> f64 {
    const ALPHA: f64 = 0.3;
    let current_hour_idx = (local_hour as usize).min(24);

    if current_hour_idx == 0 {
        return target_curve_throttle(spent, budget * (local_hour / 24.0), overshoot_cap);
    }

    let mut ewma = hourly_spent_cents[0] as f64;
    for h in hourly_spent_cents.iter().take(current_hour_idx).skip(1) {
        ewma = ALPHA * (*h as f64) + (1.0 - ALPHA) * ewma;
    }

    let remaining_hours = 24.0 - local_hour;
    let projected = spent + ewma * remaining_hours;

    if projected <= budget {
        0.0
    } else {
        ((projected - budget) / budget).clamp(0.0, 1.0)
    }
}
