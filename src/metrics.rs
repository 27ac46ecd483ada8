use tracing::trace;

// Lightweight metrics helpers; trace-based so they stay safe without a
// recorder installed (tests, local runs).

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "pixelphraser.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn inc_outcome(outcome: &'static str) {
    trace!(
        target = "pixelphraser.metrics",
        outcome = outcome,
        "event_outcome_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "pixelphraser.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}
