use tracing::trace;

// Trace-based metrics helpers; the Prometheus recorder scrapes what the
// subscriber emits without pulling metric macros into every call site.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "pazarsync.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn action_elapsed(action: &'static str, elapsed_ms: u128) {
    trace!(
        target = "pazarsync.metrics",
        action = action,
        elapsed_ms = elapsed_ms as u64,
        "action_elapsed"
    );
}
