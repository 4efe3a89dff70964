use std::{
    collections::HashMap,
    fmt::Write as _,
    sync::{Mutex, OnceLock},
};

static METRICS_STATE: OnceLock<MetricsState> = OnceLock::new();

#[derive(Default)]
pub(crate) struct MetricsState {
    pub(crate) auth_failures: Mutex<HashMap<&'static str, u64>>,
    pub(crate) ws_disconnects: Mutex<HashMap<&'static str, u64>>,
    pub(crate) messages_routed: Mutex<HashMap<&'static str, u64>>,
    pub(crate) store_failures: Mutex<HashMap<&'static str, u64>>,
    pub(crate) frames_rejected: Mutex<HashMap<&'static str, u64>>,
    pub(crate) sessions_replaced: Mutex<HashMap<&'static str, u64>>,
}

pub(crate) fn metrics_state() -> &'static MetricsState {
    METRICS_STATE.get_or_init(MetricsState::default)
}

fn snapshot(counters: &Mutex<HashMap<&'static str, u64>>) -> Vec<(&'static str, u64)> {
    let mut entries: Vec<_> = counters
        .lock()
        .map_or_else(|_| HashMap::new(), |guard| guard.clone())
        .into_iter()
        .collect();
    entries.sort_by_key(|(label, _)| *label);
    entries
}

fn render_counter(
    output: &mut String,
    name: &str,
    help: &str,
    label: &str,
    counters: &Mutex<HashMap<&'static str, u64>>,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} counter");
    for (value_label, value) in snapshot(counters) {
        let _ = writeln!(output, "{name}{{{label}=\"{value_label}\"}} {value}");
    }
}

pub(crate) fn render_metrics() -> String {
    let state = metrics_state();
    let mut output = String::new();
    render_counter(
        &mut output,
        "courier_auth_failures_total",
        "Count of auth-related failures by reason",
        "reason",
        &state.auth_failures,
    );
    render_counter(
        &mut output,
        "courier_ws_disconnects_total",
        "Count of chat websocket disconnects by reason",
        "reason",
        &state.ws_disconnects,
    );
    render_counter(
        &mut output,
        "courier_messages_routed_total",
        "Count of persisted messages by live routing outcome",
        "outcome",
        &state.messages_routed,
    );
    render_counter(
        &mut output,
        "courier_store_failures_total",
        "Count of message store failures by operation",
        "operation",
        &state.store_failures,
    );
    render_counter(
        &mut output,
        "courier_frames_rejected_total",
        "Count of inbound chat frames rejected by reason",
        "reason",
        &state.frames_rejected,
    );
    render_counter(
        &mut output,
        "courier_sessions_replaced_total",
        "Count of chat sessions displaced by a newer connection, by policy",
        "policy",
        &state.sessions_replaced,
    );
    output
}

fn increment(counters: &Mutex<HashMap<&'static str, u64>>, label: &'static str) {
    if let Ok(mut counters) = counters.lock() {
        let entry = counters.entry(label).or_insert(0);
        *entry += 1;
    }
}

pub(crate) fn record_auth_failure(reason: &'static str) {
    increment(&metrics_state().auth_failures, reason);
}

pub(crate) fn record_ws_disconnect(reason: &'static str) {
    increment(&metrics_state().ws_disconnects, reason);
}

pub(crate) fn record_message_routed(outcome: &'static str) {
    increment(&metrics_state().messages_routed, outcome);
}

pub(crate) fn record_store_failure(operation: &'static str) {
    increment(&metrics_state().store_failures, operation);
}

pub(crate) fn record_frame_rejected(reason: &'static str) {
    increment(&metrics_state().frames_rejected, reason);
}

pub(crate) fn record_session_replaced(policy: &'static str) {
    increment(&metrics_state().sessions_replaced, policy);
}
