use log::debug;
use tokio::time::Instant;

use crate::handlers::{self, REASON_OFFER_STALLED};
use crate::state::{CallStatus, ServerState, SharedState};
use crate::CallId;

/// Periodic safety net over the call registry. Runs under the same lock as
/// the event handlers; a decision invalidated by a concurrent handler is
/// simply not taken the next tick.
pub async fn run(shared: SharedState) {
    let tick = { shared.lock().await.config.sweep_interval };
    let mut interval = tokio::time::interval(tick);
    loop {
        interval.tick().await;
        let mut st = shared.lock().await;
        sweep(&mut st);
    }
}

pub fn sweep(st: &mut ServerState) {
    let now = Instant::now();

    // Initiated calls whose offer has gone unanswered are torn down well
    // before the coarse no-answer timer would fire.
    let stall = st.config.offer_stall_timeout;
    let stalled: Vec<CallId> = st
        .calls
        .iter()
        .filter(|(_, call)| {
            call.status == CallStatus::Initiated
                && call.offer_attempts > 0
                && call
                    .last_offer_time
                    .map(|t| now.duration_since(t) > stall)
                    .unwrap_or(false)
        })
        .map(|(call_id, _)| call_id.clone())
        .collect();
    for call_id in stalled {
        debug!("sweeping stalled call {}", call_id);
        handlers::expire_unanswered(st, &call_id, REASON_OFFER_STALLED, REASON_OFFER_STALLED);
    }

    let ttl = st.config.candidate_ttl;
    for (_, call) in st.calls.iter_mut() {
        for buffer in call.ice_buffer.values_mut() {
            buffer.retain(|candidate| now.duration_since(candidate.ts) <= ttl);
        }
        call.ice_buffer.retain(|_, buffer| !buffer.is_empty());
    }
}
