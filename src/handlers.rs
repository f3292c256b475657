use log::{debug, info, warn};
use serde_json::Value;
use tokio::time::Instant;

use crate::channel::ClientChannel;
use crate::error::SignalError;
use crate::events::{ClientEvent, ServerEvent};
use crate::state::{CallRecord, CallStatus, PresenceStatus, ServerState, SharedState};
use crate::{CallId, ConnId, UserId};

pub const REASON_USER_ENDED: &str = "User ended the call";
pub const REASON_DISCONNECTED: &str = "User disconnected";
pub const REASON_NO_ANSWER: &str = "No answer";
pub const REASON_TIMEOUT: &str = "Timeout";
pub const REASON_OFFER_STALLED: &str = "No answer from receiver";

/// Synthetic user id stamped on `call_ended` events that no participant
/// initiated (timeouts, sweeps).
pub const SYSTEM_USER: &str = "system";

// ============================================
// Dispatch
// ============================================

/// Route one inbound event to its handler. Errors are returned to the
/// connection loop, which answers with an `error` event and keeps the
/// socket open.
pub async fn dispatch(
    shared: &SharedState,
    channel: &ClientChannel,
    event: ClientEvent,
) -> Result<(), SignalError> {
    match event {
        ClientEvent::Register { user_id } => handle_register(shared, channel, user_id).await,
        ClientEvent::UserStatus { user_id, status } => {
            handle_user_status(shared, user_id, status).await
        }
        ClientEvent::CallInitiate {
            call_id,
            caller_id,
            receiver_ids,
            call_type,
            extra_meta,
        } => {
            handle_call_initiate(
                shared,
                channel,
                call_id,
                caller_id,
                receiver_ids,
                call_type,
                extra_meta,
            )
            .await
        }
        ClientEvent::CallAccept {
            call_id,
            receiver_id,
        } => handle_call_accept(shared, call_id, receiver_id).await,
        ClientEvent::CallReject { call_id, user_id } => {
            handle_call_reject(shared, call_id, user_id).await
        }
        ClientEvent::CallEnd { call_id, user_id } => handle_call_end(shared, call_id, user_id).await,
        ClientEvent::UserReady { call_id, user_id } => {
            handle_user_ready(shared, call_id, user_id).await
        }
        ClientEvent::WebrtcOffer {
            call_id,
            from,
            to,
            sdp,
        } => handle_webrtc_offer(shared, call_id, from, to, sdp).await,
        ClientEvent::WebrtcAnswer {
            call_id,
            from,
            to,
            sdp,
        } => handle_webrtc_answer(shared, call_id, from, to, sdp).await,
        ClientEvent::IceCandidate {
            call_id,
            from,
            to,
            candidate,
        } => handle_ice_candidate(shared, call_id, from, to, candidate).await,
    }
}

// ============================================
// Registration and presence
// ============================================

async fn handle_register(
    shared: &SharedState,
    channel: &ClientChannel,
    user_id: UserId,
) -> Result<(), SignalError> {
    if user_id.trim().is_empty() {
        return Err(SignalError::InvalidUser);
    }

    let mut st = shared.lock().await;

    // Evict a previous channel bound to the same id.
    if let Some(old) = st.directory.resolve(&user_id).cloned() {
        if old.conn_id != channel.conn_id {
            info!(
                "user {} re-registered; disconnecting old connection {}",
                user_id, old.conn_id
            );
            old.send(&ServerEvent::ForceDisconnect {
                message: "Another connection registered this user".to_string(),
            });
            old.close();
            // The old connection's close must not tear down the new binding.
            st.conn_users.remove(&old.conn_id);
        }
    }

    st.directory.insert(user_id.clone(), channel.clone());
    st.conn_users
        .insert(channel.conn_id.clone(), user_id.clone());

    // Presence survives a reconnect while the user is bound to a live call;
    // otherwise registration resets it to available.
    let live_call = st
        .presence
        .get(&user_id)
        .filter(|e| e.status.is_call_bound())
        .and_then(|e| e.current_call.clone())
        .filter(|call_id| st.calls.contains(call_id));
    match live_call {
        Some(call_id) => {
            if let Some(call) = st.calls.get_mut(&call_id) {
                call.bind_channel(user_id.clone(), channel.clone());
            }
        }
        None => st.presence.set_available(&user_id),
    }

    channel.send(&ServerEvent::Registered { success: true });

    // Queued events arrive before any other traffic on the new channel.
    for event in st.pending.drain(&user_id) {
        channel.send(&event);
    }

    info!("registered user {} on connection {}", user_id, channel.conn_id);
    Ok(())
}

async fn handle_user_status(
    shared: &SharedState,
    user_id: UserId,
    status: String,
) -> Result<(), SignalError> {
    let Some(status) = PresenceStatus::parse(&status) else {
        warn!("ignoring unknown status {:?} for user {}", status, user_id);
        return Ok(());
    };

    let mut st = shared.lock().await;

    let call_bound = st
        .presence
        .get(&user_id)
        .filter(|e| e.status.is_call_bound())
        .and_then(|e| e.current_call.as_ref())
        .map(|call_id| st.calls.contains(call_id))
        .unwrap_or(false);
    if call_bound {
        debug!(
            "ignoring status change for {} while bound to a live call",
            user_id
        );
        return Ok(());
    }

    match status {
        PresenceStatus::Offline => st.presence.set_offline(&user_id),
        PresenceStatus::Available => st.presence.set_available(&user_id),
        PresenceStatus::Busy => st.presence.set_busy(&user_id, None),
        // Ringing and in-call are derived from call state, not client-set.
        PresenceStatus::Ringing | PresenceStatus::InCall => {
            warn!(
                "ignoring client-set call status {:?} for {}",
                status.as_str(),
                user_id
            );
        }
    }
    Ok(())
}

// ============================================
// Call lifecycle
// ============================================

async fn handle_call_initiate(
    shared: &SharedState,
    channel: &ClientChannel,
    call_id: CallId,
    caller_id: UserId,
    receiver_ids: Vec<UserId>,
    call_type: String,
    extra_meta: Option<Value>,
) -> Result<(), SignalError> {
    if call_id.is_empty() || caller_id.is_empty() {
        return Err(SignalError::InvalidCallData);
    }
    let receiver_id = receiver_ids
        .first()
        .filter(|r| !r.is_empty())
        .cloned()
        .ok_or(SignalError::InvalidCallData)?;

    let mut st = shared.lock().await;

    if !st.directory.is_current(&caller_id, &channel.conn_id) {
        return Err(SignalError::CallerNotConnected);
    }

    // A party already bound to a different call cannot enter this one;
    // overwriting their presence would leave the other call's pointer
    // dangling. Re-initiating the same call id is the overwrite path and
    // falls through.
    if bound_to_another_call(&st, &receiver_id, &call_id) {
        channel.send(&ServerEvent::CallBusy {
            call_id,
            receiver_id,
        });
        return Ok(());
    }
    if bound_to_another_call(&st, &caller_id, &call_id) {
        info!("caller {} initiated {} while already in a call", caller_id, call_id);
        channel.send(&ServerEvent::CallBusy {
            call_id,
            receiver_id: caller_id,
        });
        return Ok(());
    }

    if st.calls.remove(&call_id).is_some() {
        warn!("replacing stale call record {}", call_id);
        st.timers.cancel(&call_id);
    }

    let record = CallRecord::new(
        call_id.clone(),
        caller_id.clone(),
        receiver_ids.clone(),
        call_type.clone(),
        extra_meta.clone(),
        channel.clone(),
    );
    st.calls.insert(record);
    st.presence.set_busy(&caller_id, Some(call_id.clone()));

    let incoming = ServerEvent::IncomingCall {
        call_id: call_id.clone(),
        caller_id: caller_id.clone(),
        receiver_ids,
        call_type,
        extra_meta,
    };
    match st.directory.resolve(&receiver_id).cloned() {
        Some(receiver_channel) => {
            st.presence.set_ringing(&receiver_id, call_id.clone());
            receiver_channel.send(&incoming);
        }
        None => {
            info!(
                "receiver {} offline; queueing incoming_call for {}",
                receiver_id, call_id
            );
            st.pending.enqueue(&receiver_id, incoming);
        }
    }

    channel.send(&ServerEvent::CallRinging {
        call_id: call_id.clone(),
        receiver_id,
    });

    arm_no_answer_timer(shared, &mut st, call_id);
    Ok(())
}

async fn handle_call_accept(
    shared: &SharedState,
    call_id: CallId,
    receiver_id: UserId,
) -> Result<(), SignalError> {
    let mut st = shared.lock().await;

    {
        let call = st.calls.get(&call_id).ok_or(SignalError::CallNotFound)?;
        if !call.is_participant(&receiver_id) {
            return Err(SignalError::InvalidReceiver);
        }
    }
    let receiver_channel = st
        .directory
        .resolve(&receiver_id)
        .cloned()
        .ok_or(SignalError::ReceiverNotConnected)?;

    let already_active = st
        .calls
        .get(&call_id)
        .map(|c| c.status == CallStatus::Active)
        .unwrap_or(false);
    if already_active {
        // Idempotent re-accept: refresh the binding and re-arm signaling for
        // the accepter only.
        if let Some(call) = st.calls.get_mut(&call_id) {
            call.bind_channel(receiver_id.clone(), receiver_channel.clone());
        }
        receiver_channel.send(&ServerEvent::StartSignaling { call_id });
        return Ok(());
    }

    st.timers.cancel(&call_id);

    let participants = match st.calls.get_mut(&call_id) {
        Some(call) => {
            call.status = CallStatus::Active;
            call.bind_channel(receiver_id.clone(), receiver_channel);
            call.participants.clone()
        }
        None => return Err(SignalError::CallNotFound),
    };

    for participant in &participants {
        st.presence.set_in_call(participant, call_id.clone());
    }

    // call_accepted reaches every non-accepting participant before any
    // start_signaling on the same channel.
    for participant in participants.iter().filter(|p| **p != receiver_id) {
        route_to(
            &mut st,
            &call_id,
            participant,
            ServerEvent::CallAccepted {
                call_id: call_id.clone(),
                receiver_id: receiver_id.clone(),
            },
        );
    }
    for (_, bound_channel) in validated_bound(&st, &call_id) {
        bound_channel.send(&ServerEvent::StartSignaling {
            call_id: call_id.clone(),
        });
    }

    info!("call {} accepted by {}", call_id, receiver_id);
    Ok(())
}

async fn handle_call_reject(
    shared: &SharedState,
    call_id: CallId,
    user_id: UserId,
) -> Result<(), SignalError> {
    let mut st = shared.lock().await;

    let Some(call) = st.calls.remove(&call_id) else {
        debug!("reject for unknown call {}; ignoring", call_id);
        return Ok(());
    };
    st.timers.cancel(&call_id);

    for participant in &call.participants {
        st.presence.clear_call_if(participant, &call_id);
    }
    deliver(
        &mut st,
        &call.caller_id,
        ServerEvent::CallRejected { call_id, user_id },
    );
    Ok(())
}

async fn handle_call_end(
    shared: &SharedState,
    call_id: CallId,
    user_id: UserId,
) -> Result<(), SignalError> {
    let mut st = shared.lock().await;

    let remaining = match st.calls.get_mut(&call_id) {
        Some(call) => {
            if !call.is_participant(&user_id) {
                debug!("call_end from non-participant {} on {}", user_id, call_id);
                return Ok(());
            }
            call.remove_participant(&user_id);
            call.participants.clone()
        }
        None => {
            debug!("end for unknown call {}; ignoring", call_id);
            return Ok(());
        }
    };

    st.presence.clear_call_if(&user_id, &call_id);

    for (_, bound_channel) in validated_bound(&st, &call_id) {
        bound_channel.send(&ServerEvent::CallEnded {
            call_id: call_id.clone(),
            user_id: user_id.clone(),
            reason: REASON_USER_ENDED.to_string(),
        });
    }

    // An explicit hangup in a two-party call frees the peer as well; only a
    // group call survives a single departure.
    if remaining.len() < 2 {
        if let Some(call) = st.calls.remove(&call_id) {
            for participant in &call.participants {
                st.presence.clear_call_if(participant, &call_id);
            }
        }
        st.timers.cancel(&call_id);
        info!("call {} ended by {}", call_id, user_id);
    }
    Ok(())
}

async fn handle_user_ready(
    shared: &SharedState,
    call_id: CallId,
    user_id: UserId,
) -> Result<(), SignalError> {
    let mut st = shared.lock().await;

    if !st.calls.contains(&call_id) {
        debug!("user_ready for unknown call {}; ignoring", call_id);
        return Ok(());
    }

    let live_channel = st.directory.resolve(&user_id).cloned();
    let active = match st.calls.get_mut(&call_id) {
        Some(call) => {
            // A participant that disconnected mid-call re-attaches here.
            call.add_participant(&user_id);
            if let Some(channel) = live_channel {
                call.bind_channel(user_id.clone(), channel);
            }
            call.status == CallStatus::Active
        }
        None => return Ok(()),
    };
    if active {
        st.presence.set_in_call(&user_id, call_id.clone());
    }

    let participants = st
        .calls
        .get(&call_id)
        .map(|c| c.participants.clone())
        .unwrap_or_default();
    let bound = validated_bound(&st, &call_id);
    let all_bound = !participants.is_empty()
        && participants
            .iter()
            .all(|p| bound.iter().any(|(user, _)| user == p));
    if all_bound {
        for (_, bound_channel) in bound {
            bound_channel.send(&ServerEvent::StartSignaling {
                call_id: call_id.clone(),
            });
        }
    }
    Ok(())
}

// ============================================
// Signal routing
// ============================================

async fn handle_webrtc_offer(
    shared: &SharedState,
    call_id: CallId,
    from: UserId,
    to: UserId,
    sdp: Value,
) -> Result<(), SignalError> {
    if from == to {
        debug!("dropping loopback offer on {}", call_id);
        return Ok(());
    }
    let mut st = shared.lock().await;

    if let Some(call) = st.calls.get_mut(&call_id) {
        call.offer_attempts += 1;
        call.last_offer_time = Some(Instant::now());
    } else {
        debug!("offer for unknown call {}; routing anyway", call_id);
    }

    route_to(
        &mut st,
        &call_id,
        &to,
        ServerEvent::WebrtcOffer { call_id: call_id.clone(), from, sdp },
    );
    Ok(())
}

async fn handle_webrtc_answer(
    shared: &SharedState,
    call_id: CallId,
    from: UserId,
    to: UserId,
    sdp: Value,
) -> Result<(), SignalError> {
    if from == to {
        debug!("dropping loopback answer on {}", call_id);
        return Ok(());
    }
    let mut st = shared.lock().await;

    if let Some(call) = st.calls.get_mut(&call_id) {
        call.offer_attempts = 0;
    }

    route_to(
        &mut st,
        &call_id,
        &to,
        ServerEvent::WebrtcAnswer { call_id: call_id.clone(), from, sdp },
    );
    Ok(())
}

async fn handle_ice_candidate(
    shared: &SharedState,
    call_id: CallId,
    from: UserId,
    to: UserId,
    candidate: Value,
) -> Result<(), SignalError> {
    if from == to {
        debug!("dropping loopback candidate on {}", call_id);
        return Ok(());
    }
    let mut st = shared.lock().await;

    // Buffering is best-effort; forwarding proceeds whether or not the call
    // record exists.
    if let Some(call) = st.calls.get_mut(&call_id) {
        call.buffer_candidate(&to, from.clone(), candidate.clone(), Instant::now());
    }

    route_to(
        &mut st,
        &call_id,
        &to,
        ServerEvent::IceCandidate { call_id: call_id.clone(), from, candidate },
    );
    Ok(())
}

/// Whether the user's presence binds them to a live call other than
/// `call_id`. A plain `busy` set without a call also counts.
fn bound_to_another_call(st: &ServerState, user_id: &str, call_id: &str) -> bool {
    match st.presence.get(user_id) {
        Some(entry) if entry.status.is_call_bound() => {
            entry.current_call.as_deref() != Some(call_id)
        }
        _ => false,
    }
}

/// Common routing rule: prefer the call's cached channel when it is still
/// the directory's current one, fall back to the directory, and queue for an
/// unreachable target.
fn route_to(st: &mut ServerState, call_id: &str, to: &str, event: ServerEvent) {
    let cached = st
        .calls
        .get(call_id)
        .and_then(|c| c.participant_channels.get(to))
        .cloned();
    let target = match cached {
        Some(channel) if st.directory.is_current(to, &channel.conn_id) => Some(channel),
        _ => st.directory.resolve(to).cloned(),
    };
    match target {
        Some(channel) => channel.send(&event),
        None => {
            debug!("target {} unreachable; queueing event", to);
            st.pending.enqueue(to, event);
        }
    }
}

/// Deliver a lifecycle event to a user's live channel, or queue it.
fn deliver(st: &mut ServerState, user_id: &str, event: ServerEvent) {
    match st.directory.resolve(user_id).cloned() {
        Some(channel) => channel.send(&event),
        None => st.pending.enqueue(user_id, event),
    }
}

/// Participants whose cached channel is still the directory's current one.
fn validated_bound(st: &ServerState, call_id: &str) -> Vec<(UserId, ClientChannel)> {
    st.calls
        .get(call_id)
        .map(|call| {
            call.participant_channels
                .iter()
                .filter(|(user, channel)| st.directory.is_current(user, &channel.conn_id))
                .map(|(user, channel)| (user.clone(), channel.clone()))
                .collect()
        })
        .unwrap_or_default()
}

// ============================================
// Timers and terminal sweeps
// ============================================

fn arm_no_answer_timer(shared: &SharedState, st: &mut ServerState, call_id: CallId) {
    let delay = st.config.no_answer_timeout;
    let shared = shared.clone();
    let timer_call_id = call_id.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let mut st = shared.lock().await;
        expire_unanswered(&mut st, &timer_call_id, REASON_NO_ANSWER, REASON_TIMEOUT);
    });
    st.timers.arm(call_id, handle);
}

/// Tear down an `initiated` call nobody answered. Shared by the no-answer
/// timer and the sweeper's offer-stall check; a firing that lost the race
/// with accept/reject observes a missing or advanced record and backs off.
pub fn expire_unanswered(
    st: &mut ServerState,
    call_id: &str,
    timeout_reason: &str,
    ended_reason: &str,
) {
    match st.calls.get(call_id) {
        Some(call) if call.status == CallStatus::Initiated => {}
        _ => return,
    }

    let bound = validated_bound(st, call_id);
    let Some(call) = st.calls.remove(call_id) else {
        return;
    };
    st.timers.forget(call_id);

    info!("call {} expired: {}", call_id, timeout_reason);
    deliver(
        st,
        &call.caller_id,
        ServerEvent::CallTimeout {
            call_id: call_id.to_string(),
            reason: timeout_reason.to_string(),
        },
    );
    for (user, bound_channel) in bound {
        if user != call.caller_id {
            bound_channel.send(&ServerEvent::CallEnded {
                call_id: call_id.to_string(),
                user_id: SYSTEM_USER.to_string(),
                reason: ended_reason.to_string(),
            });
        }
    }
    for participant in &call.participants {
        st.presence.clear_call_if(participant, call_id);
    }
}

// ============================================
// Disconnect cleanup
// ============================================

/// Invoked by the connection loop when a socket closes. Detaches the user
/// from their call (the record survives for a reconnect unless nobody is
/// left) and marks them offline.
pub async fn handle_disconnect(shared: &SharedState, conn_id: &ConnId) {
    let mut st = shared.lock().await;

    let Some(user_id) = st.conn_users.remove(conn_id) else {
        return;
    };
    if !st.directory.unbind(&user_id, conn_id) {
        // A re-registration superseded this channel; its state now belongs
        // to the new connection.
        return;
    }

    if let Some(call_id) = st.presence.current_call(&user_id).cloned() {
        let removed_last = match st.calls.get_mut(&call_id) {
            Some(call) => {
                call.remove_participant(&user_id);
                call.participants.is_empty()
            }
            None => false,
        };
        if removed_last {
            st.calls.remove(&call_id);
            st.timers.cancel(&call_id);
            info!("call {} dropped with its last participant {}", call_id, user_id);
        } else {
            for (_, bound_channel) in validated_bound(&st, &call_id) {
                bound_channel.send(&ServerEvent::CallEnded {
                    call_id: call_id.clone(),
                    user_id: user_id.clone(),
                    reason: REASON_DISCONNECTED.to_string(),
                });
            }
        }
    }

    st.presence.set_offline(&user_id);
    info!("user {} disconnected ({})", user_id, conn_id);
}
