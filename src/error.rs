use thiserror::Error;

/// Handler failures surfaced to the client as an `error` event.
///
/// The display form is the wire token; anything that is not a client mistake
/// (stale-record overwrites, offline targets, loopback signals) is logged
/// server-side instead of raising one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SignalError {
    /// Malformed or missing user id on `register`.
    #[error("invalid_user")]
    InvalidUser,
    /// Missing call id, caller id, or empty receiver list on `call_initiate`.
    #[error("invalid_call_data")]
    InvalidCallData,
    /// Initiator has no live channel under the declared caller id.
    #[error("caller_not_connected")]
    CallerNotConnected,
    /// `call_accept` references an unknown call.
    #[error("call_not_found")]
    CallNotFound,
    /// `call_accept` by a sender whose channel is no longer live.
    #[error("receiver_not_connected")]
    ReceiverNotConnected,
    /// `call_accept` by a user that is not in the call's participant list.
    #[error("invalid_receiver")]
    InvalidReceiver,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_tokens_match_the_error_contract() {
        assert_eq!(SignalError::InvalidUser.to_string(), "invalid_user");
        assert_eq!(SignalError::InvalidCallData.to_string(), "invalid_call_data");
        assert_eq!(
            SignalError::CallerNotConnected.to_string(),
            "caller_not_connected"
        );
        assert_eq!(SignalError::CallNotFound.to_string(), "call_not_found");
        assert_eq!(
            SignalError::ReceiverNotConnected.to_string(),
            "receiver_not_connected"
        );
        assert_eq!(SignalError::InvalidReceiver.to_string(), "invalid_receiver");
    }
}
