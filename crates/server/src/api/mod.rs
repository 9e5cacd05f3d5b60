use shared::{
    domain::status,
    error::{ApiError, ErrorCode},
    protocol::SessionSnapshot,
};
use session::SessionError;
use tracing::debug;

use crate::app_state::AppState;

/// Runs a prompt through the cooldown gate at the current world time.
pub(crate) fn submit_prompt(state: &AppState, prompt: String) -> Result<SessionSnapshot, ApiError> {
    let now = state.clock.now();
    state
        .gate
        .submit(&state.store, prompt, now)
        .map_err(|err| {
            debug!(%err, now, "submission refused");
            api_error(err)
        })
}

pub(crate) fn api_error(err: SessionError) -> ApiError {
    match err {
        SessionError::Cooldown { remaining } => {
            ApiError::rate_limited(status::wait_seconds(remaining))
        }
        SessionError::Rejected(rejected) => ApiError::new(ErrorCode::Conflict, rejected.to_string()),
    }
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
