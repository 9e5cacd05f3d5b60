use shared::{
    domain::{status, SessionAction},
    protocol::SessionSnapshot,
};
use tracing::{debug, info};

use crate::{error::SessionError, store::SessionStore};

pub const DEFAULT_COOLDOWN_SECONDS: f64 = 120.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateDecision {
    Accept,
    /// `remaining` is already rounded to two decimals.
    Reject { remaining: f64 },
}

/// Cooldown between accepted submissions.
#[derive(Debug, Clone, Copy)]
pub struct SubmissionGate {
    cooldown_seconds: f64,
}

impl Default for SubmissionGate {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN_SECONDS)
    }
}

impl SubmissionGate {
    pub fn new(cooldown_seconds: f64) -> Self {
        Self { cooldown_seconds }
    }

    pub fn evaluate(&self, now: f64, last_submitted_at: Option<f64>) -> GateDecision {
        let Some(last) = last_submitted_at else {
            return GateDecision::Accept;
        };
        let remaining = self.cooldown_seconds - (now - last);
        if remaining > 0.0 {
            GateDecision::Reject {
                remaining: round2(remaining),
            }
        } else {
            GateDecision::Accept
        }
    }

    /// Accepts `prompt` into the store or publishes a wait message.
    ///
    /// On acceptance the prompt and `now` are recorded together; on
    /// rejection only `status` changes.
    pub fn submit(
        &self,
        store: &SessionStore,
        prompt: String,
        now: f64,
    ) -> Result<SessionSnapshot, SessionError> {
        let (decision, snapshot) = store.transact(|state| {
            let decision = self.evaluate(now, state.last_submitted_at);
            let action = match decision {
                GateDecision::Accept => SessionAction::SetSubmission { prompt, at: now },
                GateDecision::Reject { remaining } => {
                    SessionAction::SetStatus(Some(status::wait_seconds(remaining)))
                }
            };
            (action, decision)
        })?;

        match decision {
            GateDecision::Accept => {
                info!(
                    submission_seq = snapshot.submission_seq.0,
                    at = now,
                    "accepted skybox prompt"
                );
                Ok(snapshot)
            }
            GateDecision::Reject { remaining } => {
                debug!(remaining, "rejected prompt during cooldown");
                Err(SessionError::Cooldown { remaining })
            }
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
