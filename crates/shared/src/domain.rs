use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u64);
    };
}

id_newtype!(RunId);
id_newtype!(Revision);
id_newtype!(SubmissionSeq);

/// Fixed status strings published by the generation workflow.
pub mod status {
    pub const GETTING_GENERATOR: &str = "Getting generator...";
    pub const GENERATING_SKYBOX: &str = "Generating skybox...";
    pub const WAITING_FOR_SKYBOX: &str = "Waiting for skybox...";
    pub const SKYBOX_READY: &str = "Skybox ready!";
    pub const ERROR_GETTING_GENERATOR: &str = "Error getting generator";
    pub const ERROR_GENERATING_SKYBOX: &str = "Error generating skybox";
    pub const ERROR_GETTING_SKYBOX: &str = "Error getting skybox";
    pub const TIMED_OUT_WAITING_FOR_SKYBOX: &str = "Timed out waiting for skybox";

    /// `Wait {remaining} seconds`, with `remaining` already rounded.
    pub fn wait_seconds(remaining: f64) -> String {
        format!("Wait {remaining} seconds")
    }
}

/// The replicated record every participant reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skybox_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission: Option<String>,
    /// World time in seconds of the last accepted submission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_submitted_at: Option<f64>,
}

/// The closed set of mutations accepted by the authoritative store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SessionAction {
    SetStatus(Option<String>),
    SetSkybox(String),
    SetSubmission {
        prompt: String,
        at: f64,
    },
    /// Clears `status` only if it still reads `expected`.
    ClearStatus {
        expected: String,
    },
}

impl SessionAction {
    pub fn name(&self) -> &'static str {
        match self {
            SessionAction::SetStatus(_) => "set_status",
            SessionAction::SetSkybox(_) => "set_skybox",
            SessionAction::SetSubmission { .. } => "set_submission",
            SessionAction::ClearStatus { .. } => "clear_status",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionRejected {
    #[error("submission time {at} is older than last submission at {last}")]
    StaleSubmission { at: f64, last: f64 },
}

impl SessionState {
    /// Applies one action in place. Returns whether anything changed.
    pub fn apply(&mut self, action: &SessionAction) -> Result<bool, ActionRejected> {
        match action {
            SessionAction::SetStatus(status) => Ok(replace(&mut self.status, status.clone())),
            SessionAction::SetSkybox(url) => Ok(replace(&mut self.skybox_url, Some(url.clone()))),
            SessionAction::SetSubmission { prompt, at } => {
                if let Some(last) = self.last_submitted_at {
                    if *at < last {
                        return Err(ActionRejected::StaleSubmission { at: *at, last });
                    }
                }
                self.submission = Some(prompt.clone());
                self.last_submitted_at = Some(*at);
                Ok(true)
            }
            SessionAction::ClearStatus { expected } => {
                if self.status.as_deref() == Some(expected.as_str()) {
                    self.status = None;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}
