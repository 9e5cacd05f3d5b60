use shared::domain::{status, ActionRejected, RunId};
use skybox_client::GenerationError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("submission cooldown active: {remaining} seconds remaining")]
    Cooldown { remaining: f64 },
    #[error(transparent)]
    Rejected(#[from] ActionRejected),
}

/// Why a generation run ended without a skybox.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("failed to get generator: {0}")]
    GeneratorListing(#[source] GenerationError),
    #[error("failed to submit imagine request: {0}")]
    JobSubmission(#[source] GenerationError),
    #[error("failed to poll imagine request: {0}")]
    Polling(#[source] GenerationError),
    #[error("no skybox after {attempts} polls")]
    TimedOut { attempts: u32 },
    #[error("run {0:?} was superseded by a newer submission")]
    Superseded(RunId),
    #[error(transparent)]
    Store(#[from] SessionError),
}

impl WorkflowError {
    /// The status participants see for this failure, if any.
    pub fn status_message(&self) -> Option<&'static str> {
        match self {
            WorkflowError::GeneratorListing(_) => Some(status::ERROR_GETTING_GENERATOR),
            WorkflowError::JobSubmission(_) => Some(status::ERROR_GENERATING_SKYBOX),
            WorkflowError::Polling(_) => Some(status::ERROR_GETTING_SKYBOX),
            WorkflowError::TimedOut { .. } => Some(status::TIMED_OUT_WAITING_FOR_SKYBOX),
            WorkflowError::Superseded(_) | WorkflowError::Store(_) => None,
        }
    }

    /// The generation endpoint that failed, when a service call caused it.
    pub fn endpoint(&self) -> Option<&'static str> {
        match self {
            WorkflowError::GeneratorListing(err)
            | WorkflowError::JobSubmission(err)
            | WorkflowError::Polling(err) => err.endpoint(),
            _ => None,
        }
    }
}
