use std::sync::Arc;

use session::{Clock, SessionStore, SubmissionGate};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) store: SessionStore,
    pub(crate) gate: SubmissionGate,
    pub(crate) clock: Arc<dyn Clock>,
}
